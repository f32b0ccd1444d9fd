//! Lock-loss detection and recovery.
//!
//! A slave that loses lock stops transmitting and polls every 100 ms until
//! the PLL and the frequency regulator both report stable again.

use std::time::{Duration, Instant};

use crate::domain::{DriverEvent, MostResult};
use crate::ports::{ControlLines, RegisterBus};

use super::registers::*;
use super::Os8104;

pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Human-readable list of the fault flags set in a bXSR value.
pub fn describe_fault(xsr: u8) -> String {
    const FLAGS: &[(u8, &str)] = &[
        (XSR_TRANS_LOCK_ACT, "transceiver lock"),
        (XSR_SPDIF_LOCK_ACT, "SPDIF lock"),
        (XSR_FREQ_REG_LOCKED, "frequency regulator locked"),
        (XSR_ERR_ACT, "coding error"),
        (XSR_FREQ_REG_ACT, "frequency regulator active"),
    ];
    let names: Vec<&str> = FLAGS
        .iter()
        .filter(|(bit, _)| xsr & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

impl<B: RegisterBus, L: ControlLines> Os8104<B, L> {
    /// Classify an error interrupt from the bXSR value.
    ///
    /// Lock loss on a locked slave marks the transceiver unlocked and starts
    /// the lock poll; the error interrupt stays unacknowledged until lock
    /// returns. Anything else is acknowledged immediately.
    pub(super) fn parse_fault(&mut self, xsr: u8, now: Instant) -> MostResult<()> {
        log::debug!("Transceiver fault 0x{xsr:02x}: {}", describe_fault(xsr));
        let lock_lost = xsr & XSR_TRANS_LOCK_ACT != 0;
        if lock_lost && self.transceiver_locked && !self.master {
            log::warn!("Transceiver lost lock");
            self.transceiver_locked = false;
            self.emit(DriverEvent::Unlocked);
            self.lock_poll = Some(now + LOCK_POLL_INTERVAL);
            return Ok(());
        }
        self.set_bits(REG_MSGC, MSGC_RESET_ERR_INT)
    }

    /// Check whether the chip is locked. On success publishes `Locked`,
    /// acknowledges the error interrupt and stops the lock poll.
    pub fn check_for_lock(&mut self) -> MostResult<bool> {
        let pll_unlocked = self.read(REG_CM2)? & CM2_UNLOCKED != 0;
        let regulating = self.read(REG_XSR)? & XSR_FREQ_REG_ACT != 0;
        if pll_unlocked || regulating {
            log::debug!("Still unlocked (pll {pll_unlocked}, regulator {regulating})");
            return Ok(false);
        }
        log::info!("Transceiver locked");
        self.emit(DriverEvent::Locked);
        self.set_bits(REG_MSGC, MSGC_RESET_ERR_INT)?;
        self.transceiver_locked = true;
        self.lock_poll = None;
        Ok(true)
    }
}
