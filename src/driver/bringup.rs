//! Reset sequencing and one-shot configuration.
//!
//! Idle → Resetting (reset held low for 2 ms) → AwaitingFirstInterrupt →
//! Configuring → Operational. The chip raises its interrupt line once it is
//! out of reset; that first interrupt is consumed here and triggers the
//! register table. The chip then settles for 10 ms before the allocation
//! cleanup and lock check make it operational.

use std::time::{Duration, Instant};

use crate::domain::{MostError, MostResult};
use crate::ports::{ControlLines, RegisterBus};

use super::registers::*;
use super::{DeferredAction, Os8104};

/// How long the reset line is held
pub const RESET_SETTLE: Duration = Duration::from_millis(2);

/// Delay between configuration and the first allocation cleanup
pub const POST_CONFIG_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// `start` not called yet
    Idle,
    Resetting { release_at: Instant },
    AwaitingFirstInterrupt,
    /// Register table applied, settling before the cleanup
    Configuring,
    Operational,
}

impl<B: RegisterBus, L: ControlLines> Os8104<B, L> {
    /// Pulse the reset line and begin bring-up.
    pub fn start(&mut self, now: Instant) -> MostResult<()> {
        log::info!("Resetting transceiver");
        self.lines.set_reset(true)?;
        self.bring_up = BringUp::Resetting {
            release_at: now + RESET_SETTLE,
        };
        Ok(())
    }

    pub(super) fn poll_bring_up(&mut self, now: Instant) -> MostResult<()> {
        if let BringUp::Resetting { release_at } = self.bring_up {
            if now >= release_at {
                self.lines.set_reset(false)?;
                self.bring_up = BringUp::AwaitingFirstInterrupt;
                log::debug!("Reset released, waiting for first interrupt");
            }
        }
        Ok(())
    }

    /// Apply the register table. Runs once, on the first interrupt.
    pub(super) fn configure(&mut self, now: Instant) -> MostResult<()> {
        self.bring_up = BringUp::Configuring;
        self.write(REG_SDC1, SDC1_SCK_OUTPUT)?;

        let probe = self.read(REG_XCR)?;
        let mode = ClockMode::select(probe, self.setup.sample_rate);
        for RegisterWrite { address, value } in register_table(&self.setup, mode) {
            log::trace!("Config 0x{address:02x} = 0x{value:02x}");
            self.write(address, value)?;
        }

        let xcr = self.read(REG_XCR)?;
        self.master = xcr & XCR_MASTER != 0;
        log::info!(
            "Transceiver configured in {:?} mode as {}",
            mode,
            if self.master { "timing master" } else { "slave" }
        );

        self.defer(now + POST_CONFIG_DELAY, DeferredAction::PostConfig);
        Ok(())
    }

    /// Clear stale allocations left by a previous run, then check lock.
    pub(super) fn finish_bring_up(&mut self, now: Instant) -> MostResult<()> {
        self.bring_up = BringUp::Operational;
        log::debug!("Bring-up complete");
        match self.deallocate_all(now) {
            Err(MostError::Busy(reason)) => log::warn!("Skipping allocation cleanup: {reason}"),
            other => other?,
        }
        self.check_for_lock()?;
        Ok(())
    }
}
