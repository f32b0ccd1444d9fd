//! Simulated OS8104A for development and testing without hardware.
//!
//! `SimChip` is a register file behind an `Arc<Mutex<..>>`, so a test keeps
//! one clone to script the chip while the driver owns others as its bus
//! and control lines. It models just enough of the chip for the driver:
//!
//! - interrupt reasons live in bMSGS; writing a reset bit to bMSGC clears
//!   the matching reason, and the interrupt line is asserted while any
//!   reason is set
//! - leaving reset raises one power-on interrupt
//! - with auto-transmit on, setting START_TX completes the transmission at
//!   once, answering mailbox requests with a grant
//!
//! Every write is recorded for inspection.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{MostError, MostResult};
use crate::driver::registers::*;
use crate::ports::{ControlLines, RegisterBus};
use crate::protocol::TX_FRAME_LEN;

/// Interrupt reasons that can be acknowledged through bMSGC
const REASON_MASK: u8 = MSGS_MESS_RECEIVED | MSGS_MESS_TRANSMITTED | MSGS_ERR | MSGS_NET_CHANGED;

/// Channel locations handed out by auto-transmit allocations
pub const SIM_CHANNELS: [u8; 4] = [0x08, 0x09, 0x0a, 0x0b];

#[derive(Debug)]
struct ChipState {
    registers: [u8; 256],
    writes: Vec<(u8, Vec<u8>)>,
    in_reset: bool,
    reset_history: Vec<bool>,
    power_on_interrupt: bool,
    network_signal: bool,
    master: bool,
    auto_transmit: bool,
}

impl ChipState {
    fn raise(&mut self, reasons: u8) {
        self.registers[usize::from(REG_MSGS)] |= reasons;
    }

    fn write(&mut self, address: u8, values: &[u8]) {
        self.writes.push((address, values.to_vec()));
        self.power_on_interrupt = false;
        for (i, value) in values.iter().enumerate() {
            let index = (usize::from(address) + i) % self.registers.len();
            self.registers[index] = *value;
        }
        if address == REG_MSGC {
            if let Some(&value) = values.first() {
                self.registers[usize::from(REG_MSGS)] &= !(value & REASON_MASK);
                // Acknowledge bits are self-clearing
                self.registers[usize::from(REG_MSGC)] = value & !REASON_MASK;
                if value & MSGC_START_TX != 0 && self.auto_transmit {
                    self.finish_transmit();
                }
            }
        }
    }

    /// Answer whatever sits in the transmit buffer and raise TX.
    fn finish_transmit(&mut self) {
        let last_tx = self
            .writes
            .iter()
            .rev()
            .find(|(address, _)| *address == REG_MXCMB)
            .map(|(_, bytes)| bytes.clone());
        if let Some(request) = last_tx.filter(|bytes| bytes.len() < TX_FRAME_LEN) {
            let base = usize::from(REG_MXCMB);
            match request.get(1) {
                // Allocate
                Some(0x03) => {
                    self.registers[base + 7] = 0x01;
                    self.registers[base + 8] = 20;
                    self.registers[base + 9..base + 13].copy_from_slice(&SIM_CHANNELS);
                }
                // Deallocate
                Some(0x04) => self.registers[base + 7] = 0x01,
                _ => {}
            }
        }
        self.registers[usize::from(REG_MSGC)] &= !MSGC_START_TX;
        self.raise(MSGS_MESS_TRANSMITTED | MSGS_TRANS_SUCCESS);
    }
}

/// In-memory transceiver. Clones share the same chip.
#[derive(Debug, Clone)]
pub struct SimChip {
    state: Arc<Mutex<ChipState>>,
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChip {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChipState {
                registers: [0; 256],
                writes: Vec::new(),
                in_reset: false,
                reset_history: Vec::new(),
                power_on_interrupt: false,
                network_signal: true,
                master: false,
                auto_transmit: false,
            })),
        }
    }

    /// A chip that completes every transmission immediately.
    pub fn with_auto_transmit() -> Self {
        let chip = Self::new();
        chip.lock().auto_transmit = true;
        log::info!("[SIM CHIP] Auto-transmit enabled");
        chip
    }

    fn lock(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock(&self) -> MostResult<MutexGuard<'_, ChipState>> {
        self.state
            .lock()
            .map_err(|_| MostError::Transport("Simulated chip state poisoned".into()))
    }

    // --- scripting ---

    pub fn set_register(&self, address: u8, value: u8) {
        self.lock().registers[usize::from(address)] = value;
    }

    pub fn set_registers(&self, address: u8, values: &[u8]) {
        let mut state = self.lock();
        for (i, value) in values.iter().enumerate() {
            let index = (usize::from(address) + i) % 256;
            state.registers[index] = *value;
        }
    }

    /// Report the given bMSGS interrupt reasons.
    pub fn raise(&self, reasons: u8) {
        self.lock().raise(reasons);
    }

    /// Place a frame in the receive buffer and raise RX.
    pub fn receive(&self, frame: &[u8]) {
        let mut padded = frame.to_vec();
        padded.resize(20, 0);
        self.set_registers(REG_MRCMB, &padded);
        self.raise(MSGS_MESS_RECEIVED);
    }

    /// Complete the current transmission.
    pub fn complete_transmit(&self) {
        self.raise(MSGS_MESS_TRANSMITTED | MSGS_TRANS_SUCCESS);
    }

    /// Put `answer` in the mailbox and complete the transmission.
    pub fn answer_mailbox(&self, answer: &[u8]) {
        self.set_registers(REG_MXCMB, answer);
        self.complete_transmit();
    }

    pub fn set_network_signal(&self, present: bool) {
        self.lock().network_signal = present;
    }

    /// Report the master bit in bXCR reads
    pub fn set_master(&self, master: bool) {
        self.lock().master = master;
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    // --- inspection ---

    pub fn register(&self, address: u8) -> u8 {
        self.lock().registers[usize::from(address)]
    }

    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Single-byte values written to `address`, in order
    pub fn writes_to(&self, address: u8) -> Vec<u8> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, v)| *a == address && v.len() == 1)
            .map(|(_, v)| v[0])
            .collect()
    }

    /// Control frames written to the transmit buffer
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, v)| *a == REG_MXCMB && v.len() == TX_FRAME_LEN)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Mailbox requests written to the transmit buffer
    pub fn mailbox_requests(&self) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, v)| *a == REG_MXCMB && v.len() < TX_FRAME_LEN)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn reset_history(&self) -> Vec<bool> {
        self.lock().reset_history.clone()
    }

    pub fn in_reset(&self) -> bool {
        self.lock().in_reset
    }
}

impl RegisterBus for SimChip {
    fn write_register(&mut self, address: u8, values: &[u8]) -> MostResult<u8> {
        let mut state = self.try_lock()?;
        state.write(address, values);
        Ok(address)
    }

    fn read_registers(&mut self, address: u8, count: usize) -> MostResult<Vec<u8>> {
        let state = self.try_lock()?;
        let mut bytes: Vec<u8> = (0..count)
            .map(|i| state.registers[(usize::from(address) + i) % 256])
            .collect();
        if address == REG_XCR && state.master {
            if let Some(first) = bytes.first_mut() {
                *first |= XCR_MASTER;
            }
        }
        Ok(bytes)
    }
}

impl ControlLines for SimChip {
    fn set_reset(&mut self, asserted: bool) -> MostResult<()> {
        let mut state = self.try_lock()?;
        if state.in_reset && !asserted {
            state.power_on_interrupt = true;
        }
        state.in_reset = asserted;
        state.reset_history.push(asserted);
        Ok(())
    }

    fn interrupt_asserted(&mut self) -> MostResult<bool> {
        let state = self.try_lock()?;
        Ok(!state.in_reset
            && (state.power_on_interrupt
                || state.registers[usize::from(REG_MSGS)] & REASON_MASK != 0))
    }

    fn network_signal(&mut self) -> MostResult<bool> {
        Ok(self.try_lock()?.network_signal)
    }
}
