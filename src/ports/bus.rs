//! Hardware port traits
//!
//! Split into two traits:
//! - `RegisterBus` — register reads/writes over the serial bus
//! - `ControlLines` — the discrete reset, interrupt and network-status lines

use crate::domain::MostResult;

/// Synchronous access to the transceiver's 8-bit registers.
///
/// Every access is blocking and the caller owns the bus exclusively, so
/// implementations only require `Send`.
pub trait RegisterBus: Send {
    /// Write `values` starting at `address`.
    ///
    /// Returns the byte clocked back while the address was sent.
    fn write_register(&mut self, address: u8, values: &[u8]) -> MostResult<u8>;

    /// Read `count` consecutive bytes starting at `address`.
    fn read_registers(&mut self, address: u8, count: usize) -> MostResult<Vec<u8>>;

    /// Read one register
    fn read_register(&mut self, address: u8) -> MostResult<u8> {
        let bytes = self.read_registers(address, 1)?;
        Ok(bytes.first().copied().unwrap_or(0))
    }
}

/// Discrete lines between the host and the transceiver.
pub trait ControlLines: Send {
    /// Drive the reset line. `true` holds the chip in reset.
    fn set_reset(&mut self, asserted: bool) -> MostResult<()>;

    /// Whether the interrupt line is currently asserted.
    fn interrupt_asserted(&mut self) -> MostResult<bool>;

    /// Whether the network status line reports an incoming signal.
    fn network_signal(&mut self) -> MostResult<bool>;
}
