//! Register transport and control lines over embedded-hal 1.0 traits.
//!
//! The OS8104A's SPI port takes a command byte before the register
//! address: 0x00 addresses a register (and writes the bytes that follow),
//! 0x01 clocks data out of the addressed register. A read is therefore an
//! addressing transfer followed by a separate read transaction.
//!
//! Any platform HAL that provides `SpiDevice`, `OutputPin` and `InputPin`
//! can drive the chip through these adapters.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{Operation, SpiDevice};

use crate::domain::{MostError, MostResult};
use crate::ports::{ControlLines, RegisterBus};

const CMD_ADDRESS: u8 = 0x00;
const CMD_READ: u8 = 0x01;

/// `RegisterBus` over an SPI device with its own chip select.
pub struct SpiTransport<S> {
    spi: S,
}

impl<S: SpiDevice> SpiTransport<S> {
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    pub fn into_inner(self) -> S {
        self.spi
    }
}

impl<S: SpiDevice + Send> RegisterBus for SpiTransport<S> {
    fn write_register(&mut self, address: u8, values: &[u8]) -> MostResult<u8> {
        let mut tx = Vec::with_capacity(values.len() + 2);
        tx.push(CMD_ADDRESS);
        tx.push(address);
        tx.extend_from_slice(values);
        let mut rx = vec![0u8; tx.len()];

        self.spi.transfer(&mut rx, &tx).map_err(|e| {
            MostError::Transport(format!("SPI write at 0x{address:02x} failed: {e:?}"))
        })?;
        log::trace!("SPI W 0x{address:02x} {values:02x?}");
        Ok(rx[1])
    }

    fn read_registers(&mut self, address: u8, count: usize) -> MostResult<Vec<u8>> {
        self.spi.write(&[CMD_ADDRESS, address]).map_err(|e| {
            MostError::Transport(format!("SPI address 0x{address:02x} failed: {e:?}"))
        })?;

        let mut buf = vec![0u8; count];
        self.spi
            .transaction(&mut [Operation::Write(&[CMD_READ]), Operation::Read(&mut buf)])
            .map_err(|e| {
                MostError::Transport(format!("SPI read at 0x{address:02x} failed: {e:?}"))
            })?;
        log::trace!("SPI R 0x{address:02x} {buf:02x?}");
        Ok(buf)
    }
}

/// Reset, interrupt and network-status lines. All three are active low.
pub struct GpioLines<R, I, N> {
    reset: R,
    interrupt: I,
    network_status: N,
}

impl<R: OutputPin, I: InputPin, N: InputPin> GpioLines<R, I, N> {
    pub fn new(reset: R, interrupt: I, network_status: N) -> Self {
        Self {
            reset,
            interrupt,
            network_status,
        }
    }
}

fn gpio_error(line: &str, e: impl std::fmt::Debug) -> MostError {
    MostError::Transport(format!("GPIO {line} line failed: {e:?}"))
}

impl<R, I, N> ControlLines for GpioLines<R, I, N>
where
    R: OutputPin + Send,
    I: InputPin + Send,
    N: InputPin + Send,
{
    fn set_reset(&mut self, asserted: bool) -> MostResult<()> {
        if asserted {
            self.reset.set_low().map_err(|e| gpio_error("reset", e))
        } else {
            self.reset.set_high().map_err(|e| gpio_error("reset", e))
        }
    }

    fn interrupt_asserted(&mut self) -> MostResult<bool> {
        self.interrupt.is_low().map_err(|e| gpio_error("interrupt", e))
    }

    fn network_signal(&mut self) -> MostResult<bool> {
        // High means no light on the fibre
        self.network_status
            .is_low()
            .map_err(|e| gpio_error("network status", e))
    }
}
