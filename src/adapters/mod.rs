//! Adapters (implementations of port traits)
//!
//! - `spi` — `RegisterBus`/`ControlLines` over any embedded-hal 1.0 HAL
//! - `linux` — spidev + gpio character device binding (feature `linux`)
//! - `sim_chip` — in-memory transceiver for tests and hardware-less runs
//! - `bridge` — Unix datagram JSON bridge to local client processes

pub mod bridge;
#[cfg(feature = "linux")]
pub mod linux;
pub mod sim_chip;
pub mod spi;
