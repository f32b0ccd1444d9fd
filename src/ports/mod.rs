//! Port traits (interfaces)
//!
//! These traits define the boundaries between the transceiver engine and
//! the outside world. Adapters implement them for real hardware, for the
//! simulated chip used in tests, and for the driver thread handle.

pub mod bus;
pub mod control;

pub use bus::*;
pub use control::*;
