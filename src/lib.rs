//! most-link
//!
//! Driver for the OS8104A MOST network transceiver, plus the source
//! session controller that lets a head unit switch audio sources to and
//! from this node.
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, errors and configuration
//! - `ports/` - Trait definitions for the register bus, the control lines
//!   and the request surface the session controller drives
//! - `protocol/` - Control-frame and mailbox codec (pure functions, no I/O)
//! - `driver/` - The transceiver engine: bring-up, interrupts, allocation, lock
//! - `session/` - Source switching handshake and the head-unit responder
//! - `adapters/` - Implementations of ports (embedded-hal SPI, Linux, simulated
//!   chip) and the datagram bridge
//! - `runtime` - The driver thread and its channel handle

// Core domain (pure, no I/O)
pub mod domain;
pub mod ports;
pub mod protocol;

// Engines
pub mod driver;
pub mod session;

// Adapters (external I/O)
pub mod adapters;

pub mod runtime;
