//! Core domain types
//!
//! Pure types with no bus I/O. These represent the messages, results and
//! events exchanged between the transceiver engine and its collaborators.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::*;
pub use error::*;
pub use events::*;
pub use types::*;
