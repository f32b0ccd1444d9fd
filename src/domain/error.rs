//! Domain error types

use thiserror::Error;

/// Errors that can occur while driving the transceiver.
///
/// Expected protocol outcomes (busy, deny, wrong target, timeouts, sends
/// while unlocked) are not errors; they surface as results or log records.
#[derive(Error, Debug)]
pub enum MostError {
    /// Bus or GPIO failure. Fatal to the driver thread.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame error: {0}")]
    Frame(String),

    /// A request was refused because the single transmit mailbox is in use.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Bridge error: {0}")]
    Bridge(String),
}

/// Result type alias for driver operations
pub type MostResult<T> = Result<T, MostError>;
