//! Source session controller for a JLR head unit.
//!
//! - `sources`: the static source registry and per-kind control messages
//! - `store`: last-source persistence
//! - `responder`: fixed answers and the notification subscription sweep
//! - `controller`: the switch handshake state machine tying them together

pub mod controller;
pub mod responder;
pub mod sources;
pub mod store;

pub use controller::{Handshake, Phase, SessionController, SessionEvent, SessionState};
pub use sources::{default_source, find_source, registry, Skip, SourceKind};
pub use store::LastSourceStore;
