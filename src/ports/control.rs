//! Application-side control port
//!
//! The request surface the source session controller drives. The driver
//! thread handle implements it by queueing requests; tests implement it by
//! recording them.

use crate::domain::{MostResult, TxRequest};

pub trait MostControl {
    /// Queue a control message for transmission.
    fn send_control_message(&mut self, msg: TxRequest) -> MostResult<()>;

    /// Ask the network for a streaming channel.
    fn allocate(&mut self) -> MostResult<()>;

    /// Release the channel recorded by the last successful allocation.
    fn deallocate(&mut self) -> MostResult<()>;
}
