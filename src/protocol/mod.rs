//! MOST control-message codec for the OS8104A mailboxes.
//!
//! This module separates the three concerns of the control channel:
//! - `encode`: TxRequest / mailbox request → transmit-buffer bytes (pure)
//! - `decode`: receive-buffer / mailbox bytes → typed messages (pure)
//! - `multipart`: split payloads longer than one telegram into a sequence
//!
//! Nothing here touches the bus, so the whole layer is tested without a chip.

pub mod decode;
pub mod encode;
pub mod multipart;

pub use decode::{decode_allocation, decode_deallocation, decode_rx, decode_source_result};
pub use encode::{encode_frame, encode_single, MailboxRequest};
pub use multipart::{MultiPartSession, Telegram};

/// Size of the transmit slot written at mXCMB for a control message
pub const TX_FRAME_LEN: usize = 21;

/// Transmit header: start, reserved, target (2), fblock, instance, fkt/op (2), tel
pub const TX_HEADER_LEN: usize = 9;

/// Receive header: type, source (2), fblock, instance, fkt/op (2), tel
pub const RX_HEADER_LEN: usize = 8;

/// Bytes read from mRCMB on a message-received interrupt
pub const RX_BUFFER_LEN: usize = 20;

/// Bytes read from mXCMB when resolving a mailbox request
pub const MAILBOX_RESULT_LEN: usize = 20;

/// Data bytes carried per multi-part telegram, after the sequence prefix
pub const MULTIPART_CHUNK: usize = 11;

/// Telegram id of a message that fits in one frame
pub const TEL_SINGLE: u8 = 0;
pub const TEL_FIRST: u8 = 1;
pub const TEL_CONTINUE: u8 = 2;
pub const TEL_LAST: u8 = 3;

/// Connection label addressing every allocation on the network
pub const BROADCAST_LABEL: u8 = 0x7f;

/// Operation types used by this node
pub mod op {
    pub const SET: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const SET_GET: u8 = 0x02;
    pub const INCREMENT: u8 = 0x03;
    pub const DECREMENT: u8 = 0x04;
    pub const START_RESULT: u8 = 0x06;
    pub const PROCESSING: u8 = 0x0b;
    pub const STATUS: u8 = 0x0c;
    pub const RESULT: u8 = 0x0d;
}
