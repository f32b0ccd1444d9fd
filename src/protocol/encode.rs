//! Pure encoding: TxRequest → transmit-buffer bytes.
//!
//! No I/O, no side effects. The driver writes the returned slot to mXCMB
//! and then sets the start-transmit bit.

use crate::domain::{MostError, MostResult, TxRequest, MAX_SINGLE_PAYLOAD};

use super::{TEL_SINGLE, TX_FRAME_LEN, TX_HEADER_LEN};

/// Leading byte of every outbound control frame
const FRAME_START: u8 = 0x01;

/// Encode one telegram of `msg` carrying `payload` into a zero-padded slot.
///
/// `payload` is passed separately so multi-part chunks can reuse the
/// addressing of the parent message.
pub fn encode_frame(
    msg: &TxRequest,
    telegram_id: u8,
    payload: &[u8],
) -> MostResult<[u8; TX_FRAME_LEN]> {
    if payload.len() > MAX_SINGLE_PAYLOAD {
        return Err(MostError::Frame(format!(
            "Telegram payload of {} bytes exceeds {MAX_SINGLE_PAYLOAD}",
            payload.len()
        )));
    }
    if msg.function_id > 0x0fff {
        return Err(MostError::Frame(format!(
            "Function id 0x{:x} does not fit in 12 bits",
            msg.function_id
        )));
    }
    if msg.op_type > 0x0f || telegram_id > 0x0f {
        return Err(MostError::Frame(format!(
            "opType 0x{:x} / telegram id {telegram_id} does not fit in 4 bits",
            msg.op_type
        )));
    }

    let fkt_op = (msg.function_id << 4) | u16::from(msg.op_type);
    let mut frame = [0u8; TX_FRAME_LEN];
    frame[0] = FRAME_START;
    frame[1] = 0x00;
    frame[2] = msg.target_address_high;
    frame[3] = msg.target_address_low;
    frame[4] = msg.fblock_id;
    frame[5] = msg.instance_id;
    frame[6..8].copy_from_slice(&fkt_op.to_be_bytes());
    frame[8] = (telegram_id << 4) | payload.len() as u8;
    frame[TX_HEADER_LEN..TX_HEADER_LEN + payload.len()].copy_from_slice(payload);
    Ok(frame)
}

/// Encode a message whose payload fits in a single telegram.
pub fn encode_single(msg: &TxRequest) -> MostResult<[u8; TX_FRAME_LEN]> {
    encode_frame(msg, TEL_SINGLE, &msg.payload)
}

/// Requests resolved through the transmit mailbox rather than a control
/// message exchange with another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxRequest {
    /// Reserve a free streaming channel
    Allocate,
    /// Release the channel behind a connection label
    Deallocate(u8),
    /// Ask the network master which node owns a connection label
    GetSource(u8),
}

impl MailboxRequest {
    pub fn encode(&self) -> [u8; 7] {
        match *self {
            Self::Allocate => [0x01, 0x03, 0x04, 0x00, 0x00, 0x04, 0x00],
            Self::Deallocate(label) => [0x01, 0x04, 0x04, 0x00, 0x00, label, 0x00],
            Self::GetSource(label) => [0x01, 0x05, 0x03, 0xc8, 0x00, label, 0x00],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payload: Vec<u8>) -> TxRequest {
        TxRequest {
            target_address_high: 0x01,
            target_address_low: 0x61,
            fblock_id: 0xf0,
            instance_id: 0x01,
            function_id: 0x405,
            op_type: 0x06,
            payload,
        }
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let frame = encode_single(&request(vec![0xaa, 0xbb])).unwrap();
        assert_eq!(
            &frame[..11],
            &[0x01, 0x00, 0x01, 0x61, 0xf0, 0x01, 0x40, 0x56, 0x02, 0xaa, 0xbb]
        );
        assert!(frame[11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn single_frame_length_byte_equals_payload_length() {
        for len in 0..=12 {
            let frame = encode_single(&request(vec![0x5a; len])).unwrap();
            assert_eq!(frame[8], len as u8, "length byte for {len} bytes");
            assert_eq!(frame.len(), TX_FRAME_LEN);
        }
    }

    #[test]
    fn telegram_id_lands_in_high_nibble() {
        let frame = encode_frame(&request(vec![]), 3, &[0, 1, 2]).unwrap();
        assert_eq!(frame[8], 0x33);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert!(encode_single(&request(vec![0; 13])).is_err());
    }

    #[test]
    fn function_id_wider_than_12_bits_is_rejected() {
        let mut msg = request(vec![]);
        msg.function_id = 0x1000;
        assert!(encode_single(&msg).is_err());
    }

    #[test]
    fn mailbox_frames_are_bit_exact() {
        assert_eq!(MailboxRequest::Allocate.encode(), [1, 3, 4, 0, 0, 4, 0]);
        assert_eq!(
            MailboxRequest::Deallocate(0x7f).encode(),
            [1, 4, 4, 0, 0, 0x7f, 0]
        );
        assert_eq!(
            MailboxRequest::GetSource(0x12).encode(),
            [1, 5, 3, 0xc8, 0, 0x12, 0]
        );
    }
}
