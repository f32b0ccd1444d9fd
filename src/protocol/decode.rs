//! Pure decoding: receive buffer / mailbox bytes → typed results.
//!
//! The receive buffer mirrors the transmit layout one byte shorter: the chip
//! replaces the start and reserved bytes with a frame type and a 2-byte
//! source address.

use crate::domain::{
    AllocAnswer, AllocationResult, DeallocAnswer, DeallocationResult, MostError, MostResult,
    RxMessage, SourceResult,
};

use super::RX_HEADER_LEN;

fn ensure_len(buf: &[u8], needed: usize, what: &str) -> MostResult<()> {
    if buf.len() < needed {
        return Err(MostError::Frame(format!(
            "{what}: need {needed} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

/// Decode a frame read from the receive buffer.
///
/// Frame types above 0x01 carry one trailing status byte which is dropped.
/// The data region is then cut to the telegram length when that length
/// fits inside it.
pub fn decode_rx(buf: &[u8]) -> MostResult<RxMessage> {
    ensure_len(buf, RX_HEADER_LEN, "Receive frame")?;

    let frame_type = buf[0];
    let fkt_op = u16::from_be_bytes([buf[5], buf[6]]);
    let telegram_id = (buf[7] & 0xf0) >> 4;
    let telegram_len = buf[7] & 0x0f;

    let end = if frame_type > 0x01 && buf.len() > RX_HEADER_LEN {
        buf.len() - 1
    } else {
        buf.len()
    };
    let mut payload = buf[RX_HEADER_LEN..end].to_vec();
    if usize::from(telegram_len) <= payload.len() {
        payload.truncate(usize::from(telegram_len));
    }

    Ok(RxMessage {
        frame_type,
        source_address_high: buf[1],
        source_address_low: buf[2],
        fblock_id: buf[3],
        instance_id: buf[4],
        function_id: fkt_op >> 4,
        op_type: (fkt_op & 0x0f) as u8,
        telegram_id,
        telegram_len,
        payload,
    })
}

/// Decode the mailbox after an allocation request completed.
pub fn decode_allocation(buf: &[u8]) -> MostResult<AllocationResult> {
    ensure_len(buf, 13, "Allocation result")?;
    let answer = AllocAnswer::from_code(buf[7]);
    let free_channels = match answer {
        AllocAnswer::Error => 0,
        _ => buf[8],
    };
    Ok(AllocationResult {
        channel_locations: [buf[9], buf[10], buf[11], buf[12]],
        // The label is the first allocated channel
        connection_label: buf[9],
        answer,
        free_channels,
    })
}

/// Decode the mailbox after a deallocation request completed.
pub fn decode_deallocation(buf: &[u8]) -> MostResult<DeallocationResult> {
    ensure_len(buf, 8, "Deallocation result")?;
    Ok(DeallocationResult {
        answer: DeallocAnswer::from_code(buf[7]),
    })
}

/// Decode the mailbox after a remote get-source request completed.
pub fn decode_source_result(buf: &[u8]) -> MostResult<SourceResult> {
    ensure_len(buf, 15, "Remote source result")?;
    Ok(SourceResult {
        node_position: buf[10],
        group: buf[12],
        logical_high: buf[13],
        logical_low: buf[14],
    })
}
