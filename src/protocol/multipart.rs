//! Multi-part telegram splitting.
//!
//! A payload longer than 12 bytes is sent as a run of telegrams, each
//! carrying a 1-byte running sequence counter followed by at most 11 data
//! bytes. The first telegram has id 1, the one that drains the payload has
//! id 3 and everything in between has id 2.
//!
//! The session only yields telegrams; pacing them against the transmitter's
//! "message sent" interrupt is the driver's job.

use std::collections::VecDeque;

use crate::domain::TxRequest;

use super::{MULTIPART_CHUNK, TEL_CONTINUE, TEL_FIRST, TEL_LAST};

/// One telegram of a multi-part message, sequence prefix included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub telegram_id: u8,
    pub payload: Vec<u8>,
}

/// An outbound message being drained telegram by telegram.
#[derive(Debug)]
pub struct MultiPartSession {
    /// Addressing of the parent message; its payload is left empty
    header: TxRequest,
    remaining: VecDeque<u8>,
    sequence: u8,
    finished: bool,
}

impl MultiPartSession {
    pub fn new(mut msg: TxRequest) -> Self {
        let remaining = VecDeque::from(std::mem::take(&mut msg.payload));
        Self {
            header: msg,
            remaining,
            sequence: 0,
            finished: false,
        }
    }

    /// Addressing shared by every telegram of this message
    pub fn header(&self) -> &TxRequest {
        &self.header
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl Iterator for MultiPartSession {
    type Item = Telegram;

    fn next(&mut self) -> Option<Telegram> {
        if self.finished {
            return None;
        }
        let take = self.remaining.len().min(MULTIPART_CHUNK);
        let mut payload = Vec::with_capacity(take + 1);
        payload.push(self.sequence);
        payload.extend(self.remaining.drain(..take));

        let telegram_id = if self.remaining.is_empty() {
            self.finished = true;
            TEL_LAST
        } else if self.sequence == 0 {
            TEL_FIRST
        } else {
            TEL_CONTINUE
        };
        self.sequence = self.sequence.wrapping_add(1);

        Some(Telegram {
            telegram_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(len: usize) -> MultiPartSession {
        MultiPartSession::new(TxRequest {
            target_address_high: 0x01,
            target_address_low: 0x61,
            fblock_id: 0x01,
            instance_id: 0x01,
            function_id: 0x000,
            op_type: 0x0c,
            payload: (0..len).map(|i| i as u8).collect(),
        })
    }

    #[test]
    fn chunk_count_is_ceiling_of_len_over_eleven() {
        for len in [13usize, 21, 22, 23, 33, 36, 100, 255] {
            let telegrams: Vec<_> = session(len).collect();
            assert_eq!(telegrams.len(), len.div_ceil(11), "payload of {len} bytes");
        }
    }

    #[test]
    fn telegram_ids_mark_first_middle_last() {
        let ids: Vec<u8> = session(36).map(|t| t.telegram_id).collect();
        assert_eq!(ids, vec![1, 2, 2, 3]);

        let ids: Vec<u8> = session(13).map(|t| t.telegram_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn sequence_prefixes_count_up_from_zero() {
        let prefixes: Vec<u8> = session(50).map(|t| t.payload[0]).collect();
        assert_eq!(prefixes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn chunks_reassemble_to_original_payload() {
        let original: Vec<u8> = (0..47).collect();
        let rebuilt: Vec<u8> = session(47).flat_map(|t| t.payload[1..].to_vec()).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn every_telegram_fits_one_frame() {
        assert!(session(200).all(|t| t.payload.len() <= 12));
    }

    #[test]
    fn session_is_finished_after_last_telegram() {
        let mut s = session(22);
        assert!(s.next().is_some());
        assert!(!s.is_finished());
        assert_eq!(s.next().map(|t| t.telegram_id), Some(3));
        assert!(s.is_finished());
        assert_eq!(s.remaining(), 0);
        assert!(s.next().is_none());
    }
}
