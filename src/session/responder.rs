//! Fixed answers to head-unit chatter, and the notification subscription
//! sweep run when the head unit (re)registers this node.

use std::collections::VecDeque;

use crate::domain::{RxMessage, TxRequest};
use crate::protocol::op;

/// Function blocks this node claims to host, as (fblock, instance) pairs
pub const FBLOCK_LIST: [u8; 36] = [
    0x10, 0xa3, 0x06, 0x6e, 0x40, 0xa1, 0x31, 0xa1, 0x52, 0xd1, 0x60, 0x01, 0x50, 0xa1, 0x05,
    0xd1, 0x24, 0xa1, 0x22, 0xd1, 0x11, 0xd1, 0x44, 0xa1, 0x05, 0xd2, 0x42, 0xa1, 0x31, 0xa2,
    0x43, 0xa1, 0x31, 0xa2, 0x31, 0x05,
];

/// Device descriptor returned for fblock 0x06 function 0xD22
pub const DEVICE_DESCRIPTOR: [u8; 18] = [
    0xf1, 0x8c, 0x30, 0x38, 0x31, 0x37, 0x32, 0x30, 0x33, 0x32, 0x34, 0x30, 0x30, 0x30, 0x00,
    0x00, 0x00, 0x00,
];

pub const HEAD_UNIT_HIGH: u8 = 0x01;
pub const HEAD_UNIT_LOW: u8 = 0x61;

/// A function block to subscribe to for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub address_high: u8,
    pub address_low: u8,
    pub fblock_id: u8,
    pub instance_id: u8,
}

const fn sub(address_high: u8, address_low: u8, fblock_id: u8, instance_id: u8) -> Subscription {
    Subscription {
        address_high,
        address_low,
        fblock_id,
        instance_id,
    }
}

pub const SUBSCRIPTIONS: [Subscription; 8] = [
    sub(0x01, 0x80, 0x31, 0x02),
    sub(0x01, 0x61, 0xf0, 0x01),
    sub(0x01, 0x80, 0x40, 0x01),
    sub(0x01, 0x61, 0x22, 0xa1),
    sub(0x01, 0x86, 0x22, 0x05),
    sub(0x01, 0x61, 0x22, 0xa1),
    sub(0x01, 0x61, 0xf5, 0x01),
    sub(0x01, 0x61, 0x71, 0xa1),
];

/// Answer to a function block enumeration request.
pub fn fblock_list(msg: &RxMessage) -> TxRequest {
    TxRequest::reply_to(msg, op::STATUS, FBLOCK_LIST.to_vec())
}

pub fn device_descriptor(msg: &RxMessage) -> TxRequest {
    TxRequest::reply_to(msg, op::STATUS, DEVICE_DESCRIPTOR.to_vec())
}

/// Empty status answer echoing the request's addressing.
pub fn acknowledge(msg: &RxMessage) -> TxRequest {
    TxRequest::reply_to(msg, op::STATUS, Vec::new())
}

pub fn c80_result(msg: &RxMessage) -> TxRequest {
    TxRequest::reply_to(msg, op::RESULT, vec![0x00, 0x01])
}

/// Initial status for a notification registration. The registered
/// function id is carried big-endian in payload bytes 3 and 4.
///
/// `None` when this node has nothing to report for that function.
pub fn notification_status(msg: &RxMessage) -> Option<TxRequest> {
    let function_id = u16::from_be_bytes([msg.byte(3), msg.byte(4)]);
    let payload = match (msg.fblock_id, function_id) {
        (0x10, _) | (0x40, _) => vec![0x00],
        (0x60, 0xdb0) | (0x60, 0xc03) => vec![0x00; 3],
        (0x60, 0xc00) => vec![0x00; 5],
        (0x50, _) => vec![0x00; 3],
        _ => return None,
    };
    Some(TxRequest {
        target_address_high: msg.source_address_high,
        target_address_low: msg.source_address_low,
        fblock_id: msg.fblock_id,
        instance_id: msg.instance_id,
        function_id,
        op_type: op::STATUS,
        payload,
    })
}

/// Status sent to the head unit some time after it registers for fblock
/// 0x10 notifications.
pub fn receiver_ready() -> TxRequest {
    TxRequest {
        target_address_high: HEAD_UNIT_HIGH,
        target_address_low: HEAD_UNIT_LOW,
        fblock_id: 0x10,
        instance_id: 0x01,
        function_id: 0xc02,
        op_type: op::STATUS,
        payload: vec![0x01],
    }
}

/// Answer to the head unit's source-allocation query for fblock 0x10.
pub fn head_unit_allocation() -> TxRequest {
    TxRequest {
        target_address_high: HEAD_UNIT_HIGH,
        target_address_low: HEAD_UNIT_LOW,
        fblock_id: 0xf0,
        instance_id: 0xa3,
        function_id: 0x101,
        op_type: op::STATUS,
        payload: vec![0x01, 0x02, 0x20, 0x21],
    }
}

/// Register for all notifications of `target`.
pub fn subscribe(target: &Subscription) -> TxRequest {
    TxRequest {
        target_address_high: target.address_high,
        target_address_low: target.address_low,
        fblock_id: target.fblock_id,
        instance_id: target.instance_id,
        function_id: 0x001,
        op_type: op::SET,
        payload: vec![0x00, 0x01, 0x6e],
    }
}

/// Drop the head unit's 0xE19 notification, sent once the sweep ends.
pub fn unsubscribe_e19() -> TxRequest {
    TxRequest {
        target_address_high: HEAD_UNIT_HIGH,
        target_address_low: HEAD_UNIT_LOW,
        fblock_id: 0xf5,
        instance_id: 0x01,
        function_id: 0x001,
        op_type: op::GET,
        payload: vec![0x03, 0x01, 0x6e, 0x0e, 0x19],
    }
}

/// Walks `SUBSCRIPTIONS` one request per transmit completion.
#[derive(Debug)]
pub struct SubscriptionSweep {
    queue: VecDeque<Subscription>,
    awaiting_sent: bool,
    finished: bool,
}

impl Default for SubscriptionSweep {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionSweep {
    pub fn new() -> Self {
        Self {
            queue: SUBSCRIPTIONS.iter().copied().collect(),
            awaiting_sent: false,
            finished: false,
        }
    }

    /// Next request to send: a subscription, then the final unsubscribe,
    /// then nothing.
    pub fn next_request(&mut self) -> Option<TxRequest> {
        if self.finished {
            return None;
        }
        match self.queue.pop_front() {
            Some(target) => {
                self.awaiting_sent = true;
                Some(subscribe(&target))
            }
            None => {
                self.finished = true;
                Some(unsubscribe_e19())
            }
        }
    }

    /// Note a transmit completion. True when the sweep was waiting for it.
    pub fn message_sent(&mut self) -> bool {
        std::mem::replace(&mut self.awaiting_sent, false)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(fblock_id: u8, function_id: u16, op_type: u8, payload: Vec<u8>) -> RxMessage {
        RxMessage {
            frame_type: 0,
            source_address_high: 0x01,
            source_address_low: 0x61,
            fblock_id,
            instance_id: 0x01,
            function_id,
            op_type,
            telegram_id: 0,
            telegram_len: payload.len() as u8,
            payload,
        }
    }

    #[test]
    fn fblock_list_goes_back_to_sender() {
        let reply = fblock_list(&request(0x01, 0x000, op::GET, vec![]));
        assert_eq!((reply.target_address_high, reply.target_address_low), (0x01, 0x61));
        assert_eq!(reply.op_type, op::STATUS);
        assert_eq!(reply.payload.len(), 36);
        assert_eq!(reply.payload[..4], [0x10, 0xa3, 0x06, 0x6e]);
    }

    #[test]
    fn notification_status_uses_registered_function() {
        let msg = request(0x60, 0x001, op::SET, vec![0x00, 0x01, 0x10, 0x0c, 0x00]);
        let reply = notification_status(&msg).unwrap();
        assert_eq!(reply.function_id, 0xc00);
        assert_eq!(reply.payload, vec![0; 5]);

        let msg = request(0x50, 0x001, op::SET, vec![0x00, 0x01, 0x10, 0x0a, 0x00]);
        assert_eq!(notification_status(&msg).unwrap().payload, vec![0; 3]);
    }

    #[test]
    fn unknown_notifications_get_no_answer() {
        let msg = request(0x60, 0x001, op::SET, vec![0x00, 0x01, 0x10, 0x0a, 0x00]);
        assert!(notification_status(&msg).is_none());
        let msg = request(0x22, 0x001, op::SET, vec![0x00, 0x01, 0x10, 0x0c, 0x00]);
        assert!(notification_status(&msg).is_none());
    }

    #[test]
    fn sweep_waits_for_each_completion() {
        let mut sweep = SubscriptionSweep::new();
        assert!(!sweep.message_sent());

        let first = sweep.next_request().unwrap();
        assert_eq!((first.fblock_id, first.instance_id), (0x31, 0x02));
        assert_eq!(first.payload, vec![0x00, 0x01, 0x6e]);
        assert!(sweep.message_sent());
        assert!(!sweep.message_sent());
    }

    #[test]
    fn sweep_ends_with_single_unsubscribe() {
        let mut sweep = SubscriptionSweep::new();
        let sent: Vec<TxRequest> = std::iter::from_fn(|| sweep.next_request()).collect();
        assert_eq!(sent.len(), SUBSCRIPTIONS.len() + 1);

        let last = sent.last().unwrap();
        assert_eq!(last.fblock_id, 0xf5);
        assert_eq!((last.target_address_high, last.target_address_low), (0x01, 0x61));
        assert_eq!(last.payload, vec![0x03, 0x01, 0x6e, 0x0e, 0x19]);
        assert!(sweep.is_finished());
    }
}
