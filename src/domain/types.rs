//! Core domain types
//!
//! Plain data exchanged between the codec, the driver, the session
//! controller and the IPC bridge. Field names on the wire follow the
//! existing SocketMost clients, hence the explicit serde renames.

use serde::{Deserialize, Serialize};

/// Largest payload a single control telegram can carry.
pub const MAX_SINGLE_PAYLOAD: usize = 12;

/// Upper bound on a control message payload (12-bit length space).
pub const MAX_PAYLOAD: usize = 4095;

/// A control message received from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxMessage {
    #[serde(rename = "type")]
    pub frame_type: u8,
    #[serde(rename = "sourceAddrHigh")]
    pub source_address_high: u8,
    #[serde(rename = "sourceAddrLow")]
    pub source_address_low: u8,
    #[serde(rename = "fBlockID")]
    pub fblock_id: u8,
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    /// 12-bit function id
    #[serde(rename = "fktID")]
    pub function_id: u16,
    /// 4-bit operation type
    #[serde(rename = "opType")]
    pub op_type: u8,
    #[serde(rename = "telID")]
    pub telegram_id: u8,
    #[serde(rename = "telLen")]
    pub telegram_len: u8,
    #[serde(rename = "data")]
    pub payload: Vec<u8>,
}

impl RxMessage {
    /// 16-bit logical address of the sender
    pub fn source_address(&self) -> u16 {
        u16::from_be_bytes([self.source_address_high, self.source_address_low])
    }

    /// Payload byte at `index`, or 0 when the frame is shorter.
    pub fn byte(&self, index: usize) -> u8 {
        self.payload.get(index).copied().unwrap_or(0)
    }
}

/// A control message to be sent to a node on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    #[serde(rename = "targetAddressHigh")]
    pub target_address_high: u8,
    #[serde(rename = "targetAddressLow")]
    pub target_address_low: u8,
    #[serde(rename = "fBlockID")]
    pub fblock_id: u8,
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    #[serde(rename = "fktID")]
    pub function_id: u16,
    #[serde(rename = "opType")]
    pub op_type: u8,
    #[serde(rename = "data", default)]
    pub payload: Vec<u8>,
}

impl TxRequest {
    /// Build a reply addressed back to the sender of `msg`, echoing its
    /// fblock, instance and function.
    pub fn reply_to(msg: &RxMessage, op_type: u8, payload: Vec<u8>) -> Self {
        Self {
            target_address_high: msg.source_address_high,
            target_address_low: msg.source_address_low,
            fblock_id: msg.fblock_id,
            instance_id: msg.instance_id,
            function_id: msg.function_id,
            op_type,
            payload,
        }
    }
}

/// Answer to a channel allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocAnswer {
    #[serde(rename = "ALLOC_GRANT")]
    Grant,
    #[serde(rename = "ALLOC_BUSY")]
    Busy,
    #[serde(rename = "ALLOC_DENY")]
    Deny,
    WrongTarget,
    Error,
}

impl AllocAnswer {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Grant,
            2 => Self::Busy,
            3 => Self::Deny,
            4 => Self::WrongTarget,
            _ => Self::Error,
        }
    }
}

/// Answer to a channel deallocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeallocAnswer {
    #[serde(rename = "DEALLOC_GRANT")]
    Grant,
    #[serde(rename = "DEALLOC_BUSY")]
    Busy,
    #[serde(rename = "DEALLOC_WRONG")]
    Wrong,
    #[serde(rename = "WRONG_TARGET")]
    WrongTarget,
    #[serde(rename = "ERROR")]
    Error,
}

impl DeallocAnswer {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Grant,
            2 => Self::Busy,
            3 => Self::Wrong,
            4 => Self::WrongTarget,
            _ => Self::Error,
        }
    }
}

/// Result of an allocation request, read from the transmit mailbox.
///
/// On the wire the four channel locations are flat `loc1`..`loc4` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AllocResultWire", from = "AllocResultWire")]
pub struct AllocationResult {
    pub channel_locations: [u8; 4],
    pub connection_label: u8,
    pub answer: AllocAnswer,
    pub free_channels: u8,
}

#[derive(Serialize, Deserialize)]
struct AllocResultWire {
    loc1: u8,
    loc2: u8,
    loc3: u8,
    loc4: u8,
    cl: u8,
    answer1: AllocAnswer,
    #[serde(rename = "freeChannels")]
    free_channels: u8,
}

impl From<AllocationResult> for AllocResultWire {
    fn from(result: AllocationResult) -> Self {
        let [loc1, loc2, loc3, loc4] = result.channel_locations;
        Self {
            loc1,
            loc2,
            loc3,
            loc4,
            cl: result.connection_label,
            answer1: result.answer,
            free_channels: result.free_channels,
        }
    }
}

impl From<AllocResultWire> for AllocationResult {
    fn from(wire: AllocResultWire) -> Self {
        Self {
            channel_locations: [wire.loc1, wire.loc2, wire.loc3, wire.loc4],
            connection_label: wire.cl,
            answer: wire.answer1,
            free_channels: wire.free_channels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeallocationResult {
    pub answer: DeallocAnswer,
}

/// Owner of a connection label, as resolved by the network master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceResult {
    #[serde(rename = "nodePos")]
    pub node_position: u8,
    pub group: u8,
    #[serde(rename = "logicalHigh")]
    pub logical_high: u8,
    #[serde(rename = "logicalLow")]
    pub logical_low: u8,
}

/// Parameters of a local stream onto the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(rename = "sourceAddrHigh")]
    pub source_address_high: u8,
    #[serde(rename = "sourceAddrLow")]
    pub source_address_low: u8,
    #[serde(rename = "fBlockID")]
    pub fblock_id: u8,
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    #[serde(rename = "sinkNr")]
    pub sink_nr: u8,
}

/// A remote source to be routed into the local sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEndpoint {
    #[serde(rename = "sourceAddrHigh")]
    pub source_address_high: u8,
    #[serde(rename = "sourceAddrLow")]
    pub source_address_low: u8,
    #[serde(rename = "fBlockID")]
    pub fblock_id: u8,
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    #[serde(rename = "sourceNr")]
    pub source_nr: u8,
}

/// A known audio source on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(rename = "fBlockID")]
    pub fblock_id: u8,
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    #[serde(rename = "shadow")]
    pub shadow_instance_id: u8,
    #[serde(rename = "addressHigh")]
    pub address_high: u8,
    #[serde(rename = "addressLow")]
    pub address_low: u8,
    pub name: String,
}
