//! Driver events and requests
//!
//! Everything the driver publishes is a `DriverEvent`; everything it accepts
//! from collaborators is a `DriverRequest`. Both serialize with an
//! `eventType` tag so the datagram bridge can forward them unchanged.

use serde::{Deserialize, Serialize};

use super::types::{
    AllocationResult, DeallocationResult, RxMessage, SourceEndpoint, SourceResult,
    StreamRequest, TxRequest,
};

/// Events published by the driver thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum DriverEvent {
    #[serde(rename = "newMessage")]
    MostMessageRx(RxMessage),
    #[serde(rename = "allocResult")]
    AllocResult(AllocationResult),
    #[serde(rename = "deallocResult")]
    DeallocResult(DeallocationResult),
    #[serde(rename = "getSourceResult")]
    GetSourceResult(SourceResult),
    #[serde(rename = "locked")]
    Locked,
    #[serde(rename = "unlocked")]
    Unlocked,
    #[serde(rename = "messageSent")]
    MessageSent,
    #[serde(rename = "shutDown")]
    Shutdown,
    #[serde(rename = "positionUpdate")]
    PositionUpdate {
        #[serde(rename = "nodePosition")]
        position: u8,
        #[serde(rename = "maxPosition")]
        max: u8,
    },
}

/// Routing bytes for the local sink, keyed "0".."3" on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingBytes {
    #[serde(rename = "0")]
    pub b0: u8,
    #[serde(rename = "1")]
    pub b1: u8,
    #[serde(rename = "2", default)]
    pub b2: Option<u8>,
    #[serde(rename = "3", default)]
    pub b3: Option<u8>,
}

impl RoutingBytes {
    /// Missing upper bytes fall back to the "unrouted" marker 0xF8.
    pub fn to_array(&self) -> [u8; 4] {
        [
            self.b0,
            self.b1,
            self.b2.unwrap_or(0xf8),
            self.b3.unwrap_or(0xf8),
        ]
    }
}

/// Requests accepted by the driver thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum DriverRequest {
    #[serde(rename = "sendControlMessage")]
    SendControlMessage(TxRequest),
    #[serde(rename = "getNodePosition")]
    GetNodePosition,
    #[serde(rename = "allocate")]
    Allocate,
    #[serde(rename = "deallocate")]
    Deallocate,
    #[serde(rename = "getSource")]
    GetSource {
        #[serde(rename = "connectionLabel")]
        connection_label: u8,
    },
    #[serde(rename = "stream")]
    Stream(StreamRequest),
    #[serde(rename = "retrieveAudio")]
    RetrieveAudio(RoutingBytes),
    #[serde(rename = "connectSource")]
    ConnectSource(SourceEndpoint),
    #[serde(rename = "disconnectSource")]
    DisconnectSource(SourceEndpoint),
    #[serde(rename = "shutdown")]
    Shutdown,
}
