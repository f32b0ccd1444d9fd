//! Streaming-channel allocation and audio routing.
//!
//! Allocation, deallocation and remote-source lookups share the transmit
//! mailbox: the request is written at mXCMB, and the answer is read back
//! from the same place on the next "message transmitted" interrupt. Only
//! one request may be outstanding; it expires after 500 ms.

use std::fmt;
use std::time::{Duration, Instant};

use crate::domain::{
    AllocAnswer, DeallocAnswer, DriverEvent, MostError, MostResult, SourceEndpoint,
    StreamRequest, TxRequest,
};
use crate::ports::{ControlLines, RegisterBus};
use crate::protocol::{
    decode_allocation, decode_deallocation, decode_source_result, op, MailboxRequest,
    BROADCAST_LABEL, MAILBOX_RESULT_LEN,
};

use super::interrupt::FKT_SOURCE_ALLOCATE;
use super::registers::*;
use super::{DeferredAction, Os8104, ROUTING_SETTLE};

pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on waiting for an allocation or routing answer in the helpers
pub const ROUTING_TIMEOUT: Duration = Duration::from_secs(1);

pub const ROUTING_POLL_INTERVAL: Duration = Duration::from_millis(20);

const FKT_SOURCE_DEALLOCATE: u16 = 0x102;
const FKT_SINK_CONNECT: u16 = 0x111;
const FKT_SOURCE_ACTIVITY: u16 = 0x112;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Allocate,
    Deallocate,
    GetSource,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allocate => "Allocate",
            Self::Deallocate => "Deallocate",
            Self::GetSource => "Get source",
        };
        f.write_str(name)
    }
}

/// The one mailbox request awaiting its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub kind: RequestKind,
    pub deadline: Instant,
}

/// `stream` waiting for its allocation to be granted
#[derive(Debug, Clone)]
pub(crate) struct StreamWait {
    request: StreamRequest,
    next_check: Instant,
    deadline: Instant,
}

/// `connect_source` waiting for the remote source's routing bytes
#[derive(Debug, Clone)]
pub(crate) struct RoutingWait {
    next_check: Instant,
    deadline: Instant,
}

impl<B: RegisterBus, L: ControlLines> Os8104<B, L> {
    /// Ask the timing master for a streaming channel.
    pub fn allocate(&mut self, now: Instant) -> MostResult<()> {
        self.submit_mailbox(MailboxRequest::Allocate, RequestKind::Allocate, now)
    }

    /// Release the channel recorded by the last granted allocation.
    ///
    /// Without a recorded connection label this only logs.
    pub fn deallocate(&mut self, now: Instant) -> MostResult<()> {
        let Some(label) = self.connection_label else {
            log::warn!("Deallocate requested but no connection label is set");
            return Ok(());
        };
        self.submit_mailbox(
            MailboxRequest::Deallocate(label),
            RequestKind::Deallocate,
            now,
        )
    }

    /// Release every allocation on the network.
    pub fn deallocate_all(&mut self, now: Instant) -> MostResult<()> {
        self.submit_mailbox(
            MailboxRequest::Deallocate(BROADCAST_LABEL),
            RequestKind::Deallocate,
            now,
        )
    }

    /// Ask which node owns connection `label`.
    pub fn get_remote_source(&mut self, label: u8, now: Instant) -> MostResult<()> {
        self.submit_mailbox(MailboxRequest::GetSource(label), RequestKind::GetSource, now)
    }

    fn submit_mailbox(
        &mut self,
        request: MailboxRequest,
        kind: RequestKind,
        now: Instant,
    ) -> MostResult<()> {
        if let Some(pending) = &self.pending {
            return Err(MostError::Busy(format!(
                "{kind} refused, {} request still pending",
                pending.kind
            )));
        }
        if self.multipart.is_some() {
            return Err(MostError::Busy(format!(
                "{kind} refused, multi-part message in flight"
            )));
        }
        log::debug!("{kind} request submitted");
        self.bus.write_register(REG_MXCMB, &request.encode())?;
        self.set_bits(REG_MSGC, MSGC_START_TX)?;
        self.pending = Some(PendingRequest {
            kind,
            deadline: now + REQUEST_TIMEOUT,
        });
        Ok(())
    }

    /// Read the mailbox answer for `kind` and publish it.
    pub(super) fn resolve_mailbox(&mut self, kind: RequestKind) -> MostResult<()> {
        let buf = self.bus.read_registers(REG_MXCMB, MAILBOX_RESULT_LEN)?;
        log::trace!("Mailbox {buf:02x?}");
        match kind {
            RequestKind::Allocate => match decode_allocation(&buf) {
                Ok(result) => {
                    log::info!(
                        "Allocation {:?}, label 0x{:02x}, {} channels free",
                        result.answer,
                        result.connection_label,
                        result.free_channels
                    );
                    // Recorded for every answer, not only grants
                    self.connection_label = Some(result.connection_label);
                    self.alloc_result = Some(result.clone());
                    self.emit(DriverEvent::AllocResult(result));
                }
                Err(e) => log::warn!("Discarding allocation answer: {e}"),
            },
            RequestKind::Deallocate => match decode_deallocation(&buf) {
                Ok(result) => {
                    log::info!("Deallocation {:?}", result.answer);
                    if result.answer == DeallocAnswer::Grant {
                        self.reset_channel_routing()?;
                    }
                    self.emit(DriverEvent::DeallocResult(result));
                }
                Err(e) => log::warn!("Discarding deallocation answer: {e}"),
            },
            RequestKind::GetSource => match decode_source_result(&buf) {
                Ok(result) => self.emit(DriverEvent::GetSourceResult(result)),
                Err(e) => log::warn!("Discarding source answer: {e}"),
            },
        }
        Ok(())
    }

    /// Point every stored channel location back at itself and forget the
    /// allocation.
    fn reset_channel_routing(&mut self) -> MostResult<()> {
        if let Some(result) = self.alloc_result.take() {
            for location in result.channel_locations {
                self.write(location, location)?;
            }
        }
        self.connection_label = None;
        Ok(())
    }

    // --- local source streaming ---

    /// Allocate channels and, once granted, route the local source onto
    /// them and announce the stream to `request`'s target.
    pub fn stream(&mut self, request: StreamRequest, now: Instant) -> MostResult<()> {
        log::info!(
            "Streaming sink {} to 0x{:02x}{:02x}",
            request.sink_nr,
            request.source_address_high,
            request.source_address_low
        );
        self.allocate(now)?;
        self.alloc_result = None;
        self.stream_wait = Some(StreamWait {
            request,
            next_check: now + ROUTING_POLL_INTERVAL,
            deadline: now + ROUTING_TIMEOUT,
        });
        Ok(())
    }

    pub(super) fn poll_stream(&mut self, now: Instant) -> MostResult<()> {
        let Some(wait) = self.stream_wait.as_mut() else {
            return Ok(());
        };
        if now < wait.next_check {
            return Ok(());
        }
        match self.alloc_result.clone() {
            Some(result) => {
                let request = wait.request.clone();
                self.stream_wait = None;
                if result.answer != AllocAnswer::Grant {
                    log::warn!("Stream aborted, allocation answered {:?}", result.answer);
                    return Ok(());
                }
                self.route_stream(request, result.channel_locations, now)
            }
            None if now >= wait.deadline => {
                log::error!("Stream timed out waiting for allocation");
                self.stream_wait = None;
                Ok(())
            }
            None => {
                wait.next_check = now + ROUTING_POLL_INTERVAL;
                Ok(())
            }
        }
    }

    fn route_stream(
        &mut self,
        request: StreamRequest,
        locations: [u8; 4],
        now: Instant,
    ) -> MostResult<()> {
        for (location, data) in locations.into_iter().zip(STREAM_SOURCE_DATA) {
            self.write(location, data)?;
        }
        self.send_or_warn(TxRequest {
            target_address_high: request.source_address_high,
            target_address_low: request.source_address_low,
            fblock_id: request.fblock_id,
            instance_id: request.instance_id,
            function_id: FKT_SOURCE_ACTIVITY,
            op_type: op::SET_GET,
            payload: vec![request.sink_nr],
        })?;
        self.defer(
            now + ROUTING_SETTLE,
            DeferredAction::ConnectSink { request, locations },
        );
        Ok(())
    }

    pub(super) fn connect_sink(
        &mut self,
        request: StreamRequest,
        locations: [u8; 4],
    ) -> MostResult<()> {
        let position = self.node_position()?;
        let mut payload = vec![request.sink_nr, position];
        payload.extend_from_slice(&locations);
        self.send_or_warn(TxRequest {
            target_address_high: request.source_address_high,
            target_address_low: request.source_address_low,
            fblock_id: request.fblock_id,
            instance_id: request.instance_id,
            function_id: FKT_SINK_CONNECT,
            op_type: op::SET_GET,
            payload,
        })?;
        self.write(REG_SDC3, 0x00)?;
        self.set_bits(REG_SDC1, SDC1_UNMUTE_SOURCE)
    }

    // --- remote source into the local sink ---

    /// Ask a remote source to allocate and route its audio into our sink.
    pub fn connect_source(&mut self, source: SourceEndpoint, now: Instant) -> MostResult<()> {
        log::info!(
            "Connecting source {} of fblock 0x{:02x} at 0x{:02x}{:02x}",
            source.source_nr,
            source.fblock_id,
            source.source_address_high,
            source.source_address_low
        );
        self.ensure_transmit_free()?;
        self.clear_sink_routing(now)?;
        self.send_control_message(source_request(&source, FKT_SOURCE_ALLOCATE))?;
        self.sink_wait = Some(RoutingWait {
            next_check: now + ROUTING_POLL_INTERVAL,
            deadline: now + ROUTING_TIMEOUT,
        });
        Ok(())
    }

    /// Tell a remote source to release its channels and unroute our sink.
    pub fn deallocate_source(&mut self, source: SourceEndpoint, now: Instant) -> MostResult<()> {
        log::info!("Disconnecting source {}", source.source_nr);
        self.send_control_message(source_request(&source, FKT_SOURCE_DEALLOCATE))?;
        self.clear_sink_routing(now)
    }

    /// Route externally obtained bytes into the local sink.
    pub fn retrieve_audio(&mut self, routing: [u8; 4], now: Instant) -> MostResult<()> {
        self.sink_routing = Some(routing);
        self.apply_sink_routing(routing, now)
    }

    pub(super) fn poll_sink_routing(&mut self, now: Instant) -> MostResult<()> {
        let Some(wait) = self.sink_wait.as_mut() else {
            return Ok(());
        };
        if now < wait.next_check {
            return Ok(());
        }
        match self.sink_routing {
            Some(routing) => {
                self.sink_wait = None;
                self.apply_sink_routing(routing, now)
            }
            None if now >= wait.deadline => {
                log::error!("Source connection timed out waiting for routing bytes");
                self.sink_wait = None;
                Ok(())
            }
            None => {
                wait.next_check = now + ROUTING_POLL_INTERVAL;
                Ok(())
            }
        }
    }

    fn apply_sink_routing(&mut self, routing: [u8; 4], now: Instant) -> MostResult<()> {
        log::debug!("Routing sink from {routing:02x?}");
        for (register, value) in SINK_ROUTING.into_iter().zip(routing) {
            self.write(register, value)?;
        }
        self.defer(now + ROUTING_SETTLE, DeferredAction::UnmuteSource);
        Ok(())
    }

    fn clear_sink_routing(&mut self, now: Instant) -> MostResult<()> {
        self.sink_routing = None;
        for register in SINK_ROUTING {
            self.write(register, ROUTING_UNUSED)?;
        }
        self.defer(now + ROUTING_SETTLE, DeferredAction::MuteSource);
        Ok(())
    }
}

fn source_request(source: &SourceEndpoint, function_id: u16) -> TxRequest {
    TxRequest {
        target_address_high: source.source_address_high,
        target_address_low: source.source_address_low,
        fblock_id: source.fblock_id,
        instance_id: source.instance_id,
        function_id,
        op_type: op::SET_GET,
        payload: vec![source.source_nr],
    }
}
