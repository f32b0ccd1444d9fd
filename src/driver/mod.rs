//! OS8104A transceiver engine
//!
//! `Os8104` owns the register bus and the control lines and turns chip
//! interrupts into `DriverEvent`s. It never sleeps: every method that
//! starts a delayed step takes the current `Instant`, and the owner calls
//! `service(now)` in its loop to fire due timers and react to the lines.
//!
//! The engine is split across files by concern:
//! - `registers`: register map and the bring-up table
//! - `bringup`: reset sequencing and configuration
//! - `interrupt`: interrupt dispatch and the transmit path
//! - `allocation`: mailbox requests and audio routing
//! - `lock`: lock-loss detection and recovery polling

pub mod allocation;
pub mod bringup;
pub mod interrupt;
pub mod lock;
pub mod registers;

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::domain::{DriverConfig, DriverEvent, MostError, MostResult, TxRequest, MAX_PAYLOAD, MAX_SINGLE_PAYLOAD};
use crate::ports::{ControlLines, RegisterBus};
use crate::protocol::{encode_frame, encode_single, MultiPartSession};

pub use allocation::{PendingRequest, RequestKind};
pub use bringup::BringUp;
pub use interrupt::InterruptReason;
pub use registers::{ClockMode, NodeSetup, RegisterWrite};

use registers::*;

/// A step scheduled for later, run by `poll_timers`.
#[derive(Debug, Clone)]
pub(crate) enum DeferredAction {
    /// Release all allocations and check for lock after configuration
    PostConfig,
    /// Announce the stream and unmute once the allocated channels are written
    ConnectSink {
        request: crate::domain::StreamRequest,
        locations: [u8; 4],
    },
    /// Unmute the source ports after sink routing was applied
    UnmuteSource,
    /// Mute the source ports after sink routing was cleared
    MuteSource,
}

#[derive(Debug, Clone)]
struct Deferred {
    at: Instant,
    action: DeferredAction,
}

/// Driver for one OS8104A on a register bus.
pub struct Os8104<B: RegisterBus, L: ControlLines> {
    bus: B,
    lines: L,
    events: Sender<DriverEvent>,
    setup: NodeSetup,
    bring_up: BringUp,
    transceiver_locked: bool,
    master: bool,
    network_signal: Option<bool>,
    pending: Option<PendingRequest>,
    connection_label: Option<u8>,
    alloc_result: Option<crate::domain::AllocationResult>,
    multipart: Option<MultiPartSession>,
    lock_poll: Option<Instant>,
    stream_wait: Option<allocation::StreamWait>,
    sink_wait: Option<allocation::RoutingWait>,
    sink_routing: Option<[u8; 4]>,
    deferred: Vec<Deferred>,
}

impl<B: RegisterBus, L: ControlLines> Os8104<B, L> {
    /// Create a driver that publishes its events on `events`.
    ///
    /// Nothing touches the chip until `start` is called.
    pub fn new(bus: B, lines: L, config: &DriverConfig, events: Sender<DriverEvent>) -> Self {
        Self {
            bus,
            lines,
            events,
            setup: NodeSetup {
                node_address: config.node_address,
                group_address: config.group_address,
                sample_rate: config.sample_rate,
            },
            bring_up: BringUp::Idle,
            // Assume lock until the chip reports otherwise
            transceiver_locked: true,
            master: false,
            network_signal: None,
            pending: None,
            connection_label: None,
            alloc_result: None,
            multipart: None,
            lock_poll: None,
            stream_wait: None,
            sink_wait: None,
            sink_routing: None,
            deferred: Vec::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.transceiver_locked
    }

    /// Whether the chip reported itself as timing master at bring-up
    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn bring_up_state(&self) -> BringUp {
        self.bring_up
    }

    /// Connection label of the last granted allocation
    pub fn connection_label(&self) -> Option<u8> {
        self.connection_label
    }

    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Whether a multi-part message still holds the transmit buffer
    pub fn multipart_active(&self) -> bool {
        self.multipart.is_some()
    }

    /// Position of this node in the ring.
    pub fn node_position(&mut self) -> MostResult<u8> {
        self.read(REG_NPR)
    }

    /// Highest node position in the ring.
    pub fn max_position(&mut self) -> MostResult<u8> {
        self.read(REG_MPR)
    }

    /// Read both positions and publish them.
    pub fn publish_position(&mut self) -> MostResult<()> {
        let position = self.node_position()?;
        let max = self.max_position()?;
        self.emit(DriverEvent::PositionUpdate { position, max });
        Ok(())
    }

    /// Queue a control message for transmission.
    ///
    /// While the transceiver is unlocked the message is dropped with a
    /// warning. Payloads over 12 bytes go out as a multi-part sequence,
    /// one telegram per "message sent" interrupt.
    pub fn send_control_message(&mut self, msg: TxRequest) -> MostResult<()> {
        if !self.transceiver_locked {
            log::warn!(
                "Transceiver unlocked, dropping message fkt 0x{:03x} to 0x{:02x}{:02x}",
                msg.function_id,
                msg.target_address_high,
                msg.target_address_low
            );
            return Ok(());
        }
        if msg.payload.len() > MAX_PAYLOAD {
            return Err(MostError::Frame(format!(
                "Payload of {} bytes exceeds {MAX_PAYLOAD}",
                msg.payload.len()
            )));
        }
        self.ensure_transmit_free()?;

        if msg.payload.len() <= MAX_SINGLE_PAYLOAD {
            let frame = encode_single(&msg)?;
            return self.transmit(&frame);
        }

        log::debug!(
            "Sending {} byte payload as multi-part message",
            msg.payload.len()
        );
        self.multipart = Some(MultiPartSession::new(msg));
        self.continue_multipart()
    }

    /// `Busy` while a mailbox request or a multi-part message owns mXCMB.
    pub(crate) fn ensure_transmit_free(&self) -> MostResult<()> {
        if let Some(pending) = &self.pending {
            return Err(MostError::Busy(format!(
                "{} request still owns the transmit mailbox",
                pending.kind
            )));
        }
        // Telegrams of a multi-part message wait in mXCMB until their
        // transmit interrupt, so nothing else may be written there
        if self.multipart.is_some() {
            return Err(MostError::Busy(
                "Multi-part message already in flight".into(),
            ));
        }
        Ok(())
    }

    /// Send the next telegram of the active multi-part message, if any.
    ///
    /// The session is kept until the last telegram's own transmit
    /// interrupt, so the mailbox stays reserved while it is on the wire.
    fn continue_multipart(&mut self) -> MostResult<()> {
        let Some(mut session) = self.multipart.take() else {
            return Ok(());
        };
        if session.is_finished() {
            log::debug!("Multi-part message complete");
            return Ok(());
        }
        if !self.transceiver_locked {
            log::warn!(
                "Transceiver unlocked, abandoning multi-part message with {} bytes left",
                session.remaining()
            );
            return Ok(());
        }
        if let Some(telegram) = session.next() {
            let frame = encode_frame(session.header(), telegram.telegram_id, &telegram.payload)?;
            self.transmit(&frame)?;
        }
        self.multipart = Some(session);
        Ok(())
    }

    /// Write a frame into the transmit buffer and start transmission.
    fn transmit(&mut self, frame: &[u8]) -> MostResult<()> {
        log::trace!("TX {frame:02x?}");
        self.bus.write_register(REG_MXCMB, frame)?;
        self.set_bits(REG_MSGC, MSGC_START_TX)
    }

    /// Send from inside a deferred step: a busy mailbox is logged, not fatal.
    fn send_or_warn(&mut self, msg: TxRequest) -> MostResult<()> {
        match self.send_control_message(msg) {
            Err(MostError::Busy(reason)) => {
                log::warn!("Deferred send skipped: {reason}");
                Ok(())
            }
            other => other,
        }
    }

    /// React to the control lines and fire every timer that is due.
    ///
    /// Intended to be called in a tight loop by the owning thread.
    pub fn service(&mut self, now: Instant) -> MostResult<()> {
        if self.lines.interrupt_asserted()? {
            self.handle_interrupt(now)?;
        }
        self.check_network_signal()?;
        self.poll_timers(now)
    }

    /// Fire every deferred step, poll and timeout that is due at `now`.
    pub fn poll_timers(&mut self, now: Instant) -> MostResult<()> {
        self.poll_bring_up(now)?;

        if let Some(pending) = &self.pending {
            if now >= pending.deadline {
                log::error!("{} request timed out", pending.kind);
                self.pending = None;
            }
        }

        if self.lock_poll.is_some_and(|at| now >= at) && !self.check_for_lock()? {
            self.lock_poll = Some(now + lock::LOCK_POLL_INTERVAL);
        }

        self.poll_stream(now)?;
        self.poll_sink_routing(now)?;

        let mut due = Vec::new();
        self.deferred.retain(|d| {
            if d.at <= now {
                due.push(d.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|d| d.at);
        for deferred in due {
            self.run_deferred(deferred.action, now)?;
        }
        Ok(())
    }

    fn defer(&mut self, at: Instant, action: DeferredAction) {
        self.deferred.push(Deferred { at, action });
    }

    /// When this node is not timing master, follow the network status line
    /// by enabling or disabling the transceiver output.
    fn check_network_signal(&mut self) -> MostResult<()> {
        let signal = self.lines.network_signal()?;
        let previous = self.network_signal.replace(signal);
        if previous.is_none() || previous == Some(signal) {
            return Ok(());
        }
        if self.master || self.bring_up != BringUp::Operational {
            return Ok(());
        }
        if signal {
            log::info!("Network signal detected, enabling output");
            self.set_bits(REG_XCR, XCR_OUTPUT_ENABLE)
        } else {
            log::info!("Network signal lost, disabling output");
            self.clear_bits(REG_XCR, XCR_OUTPUT_ENABLE)
        }
    }

    fn run_deferred(&mut self, action: DeferredAction, now: Instant) -> MostResult<()> {
        match action {
            DeferredAction::PostConfig => self.finish_bring_up(now),
            DeferredAction::ConnectSink { request, locations } => {
                self.connect_sink(request, locations)
            }
            DeferredAction::UnmuteSource => {
                self.write(REG_SDC3, 0x00)?;
                self.set_bits(REG_SDC1, SDC1_UNMUTE_SOURCE)
            }
            DeferredAction::MuteSource => self.write(REG_SDC3, SDC3_MUTE_SOURCE_PORTS),
        }
    }

    fn emit(&self, event: DriverEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    // --- register helpers ---

    fn read(&mut self, address: u8) -> MostResult<u8> {
        self.bus.read_register(address)
    }

    fn write(&mut self, address: u8, value: u8) -> MostResult<()> {
        self.bus.write_register(address, &[value])?;
        Ok(())
    }

    fn set_bits(&mut self, address: u8, bits: u8) -> MostResult<()> {
        let value = self.read(address)?;
        self.write(address, value | bits)
    }

    fn clear_bits(&mut self, address: u8, bits: u8) -> MostResult<()> {
        let value = self.read(address)?;
        self.write(address, value & !bits)
    }
}

/// Delay between the routing writes and the follow-up (un)mute.
pub(crate) const ROUTING_SETTLE: Duration = Duration::from_millis(100);
