//! Source session controller
//!
//! Drives the head unit's source-switch handshake and answers its protocol
//! chatter. Each handshake step is a control message to the head unit that
//! is answered with a RESULT (opType 0x0D) on the same function; the next
//! step is only sent once that answer arrives:
//!
//! ```text
//! switch:  406 → 408 → stop current → (100 ms) 405 → 407 → start next
//! stop:    408 → 406 → stop current
//! ```
//!
//! Without a current source the switch starts at 405. There are no retries:
//! a step that is never answered waits until the next switch or an unlock.
//!
//! Like the driver, the controller is sans-I/O with respect to time. Feed
//! it driver events with `handle_event` and call `poll` regularly.

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::domain::{DriverEvent, MostResult, RxMessage, SourceRecord, TxRequest};
use crate::ports::MostControl;
use crate::protocol::op;

use super::responder::{self, SubscriptionSweep, HEAD_UNIT_HIGH, HEAD_UNIT_LOW};
use super::sources::{default_source, Skip, SkipAction, SourceKind};
use super::store::LastSourceStore;

/// Chip settle time between `Locked` and answering the network
pub const READY_DELAY: Duration = Duration::from_millis(50);
/// Gap between stopping the old source and announcing the new one
pub const ASSIGN_DELAY: Duration = Duration::from_millis(100);
pub const SUBSCRIBE_SPACING: Duration = Duration::from_millis(300);
pub const RECEIVER_READY_DELAY: Duration = Duration::from_millis(700);
/// Delay before answering a deactivation of the current source
pub const DEACTIVATE_REPLY_DELAY: Duration = Duration::from_millis(50);
pub const SOFT_START_DELAY: Duration = Duration::from_millis(2000);

const FBLOCK_HEAD_UNIT: u8 = 0xf0;
const FBLOCK_AUDIO_MASTER: u8 = 0x10;

/// Handshake steps, named by function id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// 0x405: the next source takes its active instance
    Assign,
    /// 0x406: the current source goes back to its shadow instance
    Release,
    /// 0x407: connect the next source
    Connect,
    /// 0x408: disconnect the current source
    Disconnect,
}

impl Handshake {
    pub fn function_id(self) -> u16 {
        match self {
            Self::Assign => 0x405,
            Self::Release => 0x406,
            Self::Connect => 0x407,
            Self::Disconnect => 0x408,
        }
    }

    pub fn from_function_id(function_id: u16) -> Option<Self> {
        match function_id {
            0x405 => Some(Self::Assign),
            0x406 => Some(Self::Release),
            0x407 => Some(Self::Connect),
            0x408 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Frame for this step about `source`.
    pub fn request(self, source: &SourceRecord) -> TxRequest {
        let f = source.fblock_id;
        let s = source.shadow_instance_id;
        let i = source.instance_id;
        let payload = match self {
            Self::Release => vec![0x00, 0x03, f, s, 0x01, 0x01, f, i, 0x01, 0x11],
            Self::Disconnect => vec![0x00, 0x02, f, s, 0x01, 0x11],
            Self::Assign => vec![0x00, 0x02, f, s, 0x01, 0x01, f, i, 0x01, 0x11],
            Self::Connect => vec![0x00, 0x01, f, s, 0x01, 0x11],
        };
        TxRequest {
            target_address_high: HEAD_UNIT_HIGH,
            target_address_low: HEAD_UNIT_LOW,
            fblock_id: FBLOCK_HEAD_UNIT,
            instance_id: 0x01,
            function_id: self.function_id(),
            op_type: op::START_RESULT,
            payload,
        }
    }
}

/// Where the controller is in a source change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Tearing down the current source before a switch
    SwitchingOut(Handshake),
    /// Bringing up the next source
    SwitchingIn(Handshake),
    /// Tearing down the current source with nothing to follow
    Stopping(Handshake),
    Active,
}

/// Observable controller state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub current_source: Option<SourceRecord>,
    pub next_source: Option<SourceRecord>,
    pub ready: bool,
    pub locked: bool,
}

/// Notifications for the local application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "eventType")]
pub enum SessionEvent {
    #[serde(rename = "sourceActive")]
    SourceActive(SourceRecord),
    #[serde(rename = "sourceStopped")]
    SourceStopped(SourceRecord),
    #[serde(rename = "softStart")]
    SoftStart,
    #[serde(rename = "softShutdown")]
    SoftShutdown,
    #[serde(rename = "skipForward")]
    SkipForward,
    #[serde(rename = "skipBackward")]
    SkipBackward,
}

#[derive(Debug, Clone)]
enum Timer {
    Ready,
    SendAssign,
    SubscribeNext,
    ReceiverReady,
    Reply(TxRequest),
    ResumeAfterSoftStart,
}

pub struct SessionController<C: MostControl> {
    control: C,
    store: LastSourceStore,
    events: Sender<SessionEvent>,
    state: SessionState,
    phase: Phase,
    default_source: SourceRecord,
    position: u8,
    alloc_request: Option<RxMessage>,
    dealloc_request: Option<RxMessage>,
    sweep: Option<SubscriptionSweep>,
    timers: Vec<(Instant, Timer)>,
}

impl<C: MostControl> SessionController<C> {
    /// Build a controller, reading the last selected source from `store`.
    pub fn new(control: C, store: LastSourceStore, events: Sender<SessionEvent>) -> Self {
        let default_source = match store.load() {
            Ok(source) => source,
            Err(e) => {
                log::warn!("Falling back to default source: {e}");
                default_source()
            }
        };
        log::info!("Default source is {}", default_source.name);
        Self {
            control,
            store,
            events,
            state: SessionState {
                current_source: None,
                next_source: None,
                ready: false,
                locked: false,
            },
            phase: Phase::Idle,
            default_source,
            position: 0,
            alloc_request: None,
            dealloc_request: None,
            sweep: None,
            timers: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn default_source(&self) -> &SourceRecord {
        &self.default_source
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    // --- source switching ---

    /// Switch to `source`, or to the default source when `None`.
    ///
    /// An explicit source is persisted and becomes the new default.
    pub fn switch_source(&mut self, source: Option<SourceRecord>) -> MostResult<()> {
        if let Some(source) = &source {
            if let Err(e) = self.store.save(source) {
                log::warn!("Could not persist last source: {e}");
            }
            self.default_source = source.clone();
        }
        let next = source.unwrap_or_else(|| self.default_source.clone());
        self.begin_switch(next)
    }

    fn begin_switch(&mut self, next: SourceRecord) -> MostResult<()> {
        log::info!("Switching to {}", next.name);
        self.timers.retain(|(_, t)| !matches!(t, Timer::SendAssign));
        self.state.next_source = Some(next);
        match self.state.current_source.clone() {
            Some(current) => {
                self.phase = Phase::SwitchingOut(Handshake::Release);
                self.control.send_control_message(Handshake::Release.request(&current))
            }
            None => self.send_assign(),
        }
    }

    fn send_assign(&mut self) -> MostResult<()> {
        self.phase = Phase::SwitchingIn(Handshake::Assign);
        match self.state.next_source.clone() {
            Some(next) => self
                .control
                .send_control_message(Handshake::Assign.request(&next)),
            None => {
                self.phase = Phase::Idle;
                Ok(())
            }
        }
    }

    /// Tear down the current source without selecting another.
    pub fn stop_source(&mut self) -> MostResult<()> {
        let Some(current) = self.state.current_source.clone() else {
            log::debug!("No source to stop");
            return Ok(());
        };
        log::info!("Stopping {}", current.name);
        self.timers.retain(|(_, t)| !matches!(t, Timer::SendAssign));
        self.phase = Phase::Stopping(Handshake::Disconnect);
        self.control
            .send_control_message(Handshake::Disconnect.request(&current))
    }

    fn on_handshake_result(&mut self, step: Handshake, now: Instant) -> MostResult<()> {
        log::debug!("Handshake 0x{:03x} complete", step.function_id());
        match (self.phase, step) {
            (Phase::SwitchingOut(Handshake::Release), Handshake::Release) => {
                if let Some(current) = self.state.current_source.clone() {
                    self.phase = Phase::SwitchingOut(Handshake::Disconnect);
                    self.control
                        .send_control_message(Handshake::Disconnect.request(&current))?;
                }
                Ok(())
            }
            (Phase::SwitchingOut(Handshake::Disconnect), Handshake::Disconnect) => {
                self.stop_current()?;
                self.phase = Phase::SwitchingIn(Handshake::Assign);
                self.timers.push((now + ASSIGN_DELAY, Timer::SendAssign));
                Ok(())
            }
            (Phase::SwitchingIn(Handshake::Assign), Handshake::Assign) => {
                if let Some(next) = self.state.next_source.clone() {
                    self.phase = Phase::SwitchingIn(Handshake::Connect);
                    self.control
                        .send_control_message(Handshake::Connect.request(&next))?;
                }
                Ok(())
            }
            (Phase::SwitchingIn(Handshake::Connect), Handshake::Connect) => {
                self.state.current_source = self.state.next_source.clone();
                self.phase = Phase::Active;
                self.start_current()
            }
            (Phase::Stopping(Handshake::Disconnect), Handshake::Disconnect) => {
                if let Some(current) = self.state.current_source.clone() {
                    self.phase = Phase::Stopping(Handshake::Release);
                    self.control
                        .send_control_message(Handshake::Release.request(&current))?;
                }
                Ok(())
            }
            (Phase::Stopping(Handshake::Release), Handshake::Release) => {
                self.stop_current()?;
                self.state.current_source = None;
                self.phase = Phase::Idle;
                Ok(())
            }
            (phase, step) => {
                log::debug!("Ignoring {step:?} result in {phase:?}");
                Ok(())
            }
        }
    }

    fn start_current(&mut self) -> MostResult<()> {
        let Some(current) = self.state.current_source.clone() else {
            return Ok(());
        };
        log::info!("Starting {}", current.name);
        if let Some(request) = SourceKind::of(&current).start_request(&current) {
            self.control.send_control_message(request)?;
        }
        self.emit(SessionEvent::SourceActive(current));
        Ok(())
    }

    fn stop_current(&mut self) -> MostResult<()> {
        let Some(current) = self.state.current_source.clone() else {
            return Ok(());
        };
        log::info!("Stopping {}", current.name);
        if let Some(request) = SourceKind::of(&current).stop_request(&current) {
            self.control.send_control_message(request)?;
        }
        self.emit(SessionEvent::SourceStopped(current));
        Ok(())
    }

    // --- driver events ---

    pub fn handle_event(&mut self, event: &DriverEvent, now: Instant) -> MostResult<()> {
        match event {
            DriverEvent::MostMessageRx(msg) => self.handle_message(msg, now),
            DriverEvent::Locked => {
                self.state.locked = true;
                self.timers.push((now + READY_DELAY, Timer::Ready));
                Ok(())
            }
            DriverEvent::Unlocked => {
                log::info!("Network unlocked, session reset");
                self.state.locked = false;
                self.state.ready = false;
                self.state.current_source = None;
                self.phase = Phase::Idle;
                self.sweep = None;
                self.alloc_request = None;
                self.dealloc_request = None;
                self.timers.clear();
                Ok(())
            }
            DriverEvent::PositionUpdate { position, .. } => {
                self.position = *position;
                Ok(())
            }
            DriverEvent::MessageSent => {
                if self.sweep.as_mut().is_some_and(|s| s.message_sent()) {
                    self.timers.push((now + SUBSCRIBE_SPACING, Timer::SubscribeNext));
                }
                Ok(())
            }
            DriverEvent::AllocResult(result) => {
                let Some(request) = self.alloc_request.take() else {
                    return Ok(());
                };
                let mut payload = vec![request.byte(0), self.position];
                payload.extend_from_slice(&result.channel_locations);
                self.control
                    .send_control_message(TxRequest::reply_to(&request, op::STATUS, payload))
            }
            DriverEvent::DeallocResult(_) => {
                let Some(request) = self.dealloc_request.take() else {
                    return Ok(());
                };
                let payload = vec![request.byte(0)];
                self.control
                    .send_control_message(TxRequest::reply_to(&request, op::STATUS, payload))
            }
            DriverEvent::GetSourceResult(_) | DriverEvent::Shutdown => Ok(()),
        }
    }

    /// Fire every timer due at `now`.
    pub fn poll(&mut self, now: Instant) -> MostResult<()> {
        let mut due = Vec::new();
        self.timers.retain(|(at, timer)| {
            if *at <= now {
                due.push((*at, timer.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        for (_, timer) in due {
            self.fire(timer)?;
        }
        Ok(())
    }

    fn fire(&mut self, timer: Timer) -> MostResult<()> {
        match timer {
            Timer::Ready => {
                log::info!("Session ready");
                self.state.ready = true;
                Ok(())
            }
            Timer::SendAssign => self.send_assign(),
            Timer::SubscribeNext => {
                let next = self.sweep.as_mut().and_then(|s| s.next_request());
                if self.sweep.as_ref().is_some_and(|s| s.is_finished()) {
                    self.sweep = None;
                }
                match next {
                    Some(request) => self.control.send_control_message(request),
                    None => Ok(()),
                }
            }
            Timer::ReceiverReady => self.control.send_control_message(responder::receiver_ready()),
            Timer::Reply(request) => self.control.send_control_message(request),
            Timer::ResumeAfterSoftStart => match self.state.current_source.clone() {
                Some(current) => self.begin_switch(current),
                None => {
                    let next = self.default_source.clone();
                    self.begin_switch(next)
                }
            },
        }
    }

    // --- inbound messages ---

    pub fn handle_message(&mut self, msg: &RxMessage, now: Instant) -> MostResult<()> {
        if msg.fblock_id == 0x01 && msg.function_id == 0x000 && msg.op_type == op::GET {
            self.control.send_control_message(responder::fblock_list(msg))?;
        }
        if !self.state.ready {
            return Ok(());
        }

        if let Some(step) = Handshake::from_function_id(msg.function_id) {
            match msg.op_type {
                op::RESULT => self.on_handshake_result(step, now)?,
                op::PROCESSING => log::debug!("Waiting on 0x{:03x}", msg.function_id),
                _ => {}
            }
        } else {
            self.respond(msg, now)?;
        }

        match msg.function_id {
            0xc81 => self.on_c81(msg, now),
            0xca1 => self.on_skip(msg),
            _ => Ok(()),
        }
    }

    fn respond(&mut self, msg: &RxMessage, now: Instant) -> MostResult<()> {
        match (msg.function_id, msg.op_type) {
            (0xd22, _) if msg.fblock_id == 0x06 => {
                self.control
                    .send_control_message(responder::device_descriptor(msg))
            }
            (0x001, _) => {
                if msg.fblock_id == FBLOCK_AUDIO_MASTER {
                    self.timers.push((now + RECEIVER_READY_DELAY, Timer::ReceiverReady));
                }
                match responder::notification_status(msg) {
                    Some(reply) => self.control.send_control_message(reply),
                    None => Ok(()),
                }
            }
            (0x101, _) if msg.source_address_low == HEAD_UNIT_LOW && msg.fblock_id == FBLOCK_AUDIO_MASTER => {
                self.control
                    .send_control_message(responder::head_unit_allocation())
            }
            (0xda0 | 0xda1, op::SET_GET) => self.control.send_control_message(responder::acknowledge(msg)),
            (0xc80, op::START_RESULT) => self.control.send_control_message(responder::c80_result(msg)),
            (0xe00, op::SET) => {
                log::debug!("Power state 0x{:02x} 0x{:02x}", msg.byte(0), msg.byte(1));
                Ok(())
            }
            (0x101, op::SET_GET) => {
                log::info!("Allocation requested for source {}", msg.byte(0));
                self.alloc_request = Some(msg.clone());
                self.control.allocate()
            }
            (0x102, op::SET_GET) => {
                log::info!("Deallocation requested for source {}", msg.byte(0));
                self.dealloc_request = Some(msg.clone());
                self.control.deallocate()
            }
            _ => Ok(()),
        }
    }

    fn on_c81(&mut self, msg: &RxMessage, now: Instant) -> MostResult<()> {
        match msg.byte(0) {
            0x00 => {
                self.control.send_control_message(responder::acknowledge(msg))?;
                if msg.byte(1) != 0x01 && msg.fblock_id == FBLOCK_AUDIO_MASTER {
                    self.subscribe_all()?;
                }
            }
            0x02 => {
                let is_current = self.state.current_source.as_ref().is_some_and(|c| {
                    c.fblock_id == msg.fblock_id && c.shadow_instance_id == msg.instance_id
                });
                if is_current {
                    log::info!("Head unit deactivated the current source");
                    self.stop_source()?;
                    self.timers.push((
                        now + DEACTIVATE_REPLY_DELAY,
                        Timer::Reply(responder::acknowledge(msg)),
                    ));
                } else {
                    self.control.send_control_message(responder::acknowledge(msg))?;
                }
            }
            _ => {}
        }

        if msg.fblock_id == FBLOCK_AUDIO_MASTER {
            match msg.byte(0) {
                0x02 => self.emit(SessionEvent::SoftShutdown),
                0x00 => {
                    self.emit(SessionEvent::SoftStart);
                    self.timers
                        .push((now + SOFT_START_DELAY, Timer::ResumeAfterSoftStart));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn on_skip(&mut self, msg: &RxMessage) -> MostResult<()> {
        let skip = if msg.byte(0) == 0x03 && msg.byte(1) == 0x01 {
            Skip::Forward
        } else if msg.byte(0) == 0x04 && msg.byte(2) == 0x01 {
            Skip::Backward
        } else {
            return Ok(());
        };
        let Some(current) = self.state.current_source.clone() else {
            log::debug!("Skip {skip:?} with no current source");
            return Ok(());
        };
        match SourceKind::of(&current).skip(&current, skip) {
            SkipAction::Send(request) => self.control.send_control_message(request),
            SkipAction::Surface(Skip::Forward) => {
                self.emit(SessionEvent::SkipForward);
                Ok(())
            }
            SkipAction::Surface(Skip::Backward) => {
                self.emit(SessionEvent::SkipBackward);
                Ok(())
            }
            SkipAction::Ignore => Ok(()),
        }
    }

    fn subscribe_all(&mut self) -> MostResult<()> {
        log::info!("Subscribing to notifications");
        self.timers.retain(|(_, t)| !matches!(t, Timer::SubscribeNext));
        let mut sweep = SubscriptionSweep::new();
        let first = sweep.next_request();
        self.sweep = Some(sweep);
        match first {
            Some(request) => self.control.send_control_message(request),
            None => Ok(()),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AllocAnswer, AllocationResult};
    use crate::session::sources::find_source;
    use crossbeam_channel::Receiver;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Send(TxRequest),
        Allocate,
        Deallocate,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl Recorder {
        fn sent_functions(&self) -> Vec<u16> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Send(tx) => Some(tx.function_id),
                    _ => None,
                })
                .collect()
        }

        fn last_sent(&self) -> Option<&TxRequest> {
            self.calls.iter().rev().find_map(|c| match c {
                Call::Send(tx) => Some(tx),
                _ => None,
            })
        }
    }

    impl MostControl for Recorder {
        fn send_control_message(&mut self, msg: TxRequest) -> MostResult<()> {
            self.calls.push(Call::Send(msg));
            Ok(())
        }
        fn allocate(&mut self) -> MostResult<()> {
            self.calls.push(Call::Allocate);
            Ok(())
        }
        fn deallocate(&mut self) -> MostResult<()> {
            self.calls.push(Call::Deallocate);
            Ok(())
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    struct Harness {
        session: SessionController<Recorder>,
        events: Receiver<SessionEvent>,
        t0: Instant,
        _dir: tempfile::TempDir,
    }

    fn ready_session() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut session = SessionController::new(Recorder::default(), store, tx);
        let t0 = Instant::now();
        session.handle_event(&DriverEvent::Locked, t0).unwrap();
        session.poll(t0 + ms(50)).unwrap();
        assert!(session.state().ready);
        Harness {
            session,
            events: rx,
            t0,
            _dir: dir,
        }
    }

    fn message(fblock_id: u8, function_id: u16, op_type: u8, payload: Vec<u8>) -> RxMessage {
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

    fn complete(h: &mut Harness, function_id: u16, at: Instant) {
        let msg = message(0xf0, function_id, op::RESULT, vec![]);
        h.session.handle_message(&msg, at).unwrap();
    }

    #[test]
    fn ready_follows_lock_after_settle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut session = SessionController::new(Recorder::default(), store, tx);
        let t0 = Instant::now();
        session.handle_event(&DriverEvent::Locked, t0).unwrap();
        session.poll(t0 + ms(49)).unwrap();
        assert!(!session.state().ready);
        session.poll(t0 + ms(50)).unwrap();
        assert!(session.state().ready);
        assert!(session.state().locked);
    }

    #[test]
    fn first_switch_skips_teardown() {
        let mut h = ready_session();
        h.session.switch_source(None).unwrap();
        assert_eq!(h.session.control().sent_functions(), vec![0x405]);
        assert_eq!(h.session.phase(), Phase::SwitchingIn(Handshake::Assign));

        let t0 = h.t0;
        complete(&mut h, 0x405, t0);
        let t0 = h.t0;
        complete(&mut h, 0x407, t0);

        let tuner = find_source("amFmTuner").unwrap();
        assert_eq!(h.session.state().current_source, Some(tuner.clone()));
        assert_eq!(h.session.phase(), Phase::Active);
        // 405, 407, tuner start
        assert_eq!(h.session.control().sent_functions(), vec![0x405, 0x407, 0x103]);
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::SourceActive(tuner));
    }

    #[test]
    fn handshake_frames_carry_source_identifiers() {
        let usb = find_source("usbAudio").unwrap();
        let assign = Handshake::Assign.request(&usb);
        assert_eq!((assign.target_address_high, assign.target_address_low), (0x01, 0x61));
        assert_eq!((assign.fblock_id, assign.instance_id, assign.op_type), (0xf0, 0x01, 0x06));
        assert_eq!(
            assign.payload,
            vec![0x00, 0x02, 0x31, 0xa2, 0x01, 0x01, 0x31, 0x05, 0x01, 0x11]
        );
        assert_eq!(
            Handshake::Release.request(&usb).payload,
            vec![0x00, 0x03, 0x31, 0xa2, 0x01, 0x01, 0x31, 0x05, 0x01, 0x11]
        );
        assert_eq!(
            Handshake::Disconnect.request(&usb).payload,
            vec![0x00, 0x02, 0x31, 0xa2, 0x01, 0x11]
        );
        assert_eq!(
            Handshake::Connect.request(&usb).payload,
            vec![0x00, 0x01, 0x31, 0xa2, 0x01, 0x11]
        );
    }

    #[test]
    fn out_of_order_results_are_ignored() {
        let mut h = ready_session();
        h.session.switch_source(None).unwrap();
        let t0 = h.t0;
        complete(&mut h, 0x407, t0);
        assert_eq!(h.session.phase(), Phase::SwitchingIn(Handshake::Assign));
        assert!(h.session.state().current_source.is_none());
    }

    #[test]
    fn processing_answer_does_not_advance() {
        let mut h = ready_session();
        h.session.switch_source(None).unwrap();
        let waiting = message(0xf0, 0x405, op::PROCESSING, vec![]);
        h.session.handle_message(&waiting, h.t0).unwrap();
        assert_eq!(h.session.phase(), Phase::SwitchingIn(Handshake::Assign));
    }

    #[test]
    fn explicit_switch_becomes_default() {
        let mut h = ready_session();
        let aux = find_source("auxIn").unwrap();
        h.session.switch_source(Some(aux.clone())).unwrap();
        assert_eq!(h.session.default_source(), &aux);
        assert_eq!(h.session.state().next_source, Some(aux));
    }

    #[test]
    fn unlock_resets_the_session() {
        let mut h = ready_session();
        h.session.switch_source(None).unwrap();
        let t0 = h.t0;
        complete(&mut h, 0x405, t0);
        let t0 = h.t0;
        complete(&mut h, 0x407, t0);

        h.session.handle_event(&DriverEvent::Unlocked, h.t0).unwrap();
        let state = h.session.state();
        assert!(state.current_source.is_none());
        assert!(!state.ready);
        assert!(!state.locked);
        assert_eq!(h.session.phase(), Phase::Idle);
    }

    #[test]
    fn nothing_but_enumeration_is_answered_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = LastSourceStore::new(dir.path().join("config-jlr.json"));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut session = SessionController::new(Recorder::default(), store, tx);
        let t0 = Instant::now();

        session
            .handle_message(&message(0x06, 0xd22, op::GET, vec![]), t0)
            .unwrap();
        assert!(session.control().calls.is_empty());

        session
            .handle_message(&message(0x01, 0x000, op::GET, vec![]), t0)
            .unwrap();
        let reply = session.control().last_sent().unwrap();
        assert_eq!(reply.payload.len(), 36);
        assert_eq!(reply.op_type, op::STATUS);
    }

    #[test]
    fn remote_allocation_is_answered_with_channels() {
        let mut h = ready_session();
        h.session
            .handle_event(&DriverEvent::PositionUpdate { position: 3, max: 6 }, h.t0)
            .unwrap();
        let request = message(0x31, 0x101, op::SET_GET, vec![0x01]);
        h.session.handle_message(&request, h.t0).unwrap();
        assert_eq!(h.session.control().calls, vec![Call::Allocate]);

        let result = AllocationResult {
            channel_locations: [0x08, 0x09, 0x0a, 0x0b],
            connection_label: 0x08,
            answer: AllocAnswer::Grant,
            free_channels: 20,
        };
        h.session
            .handle_event(&DriverEvent::AllocResult(result.clone()), h.t0)
            .unwrap();
        let reply = h.session.control().last_sent().unwrap();
        assert_eq!(reply.function_id, 0x101);
        assert_eq!(reply.op_type, op::STATUS);
        assert_eq!(reply.payload, vec![0x01, 3, 0x08, 0x09, 0x0a, 0x0b]);

        // A second result with no request in flight is not answered
        let calls = h.session.control().calls.len();
        h.session
            .handle_event(&DriverEvent::AllocResult(result), h.t0)
            .unwrap();
        assert_eq!(h.session.control().calls.len(), calls);
    }

    #[test]
    fn remote_deallocation_is_answered() {
        let mut h = ready_session();
        let request = message(0x31, 0x102, op::SET_GET, vec![0x02]);
        h.session.handle_message(&request, h.t0).unwrap();
        assert_eq!(h.session.control().calls, vec![Call::Deallocate]);

        let result = crate::domain::DeallocationResult {
            answer: crate::domain::DeallocAnswer::Grant,
        };
        h.session
            .handle_event(&DriverEvent::DeallocResult(result), h.t0)
            .unwrap();
        assert_eq!(h.session.control().last_sent().unwrap().payload, vec![0x02]);
    }

    #[test]
    fn head_unit_source_query_gets_fixed_answer() {
        let mut h = ready_session();
        let query = message(0x10, 0x101, op::GET, vec![]);
        h.session.handle_message(&query, h.t0).unwrap();
        let reply = h.session.control().last_sent().unwrap();
        assert_eq!((reply.fblock_id, reply.instance_id), (0xf0, 0xa3));
        assert_eq!(reply.payload, vec![0x01, 0x02, 0x20, 0x21]);
        assert!(!h.session.control().calls.contains(&Call::Allocate));
    }

    #[test]
    fn audio_master_registration_sends_receiver_status_later() {
        let mut h = ready_session();
        let register = message(0x10, 0x001, op::SET, vec![0x00, 0x01, 0x10, 0x0c, 0x02]);
        h.session.handle_message(&register, h.t0).unwrap();
        assert_eq!(h.session.control().sent_functions(), vec![0xc02]);

        h.session.poll(h.t0 + ms(699)).unwrap();
        assert_eq!(h.session.control().calls.len(), 1);
        h.session.poll(h.t0 + ms(700)).unwrap();
        let status = h.session.control().last_sent().unwrap();
        assert_eq!((status.fblock_id, status.function_id), (0x10, 0xc02));
        assert_eq!(status.payload, vec![0x01]);
    }

    #[test]
    fn c81_from_audio_master_runs_subscription_sweep() {
        let mut h = ready_session();
        let c81 = message(0x10, 0xc81, op::SET, vec![0x00, 0x00]);
        h.session.handle_message(&c81, h.t0).unwrap();
        // acknowledgement, then first subscription
        assert_eq!(h.session.control().sent_functions(), vec![0xc81, 0x001]);
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::SoftStart);

        let mut at = h.t0;
        for _ in 0..responder::SUBSCRIPTIONS.len() {
            h.session.handle_event(&DriverEvent::MessageSent, at).unwrap();
            at += SUBSCRIBE_SPACING;
            h.session.poll(at).unwrap();
        }
        let subscriptions = h
            .session
            .control()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Send(tx) if tx.function_id == 0x001 && tx.op_type == op::SET))
            .count();
        assert_eq!(subscriptions, responder::SUBSCRIPTIONS.len());
        let last = h.session.control().last_sent().unwrap();
        assert_eq!(last.fblock_id, 0xf5);

        // Sweep is over: further completions schedule nothing
        let calls = h.session.control().calls.len();
        h.session.handle_event(&DriverEvent::MessageSent, at).unwrap();
        h.session.poll(at + SUBSCRIBE_SPACING).unwrap();
        assert_eq!(h.session.control().calls.len(), calls);
    }

    #[test]
    fn soft_start_resumes_default_source() {
        let mut h = ready_session();
        let c81 = message(0x10, 0xc81, op::SET, vec![0x00, 0x01]);
        h.session.handle_message(&c81, h.t0).unwrap();
        // data[1] == 1: acknowledged without a sweep
        assert_eq!(h.session.control().sent_functions(), vec![0xc81]);

        h.session.poll(h.t0 + SOFT_START_DELAY).unwrap();
        assert_eq!(h.session.control().sent_functions(), vec![0xc81, 0x405]);
    }

    #[test]
    fn deactivating_current_source_stops_it() {
        let mut h = ready_session();
        h.session.switch_source(None).unwrap();
        let t0 = h.t0;
        complete(&mut h, 0x405, t0);
        let t0 = h.t0;
        complete(&mut h, 0x407, t0);
        let before = h.session.control().calls.len();

        let mut c81 = message(0x40, 0xc81, op::SET, vec![0x02]);
        c81.instance_id = 0xa1;
        h.session.handle_message(&c81, h.t0).unwrap();
        assert_eq!(h.session.control().sent_functions()[before..], [0x408]);

        h.session.poll(h.t0 + DEACTIVATE_REPLY_DELAY).unwrap();
        assert_eq!(h.session.control().last_sent().unwrap().function_id, 0xc81);

        let t0 = h.t0;
        complete(&mut h, 0x408, t0);
        let t0 = h.t0;
        complete(&mut h, 0x406, t0);
        assert!(h.session.state().current_source.is_none());
        assert_eq!(h.session.phase(), Phase::Idle);
        // tuner stop was sent
        assert_eq!(h.session.control().last_sent().unwrap().payload, vec![0x01, 0x00]);
    }

    #[test]
    fn skip_on_host_player_is_surfaced() {
        let mut h = ready_session();
        let usb = find_source("usbAudio").unwrap();
        h.session.switch_source(Some(usb)).unwrap();
        let t0 = h.t0;
        complete(&mut h, 0x405, t0);
        let t0 = h.t0;
        complete(&mut h, 0x407, t0);
        while h.events.try_recv().is_ok() {}

        let skip = message(0x31, 0xca1, op::SET, vec![0x03, 0x01, 0x00]);
        h.session.handle_message(&skip, h.t0).unwrap();
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::SkipForward);

        let back = message(0x31, 0xca1, op::SET, vec![0x04, 0x00, 0x01]);
        h.session.handle_message(&back, h.t0).unwrap();
        assert_eq!(h.events.try_recv().unwrap(), SessionEvent::SkipBackward);
    }

    #[test]
    fn skip_without_current_source_is_ignored() {
        let mut h = ready_session();
        let skip = message(0x31, 0xca1, op::SET, vec![0x03, 0x01, 0x00]);
        h.session.handle_message(&skip, h.t0).unwrap();
        assert!(h.session.control().calls.is_empty());
    }

    #[test]
    fn c80_and_da1_answers() {
        let mut h = ready_session();
        h.session
            .handle_message(&message(0x31, 0xc80, op::START_RESULT, vec![]), h.t0)
            .unwrap();
        let reply = h.session.control().last_sent().unwrap();
        assert_eq!((reply.op_type, reply.payload.clone()), (op::RESULT, vec![0x00, 0x01]));

        h.session
            .handle_message(&message(0x31, 0xda1, op::SET_GET, vec![0x05]), h.t0)
            .unwrap();
        let reply = h.session.control().last_sent().unwrap();
        assert_eq!((reply.function_id, reply.op_type), (0xda1, op::STATUS));
        assert!(reply.payload.is_empty());
    }
}
