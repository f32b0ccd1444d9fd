//! Driver thread
//!
//! The `Os8104` engine and its bus live on one dedicated thread; nothing
//! else touches the chip. Collaborators talk to it through a
//! `DriverHandle` (requests in) and a `Receiver<DriverEvent>` (events out),
//! both `crossbeam-channel` endpoints.
//!
//! The loop waits at most `SERVICE_INTERVAL` for a request, then services
//! the interrupt line and the driver's timers. A transport failure is
//! fatal: it is logged, `Shutdown` is published and the thread exits.
//!
//! Requests the driver refuses as `Busy` (transmit buffer held by a
//! mailbox request or a multi-part message) are kept in a backlog and
//! retried in order, so a caller that got `Ok` from the handle never
//! loses a message to a busy chip.

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::domain::{DriverConfig, DriverEvent, DriverRequest, MostError, MostResult, TxRequest};
use crate::driver::Os8104;
use crate::ports::{ControlLines, MostControl, RegisterBus};

pub const SERVICE_INTERVAL: Duration = Duration::from_millis(1);

/// Refused requests held for retry before new ones are dropped
pub const BACKLOG_LIMIT: usize = 64;

/// Cloneable request side of the driver thread.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    requests: Sender<DriverRequest>,
}

impl DriverHandle {
    pub fn request(&self, request: DriverRequest) -> MostResult<()> {
        self.requests
            .send(request)
            .map_err(|_| MostError::Transport("Driver thread has stopped".into()))
    }

    /// Ask the driver thread to exit. A no-op if it already has.
    pub fn shutdown(&self) {
        let _ = self.requests.send(DriverRequest::Shutdown);
    }
}

impl MostControl for DriverHandle {
    fn send_control_message(&mut self, msg: TxRequest) -> MostResult<()> {
        self.request(DriverRequest::SendControlMessage(msg))
    }

    fn allocate(&mut self) -> MostResult<()> {
        self.request(DriverRequest::Allocate)
    }

    fn deallocate(&mut self) -> MostResult<()> {
        self.request(DriverRequest::Deallocate)
    }
}

/// Start the driver thread and begin chip bring-up.
pub fn spawn_driver<B, L>(
    bus: B,
    lines: L,
    config: &DriverConfig,
) -> MostResult<(DriverHandle, Receiver<DriverEvent>, JoinHandle<()>)>
where
    B: RegisterBus + 'static,
    L: ControlLines + 'static,
{
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let driver = Os8104::new(bus, lines, config, event_tx.clone());

    let handle = thread::Builder::new()
        .name("most-driver".into())
        .spawn(move || run_driver(driver, request_rx, event_tx))
        .map_err(|e| MostError::Transport(format!("Failed to spawn driver thread: {e}")))?;

    Ok((DriverHandle { requests: request_tx }, event_rx, handle))
}

fn run_driver<B: RegisterBus, L: ControlLines>(
    mut driver: Os8104<B, L>,
    requests: Receiver<DriverRequest>,
    events: Sender<DriverEvent>,
) {
    log::info!("Driver thread started");
    if let Err(e) = driver.start(Instant::now()) {
        log::error!("Bring-up failed: {e}");
        let _ = events.send(DriverEvent::Shutdown);
        return;
    }

    let mut backlog = Backlog::default();
    loop {
        match requests.recv_timeout(SERVICE_INTERVAL) {
            Ok(DriverRequest::Shutdown) => {
                log::info!("Shutdown requested");
                break;
            }
            // Keep arrival order behind anything already held
            Ok(request) if !backlog.is_empty() => backlog.push(request),
            Ok(request) => {
                if let Err(e) = backlog.submit(&mut driver, request, Instant::now()) {
                    if matches!(e, MostError::Transport(_)) {
                        log::error!("{e}");
                        break;
                    }
                    log::warn!("Request rejected: {e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("All driver handles dropped");
                break;
            }
        }

        if let Err(e) = driver.service(Instant::now()) {
            log::error!("{e}");
            break;
        }
        if let Err(e) = backlog.flush(&mut driver, Instant::now()) {
            log::error!("{e}");
            break;
        }
    }

    let _ = events.send(DriverEvent::Shutdown);
    log::info!("Driver thread stopped");
}

/// Requests waiting for the transmit buffer, oldest first.
#[derive(Debug, Default)]
struct Backlog {
    queue: VecDeque<DriverRequest>,
}

impl Backlog {
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&mut self, request: DriverRequest) {
        if self.queue.len() >= BACKLOG_LIMIT {
            log::warn!("Backlog full, dropping {request:?}");
            return;
        }
        self.queue.push_back(request);
    }

    /// Apply `request` now, or hold it if the transmit buffer is taken.
    fn submit<B: RegisterBus, L: ControlLines>(
        &mut self,
        driver: &mut Os8104<B, L>,
        request: DriverRequest,
        now: Instant,
    ) -> MostResult<()> {
        match apply(driver, request.clone(), now) {
            Err(MostError::Busy(reason)) => {
                log::debug!("Holding request: {reason}");
                self.push(request);
                Ok(())
            }
            other => other,
        }
    }

    /// Retry the oldest held request. One per pass, so each frame gets
    /// a service cycle on the wire before the next overwrites mXCMB.
    fn flush<B: RegisterBus, L: ControlLines>(
        &mut self,
        driver: &mut Os8104<B, L>,
        now: Instant,
    ) -> MostResult<()> {
        let Some(request) = self.queue.pop_front() else {
            return Ok(());
        };
        match apply(driver, request.clone(), now) {
            Ok(()) => Ok(()),
            Err(MostError::Busy(_)) => {
                self.queue.push_front(request);
                Ok(())
            }
            Err(e @ MostError::Transport(_)) => Err(e),
            Err(e) => {
                log::warn!("Dropping held request: {e}");
                Ok(())
            }
        }
    }
}

fn apply<B: RegisterBus, L: ControlLines>(
    driver: &mut Os8104<B, L>,
    request: DriverRequest,
    now: Instant,
) -> MostResult<()> {
    log::debug!("Request {request:?}");
    match request {
        DriverRequest::SendControlMessage(msg) => driver.send_control_message(msg),
        DriverRequest::GetNodePosition => driver.publish_position(),
        DriverRequest::Allocate => driver.allocate(now),
        DriverRequest::Deallocate => driver.deallocate(now),
        DriverRequest::GetSource { connection_label } => {
            driver.get_remote_source(connection_label, now)
        }
        DriverRequest::Stream(stream) => driver.stream(stream, now),
        DriverRequest::RetrieveAudio(routing) => driver.retrieve_audio(routing.to_array(), now),
        DriverRequest::ConnectSource(source) => driver.connect_source(source, now),
        DriverRequest::DisconnectSource(source) => driver.deallocate_source(source, now),
        DriverRequest::Shutdown => Ok(()),
    }
}
