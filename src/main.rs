//! most-link daemon
//!
//! Brings up the transceiver, republishes its events over the datagram
//! bridge and, when `audio_control` is set, runs the source session
//! controller in-process.
//!
//! Usage: `most-link [config.json]`

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Receiver};

use most_link::adapters::bridge::{BridgeRequest, DatagramBridge};
use most_link::domain::{DriverConfig, DriverEvent, MostError, MostResult};
use most_link::runtime::{spawn_driver, DriverHandle};
use most_link::session::{LastSourceStore, SessionController, SessionEvent};

const DEFAULT_CONFIG_PATH: &str = "most-link.json";
const BRIDGE_POLL: Duration = Duration::from_millis(100);
const SESSION_TICK: Duration = Duration::from_millis(5);

type Spawned = (DriverHandle, Receiver<DriverEvent>, thread::JoinHandle<()>);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("most_link=info"))
        .init();

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> MostResult<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = DriverConfig::load_or_create(&config_path)?;
    log::info!(
        "Node 0x{:04x}, group 0x{:02x}, {:?}",
        config.node_address,
        config.group_address,
        config.sample_rate
    );

    let (handle, events, driver_thread) = start_driver(&config)?;

    let mut bridge = DatagramBridge::bind(&config.bridge)?;
    let mut listener = bridge.listener(BRIDGE_POLL)?;
    let (master_tx, mut master_rx) = crossbeam_channel::unbounded::<()>();
    let bridge_handle = handle.clone();
    thread::Builder::new()
        .name("most-bridge".into())
        .spawn(move || loop {
            match listener.recv() {
                Ok(Some(BridgeRequest::Driver(request))) => {
                    if bridge_handle.request(request).is_err() {
                        break;
                    }
                }
                Ok(Some(BridgeRequest::GetMaster)) => {
                    if master_tx.send(()).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("{e}");
                    break;
                }
            }
        })
        .map_err(|e| MostError::Bridge(format!("Failed to spawn bridge thread: {e}")))?;

    let (session_tx, session_rx) = crossbeam_channel::unbounded::<SessionEvent>();
    let mut session = config.audio_control.then(|| {
        log::info!("Audio control enabled");
        SessionController::new(
            handle.clone(),
            LastSourceStore::new(&config.last_source_path),
            session_tx.clone(),
        )
    });

    let ticker = tick(SESSION_TICK);
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                if let Err(e) = bridge.publish(&event) {
                    log::warn!("{e}");
                }
                if let Some(session) = session.as_mut() {
                    if let Err(e) = session.handle_event(&event, Instant::now()) {
                        log::warn!("Session: {e}");
                    }
                }
                if event == DriverEvent::Shutdown {
                    break;
                }
            }
            recv(master_rx) -> request => {
                if request.is_err() {
                    // Bridge thread is gone
                    master_rx = crossbeam_channel::never();
                } else if let Err(e) = bridge.answer_get_master() {
                    log::warn!("{e}");
                }
            }
            recv(session_rx) -> event => {
                if let Ok(event) = event {
                    log::info!("Session event {event:?}");
                    if let Err(e) = bridge.send(&event) {
                        log::warn!("{e}");
                    }
                }
            }
            recv(ticker) -> _ => {
                if let Some(session) = session.as_mut() {
                    if let Err(e) = session.poll(Instant::now()) {
                        log::warn!("Session: {e}");
                    }
                }
            }
        }
    }

    handle.shutdown();
    driver_thread
        .join()
        .map_err(|_| MostError::Transport("Driver thread panicked".into()))?;
    log::info!("Stopped");
    Ok(())
}

#[cfg(feature = "linux")]
fn start_driver(config: &DriverConfig) -> MostResult<Spawned> {
    let (bus, lines) = most_link::adapters::linux::open(&config.hardware)?;
    spawn_driver(bus, lines, config)
}

#[cfg(not(feature = "linux"))]
fn start_driver(config: &DriverConfig) -> MostResult<Spawned> {
    log::warn!("Built without the `linux` feature; driving a simulated chip");
    let chip = most_link::adapters::sim_chip::SimChip::with_auto_transmit();
    spawn_driver(chip.clone(), chip, config)
}
