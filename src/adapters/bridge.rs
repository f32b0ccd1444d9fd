//! Datagram bridge to local client processes.
//!
//! One JSON object per datagram, tagged by `eventType`. Driver events go
//! out to the client socket; requests arrive on the server socket. The
//! bridge also remembers the first node heard from function block 0x02
//! (the network master) and announces it as `masterFound`.

use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::domain::{BridgeConfig, DriverEvent, DriverRequest, MostError, MostResult};

/// Function block the network master answers from
const FBLOCK_NETWORK_MASTER: u8 = 0x02;

const MAX_DATAGRAM: usize = 8192;

/// Announcement of the network master's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "eventType", rename = "masterFound")]
pub struct MasterFound {
    #[serde(rename = "instanceID")]
    pub instance_id: u8,
    #[serde(rename = "sourceAddrHigh")]
    pub source_address_high: u8,
    #[serde(rename = "sourceAddrLow")]
    pub source_address_low: u8,
}

/// A request read from the server socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    Driver(DriverRequest),
    /// Answered by the bridge itself from the remembered master
    GetMaster,
}

/// Decode one datagram. `None` for anything unparseable.
pub fn parse_request(datagram: &[u8]) -> Option<BridgeRequest> {
    let value: serde_json::Value = match serde_json::from_slice(datagram) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Dropping malformed datagram: {e}");
            return None;
        }
    };
    if value.get("eventType").and_then(|t| t.as_str()) == Some("getMaster") {
        return Some(BridgeRequest::GetMaster);
    }
    match serde_json::from_value::<DriverRequest>(value) {
        Ok(request) => Some(BridgeRequest::Driver(request)),
        Err(e) => {
            log::warn!("Dropping unrecognised request: {e}");
            None
        }
    }
}

/// Publishing half of the bridge. Owns the bound server socket.
pub struct DatagramBridge {
    socket: UnixDatagram,
    server_path: PathBuf,
    client_path: PathBuf,
    master: Option<MasterFound>,
}

impl DatagramBridge {
    /// Bind the server socket, replacing a stale socket file left behind by
    /// an earlier run.
    pub fn bind(config: &BridgeConfig) -> MostResult<Self> {
        match std::fs::remove_file(&config.server_path) {
            Ok(()) => log::debug!("Removed stale socket {}", config.server_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MostError::Bridge(format!(
                    "Failed to remove {}: {e}",
                    config.server_path.display()
                )))
            }
        }
        let socket = UnixDatagram::bind(&config.server_path).map_err(|e| {
            MostError::Bridge(format!("Failed to bind {}: {e}", config.server_path.display()))
        })?;
        log::info!(
            "Bridge listening on {}, publishing to {}",
            config.server_path.display(),
            config.client_path.display()
        );
        Ok(Self {
            socket,
            server_path: config.server_path.clone(),
            client_path: config.client_path.clone(),
            master: None,
        })
    }

    /// A receiving handle on the same socket, for a listener thread.
    pub fn listener(&self, poll_interval: Duration) -> MostResult<BridgeListener> {
        let socket = self
            .socket
            .try_clone()
            .map_err(|e| MostError::Bridge(format!("Failed to clone socket: {e}")))?;
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(|e| MostError::Bridge(format!("Failed to set read timeout: {e}")))?;
        Ok(BridgeListener {
            socket,
            buffer: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn master(&self) -> Option<&MasterFound> {
        self.master.as_ref()
    }

    /// Forward a driver event. The first frame from the master's function
    /// block is additionally announced as `masterFound`.
    pub fn publish(&mut self, event: &DriverEvent) -> MostResult<()> {
        if let DriverEvent::MostMessageRx(msg) = event {
            if self.master.is_none() && msg.fblock_id == FBLOCK_NETWORK_MASTER {
                let master = MasterFound {
                    instance_id: msg.instance_id,
                    source_address_high: msg.source_address_high,
                    source_address_low: msg.source_address_low,
                };
                log::info!(
                    "Network master found at 0x{:04x}",
                    msg.source_address()
                );
                self.send(&master)?;
                self.master = Some(master);
            }
        }
        self.send(event)
    }

    /// Repeat the master announcement, if one was seen.
    pub fn answer_get_master(&self) -> MostResult<()> {
        match &self.master {
            Some(master) => self.send(master),
            None => Ok(()),
        }
    }

    /// Send any serializable value to the client as one datagram.
    pub fn send<T: Serialize>(&self, value: &T) -> MostResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| MostError::Bridge(format!("Serialization error: {e}")))?;
        match self.socket.send_to(&json, &self.client_path) {
            Ok(_) => Ok(()),
            // No client yet; datagrams are dropped until one binds
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                log::trace!("No client at {}: {e}", self.client_path.display());
                Ok(())
            }
            Err(e) => Err(MostError::Bridge(format!(
                "Failed to send to {}: {e}",
                self.client_path.display()
            ))),
        }
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }
}

impl Drop for DatagramBridge {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.server_path);
    }
}

/// Receiving half of the bridge.
pub struct BridgeListener {
    socket: UnixDatagram,
    buffer: Vec<u8>,
}

impl BridgeListener {
    /// Wait up to the poll interval for one request. Malformed datagrams
    /// are logged and yield `None` like a timeout does.
    pub fn recv(&mut self) -> MostResult<Option<BridgeRequest>> {
        match self.socket.recv(&mut self.buffer) {
            Ok(len) => Ok(parse_request(&self.buffer[..len])),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(MostError::Bridge(format!("Receive failed: {e}"))),
        }
    }
}
