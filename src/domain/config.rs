//! Driver configuration
//!
//! A DriverConfig is the persisted node setup: network addresses, sample
//! rate, socket paths for the IPC bridge and the hardware line assignment.
//! Stored as pretty JSON; a missing file is created with the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{MostError, MostResult};

/// Requested audio sample rate. 44.1 kHz forces legacy clocking because the
/// crystal cannot derive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    #[serde(rename = "48")]
    Khz48,
    #[serde(rename = "44.1")]
    Khz44_1,
}

/// Datagram socket paths used by the IPC bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Path this process binds
    pub server_path: PathBuf,
    /// Path of the client process we publish to
    pub client_path: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_path: PathBuf::from("/tmp/SocketMost.sock"),
            client_path: PathBuf::from("/tmp/SocketMost-client.sock"),
        }
    }
}

/// Where the transceiver is wired. Only read by the Linux binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub spi_device: PathBuf,
    pub gpio_chip: PathBuf,
    pub interrupt_line: u32,
    pub reset_line: u32,
    pub network_status_line: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            spi_device: PathBuf::from("/dev/spidev0.0"),
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            interrupt_line: 5,
            reset_line: 17,
            network_status_line: 25,
        }
    }
}

/// Persisted driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// 16-bit logical node address
    pub node_address: u16,
    pub group_address: u8,
    pub sample_rate: SampleRate,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Run the source session controller inside this process
    #[serde(default)]
    pub audio_control: bool,
    /// File holding the last selected audio source
    #[serde(default = "default_last_source_path")]
    pub last_source_path: PathBuf,
}

fn default_last_source_path() -> PathBuf {
    PathBuf::from("config-jlr.json")
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_address: 0x0110,
            group_address: 0x22,
            sample_rate: SampleRate::Khz48,
            bridge: BridgeConfig::default(),
            hardware: HardwareConfig::default(),
            audio_control: false,
            last_source_path: default_last_source_path(),
        }
    }
}

impl DriverConfig {
    pub fn node_address_high(&self) -> u8 {
        self.node_address.to_be_bytes()[0]
    }

    pub fn node_address_low(&self) -> u8 {
        self.node_address.to_be_bytes()[1]
    }

    /// Read the config at `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> MostResult<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Created default configuration at {}", path.display());
            return Ok(config);
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| MostError::Config(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| MostError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> MostResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MostError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| MostError::Config(format!("Failed to write {}: {e}", path.display())))
    }
}
