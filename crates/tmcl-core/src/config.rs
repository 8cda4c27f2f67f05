//! TOML connection settings.
//!
//! One file describes which medium to open and how the host and module are
//! addressed:
//!
//! ```toml
//! host_address = 2
//! module_address = 1
//! reply_timeout_ms = 3000
//!
//! [transport]
//! kind = "slcan"            # serial | socketcan | slcan | spi
//! port = "/dev/ttyACM0"
//! bitrate = 1000000
//! serial_baud_rate = 115200
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a file only needs
//! the settings that differ from the defaults.  An empty file (or no file at
//! all, see [`ConnectionConfig::default`]) selects a 9600 baud serial port.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A channel override does not name a channel of the configured kind.
    #[error("'{channel}' is not a valid {kind} channel")]
    InvalidChannel { channel: String, kind: &'static str },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Everything needed to open a [`crate::ProtocolInterface`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Address replies must carry.
    #[serde(default = "default_host_address")]
    pub host_address: u8,
    /// Module that receives requests by default.
    #[serde(default = "default_module_address")]
    pub module_address: u8,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// The medium to open, selected by the `kind` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Serial(SerialConfig),
    #[serde(rename = "socketcan")]
    SocketCan(SocketCanConfig),
    Slcan(SlcanConfig),
    Spi(SpiConfig),
}

/// TMCL over RS-232, RS-485 or USB CDC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// A Linux CAN network interface (`can0`, `vcan0`, `slcan0`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketCanConfig {
    #[serde(default = "default_can_interface")]
    pub interface: String,
}

/// A CAN-over-serial adapter driven directly through its serial port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlcanConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// CAN bus bitrate in bit/s.
    #[serde(default = "default_can_bitrate")]
    pub bitrate: u32,
    /// Baud rate of the adapter's own serial link.
    #[serde(default = "default_slcan_baud_rate")]
    pub serial_baud_rate: u32,
}

/// `/dev/spidev{bus}.{device}` for direct register access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpiConfig {
    #[serde(default = "default_spi_bus")]
    pub bus: u8,
    #[serde(default = "default_spi_device")]
    pub device: u8,
    /// Clock frequency in Hz.
    #[serde(default = "default_spi_data_rate")]
    pub data_rate: u32,
    /// SPI mode 0..=3 (clock polarity and phase).
    #[serde(default = "default_spi_mode")]
    pub mode: u8,
    #[serde(default)]
    pub lsb_first: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host_address() -> u8 {
    2
}
fn default_module_address() -> u8 {
    1
}
fn default_reply_timeout_ms() -> u64 {
    3000
}
fn default_serial_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyACM0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_can_interface() -> String {
    "can0".to_string()
}
fn default_can_bitrate() -> u32 {
    1_000_000
}
fn default_slcan_baud_rate() -> u32 {
    115_200
}
fn default_spi_bus() -> u8 {
    1
}
fn default_spi_device() -> u8 {
    0
}
fn default_spi_data_rate() -> u32 {
    524_288
}
fn default_spi_mode() -> u8 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host_address: default_host_address(),
            module_address: default_module_address(),
            reply_timeout_ms: default_reply_timeout_ms(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial(SerialConfig::default())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: default_can_interface(),
        }
    }
}

impl Default for SlcanConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            bitrate: default_can_bitrate(),
            serial_baud_rate: default_slcan_baud_rate(),
        }
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: default_spi_bus(),
            device: default_spi_device(),
            data_rate: default_spi_data_rate(),
            mode: default_spi_mode(),
            lsb_first: false,
        }
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

impl ConnectionConfig {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid TOML for this schema.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Writes the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl TransportConfig {
    /// Name of the port, interface or device node this config opens.
    pub fn channel(&self) -> String {
        match self {
            TransportConfig::Serial(c) => c.port.clone(),
            TransportConfig::SocketCan(c) => c.interface.clone(),
            TransportConfig::Slcan(c) => c.port.clone(),
            TransportConfig::Spi(c) => c.device_path(),
        }
    }

    /// Points the config at another channel of the same kind.  SPI channels
    /// are given as `B.D` or `/dev/spidevB.D`.
    pub fn set_channel(&mut self, channel: &str) -> Result<(), ConfigError> {
        match self {
            TransportConfig::Serial(c) => c.port = channel.to_string(),
            TransportConfig::SocketCan(c) => c.interface = channel.to_string(),
            TransportConfig::Slcan(c) => c.port = channel.to_string(),
            TransportConfig::Spi(c) => {
                let (bus, device) =
                    SpiConfig::parse_channel(channel).ok_or_else(|| ConfigError::InvalidChannel {
                        channel: channel.to_string(),
                        kind: "SPI",
                    })?;
                c.bus = bus;
                c.device = device;
            }
        }
        Ok(())
    }
}

impl SpiConfig {
    pub fn device_path(&self) -> String {
        format!("/dev/spidev{}.{}", self.bus, self.device)
    }

    fn parse_channel(channel: &str) -> Option<(u8, u8)> {
        let spec = channel.strip_prefix("/dev/spidev").unwrap_or(channel);
        let (bus, device) = spec.split_once('.')?;
        Some((bus.parse().ok()?, device.parse().ok()?))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
