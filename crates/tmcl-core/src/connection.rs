//! Opening a [`ProtocolInterface`] from a [`ConnectionConfig`], and listing
//! the channels that could be opened.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, SpiConfig, TransportConfig};
use crate::interface::ProtocolInterface;
use crate::transport::{CanTransport, ConnectionError, SerialTransport, Transport};

/// Builds the transport described by `config` and wraps it in a
/// [`ProtocolInterface`] with the configured addresses and reply timeout.
///
/// # Errors
///
/// [`ConnectionError::OpenFailed`] if the channel cannot be opened, or if the
/// medium is not available on this platform.
pub fn open(
    config: &ConnectionConfig,
) -> Result<ProtocolInterface<Box<dyn Transport>>, ConnectionError> {
    let transport: Box<dyn Transport> = match &config.transport {
        TransportConfig::Serial(c) => Box::new(SerialTransport::open(&c.port, c.baud_rate)?),
        TransportConfig::SocketCan(c) => open_socketcan(&c.interface, config.host_address)?,
        TransportConfig::Slcan(c) => Box::new(CanTransport::open_slcan(
            &c.port,
            c.bitrate,
            c.serial_baud_rate,
            config.host_address,
        )?),
        TransportConfig::Spi(c) => open_spi(c)?,
    };

    info!(
        kind = %transport.kind(),
        channel = %config.transport.channel(),
        host_address = config.host_address,
        module_address = config.module_address,
        "connection open"
    );
    Ok(
        ProtocolInterface::new(transport, config.host_address, config.module_address)
            .with_reply_timeout(config.reply_timeout()),
    )
}

#[cfg(target_os = "linux")]
fn open_socketcan(interface: &str, host_address: u8) -> Result<Box<dyn Transport>, ConnectionError> {
    Ok(Box::new(CanTransport::open_socketcan(interface, host_address)?))
}

#[cfg(not(target_os = "linux"))]
fn open_socketcan(interface: &str, _host_address: u8) -> Result<Box<dyn Transport>, ConnectionError> {
    Err(ConnectionError::open_failed(
        interface,
        "SocketCAN is only available on Linux; use an slcan adapter instead",
    ))
}

#[cfg(target_os = "linux")]
fn open_spi(config: &SpiConfig) -> Result<Box<dyn Transport>, ConnectionError> {
    Ok(Box::new(crate::transport::SpiTransport::open(config)?))
}

#[cfg(not(target_os = "linux"))]
fn open_spi(config: &SpiConfig) -> Result<Box<dyn Transport>, ConnectionError> {
    Err(ConnectionError::open_failed(
        config.device_path(),
        "spidev is only available on Linux",
    ))
}

// ── Channel discovery ─────────────────────────────────────────────────────────

/// Families of channel that [`list_available`] can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Serial,
    SocketCan,
    Slcan,
    Spi,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Serial,
        ChannelKind::SocketCan,
        ChannelKind::Slcan,
        ChannelKind::Spi,
    ];

    fn name(self) -> &'static str {
        match self {
            ChannelKind::Serial => "serial",
            ChannelKind::SocketCan => "socketcan",
            ChannelKind::Slcan => "slcan",
            ChannelKind::Spi => "spi",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown channel kind '{s}' (expected serial, socketcan, slcan or spi)"))
    }
}

/// Identifiers of the channels of `kind` present on this machine.
///
/// Serial and SLCAN adapters are serial ports; SocketCAN interfaces come from
/// `/sys/class/net`; SPI devices are `/dev/spidev*` nodes.  Discovery never
/// fails: anything that cannot be scanned yields an empty set.
pub fn list_available(kind: ChannelKind) -> BTreeSet<String> {
    let found = match kind {
        ChannelKind::Serial | ChannelKind::Slcan => serial_ports(),
        ChannelKind::SocketCan => scan_dir(Path::new("/sys/class/net"), is_can_interface)
            .into_iter()
            .collect(),
        ChannelKind::Spi => scan_dir(Path::new("/dev"), |name| name.starts_with("spidev"))
            .into_iter()
            .map(|name| format!("/dev/{name}"))
            .collect(),
    };
    debug!(%kind, count = found.len(), "listed channels");
    found
}

fn serial_ports() -> BTreeSet<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("serial port enumeration failed: {e}");
            BTreeSet::new()
        }
    }
}

fn is_can_interface(name: &str) -> bool {
    ["can", "vcan", "slcan"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Names of the entries in `dir` accepted by `keep`; empty if `dir` is
/// missing or unreadable.
fn scan_dir(dir: &Path, keep: impl Fn(&str) -> bool) -> BTreeSet<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| keep(name))
        .collect()
}
