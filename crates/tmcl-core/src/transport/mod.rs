//! Physical channels that carry TMCL datagrams or SPI register packets.
//!
//! Every medium implements the same small [`Transport`] trait so that
//! [`crate::ProtocolInterface`] never needs to know which one it owns:
//!
//! | Variant | Unit of transfer | Addressing |
//! |---|---|---|
//! | [`SerialTransport`] | raw 9-byte datagram | inline in the datagram |
//! | [`CanTransport`] | CAN frame, 8-byte payload | arbitration ID |
//! | [`SpiTransport`] | 5-byte register packet | chip select (implicit) |
//!
//! # Lifecycle
//!
//! A transport is open from the moment its constructor returns.  `close()`
//! releases the channel and may be called any number of times; only the first
//! call touches the hardware.  Every transport also closes itself when it is
//! dropped, so an early return or a panic unwinding through the owner never
//! leaks a file descriptor or a bus filter.

pub mod can;
pub mod serial;
pub mod spi;

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub use can::{CanBus, CanFrame, CanTransport};
pub use serial::{SerialLink, SerialTransport};
pub use spi::SpiTransport;

/// Boxed medium error carried inside [`ConnectionError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The physical channel could not be opened.
    #[error("failed to open {channel}: {source}")]
    OpenFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// Writing one unit to the channel failed.
    #[error("send failed: {source}")]
    SendFailed {
        #[source]
        source: BoxError,
    },

    /// Reading from the channel failed for a reason other than a timeout.
    #[error("receive failed: {source}")]
    RecvFailed {
        #[source]
        source: BoxError,
    },

    /// Nothing arrived within the allowed time.
    #[error("no reply within {timeout:?}")]
    Timeout { timeout: Duration },
}

impl ConnectionError {
    pub fn open_failed(channel: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::OpenFailed {
            channel: channel.into(),
            source: source.into(),
        }
    }

    pub fn send_failed(source: impl Into<BoxError>) -> Self {
        Self::SendFailed {
            source: source.into(),
        }
    }

    pub fn recv_failed(source: impl Into<BoxError>) -> Self {
        Self::RecvFailed {
            source: source.into(),
        }
    }

    /// Error for an operation attempted after `close()`.
    pub(crate) fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
    }
}

/// `true` for the I/O error kinds that OS drivers use to report an expired
/// read timeout.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Which medium a transport drives.  Device-facing code uses the capability
/// queries to pick an encoding path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    Can,
    SpiRegister,
}

impl TransportKind {
    /// Whether TMCL datagrams can travel over this medium.
    pub const fn supports_tmcl(self) -> bool {
        matches!(self, TransportKind::Serial | TransportKind::Can)
    }

    pub const fn supports_can(self) -> bool {
        matches!(self, TransportKind::Can)
    }

    /// Whether raw register packets can be exchanged with the IC directly.
    pub const fn supports_register_protocol(self) -> bool {
        matches!(self, TransportKind::SpiRegister)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Serial => "serial",
            TransportKind::Can => "CAN",
            TransportKind::SpiRegister => "SPI register",
        })
    }
}

// ── Transport trait ───────────────────────────────────────────────────────────

/// A bidirectional channel that moves one logical unit per call.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// The medium this transport drives.
    fn kind(&self) -> TransportKind;

    /// Writes exactly one unit: a datagram, a CAN frame or an SPI transfer.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::SendFailed`] on any medium-level error.
    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError>;

    /// Blocks up to `timeout` for one reply unit.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] if nothing arrived in time,
    /// [`ConnectionError::RecvFailed`] on any other medium-level error.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError>;

    /// Releases the channel.  Idempotent; never fails observably.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        (**self).send(frame)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        (**self).recv(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
