//! TMCL over an asynchronous serial port (RS-232, RS-485, USB CDC).
//!
//! The serial link has no delimiter: a datagram is exactly nine bytes and the
//! reader relies on that length alone.  Any bytes left in the receive buffer
//! from an earlier, abandoned exchange would shift every later reply, so the
//! input buffer is discarded before each request goes out.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, trace, warn};

use crate::protocol::DATAGRAM_LEN;
use crate::transport::{is_timeout, ConnectionError, Transport, TransportKind};

/// Read timeout applied to a freshly opened port.  [`Transport::recv`]
/// replaces it with the caller's timeout on every call.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// The part of a serial port the transports need.
///
/// Implemented for `Box<dyn SerialPort>`; tests substitute an in-memory link.
pub trait SerialLink: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drops everything received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(&mut **self, timeout).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Opens `port` at `baud_rate` with 8N1 framing.
pub(crate) fn open_port(port: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ConnectionError> {
    serialport::new(port, baud_rate)
        .timeout(OPEN_TIMEOUT)
        .open()
        .map_err(|e| ConnectionError::open_failed(port, e))
}

/// Byte-stream transport: one 9-byte datagram per `send`, one per `recv`.
pub struct SerialTransport<L: SerialLink = Box<dyn SerialPort>> {
    channel: String,
    link: Option<L>,
}

impl SerialTransport {
    /// Opens the named serial port.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if the device does not exist or cannot
    /// be configured.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, ConnectionError> {
        let link = open_port(port, baud_rate)?;
        info!(port, baud_rate, "opened serial TMCL port");
        Ok(Self::with_link(port, link))
    }
}

impl<L: SerialLink> SerialTransport<L> {
    /// Wraps an already open link.
    pub fn with_link(channel: impl Into<String>, link: L) -> Self {
        Self {
            channel: channel.into(),
            link: Some(link),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }
}

impl<L: SerialLink> Transport for SerialTransport<L> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        if frame.len() != DATAGRAM_LEN {
            return Err(ConnectionError::send_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("serial datagrams are {DATAGRAM_LEN} bytes, got {}", frame.len()),
            )));
        }
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ConnectionError::send_failed(ConnectionError::closed()))?;

        link.discard_input().map_err(ConnectionError::send_failed)?;
        link.write_all(frame).map_err(ConnectionError::send_failed)?;
        link.flush().map_err(ConnectionError::send_failed)?;
        trace!(channel = %self.channel, tx = ?frame, "serial tx");
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ConnectionError::recv_failed(ConnectionError::closed()))?;

        // The port timeout applies per `read`, so a reply that trickles in
        // byte by byte is bounded by one deadline across all reads.
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; DATAGRAM_LEN];
        let mut filled = 0;
        while filled < DATAGRAM_LEN {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(channel = %self.channel, ?timeout, filled, "serial read timed out");
                return Err(ConnectionError::Timeout { timeout });
            }
            link.set_timeout(remaining).map_err(ConnectionError::recv_failed)?;

            match link.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(ConnectionError::recv_failed(io::Error::from(
                        io::ErrorKind::UnexpectedEof,
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    debug!(channel = %self.channel, ?timeout, filled, "serial read timed out");
                    return Err(ConnectionError::Timeout { timeout });
                }
                Err(e) => return Err(ConnectionError::recv_failed(e)),
            }
        }
        trace!(channel = %self.channel, rx = ?buf, "serial rx");
        Ok(buf)
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.flush() {
                warn!(channel = %self.channel, "flush on close failed: {e}");
            }
            drop(link);
            info!(channel = %self.channel, "closed serial port");
        }
    }
}

impl<L: SerialLink> Drop for SerialTransport<L> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Test link ─────────────────────────────────────────────────────────────────
