//! Linux SocketCAN backend.
//!
//! The kernel applies the acceptance filter, so frames for other IDs never
//! reach user space.  Adapters attached with `slcand` show up here as
//! `slcan0` and behave like any other interface.

use std::io;
use std::time::{Duration, Instant};

use ::socketcan::{
    CanFilter, CanFrame as RawFrame, CanSocket, EmbeddedFrame, Id, Socket, SocketOptions,
    StandardId,
};
use tracing::debug;

use super::{AcceptanceFilter, CanBus, CanFrame};
use crate::transport::{is_timeout, ConnectionError};

/// Shortest read timeout handed to the socket.  `SO_RCVTIMEO` has microsecond
/// resolution and a zero value means "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_micros(1);

fn read_timeout(remaining: Duration) -> Duration {
    remaining.max(MIN_READ_TIMEOUT)
}

/// [`CanBus`] over a raw `PF_CAN` socket.
pub struct SocketCanBus {
    interface: String,
    socket: CanSocket,
}

impl SocketCanBus {
    /// Binds a raw CAN socket to `interface` and installs `filter` in the
    /// kernel.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if the interface does not exist or the
    /// filter is rejected.
    pub fn open(interface: &str, filter: AcceptanceFilter) -> Result<Self, ConnectionError> {
        let socket =
            CanSocket::open(interface).map_err(|e| ConnectionError::open_failed(interface, e))?;
        socket
            .set_filters(&[CanFilter::new(filter.id, filter.mask)])
            .map_err(|e| ConnectionError::open_failed(interface, e))?;
        debug!(interface, id = filter.id, mask = filter.mask, "installed CAN filter");
        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanBus for SocketCanBus {
    fn send(&mut self, frame: &CanFrame) -> io::Result<()> {
        let id = u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "TMCL uses standard CAN IDs only")
            })?;
        let raw = RawFrame::new(id, frame.data())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "CAN payload too long"))?;
        self.socket.write_frame(&raw)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket.set_read_timeout(read_timeout(remaining))?;
            let raw = match self.socket.read_frame() {
                Ok(raw) => raw,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            };

            if raw.is_remote_frame() {
                continue;
            }
            let frame = match raw.id() {
                Id::Standard(id) => CanFrame::standard(id.as_raw(), raw.data()),
                Id::Extended(id) => CanFrame::extended(id.as_raw(), raw.data()),
            };
            if frame.is_some() {
                return Ok(frame);
            }
        }
    }

    /// The socket is closed when the bus is dropped.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}
