//! TMCL over CAN.
//!
//! A CAN frame carries the module or host address in its 11-bit arbitration
//! ID, so the address byte is stripped from the datagram on the wire:
//!
//! ```text
//! request  ID = module & 0x7F   payload = [command][type][motor][value:4][checksum]
//! reply    ID = host   & 0x7F   payload = [module][status][command][value:4][checksum]
//! ```
//!
//! On reception the arbitration ID is put back in front of the payload, which
//! restores the 9-byte reply whose checksum covers the host byte.
//!
//! Two bus backends exist: [`native::SocketCanBus`] for Linux network
//! interfaces (`can0`, `vcan0`, …) and [`slcan::SlcanBus`] for USB
//! CAN-over-serial adapters speaking the Lawicel ASCII protocol.
//!
//! # Filtering
//!
//! The transport only ever expects one reply, addressed to its own host ID.
//! The backend is given an [`AcceptanceFilter`] at open time (a kernel filter
//! for SocketCAN, a software filter for SLCAN), and the transport checks the
//! exact ID again before delivering anything.  Frames for other IDs are
//! dropped, never queued for a later `recv`.

#[cfg(target_os = "linux")]
pub mod native;
pub mod slcan;

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::protocol::DATAGRAM_LEN;
use crate::transport::{is_timeout, ConnectionError, Transport, TransportKind};

/// Arbitration IDs used by TMCL are 7 bits wide.
pub const ADDRESS_MASK: u8 = 0x7F;

/// Largest classic CAN payload.
pub const MAX_PAYLOAD: usize = 8;

const MAX_STANDARD_ID: u32 = 0x7FF;
const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A classic CAN data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    data: Vec<u8>,
}

impl CanFrame {
    /// A frame with an 11-bit identifier, or `None` if the ID or payload is
    /// out of range.
    pub fn standard(id: u16, data: &[u8]) -> Option<Self> {
        let id = u32::from(id);
        (id <= MAX_STANDARD_ID && data.len() <= MAX_PAYLOAD).then(|| Self {
            id,
            extended: false,
            data: data.to_vec(),
        })
    }

    /// A frame with a 29-bit identifier, or `None` if the ID or payload is
    /// out of range.
    pub fn extended(id: u32, data: &[u8]) -> Option<Self> {
        (id <= MAX_EXTENDED_ID && data.len() <= MAX_PAYLOAD).then(|| Self {
            id,
            extended: true,
            data: data.to_vec(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// `{can_id, can_mask}` pair: a frame passes when
/// `frame.id & mask == id & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptanceFilter {
    pub id: u32,
    pub mask: u32,
}

impl AcceptanceFilter {
    /// The filter a host applies to see only replies addressed to it.
    pub fn for_host(host_address: u8) -> Self {
        Self {
            id: u32::from(host_address & ADDRESS_MASK),
            mask: u32::from(ADDRESS_MASK),
        }
    }

    pub fn matches(&self, frame: &CanFrame) -> bool {
        !frame.is_extended() && frame.id() & self.mask == self.id & self.mask
    }
}

// ── Bus backend ───────────────────────────────────────────────────────────────

/// A CAN controller that can send and receive single frames.
pub trait CanBus: Send {
    fn send(&mut self, frame: &CanFrame) -> io::Result<()>;

    /// Waits up to `timeout` for the next frame that passed the backend's
    /// acceptance filter.  `Ok(None)` means the timeout expired.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<CanFrame>>;

    /// Takes the controller off the bus.
    fn shutdown(&mut self) -> io::Result<()>;
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Frame-oriented transport over any [`CanBus`].
pub struct CanTransport<B: CanBus> {
    channel: String,
    host_address: u8,
    bus: Option<B>,
}

#[cfg(target_os = "linux")]
impl CanTransport<native::SocketCanBus> {
    /// Opens a Linux CAN network interface and installs the host filter.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if the interface does not exist or the
    /// filter cannot be installed.
    pub fn open_socketcan(interface: &str, host_address: u8) -> Result<Self, ConnectionError> {
        let bus = native::SocketCanBus::open(interface, AcceptanceFilter::for_host(host_address))?;
        info!(interface, host_address, "opened SocketCAN TMCL interface");
        Ok(Self::with_bus(interface, host_address, bus))
    }
}

impl CanTransport<slcan::SlcanBus> {
    /// Opens a CAN-over-serial adapter at `bitrate` on the CAN side.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if the serial port cannot be opened or
    /// the adapter does not support `bitrate`.
    pub fn open_slcan(
        port: &str,
        bitrate: u32,
        serial_baud_rate: u32,
        host_address: u8,
    ) -> Result<Self, ConnectionError> {
        let bus = slcan::SlcanBus::open(
            port,
            bitrate,
            serial_baud_rate,
            AcceptanceFilter::for_host(host_address),
        )?;
        info!(port, bitrate, host_address, "opened slcan bus");
        Ok(Self::with_bus(port, host_address, bus))
    }
}

impl<B: CanBus> CanTransport<B> {
    /// Wraps an already open bus.
    pub fn with_bus(channel: impl Into<String>, host_address: u8, bus: B) -> Self {
        Self {
            channel: channel.into(),
            host_address: host_address & ADDRESS_MASK,
            bus: Some(bus),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn host_address(&self) -> u8 {
        self.host_address
    }

    pub fn is_open(&self) -> bool {
        self.bus.is_some()
    }
}

impl<B: CanBus> Transport for CanTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Can
    }

    /// Sends a 9-byte request datagram as one CAN frame addressed to the
    /// module named in its first byte.
    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        if frame.len() != DATAGRAM_LEN {
            return Err(ConnectionError::send_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CAN transport expects a {DATAGRAM_LEN}-byte datagram, got {}", frame.len()),
            )));
        }
        let bus = self
            .bus
            .as_mut()
            .ok_or_else(|| ConnectionError::send_failed(ConnectionError::closed()))?;

        let id = u16::from(frame[0] & ADDRESS_MASK);
        let can_frame = CanFrame::standard(id, &frame[1..])
            .ok_or_else(|| ConnectionError::send_failed("CAN frame out of range"))?;

        bus.send(&can_frame).map_err(ConnectionError::send_failed)?;
        trace!(channel = %self.channel, id, payload = ?can_frame.data(), "CAN tx");
        Ok(())
    }

    /// Returns the first frame addressed to this host, re-prefixed with the
    /// arbitration ID.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        let host = u32::from(self.host_address);
        let bus = self
            .bus
            .as_mut()
            .ok_or_else(|| ConnectionError::recv_failed(ConnectionError::closed()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout { timeout });
            }

            let frame = match bus.recv(remaining) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(ConnectionError::Timeout { timeout }),
                Err(e) if is_timeout(&e) => return Err(ConnectionError::Timeout { timeout }),
                Err(e) => return Err(ConnectionError::recv_failed(e)),
            };

            if frame.is_extended() || frame.id() != host {
                // The acceptance filter should make this unreachable.
                warn!(
                    channel = %self.channel,
                    id = frame.id(),
                    expected = host,
                    "dropping CAN frame for another address"
                );
                continue;
            }

            trace!(channel = %self.channel, id = frame.id(), payload = ?frame.data(), "CAN rx");
            let mut reply = Vec::with_capacity(1 + frame.data().len());
            reply.push(self.host_address);
            reply.extend_from_slice(frame.data());
            return Ok(reply);
        }
    }

    fn close(&mut self) {
        if let Some(mut bus) = self.bus.take() {
            debug!(channel = %self.channel, "shutting down CAN bus");
            if let Err(e) = bus.shutdown() {
                warn!(channel = %self.channel, "CAN shutdown failed: {e}");
            }
            info!(channel = %self.channel, "closed CAN bus");
        }
    }
}

impl<B: CanBus> Drop for CanTransport<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::protocol::{Reply, ReplyStatus, Request};

    #[derive(Default)]
    struct BusState {
        sent: Vec<CanFrame>,
        inbox: VecDeque<CanFrame>,
        shutdowns: usize,
        fail_shutdown: bool,
    }

    /// Delivers queued frames without filtering, so the transport's own
    /// check is what gets exercised.
    struct FakeBus(Arc<Mutex<BusState>>);

    fn fake_bus() -> (FakeBus, Arc<Mutex<BusState>>) {
        let state = Arc::new(Mutex::new(BusState::default()));
        (FakeBus(Arc::clone(&state)), state)
    }

    impl CanBus for FakeBus {
        fn send(&mut self, frame: &CanFrame) -> io::Result<()> {
            self.0.lock().unwrap().sent.push(frame.clone());
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> io::Result<Option<CanFrame>> {
            Ok(self.0.lock().unwrap().inbox.pop_front())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            let mut state = self.0.lock().unwrap();
            state.shutdowns += 1;
            if state.fail_shutdown {
                return Err(io::Error::new(io::ErrorKind::Other, "adapter unplugged"));
            }
            Ok(())
        }
    }

    fn reply_payload(host: u8, value: i32) -> Vec<u8> {
        Reply {
            host_address: host,
            module_address: 1,
            status: ReplyStatus::Ok,
            command: 6,
            value,
        }
        .encode()[1..]
            .to_vec()
    }

    #[test]
    fn test_send_puts_module_in_arbitration_id_and_strips_it_from_payload() {
        // Arrange
        let (bus, state) = fake_bus();
        let mut transport = CanTransport::with_bus("fake", 2, bus);
        let request = Request::new(3, 1, 0, 0, 51200).encode();

        // Act
        transport.send(&request).expect("send must succeed");

        // Assert
        let state = state.lock().unwrap();
        assert_eq!(state.sent.len(), 1);
        assert_eq!(state.sent[0].id(), 3);
        assert!(!state.sent[0].is_extended());
        assert_eq!(state.sent[0].data(), &request[1..]);
    }

    #[test]
    fn test_send_masks_module_address_to_seven_bits() {
        let (bus, state) = fake_bus();
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        transport
            .send(&Request::new(0x81, 3, 0, 0, 0).encode())
            .expect("send must succeed");

        assert_eq!(state.lock().unwrap().sent[0].id(), 0x01);
    }

    #[test]
    fn test_recv_rebuilds_reply_with_host_byte() {
        // Arrange
        let (bus, state) = fake_bus();
        state
            .lock()
            .unwrap()
            .inbox
            .push_back(CanFrame::standard(2, &reply_payload(2, 777)).unwrap());
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        // Act
        let bytes = transport.recv(Duration::from_secs(3)).expect("recv must succeed");

        // Assert – the rebuilt datagram passes checksum validation
        let reply = Reply::decode(&bytes).expect("reply must decode");
        assert_eq!(reply.host_address, 2);
        assert_eq!(reply.value, 777);
    }

    #[test]
    fn test_recv_never_delivers_frames_for_other_ids() {
        // Arrange – two foreign frames, then nothing
        let (bus, state) = fake_bus();
        {
            let mut s = state.lock().unwrap();
            s.inbox.push_back(CanFrame::standard(3, &reply_payload(3, 1)).unwrap());
            s.inbox.push_back(CanFrame::standard(0x82, &reply_payload(2, 2)).unwrap());
        }
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        // Act
        let result = transport.recv(Duration::from_millis(50));

        // Assert
        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));
        assert!(state.lock().unwrap().inbox.is_empty(), "foreign frames are dropped, not queued");
    }

    #[test]
    fn test_recv_skips_foreign_frame_then_delivers_own() {
        let (bus, state) = fake_bus();
        {
            let mut s = state.lock().unwrap();
            s.inbox.push_back(CanFrame::standard(5, &reply_payload(5, 1)).unwrap());
            s.inbox.push_back(CanFrame::standard(2, &reply_payload(2, 42)).unwrap());
        }
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        let bytes = transport.recv(Duration::from_secs(1)).expect("recv must succeed");

        assert_eq!(Reply::decode(&bytes).unwrap().value, 42);
    }

    #[test]
    fn test_recv_ignores_extended_frame_with_matching_low_bits() {
        let (bus, state) = fake_bus();
        state
            .lock()
            .unwrap()
            .inbox
            .push_back(CanFrame::extended(2, &reply_payload(2, 1)).unwrap());
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        let result = transport.recv(Duration::from_millis(20));

        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));
    }

    #[test]
    fn test_close_twice_shuts_bus_down_once() {
        // Arrange
        let (bus, state) = fake_bus();
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        // Act
        transport.close();
        transport.close();
        drop(transport);

        // Assert
        assert_eq!(state.lock().unwrap().shutdowns, 1);
    }

    #[test]
    fn test_close_suppresses_shutdown_error() {
        let (bus, state) = fake_bus();
        state.lock().unwrap().fail_shutdown = true;
        let mut transport = CanTransport::with_bus("fake", 2, bus);

        transport.close();

        assert!(!transport.is_open());
    }

    #[test]
    fn test_acceptance_filter_for_host() {
        let filter = AcceptanceFilter::for_host(2);
        assert_eq!(filter, AcceptanceFilter { id: 2, mask: 0x7F });
        assert!(filter.matches(&CanFrame::standard(2, &[]).unwrap()));
        assert!(filter.matches(&CanFrame::standard(0x82, &[]).unwrap()));
        assert!(!filter.matches(&CanFrame::standard(3, &[]).unwrap()));
        assert!(!filter.matches(&CanFrame::extended(2, &[]).unwrap()));
    }

    #[test]
    fn test_frame_constructors_reject_out_of_range_values() {
        assert!(CanFrame::standard(0x800, &[]).is_none());
        assert!(CanFrame::standard(0x7FF, &[0; 9]).is_none());
        assert!(CanFrame::extended(0x2000_0000, &[]).is_none());
    }
}
