//! Integration tests for the tmcl-core request/reply path.
//!
//! A simulated TMCL module sits behind the public [`Transport`] and
//! [`CanBus`] traits, so these tests drive the datagram codec, the transports
//! and the dispatcher together exactly as an application would.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use proptest::prelude::*;
use tmcl_core::{
    protocol::{DecodeError, Reply, ReplyStatus, Request, DATAGRAM_LEN},
    transport::{CanBus, CanFrame, CanTransport},
    ConnectionError, ProtocolError, ProtocolInterface, Transport, TransportKind,
};

const HOST: u8 = 2;
const MODULE: u8 = 1;

// ── Simulated module ──────────────────────────────────────────────────────────

/// Firmware stand-in: keeps axis and global parameters and answers the
/// instructions the convenience API uses.
struct Module {
    address: u8,
    axis: HashMap<(u8, u8), i32>,
    global: HashMap<(u8, u8), i32>,
}

impl Module {
    fn new(address: u8) -> Self {
        Self {
            address,
            axis: HashMap::new(),
            global: HashMap::new(),
        }
    }

    /// Returns the reply datagram, or `None` if the request is for another
    /// module.
    fn handle(&mut self, bytes: &[u8]) -> Option<[u8; DATAGRAM_LEN]> {
        let request = Request::decode(bytes).ok()?;
        if request.module_address != self.address {
            return None;
        }

        let motor = request.motor_or_bank;
        let (status, value) = match request.command {
            // ROR / ROL: actual speed is axis parameter 3
            1 | 2 => {
                self.axis.insert((motor, 3), request.value);
                (ReplyStatus::Ok, 0)
            }
            3 => {
                self.axis.insert((motor, 3), 0);
                (ReplyStatus::Ok, 0)
            }
            // MVP: target position is axis parameter 0
            4 if request.command_type > 1 => (ReplyStatus::WrongType, 0),
            4 => {
                let target = self.axis.entry((motor, 0)).or_insert(0);
                if request.command_type == 0 {
                    *target = request.value;
                } else {
                    *target = target.wrapping_add(request.value);
                }
                (ReplyStatus::Ok, *target)
            }
            5 => {
                self.axis.insert((motor, request.command_type), request.value);
                (ReplyStatus::Ok, request.value)
            }
            6 => (
                ReplyStatus::Ok,
                self.axis.get(&(motor, request.command_type)).copied().unwrap_or(0),
            ),
            9 => {
                self.global.insert((motor, request.command_type), request.value);
                (ReplyStatus::Ok, request.value)
            }
            10 => (
                ReplyStatus::Ok,
                self.global.get(&(motor, request.command_type)).copied().unwrap_or(0),
            ),
            _ => (ReplyStatus::InvalidCommand, 0),
        };
        Some(self.reply(status, request.command, value))
    }

    fn reply(&self, status: ReplyStatus, command: u8, value: i32) -> [u8; DATAGRAM_LEN] {
        Reply {
            host_address: HOST,
            module_address: self.address,
            status,
            command,
            value,
        }
        .encode()
    }
}

/// Serial-like transport with the module on the other end of the wire.
struct SimulatedLine {
    module: Module,
    pending: Option<Vec<u8>>,
    sent: usize,
    closes: usize,
}

impl SimulatedLine {
    fn new() -> Self {
        Self {
            module: Module::new(MODULE),
            pending: None,
            sent: 0,
            closes: 0,
        }
    }
}

impl Transport for SimulatedLine {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        self.sent += 1;
        self.pending = self.module.handle(frame).map(|reply| reply.to_vec());
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        self.pending.take().ok_or(ConnectionError::Timeout { timeout })
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

/// CAN bus with the module plus a second node that chatters on the host's
/// neighbour address.
struct SimulatedBus {
    module: Module,
    inbox: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
}

impl CanBus for SimulatedBus {
    fn send(&mut self, frame: &CanFrame) -> io::Result<()> {
        self.sent.push(frame.clone());

        let id = u8::try_from(frame.id()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let mut datagram = vec![id];
        datagram.extend_from_slice(frame.data());

        if let Some(reply) = self.module.handle(&datagram) {
            // Traffic for another host arrives first and must be skipped.
            self.inbox
                .push_back(CanFrame::standard(u16::from(HOST + 1), &reply[1..]).expect("valid frame"));
            self.inbox
                .push_back(CanFrame::standard(u16::from(HOST), &reply[1..]).expect("valid frame"));
        }
        Ok(())
    }

    fn recv(&mut self, _timeout: Duration) -> io::Result<Option<CanFrame>> {
        Ok(self.inbox.pop_front())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn serial_interface() -> ProtocolInterface<SimulatedLine> {
    ProtocolInterface::new(SimulatedLine::new(), HOST, MODULE)
        .with_reply_timeout(Duration::from_millis(20))
}

// ── Serial path ───────────────────────────────────────────────────────────────

#[test]
fn test_set_then_get_axis_parameter() {
    let mut tmcl = serial_interface();

    tmcl.set_axis_parameter(0, 4, 51200).expect("SAP must succeed");
    let value = tmcl.get_axis_parameter(0, 4).expect("GAP must succeed");

    assert_eq!(value, 51200);
}

#[test]
fn test_global_parameters_are_per_bank() {
    let mut tmcl = serial_interface();

    tmcl.set_global_parameter(0, 77, 1).unwrap();
    tmcl.set_global_parameter(2, 77, 5).unwrap();

    assert_eq!(tmcl.get_global_parameter(0, 77).unwrap(), 1);
    assert_eq!(tmcl.get_global_parameter(2, 77).unwrap(), 5);
}

#[test]
fn test_absolute_and_relative_moves() {
    let mut tmcl = serial_interface();

    tmcl.move_to(0, 1000).unwrap();
    tmcl.move_by(0, -250).unwrap();

    assert_eq!(tmcl.get_axis_parameter(0, 0).unwrap(), 750);
}

#[test]
fn test_rotate_and_stop() {
    let mut tmcl = serial_interface();

    tmcl.rotate(1, 300).unwrap();
    assert_eq!(tmcl.get_axis_parameter(1, 3).unwrap(), 300);

    tmcl.stop(1).unwrap();
    assert_eq!(tmcl.get_axis_parameter(1, 3).unwrap(), 0);
}

#[test]
fn test_unknown_instruction_is_status_error() {
    let mut tmcl = serial_interface();

    let err = tmcl.request(200, 0, 0, 0).unwrap_err();

    assert!(matches!(
        err,
        ProtocolError::Status {
            status: ReplyStatus::InvalidCommand,
            command: 200,
            ..
        }
    ));
}

#[test]
fn test_absent_module_times_out_and_interface_recovers() {
    // Arrange
    let mut tmcl = serial_interface();

    // Act
    let missing = tmcl.request_to(9, 6, 1, 0, 0);
    let present = tmcl.request_to(MODULE, 6, 1, 0, 0);

    // Assert
    assert!(missing.unwrap_err().is_timeout());
    assert_eq!(present.unwrap(), 0);
    assert_eq!(tmcl.into_transport().sent, 2, "no automatic retry");
}

#[test]
fn test_interface_over_boxed_transport() {
    let boxed: Box<dyn Transport> = Box::new(SimulatedLine::new());
    let mut tmcl = ProtocolInterface::new(boxed, HOST, MODULE);

    tmcl.set_axis_parameter(0, 6, 128).unwrap();

    assert_eq!(tmcl.kind(), TransportKind::Serial);
    assert_eq!(tmcl.get_axis_parameter(0, 6).unwrap(), 128);
}

#[test]
fn test_register_ops_route_through_driver_instructions() {
    // The simulated firmware does not implement WRITE_DRV/READ_DRV.
    let mut tmcl = serial_interface();

    let err = tmcl.write_register(0x6C, 1).unwrap_err();

    assert!(matches!(err, ProtocolError::Status { command: 148, .. }));
}

// ── CAN path ──────────────────────────────────────────────────────────────────

#[test]
fn test_can_exchange_skips_foreign_frames() {
    // Arrange
    let bus = SimulatedBus {
        module: Module::new(MODULE),
        inbox: VecDeque::new(),
        sent: Vec::new(),
    };
    let transport = CanTransport::with_bus("sim-can", HOST, bus);
    let mut tmcl = ProtocolInterface::new(transport, HOST, MODULE)
        .with_reply_timeout(Duration::from_millis(20));

    // Act
    tmcl.set_axis_parameter(0, 4, -7).expect("SAP over CAN");
    let value = tmcl.get_axis_parameter(0, 4).expect("GAP over CAN");

    // Assert
    assert_eq!(value, -7);
    assert_eq!(tmcl.kind(), TransportKind::Can);
}

#[test]
fn test_can_request_payload_omits_module_byte() {
    let bus = SimulatedBus {
        module: Module::new(MODULE),
        inbox: VecDeque::new(),
        sent: Vec::new(),
    };
    let mut transport = CanTransport::with_bus("sim-can", HOST, bus);

    transport
        .send(&Request::new(MODULE, 1, 0, 0, 51200).encode())
        .expect("send must succeed");
    let reply = transport.recv(Duration::from_millis(20)).expect("reply");

    assert_eq!(reply.len(), DATAGRAM_LEN);
    assert_eq!(reply[0], HOST);
    assert_eq!(Reply::decode(&reply).unwrap().value, 0);
}

// ── Wire format properties ────────────────────────────────────────────────────

fn request_strategy() -> impl Strategy<Value = Request> {
    (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>(), any::<i32>())
        .prop_map(|(m, c, t, mb, v)| Request::new(m, c, t, mb, v))
}

fn reply_strategy() -> impl Strategy<Value = Reply> {
    (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>(), any::<i32>()).prop_map(
        |(host_address, module_address, status, command, value)| Reply {
            host_address,
            module_address,
            status: ReplyStatus::from(status),
            command,
            value,
        },
    )
}

proptest! {
    #[test]
    fn prop_request_decode_reproduces_every_field(request in request_strategy()) {
        prop_assert_eq!(Request::decode(&request.encode()), Ok(request));
    }

    #[test]
    fn prop_reply_decode_reproduces_every_field(reply in reply_strategy()) {
        prop_assert_eq!(Reply::decode(&reply.encode()), Ok(reply));
    }

    #[test]
    fn prop_single_bit_flip_is_checksum_mismatch(
        reply in reply_strategy(),
        byte in 0usize..DATAGRAM_LEN,
        bit in 0u8..8,
    ) {
        let mut bytes = reply.encode();
        bytes[byte] ^= 1 << bit;

        let is_mismatch = matches!(Reply::decode(&bytes), Err(DecodeError::ChecksumMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    #[test]
    fn prop_short_input_is_truncated_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..DATAGRAM_LEN)) {
        let expected = Err(DecodeError::TruncatedFrame { expected: DATAGRAM_LEN, actual: bytes.len() });
        prop_assert_eq!(Reply::decode(&bytes), expected);
        prop_assert_eq!(Request::decode(&bytes).err(), expected.err());
    }
}
