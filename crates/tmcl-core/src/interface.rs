//! Request/reply dispatch on top of a [`Transport`].
//!
//! [`ProtocolInterface`] is the only type device-facing code needs.  It owns
//! exactly one transport, turns a logical instruction into a datagram, waits
//! for the matching reply and either returns the reply value or a
//! [`ProtocolError`] that says which step failed.
//!
//! # One request at a time (for beginners)
//!
//! TMCL has no sequence numbers: the only way to know which reply belongs to
//! which request is to never have two requests in flight.  Every operation
//! here takes `&mut self`, so the borrow checker rejects a second request
//! while the first is still waiting.  Code that shares an interface between
//! threads wraps it in a `Mutex`, which gives the same guarantee at run time.
//!
//! # Failure handling
//!
//! Nothing is retried.  A timeout is reported once and the interface stays
//! usable for the next request; whether to try again is the caller's call.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::protocol::command::move_type;
use crate::protocol::{DecodeError, Opcode, RegisterPacket, Reply, ReplyStatus, Request, REGISTER_PACKET_LEN};
use crate::transport::{ConnectionError, Transport, TransportKind};

/// How long a request waits for its reply unless configured otherwise.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors returned by [`ProtocolInterface`] operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The transport refused the outgoing datagram.
    #[error("sending command {command} to module {module_address} failed")]
    Send {
        module_address: u8,
        command: u8,
        #[source]
        source: ConnectionError,
    },

    /// No reply arrived within the reply timeout.
    #[error("module {module_address} did not answer command {command}")]
    Timeout {
        module_address: u8,
        command: u8,
        #[source]
        source: ConnectionError,
    },

    /// The transport failed while waiting for the reply.
    #[error("receiving the reply to command {command} from module {module_address} failed")]
    Recv {
        module_address: u8,
        command: u8,
        #[source]
        source: ConnectionError,
    },

    /// The reply was truncated or its checksum did not match.
    #[error("malformed reply to command {command} from module {module_address}")]
    Malformed {
        module_address: u8,
        command: u8,
        #[source]
        source: DecodeError,
    },

    /// The reply was addressed to a different host.
    #[error("reply to command {command} was addressed to host {actual}, expected {expected}")]
    AddressMismatch { expected: u8, actual: u8, command: u8 },

    /// The module answered but rejected the instruction.
    #[error("module {module_address} rejected command {command}: {status}")]
    Status {
        module_address: u8,
        command: u8,
        status: ReplyStatus,
    },

    /// The owned transport cannot carry this kind of operation.
    #[error("{operation} is not supported over a {kind} transport")]
    Unsupported {
        kind: TransportKind,
        operation: &'static str,
    },
}

impl ProtocolError {
    /// `true` if the request simply went unanswered.  Callers that want to
    /// retry check this before anything else.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }
}

/// Dispatcher that owns one transport and correlates replies with requests.
pub struct ProtocolInterface<T: Transport> {
    transport: T,
    host_address: u8,
    module_address: u8,
    reply_timeout: Duration,
}

impl<T: Transport> ProtocolInterface<T> {
    /// Wraps an open transport.  Replies must be addressed to `host_address`;
    /// requests go to `module_address` unless [`Self::request_to`] overrides it.
    pub fn new(transport: T, host_address: u8, module_address: u8) -> Self {
        Self {
            transport,
            host_address,
            module_address,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn host_address(&self) -> u8 {
        self.host_address
    }

    pub fn module_address(&self) -> u8 {
        self.module_address
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// The medium of the owned transport.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    // ── Generic requests ──────────────────────────────────────────────────────

    /// Sends one instruction to the default module and returns the reply
    /// value.
    ///
    /// # Errors
    ///
    /// See [`ProtocolError`]; every variant except `Unsupported` names the
    /// module and command that failed.
    pub fn request(
        &mut self,
        command: u8,
        command_type: u8,
        motor_or_bank: u8,
        value: i32,
    ) -> Result<i32, ProtocolError> {
        self.request_to(self.module_address, command, command_type, motor_or_bank, value)
    }

    /// Like [`Self::request`] but addressed to `module_address`.
    pub fn request_to(
        &mut self,
        module_address: u8,
        command: u8,
        command_type: u8,
        motor_or_bank: u8,
        value: i32,
    ) -> Result<i32, ProtocolError> {
        let request = Request::new(module_address, command, command_type, motor_or_bank, value);
        self.exchange(request).map(|reply| reply.value)
    }

    /// Sends `request` and returns the whole validated reply.
    pub fn exchange(&mut self, request: Request) -> Result<Reply, ProtocolError> {
        let kind = self.transport.kind();
        if !kind.supports_tmcl() {
            return Err(ProtocolError::Unsupported {
                kind,
                operation: "TMCL request",
            });
        }

        let module_address = request.module_address;
        let command = request.command;

        self.transport
            .send(&request.encode())
            .map_err(|source| ProtocolError::Send {
                module_address,
                command,
                source,
            })?;
        debug!(module_address, command, value = request.value, "request sent");

        let bytes = self
            .transport
            .recv(self.reply_timeout)
            .map_err(|source| recv_error(module_address, command, source))?;

        let reply = Reply::decode(&bytes).map_err(|source| {
            warn!(module_address, command, "discarding malformed reply: {source}");
            ProtocolError::Malformed {
                module_address,
                command,
                source,
            }
        })?;
        trace!(?reply, "reply decoded");

        if reply.host_address != self.host_address {
            return Err(ProtocolError::AddressMismatch {
                expected: self.host_address,
                actual: reply.host_address,
                command,
            });
        }
        if !reply.status.is_success() {
            return Err(ProtocolError::Status {
                module_address,
                command,
                status: reply.status,
            });
        }

        debug!(module_address, command, value = reply.value, "reply received");
        Ok(reply)
    }

    // ── Motion and parameters ─────────────────────────────────────────────────

    /// Rotates `motor` at `velocity`; the sign picks the direction.
    pub fn rotate(&mut self, motor: u8, velocity: i32) -> Result<(), ProtocolError> {
        self.request(Opcode::Ror.into(), 0, motor, velocity).map(drop)
    }

    pub fn stop(&mut self, motor: u8) -> Result<(), ProtocolError> {
        self.request(Opcode::Mst.into(), 0, motor, 0).map(drop)
    }

    /// Moves `motor` to the absolute `position`.
    pub fn move_to(&mut self, motor: u8, position: i32) -> Result<(), ProtocolError> {
        self.request(Opcode::Mvp.into(), move_type::ABSOLUTE, motor, position)
            .map(drop)
    }

    /// Moves `motor` by `difference` relative to its current target.
    pub fn move_by(&mut self, motor: u8, difference: i32) -> Result<(), ProtocolError> {
        self.request(Opcode::Mvp.into(), move_type::RELATIVE, motor, difference)
            .map(drop)
    }

    pub fn set_axis_parameter(
        &mut self,
        motor: u8,
        parameter: u8,
        value: i32,
    ) -> Result<(), ProtocolError> {
        self.request(Opcode::Sap.into(), parameter, motor, value)
            .map(drop)
    }

    pub fn get_axis_parameter(&mut self, motor: u8, parameter: u8) -> Result<i32, ProtocolError> {
        self.request(Opcode::Gap.into(), parameter, motor, 0)
    }

    pub fn set_global_parameter(
        &mut self,
        bank: u8,
        parameter: u8,
        value: i32,
    ) -> Result<(), ProtocolError> {
        self.request(Opcode::Sgp.into(), parameter, bank, value)
            .map(drop)
    }

    pub fn get_global_parameter(&mut self, bank: u8, parameter: u8) -> Result<i32, ProtocolError> {
        self.request(Opcode::Ggp.into(), parameter, bank, 0)
    }

    // ── Registers ─────────────────────────────────────────────────────────────

    /// Writes a driver register, through the module firmware on TMCL
    /// transports or straight to the chip over SPI.
    pub fn write_register(&mut self, address: u8, value: u32) -> Result<(), ProtocolError> {
        let kind = self.transport.kind();
        if kind.supports_tmcl() {
            // The register value travels as the raw 32-bit pattern.
            self.request(Opcode::WriteDrv.into(), 0, address, value as i32)
                .map(drop)
        } else if kind.supports_register_protocol() {
            self.transfer(RegisterPacket::write(address, value)).map(drop)
        } else {
            Err(ProtocolError::Unsupported {
                kind,
                operation: "register write",
            })
        }
    }

    /// Reads a driver register.
    ///
    /// Over SPI this takes two transfers: the first carries the address and
    /// returns stale data, the second returns the register value.
    pub fn read_register(&mut self, address: u8) -> Result<u32, ProtocolError> {
        let kind = self.transport.kind();
        if kind.supports_tmcl() {
            self.request(Opcode::ReadDrv.into(), 0, address, 0)
                .map(|value| value as u32)
        } else if kind.supports_register_protocol() {
            let packet = RegisterPacket::read(address);
            let stale = self.transfer(packet)?;
            trace!(address, stale = stale.value, "discarding stale SPI reply");
            self.transfer(packet).map(|reply| reply.value)
        } else {
            Err(ProtocolError::Unsupported {
                kind,
                operation: "register read",
            })
        }
    }

    /// One full-duplex register transfer; returns what the chip clocked out.
    fn transfer(&mut self, packet: RegisterPacket) -> Result<RegisterPacket, ProtocolError> {
        let module_address = self.module_address;
        let command = packet.address;

        self.transport
            .send(&packet.encode())
            .map_err(|source| ProtocolError::Send {
                module_address,
                command,
                source,
            })?;
        let bytes = self
            .transport
            .recv(self.reply_timeout)
            .map_err(|source| recv_error(module_address, command, source))?;

        RegisterPacket::decode(&bytes).ok_or(ProtocolError::Malformed {
            module_address,
            command,
            source: DecodeError::TruncatedFrame {
                expected: REGISTER_PACKET_LEN,
                actual: bytes.len(),
            },
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Closes the transport.  Safe to call more than once.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Gives the transport back to the caller without closing it.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

fn recv_error(module_address: u8, command: u8, source: ConnectionError) -> ProtocolError {
    match source {
        ConnectionError::Timeout { .. } => {
            debug!(module_address, command, "reply timed out");
            ProtocolError::Timeout {
                module_address,
                command,
                source,
            }
        }
        source => ProtocolError::Recv {
            module_address,
            command,
            source,
        },
    }
}
