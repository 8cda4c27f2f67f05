//! Fixed-length TMCL request and reply datagrams.
//!
//! Wire format (9 bytes, value big-endian):
//! ```text
//! request  [module:1][command:1][type:1][motor_or_bank:1][value:4][checksum:1]
//! reply    [host:1][module:1][status:1][command:1][value:4][checksum:1]
//! ```
//! The checksum is the sum of the eight preceding bytes modulo 256
//! (see [`crate::protocol::checksum`]).
//!
//! A request is addressed to a module, so it carries the module address in
//! slot 0.  A reply is addressed to the host, so slot 0 holds the host
//! address and slot 1 names the module that answered.  Transports that carry
//! addressing out-of-band (the CAN arbitration ID) strip slot 0 on the wire
//! and put it back on reception, so both layouts decode identically no matter
//! which medium delivered them.

use thiserror::Error;

use crate::protocol::checksum::{checksum, verify};
use crate::protocol::command::ReplyStatus;

/// Length of every TMCL datagram on a byte-stream transport.
pub const DATAGRAM_LEN: usize = 9;

/// Errors produced while decoding a datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than a full datagram were supplied.
    #[error("truncated frame: need {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// The trailing checksum byte does not match the preceding bytes.
    #[error("checksum mismatch: computed 0x{expected:02X}, frame carries 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// A TMCL instruction sent from the host to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub module_address: u8,
    pub command: u8,
    pub command_type: u8,
    pub motor_or_bank: u8,
    pub value: i32,
}

/// A module's answer to a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub host_address: u8,
    pub module_address: u8,
    pub status: ReplyStatus,
    pub command: u8,
    pub value: i32,
}

impl Request {
    pub fn new(
        module_address: u8,
        command: u8,
        command_type: u8,
        motor_or_bank: u8,
        value: i32,
    ) -> Self {
        Self {
            module_address,
            command,
            command_type,
            motor_or_bank,
            value,
        }
    }

    /// Serialises the request with its checksum appended.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tmcl_core::protocol::Request;
    ///
    /// // Rotate motor 0 of module 1 at 51200 pps.
    /// let bytes = Request::new(1, 1, 0, 0, 51200).encode();
    /// assert_eq!(bytes, [0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0xC8, 0x00, 0xCA]);
    /// ```
    pub fn encode(&self) -> [u8; DATAGRAM_LEN] {
        let head = [
            self.module_address,
            self.command,
            self.command_type,
            self.motor_or_bank,
        ];
        seal(head, self.value)
    }

    /// Parses a request from the first nine bytes of `bytes`.
    ///
    /// Hosts never receive requests; module simulators and bus sniffers do.
    ///
    /// # Errors
    ///
    /// [`DecodeError::TruncatedFrame`] if fewer than nine bytes are present,
    /// [`DecodeError::ChecksumMismatch`] if the trailer is wrong.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (head, value) = open(bytes)?;
        Ok(Self {
            module_address: head[0],
            command: head[1],
            command_type: head[2],
            motor_or_bank: head[3],
            value,
        })
    }
}

impl Reply {
    /// Serialises the reply with its checksum appended.
    pub fn encode(&self) -> [u8; DATAGRAM_LEN] {
        let head = [
            self.host_address,
            self.module_address,
            u8::from(self.status),
            self.command,
        ];
        seal(head, self.value)
    }

    /// Parses a reply from the first nine bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// [`DecodeError::TruncatedFrame`] if fewer than nine bytes are present,
    /// [`DecodeError::ChecksumMismatch`] if the trailer is wrong.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tmcl_core::protocol::{DecodeError, Reply, ReplyStatus};
    ///
    /// let reply = Reply::decode(&[0x02, 0x01, 0x64, 0x06, 0x00, 0x00, 0x01, 0x00, 0x6E]).unwrap();
    /// assert_eq!(reply.status, ReplyStatus::Ok);
    /// assert_eq!(reply.value, 256);
    ///
    /// assert_eq!(
    ///     Reply::decode(&[0x02, 0x01]),
    ///     Err(DecodeError::TruncatedFrame { expected: 9, actual: 2 })
    /// );
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (head, value) = open(bytes)?;
        Ok(Self {
            host_address: head[0],
            module_address: head[1],
            status: ReplyStatus::from(head[2]),
            command: head[3],
            value,
        })
    }
}

// ── Shared framing ────────────────────────────────────────────────────────────

fn seal(head: [u8; 4], value: i32) -> [u8; DATAGRAM_LEN] {
    let mut buf = [0u8; DATAGRAM_LEN];
    buf[..4].copy_from_slice(&head);
    buf[4..8].copy_from_slice(&value.to_be_bytes());
    buf[8] = checksum(&buf[..8]);
    buf
}

fn open(bytes: &[u8]) -> Result<([u8; 4], i32), DecodeError> {
    if bytes.len() < DATAGRAM_LEN {
        return Err(DecodeError::TruncatedFrame {
            expected: DATAGRAM_LEN,
            actual: bytes.len(),
        });
    }

    if !verify(&bytes[..DATAGRAM_LEN]) {
        return Err(DecodeError::ChecksumMismatch {
            expected: checksum(&bytes[..8]),
            actual: bytes[8],
        });
    }

    let head = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let value = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok((head, value))
}
