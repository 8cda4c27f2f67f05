//! TMCL opcodes and reply status codes.
//!
//! The core treats `command`, `type` and `motor_or_bank` as opaque bytes; the
//! constants here exist so the convenience operations on
//! [`crate::ProtocolInterface`] and the CLI do not scatter magic numbers.

use std::fmt;

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Instruction numbers issued by [`crate::ProtocolInterface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Rotate right with the given velocity.
    Ror = 1,
    /// Motor stop.
    Mst = 3,
    /// Move to position (type 0 = absolute, 1 = relative).
    Mvp = 4,
    /// Set axis parameter.
    Sap = 5,
    /// Get axis parameter.
    Gap = 6,
    /// Set global parameter.
    Sgp = 9,
    /// Get global parameter.
    Ggp = 10,
    /// Write a register of the driver IC.
    WriteDrv = 148,
    /// Read a register of the driver IC.
    ReadDrv = 149,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op as u8
    }
}

/// `type` byte of an MVP instruction.
pub mod move_type {
    pub const ABSOLUTE: u8 = 0;
    pub const RELATIVE: u8 = 1;
}

// ── Reply status ──────────────────────────────────────────────────────────────

/// Status byte carried in slot 2 of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    /// 100: command executed.
    Ok,
    /// 101: command stored in EEPROM (standalone program download).
    LoadedIntoEeprom,
    /// 1: the module saw a wrong checksum in our request.
    WrongChecksum,
    /// 2: unknown instruction number.
    InvalidCommand,
    /// 3: type byte out of range for the instruction.
    WrongType,
    /// 4: value out of range.
    InvalidValue,
    /// 5: configuration EEPROM is locked.
    EepromLocked,
    /// 6: instruction exists but is not available on this module.
    CommandNotAvailable,
    /// Anything the module firmware reports that is not listed above.
    Other(u8),
}

impl ReplyStatus {
    /// Returns `true` for the two codes that mean the instruction was accepted.
    pub fn is_success(self) -> bool {
        matches!(self, ReplyStatus::Ok | ReplyStatus::LoadedIntoEeprom)
    }
}

impl From<u8> for ReplyStatus {
    fn from(code: u8) -> Self {
        match code {
            100 => ReplyStatus::Ok,
            101 => ReplyStatus::LoadedIntoEeprom,
            1 => ReplyStatus::WrongChecksum,
            2 => ReplyStatus::InvalidCommand,
            3 => ReplyStatus::WrongType,
            4 => ReplyStatus::InvalidValue,
            5 => ReplyStatus::EepromLocked,
            6 => ReplyStatus::CommandNotAvailable,
            other => ReplyStatus::Other(other),
        }
    }
}

impl From<ReplyStatus> for u8 {
    fn from(status: ReplyStatus) -> Self {
        match status {
            ReplyStatus::Ok => 100,
            ReplyStatus::LoadedIntoEeprom => 101,
            ReplyStatus::WrongChecksum => 1,
            ReplyStatus::InvalidCommand => 2,
            ReplyStatus::WrongType => 3,
            ReplyStatus::InvalidValue => 4,
            ReplyStatus::EepromLocked => 5,
            ReplyStatus::CommandNotAvailable => 6,
            ReplyStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::LoadedIntoEeprom => "loaded into EEPROM",
            ReplyStatus::WrongChecksum => "wrong checksum",
            ReplyStatus::InvalidCommand => "invalid command",
            ReplyStatus::WrongType => "wrong type",
            ReplyStatus::InvalidValue => "invalid value",
            ReplyStatus::EepromLocked => "EEPROM locked",
            ReplyStatus::CommandNotAvailable => "command not available",
            ReplyStatus::Other(code) => return write!(f, "unknown status {code}"),
        };
        write!(f, "{text} ({})", u8::from(*self))
    }
}
