//! Wire formats: TMCL datagrams, their checksum, and SPI register packets.

pub mod checksum;
pub mod command;
pub mod datagram;
pub mod register;

pub use checksum::checksum;
pub use command::{Opcode, ReplyStatus};
pub use datagram::{DecodeError, Reply, Request, DATAGRAM_LEN};
pub use register::{RegisterPacket, REGISTER_PACKET_LEN};
