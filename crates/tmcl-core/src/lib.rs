//! # tmcl-core
//!
//! Transport-agnostic core of the TMCL command/response protocol used to talk
//! to Trinamic motor-controller modules and ICs.
//!
//! A logical instruction ("set axis parameter 4 of motor 0 to 51200", "read
//! driver register 0x6C") becomes a fixed 9-byte datagram, travels over
//! whichever link is open, and comes back as either a decoded value or a
//! typed error.  The caller never needs to know whether the bytes went over a
//! UART, a CAN frame or an SPI transfer.
//!
//! # Architecture overview (for beginners)
//!
//! - **`protocol`** – Pure wire formats with no I/O: the request and reply
//!   datagrams, their 8-bit additive checksum, the TMCL opcodes and status
//!   codes, and the 5-byte SPI register packet.
//!
//! - **`transport`** – One small trait, [`Transport`], with a `send` /
//!   `recv` / `close` surface, implemented for serial ports, CAN buses
//!   (Linux SocketCAN or an SLCAN USB adapter) and SPI devices.
//!
//! - **`interface`** – [`ProtocolInterface`] owns one transport and turns
//!   requests into validated replies: it checks the checksum, the host
//!   address and the module's status byte.
//!
//! - **`config`** / **`connection`** – TOML settings and a factory that opens
//!   the configured transport.
//!
//! ```no_run
//! use tmcl_core::{connection, ConnectionConfig};
//!
//! let config = ConnectionConfig::load("tmcl.toml")?;
//! let mut tmcl = connection::open(&config)?;
//! let position = tmcl.get_axis_parameter(0, 1)?;
//! println!("actual position: {position}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod connection;
pub mod interface;
pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `tmcl_core::ProtocolInterface` instead of `tmcl_core::interface::ProtocolInterface`.
pub use config::{ConfigError, ConnectionConfig, TransportConfig};
pub use connection::{list_available, ChannelKind};
pub use interface::{ProtocolError, ProtocolInterface, DEFAULT_REPLY_TIMEOUT};
pub use protocol::{checksum, DecodeError, Opcode, Reply, ReplyStatus, Request};
pub use transport::{ConnectionError, Transport, TransportKind};
