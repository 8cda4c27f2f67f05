//! 5-byte register packet used by direct SPI access to Trinamic ICs.
//!
//! ```text
//! [address:1][value:4 big-endian]
//! ```
//! Bit 7 of the address byte selects a write.  There is no checksum; the SPI
//! link is trusted.
//!
//! # Full duplex (for beginners)
//!
//! SPI shifts one byte out and one byte in on every clock.  The chip cannot
//! answer a read in the same transfer that carries the read address, so the
//! bytes clocked in during transfer *N* are the chip's reply to transfer
//! *N − 1*.  A register read therefore needs two transfers.

/// Length of one register transfer.
pub const REGISTER_PACKET_LEN: usize = 5;

/// Address bit that marks a register write.
pub const WRITE_FLAG: u8 = 0x80;

/// One SPI register transfer in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPacket {
    pub address: u8,
    pub value: u32,
}

impl RegisterPacket {
    /// A read of `address` (write flag cleared, value ignored by the chip).
    pub fn read(address: u8) -> Self {
        Self {
            address: address & !WRITE_FLAG,
            value: 0,
        }
    }

    /// A write of `value` to `address` (write flag set).
    pub fn write(address: u8, value: u32) -> Self {
        Self {
            address: address | WRITE_FLAG,
            value,
        }
    }

    pub fn encode(&self) -> [u8; REGISTER_PACKET_LEN] {
        let mut buf = [0u8; REGISTER_PACKET_LEN];
        buf[0] = self.address;
        buf[1..].copy_from_slice(&self.value.to_be_bytes());
        buf
    }

    /// Parses the first five bytes of `bytes`, or `None` if fewer are present.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < REGISTER_PACKET_LEN {
            return None;
        }
        Some(Self {
            address: bytes[0],
            value: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        })
    }

    pub fn is_write(&self) -> bool {
        self.address & WRITE_FLAG != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sets_flag_and_encodes_big_endian() {
        // Arrange
        let packet = RegisterPacket::write(0x6C, 0x0001_0203);

        // Act
        let bytes = packet.encode();

        // Assert
        assert_eq!(bytes, [0xEC, 0x00, 0x01, 0x02, 0x03]);
        assert!(packet.is_write());
    }

    #[test]
    fn test_read_clears_flag() {
        let packet = RegisterPacket::read(0xEC);
        assert_eq!(packet.address, 0x6C);
        assert!(!packet.is_write());
        assert_eq!(packet.encode(), [0x6C, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_short_input_is_none() {
        assert_eq!(RegisterPacket::decode(&[0x01, 0x02, 0x03, 0x04]), None);
    }

    #[test]
    fn test_decode_reads_status_byte_and_value() {
        let packet = RegisterPacket::decode(&[0x09, 0xDE, 0xAD, 0xBE, 0xEF]).expect("5 bytes");
        assert_eq!(packet.address, 0x09);
        assert_eq!(packet.value, 0xDEAD_BEEF);
    }
}
