//! Direct register access to a Trinamic IC over SPI.
//!
//! Each [`Transport::send`] performs exactly one 5-byte full-duplex transfer
//! (see [`crate::protocol::register`]).  The five bytes clocked back during
//! that transfer are latched and handed out by the next
//! [`Transport::recv`]; they are the chip's answer to the **previous**
//! transfer, never to the one just sent.  Reading a register therefore takes
//! two send/recv cycles, which [`crate::ProtocolInterface::read_register`]
//! performs.
//!
//! Any [`embedded_hal::spi::SpiDevice`] can back the transport.  On Linux,
//! [`SpiTransport::open`] uses `/dev/spidevB.D` through `linux-embedded-hal`.

use std::io;
use std::time::Duration;

use embedded_hal::spi::{Error as _, SpiDevice};
use tracing::{info, trace};

use crate::protocol::REGISTER_PACKET_LEN;
use crate::transport::{ConnectionError, Transport, TransportKind};

/// Register transport over an SPI device with chip select handled by `D`.
pub struct SpiTransport<D: SpiDevice + Send> {
    channel: String,
    device: Option<D>,
    latched: Option<[u8; REGISTER_PACKET_LEN]>,
}

#[cfg(target_os = "linux")]
impl SpiTransport<linux_embedded_hal::SpidevDevice> {
    /// Opens `/dev/spidev{bus}.{device}` with the given clock, mode and bit
    /// order.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if the device node is missing or
    /// rejects the configuration.
    pub fn open(config: &crate::config::SpiConfig) -> Result<Self, ConnectionError> {
        use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

        let path = config.device_path();
        let mode = match config.mode {
            0 => SpiModeFlags::SPI_MODE_0,
            1 => SpiModeFlags::SPI_MODE_1,
            2 => SpiModeFlags::SPI_MODE_2,
            3 => SpiModeFlags::SPI_MODE_3,
            other => {
                return Err(ConnectionError::open_failed(
                    path,
                    format!("SPI mode must be 0..=3, got {other}"),
                ))
            }
        };

        let mut device = linux_embedded_hal::SpidevDevice::open(&path).map_err(|e| {
            ConnectionError::open_failed(path.as_str(), io::Error::other(format!("{e:?}")))
        })?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.data_rate)
            .mode(mode)
            .lsb_first(config.lsb_first)
            .build();
        device
            .0
            .configure(&options)
            .map_err(|e| ConnectionError::open_failed(path.as_str(), e))?;

        info!(device = %path, data_rate = config.data_rate, mode = config.mode, "opened SPI device");
        Ok(Self::with_device(path, device))
    }
}

impl<D: SpiDevice + Send> SpiTransport<D> {
    /// Wraps an already configured SPI device.
    pub fn with_device(channel: impl Into<String>, device: D) -> Self {
        Self {
            channel: channel.into(),
            device: Some(device),
            latched: None,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

impl<D: SpiDevice + Send> Transport for SpiTransport<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::SpiRegister
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let mut buf: [u8; REGISTER_PACKET_LEN] = frame.try_into().map_err(|_| {
            ConnectionError::send_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("SPI register transfers are {REGISTER_PACKET_LEN} bytes, got {}", frame.len()),
            ))
        })?;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| ConnectionError::send_failed(ConnectionError::closed()))?;

        device.transfer_in_place(&mut buf).map_err(|e| {
            ConnectionError::send_failed(io::Error::other(format!(
                "SPI transfer failed: {:?}",
                e.kind()
            )))
        })?;
        trace!(channel = %self.channel, tx = ?frame, rx_previous = ?buf, "SPI transfer");
        self.latched = Some(buf);
        Ok(())
    }

    /// Returns the bytes clocked in by the last `send`.  SPI has no
    /// asynchronous reply, so with nothing latched the wait times out at once.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        if self.device.is_none() {
            return Err(ConnectionError::recv_failed(ConnectionError::closed()));
        }
        self.latched
            .take()
            .map(|buf| buf.to_vec())
            .ok_or(ConnectionError::Timeout { timeout })
    }

    fn close(&mut self) {
        self.latched = None;
        if let Some(device) = self.device.take() {
            drop(device);
            info!(channel = %self.channel, "closed SPI device");
        }
    }
}

impl<D: SpiDevice + Send> Drop for SpiTransport<D> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Simulated chip ────────────────────────────────────────────────────────────
