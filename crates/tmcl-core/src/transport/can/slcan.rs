//! CAN over a serial adapter (Lawicel "SLCAN" ASCII protocol).
//!
//! Used by CANable, CANtact and similar USB dongles.  Every command and every
//! received frame is one line of ASCII terminated by `\r`:
//!
//! ```text
//! C\r            close the channel
//! S8\r           select 1 Mbit/s (S0 = 10k … S8 = 1M)
//! O\r            open the channel
//! t1238DEADBEEF00000000\r   standard frame, ID 0x123, 8 data bytes
//! T0000012341AA\r           extended frame, ID 0x1234, 1 data byte
//! ```
//!
//! The adapter answers commands with `\r` (ok), `z\r`/`Z\r` (frame queued)
//! or BEL (`0x07`, error).  Those acknowledgements are skipped while waiting
//! for data frames.  SLCAN adapters have no hardware filter, so the
//! [`AcceptanceFilter`] is applied here in software.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, trace};

use super::{AcceptanceFilter, CanBus, CanFrame};
use crate::transport::serial::{open_port, SerialLink};
use crate::transport::{is_timeout, ConnectionError};

const CR: u8 = b'\r';
const BELL: u8 = 0x07;

/// Longest line the adapter can produce: `T` + 8 id + 1 len + 16 data + 4 timestamp.
const MAX_LINE: usize = 30;

/// Maps a CAN bitrate to the adapter's `S<n>` setup code.
pub fn bitrate_code(bitrate: u32) -> Option<u8> {
    match bitrate {
        10_000 => Some(0),
        20_000 => Some(1),
        50_000 => Some(2),
        100_000 => Some(3),
        125_000 => Some(4),
        250_000 => Some(5),
        500_000 => Some(6),
        800_000 => Some(7),
        1_000_000 => Some(8),
        _ => None,
    }
}

/// Serialises `frame` as one SLCAN transmit command, including the `\r`.
pub fn format_frame(frame: &CanFrame) -> Vec<u8> {
    let mut line = if frame.is_extended() {
        format!("T{:08X}{}", frame.id(), frame.data().len())
    } else {
        format!("t{:03X}{}", frame.id(), frame.data().len())
    };
    for byte in frame.data() {
        line.push_str(&format!("{byte:02X}"));
    }
    line.push('\r');
    line.into_bytes()
}

/// Parses one received line (without its `\r`).  Returns `None` for anything
/// that is not a well-formed data frame, including remote frames and acks.
pub fn parse_frame(line: &[u8]) -> Option<CanFrame> {
    let (&kind, rest) = line.split_first()?;
    let id_len = match kind {
        b't' => 3,
        b'T' => 8,
        _ => return None,
    };
    if rest.len() < id_len + 1 {
        return None;
    }

    let id = parse_hex(&rest[..id_len])?;
    let len = (rest[id_len] as char).to_digit(10)? as usize;
    let data_hex = rest.get(id_len + 1..id_len + 1 + 2 * len)?;
    let data = data_hex
        .chunks(2)
        .map(|pair| parse_hex(pair).map(|b| b as u8))
        .collect::<Option<Vec<u8>>>()?;

    if kind == b't' {
        CanFrame::standard(u16::try_from(id).ok()?, &data)
    } else {
        CanFrame::extended(id, &data)
    }
}

fn parse_hex(digits: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

/// [`CanBus`] over a serial port talking to an SLCAN adapter.
pub struct SlcanBus<L: SerialLink = Box<dyn SerialPort>> {
    link: L,
    filter: AcceptanceFilter,
    line: Vec<u8>,
}

impl SlcanBus {
    /// Opens the adapter's serial port and brings the CAN channel up at
    /// `bitrate`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::OpenFailed`] if `bitrate` has no SLCAN code, the
    /// port cannot be opened, or the setup commands cannot be written.
    pub fn open(
        port: &str,
        bitrate: u32,
        serial_baud_rate: u32,
        filter: AcceptanceFilter,
    ) -> Result<Self, ConnectionError> {
        let code = bitrate_code(bitrate).ok_or_else(|| {
            ConnectionError::open_failed(port, format!("unsupported slcan bitrate {bitrate}"))
        })?;
        let link = open_port(port, serial_baud_rate)?;
        let mut bus = Self::with_link(link, filter);
        bus.start(code)
            .map_err(|e| ConnectionError::open_failed(port, e))?;
        Ok(bus)
    }
}

impl<L: SerialLink> SlcanBus<L> {
    /// Wraps a link whose adapter is already configured.
    pub fn with_link(link: L, filter: AcceptanceFilter) -> Self {
        Self {
            link,
            filter,
            line: Vec::with_capacity(MAX_LINE),
        }
    }

    /// Closes any channel left open by a previous session, sets the bitrate
    /// and opens the channel.
    pub fn start(&mut self, bitrate_code: u8) -> io::Result<()> {
        self.command(b"C\r")?;
        self.command(format!("S{bitrate_code}\r").as_bytes())?;
        self.command(b"O\r")?;
        self.link.discard_input()
    }

    fn command(&mut self, bytes: &[u8]) -> io::Result<()> {
        debug!(command = %String::from_utf8_lossy(bytes).trim_end(), "slcan command");
        self.link.write_all(bytes)?;
        self.link.flush()
    }

    /// Reads bytes until a complete line is buffered.  `Ok(None)` on timeout;
    /// a partial line stays buffered for the next call.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.link.set_timeout(remaining)?;
            match self.link.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            match byte[0] {
                CR => return Ok(Some(std::mem::take(&mut self.line))),
                BELL => {
                    debug!("slcan adapter reported an error");
                    self.line.clear();
                }
                b => {
                    if self.line.len() >= MAX_LINE {
                        self.line.clear();
                    }
                    self.line.push(b);
                }
            }
        }
    }
}

impl<L: SerialLink> CanBus for SlcanBus<L> {
    fn send(&mut self, frame: &CanFrame) -> io::Result<()> {
        let line = format_frame(frame);
        trace!(line = %String::from_utf8_lossy(&line).trim_end(), "slcan tx");
        self.link.write_all(&line)?;
        self.link.flush()
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(line) = self.read_line(remaining)? else {
                return Ok(None);
            };

            match parse_frame(&line) {
                Some(frame) if self.filter.matches(&frame) => return Ok(Some(frame)),
                Some(frame) => {
                    trace!(id = frame.id(), "slcan filter dropped frame");
                }
                None => {
                    trace!(line = %String::from_utf8_lossy(&line), "slcan non-frame line");
                }
            }
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.command(b"C\r")
    }
}
