// serialcan/src/transport.rs
//
// Implements the serial byte-stream transport under the SLCAN protocol.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The serial transport layer.
//!
//! The protocol engine talks to the adapter through the [`Transport`]
//! trait: raw byte writes, reads with a controllable idle timeout, and a
//! reader-half clone for the reception thread. [`SerialTransport`]
//! implements it over the `serialport` crate; tests inject their own
//! adapter simulations.
//!
//! [`LineSplitter`] turns the byte stream into delimited [`Line`]s: CR
//! terminates a line positively, BEL terminates it as a negative
//! acknowledge. Splitting is independent of the dialect.

use crate::Dialect;
use serialport::SerialPort;
use std::{
    io::{self, Read, Write},
    time::Duration,
};

/// Longest well-formed wire line: opcode, extended id, DLC digit, 64
/// payload bytes in hex, plus slack for a timestamp suffix.
const LINE_LIMIT: usize = 1 + 8 + 1 + 128 + 16;

/// Number of data bits per serial character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits (default).
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit (default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// One stop bit (default).
    #[default]
    One,
    /// Two stop bits.
    Two,
}

/// Serial port configuration, immutable once the channel is opened.
///
/// The dialect and baud rate are configuration data, not compile-time
/// constants; adapter generations differ in both. The default matches
/// the common USB-serial adapters: 115200 baud, 8N1, Lawicel protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Baud rate in bit/s.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// The SLCAN dialect spoken by the adapter.
    pub dialect: Dialect,
}

impl SerialPortConfig {
    /// A default configuration for the named device.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: 115_200,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            dialect: Dialect::default(),
        }
    }
}

/// A byte-stream connection to the adapter.
///
/// Implementations must deliver bytes in order and report an idle read
/// timeout as `Ok(0)`, reserving errors for real transport failures —
/// those are fatal to the channel.
pub trait Transport: Send {
    /// Writes all bytes to the adapter.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads available bytes, waiting up to the configured idle timeout.
    /// Returns `Ok(0)` when the line stayed idle.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sets the idle timeout for subsequent reads.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Clones the connection for the dedicated reader loop.
    fn try_clone_reader(&self) -> io::Result<Box<dyn Transport>>;
}

/// [`Transport`] over a real serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Opens the serial device described by `config`.
    pub fn open(config: &SerialPortConfig) -> io::Result<Self> {
        let data_bits = match config.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(io::Error::from)?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // an idle line is not an error
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::from)
    }

    fn try_clone_reader(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(Self { port }))
    }
}

/// How a wire line was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// Terminated by CR: a frame, a reply, or a bare positive ACK.
    Cr,
    /// Terminated by BEL: negative acknowledge.
    Bell,
}

/// One delimited wire line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The line content without its terminator.
    pub bytes: Vec<u8>,
    /// The terminator that delimited it.
    pub ending: LineEnding,
}

/// Accumulates raw bytes into delimited [`Line`]s.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes one byte; returns a completed line on CR or BEL.
    ///
    /// Bytes beyond the line limit are discarded; the eventual oversized
    /// line then fails to decode and is dropped like any malformed one.
    pub fn push(&mut self, byte: u8) -> Option<Line> {
        match byte {
            crate::dialect::CR => Some(Line {
                bytes: std::mem::take(&mut self.buf),
                ending: LineEnding::Cr,
            }),
            crate::dialect::BELL => Some(Line {
                bytes: std::mem::take(&mut self.buf),
                ending: LineEnding::Bell,
            }),
            _ => {
                if self.buf.len() < LINE_LIMIT {
                    self.buf.push(byte);
                }
                None
            }
        }
    }

    /// Feeds a chunk of bytes, collecting all completed lines.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Line> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}
