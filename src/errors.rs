// serialcan/src/errors.rs
//
// Implements errors for the Rust SerialCAN library.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN channel errors.
//!
//! Every operation of the library returns a [`Result`] instead of raising a
//! panic across the API boundary. Each error maps onto a fixed signed
//! result code via [`Error::code`], so callers porting from the C driver
//! generation can branch on the numeric value:
//!
//! ```text
//! bus conditions      -1 .. -3
//! lifecycle           -8 .. -9
//! queue / timing     -10, -20, -30, -50
//! bus line errors    -11 .. -16
//! resource / config  -90 .. -98
//! vendor-specific   <= -100
//! transport (OS)    <= -10000   (code = -10000 - errno)
//! ```

use std::io;
use thiserror::Error as ThisError;

/// A result of any CAN channel operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Offset under which OS error codes are reported.
const OSERR_OFFSET: i32 = -10_000;

/// Sub-classification of a bus error reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// Bit stuffing rule violated.
    Stuff,
    /// Fixed-form bit field contained an illegal level.
    Form,
    /// Transmitted frame was not acknowledged.
    Acknowledge,
    /// A recessive bit was sent, but a dominant one monitored.
    BitRecessive,
    /// A dominant bit was sent, but a recessive one monitored.
    BitDominant,
    /// CRC sequence did not match.
    Checksum,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use LineError::*;
        let msg = match *self {
            Stuff => "stuff error",
            Form => "form error",
            Acknowledge => "acknowledge error",
            BitRecessive => "recessive bit error",
            BitDominant => "dominant bit error",
            Checksum => "checksum error",
        };
        write!(f, "{}", msg)
    }
}

/// The error type for all CAN channel operations.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The controller left the bus after its error counters overflowed.
    #[error("busoff status")]
    BusOff,
    /// The controller reached the error warning level.
    #[error("error warning status")]
    WarningLevel,
    /// A bus error, optionally classified by the last error code.
    #[error("bus error{}", .0.map(|e| format!(" ({})", e)).unwrap_or_default())]
    BusError(Option<LineError>),
    /// The controller is already started.
    #[error("channel already started")]
    AlreadyStarted,
    /// The controller has not been started.
    #[error("channel not started")]
    NotStarted,
    /// At least one received message was dropped by the queue.
    #[error("message lost")]
    MessageLost,
    /// The transmitter could not take the frame within the timeout.
    #[error("transmitter busy")]
    TransmitterBusy,
    /// No message waiting in the reception queue.
    #[error("receiver empty")]
    ReceiverEmpty,
    /// A command was not acknowledged within the protocol timeout.
    #[error("time-out")]
    Timeout,
    /// The channel resources are gone (closed handle, dead transport).
    #[error("resource error")]
    Resource,
    /// The bit-rate settings cannot be realized by the adapter.
    #[error("illegal bit-rate")]
    IllegalBitrate,
    /// The handle does not refer to an open channel.
    #[error("illegal handle")]
    IllegalHandle,
    /// An argument violates the frame or mode invariants.
    #[error("illegal parameter")]
    IllegalParameter,
    /// A DLC outside of 0..=15.
    #[error("illegal data length code {0}")]
    InvalidDlc(u8),
    /// A payload length with no DLC representation.
    #[error("illegal payload length {0}")]
    InvalidLength(usize),
    /// The channel has not been initialized.
    #[error("not initialized")]
    NotInitialized,
    /// A channel on this serial device is already initialized.
    #[error("already initialized")]
    AlreadyInitialized,
    /// The operation or mode is not supported by the adapter dialect.
    #[error("not supported")]
    NotSupported,
    /// A blocking read was woken by `kill`.
    #[error("operation canceled")]
    Canceled,
    /// The serial transport failed; the channel must be closed.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
}

impl Error {
    /// Gets the fixed signed result code of this error.
    pub fn code(&self) -> i32 {
        use Error::*;
        match *self {
            BusOff => -1,
            WarningLevel => -2,
            BusError(None) => -3,
            BusError(Some(LineError::Stuff)) => -11,
            BusError(Some(LineError::Form)) => -12,
            BusError(Some(LineError::Acknowledge)) => -13,
            BusError(Some(LineError::BitRecessive)) => -14,
            BusError(Some(LineError::BitDominant)) => -15,
            BusError(Some(LineError::Checksum)) => -16,
            AlreadyStarted => -8,
            NotStarted => -9,
            MessageLost => -10,
            TransmitterBusy => -20,
            ReceiverEmpty => -30,
            Timeout => -50,
            Resource => -90,
            IllegalBitrate => -91,
            IllegalHandle => -92,
            IllegalParameter | InvalidDlc(_) | InvalidLength(_) => -93,
            NotInitialized => -95,
            AlreadyInitialized => -96,
            NotSupported => -98,
            Canceled => -105,
            Transport(ref e) => OSERR_OFFSET - e.raw_os_error().unwrap_or(0),
        }
    }

    /// Whether the error is fatal to the channel (transport gone).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Resource)
    }
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        use embedded_can::ErrorKind;
        match *self {
            Error::BusError(Some(LineError::Stuff)) => ErrorKind::Stuff,
            Error::BusError(Some(LineError::Form)) => ErrorKind::Form,
            Error::BusError(Some(LineError::Acknowledge)) => ErrorKind::Acknowledge,
            Error::BusError(Some(LineError::BitRecessive)) => ErrorKind::Bit,
            Error::BusError(Some(LineError::BitDominant)) => ErrorKind::Bit,
            Error::BusError(Some(LineError::Checksum)) => ErrorKind::Crc,
            Error::MessageLost => ErrorKind::Overrun,
            _ => ErrorKind::Other,
        }
    }
}
