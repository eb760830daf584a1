// serialcan/src/lib.rs
//
// The main lib file for the Rust 'serialcan-rs' library.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN-over-serial-line support.
//!
//! A whole family of CAN adapters — Lawicel CAN232 and CANUSB, CANable,
//! and many compatibles — speak an ASCII line protocol ("SLCAN") over a
//! plain serial byte stream: one single-letter command per line, hex
//! arguments, CR as terminator. This crate implements that protocol
//! family behind a vendor-neutral channel API, so applications can probe,
//! configure, start and stop a CAN channel, exchange classic CAN and
//! CAN FD frames, and observe bus status without caring which adapter
//! sits on the other end of the wire.
//!
//! # Example
//!
//! ```no_run
//! use serialcan::{bitrate, BitrateDescriptor, CanChannel, CanFrame,
//!     OperationMode, SerialPortConfig};
//! use std::time::Duration;
//!
//! # fn main() -> serialcan::Result<()> {
//! let config = SerialPortConfig::new("/dev/ttyUSB0");
//! let mut channel = CanChannel::init(&config, OperationMode::DEFAULT)?;
//! channel.start(BitrateDescriptor::Index(bitrate::INDEX_250K))?;
//!
//! let frame = CanFrame::from_raw_id(0x123, &[0xDE, 0xAD, 0xBE, 0xEF])?;
//! channel.write(&frame, Duration::from_millis(100))?;
//!
//! let received = channel.read(Some(Duration::from_secs(1)))?;
//! println!("{:X}", received);
//!
//! channel.exit()
//! # }
//! ```
//!
//! # Architecture
//!
//! A dedicated reader thread pumps the serial transport and feeds a
//! bounded reception queue; callers block in [`CanChannel::read`] with a
//! poll / timed / infinite timeout, and [`CanChannel::kill`] cancels any
//! blocked call from another thread. Command round-trips (bit-rate
//! setup, open/close, status query) ride the same wire half-duplex.
//!
//! The adapter dialect ([`Dialect`]) is configuration, not a compile-time
//! choice: the Lawicel command set carries classic CAN with SJA1000
//! register programming and an acceptance filter; the CANable 2.0 set
//! adds CAN FD frames and a data-phase bit-rate. Every operation returns
//! a [`Result`]; the [`Error`] variants map onto the fixed signed result
//! codes of the classic CAN API generation.

// ===== modules =====

pub mod bitrate;
pub mod channel;
pub mod codec;
pub mod dialect;
pub mod dlc;
pub mod errors;
pub mod frame;
pub mod mode;
pub mod queue;
pub mod status;
pub mod transport;

// ===== re-exports =====

pub use crate::{
    bitrate::{BitrateDescriptor, BusSpeed, ControllerTiming, DataTiming, NominalTiming},
    channel::{probe, CanChannel, ChannelState, FrameCounters, KillHandle, Presence},
    codec::{Decoded, FrameCodec},
    dialect::Dialect,
    errors::{Error, LineError, Result},
    frame::{id_from_raw, CanFrame, FrameFlags, Timestamp},
    mode::OperationMode,
    queue::MessageQueue,
    status::{BusCondition, StatusAggregator, StatusRegister},
    transport::{
        DataBits, Line, LineEnding, LineSplitter, Parity, SerialPortConfig, SerialTransport,
        StopBits, Transport,
    },
};

pub use embedded_can::{ExtendedId, Id, StandardId};
