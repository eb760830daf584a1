// serialcan/src/frame.rs
//
// Implements frames for CANbus 2.0 and FD for SerialCAN adapters.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames.
//!
//! A [`CanFrame`] carries an 11-bit standard or 29-bit extended identifier,
//! a one-byte flag register with fixed bit positions, a Data Length Code,
//! a payload buffer sized for the largest CAN FD frame, and a
//! receiver-assigned timestamp.
//!
//! Three flavors exist behind the one record:
//! - data frames (classic or FD, the FD ones optionally with bit-rate
//!   switching),
//! - remote frames (classic only, no payload),
//! - status frames — synthetic, incoming only, representing an
//!   adapter-reported bus condition rather than real traffic.

use crate::{
    dlc::{self, CANFD_MAX_DLEN, CAN_MAX_DLC, CAN_MAX_DLEN},
    Error, Result,
};
use bitflags::bitflags;
use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use itertools::Itertools;
use std::{fmt, time::SystemTime};

/// Highest valid 11-bit (standard) identifier.
pub const CAN_MAX_STD_ID: u32 = 0x7FF;

/// Highest valid 29-bit (extended) identifier.
pub const CAN_MAX_XTD_ID: u32 = 0x1FFF_FFFF;

bitflags! {
    /// The frame flag register, one flag per bit, positions fixed.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Frame uses a 29-bit extended identifier.
        const XTD = 0x01;
        /// Remote transmission request.
        const RTR = 0x02;
        /// CAN FD format.
        const FDF = 0x04;
        /// Bit-rate switching (payload at the data bit-rate).
        const BRS = 0x08;
        /// Error state indicator of the transmitting node.
        const ESI = 0x10;
        /// Status frame (bus condition, not traffic).
        const STS = 0x80;
    }
}

/// Reception time of a frame, seconds and nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Timestamp {
    /// Whole seconds.
    pub sec: u64,
    /// Nanosecond remainder.
    pub nsec: u32,
}

impl Timestamp {
    /// The current system time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs(),
                nsec: d.subsec_nanos(),
            },
            Err(_) => Self::default(),
        }
    }
}

/// A CAN 2.0 or CAN FD frame.
///
/// Field order matches the wire-compatible record of the classic driver
/// generation: identifier, flag byte, DLC, payload buffer, timestamp.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct CanFrame {
    id: u32,
    flags: FrameFlags,
    dlc: u8,
    data: [u8; CANFD_MAX_DLEN],
    timestamp: Timestamp,
}

impl CanFrame {
    /// Creates a classic data frame.
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(Error::InvalidLength(data.len()));
        }
        let (id, flags) = split_id(id.into());
        Ok(Self::init(id, flags, data.len() as u8, data))
    }

    /// Creates a classic remote frame. Remote frames carry a DLC but no
    /// payload.
    pub fn new_remote(id: impl Into<Id>, dlc: u8) -> Result<Self> {
        if dlc > CAN_MAX_DLC {
            return Err(Error::InvalidDlc(dlc));
        }
        let (id, flags) = split_id(id.into());
        Ok(Self::init(id, flags | FrameFlags::RTR, dlc, &[]))
    }

    /// Creates a CAN FD data frame, optionally with bit-rate switching.
    ///
    /// A payload length without an exact DLC representation is padded with
    /// zeros up to the next representable length.
    pub fn new_fd(id: impl Into<Id>, data: &[u8], brs: bool) -> Result<Self> {
        let fd_dlc = dlc::len_to_dlc(data.len())?;
        let (id, mut flags) = split_id(id.into());
        flags |= FrameFlags::FDF;
        if brs {
            flags |= FrameFlags::BRS;
        }
        Ok(Self::init(id, flags, fd_dlc, data))
    }

    /// Creates a data frame using a raw, integer CAN ID.
    ///
    /// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
    /// it is created as an extended ID.
    pub fn from_raw_id(id: u32, data: &[u8]) -> Result<Self> {
        Self::new(id_from_raw(id)?, data)
    }

    /// Creates a remote frame using a raw, integer CAN ID.
    pub fn remote_from_raw_id(id: u32, dlc: u8) -> Result<Self> {
        Self::new_remote(id_from_raw(id)?, dlc)
    }

    /// Assembles a frame from its decoded wire parts. The caller is
    /// responsible for flag/DLC consistency.
    pub(crate) fn init(id: u32, flags: FrameFlags, frame_dlc: u8, data: &[u8]) -> Self {
        let mut buf = [0u8; CANFD_MAX_DLEN];
        buf[..data.len()].copy_from_slice(data);
        Self {
            id,
            flags,
            dlc: frame_dlc,
            data: buf,
            timestamp: Timestamp::default(),
        }
    }

    /// Synthesizes an incoming status frame carrying a bus condition byte.
    pub(crate) fn status_frame(condition: u8) -> Self {
        Self::init(0, FrameFlags::STS, 1, &[condition])
    }

    /// The raw identifier, without any flag bits.
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// The CAN ID as the embedded HAL `Id` type.
    pub fn can_id(&self) -> Id {
        if self.is_extended() {
            // masked on construction, cannot exceed the extended range
            ExtendedId::new(self.id).unwrap().into()
        } else {
            StandardId::new(self.id as u16).unwrap().into()
        }
    }

    /// The frame flag register.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// The Data Length Code (0..=8 classic, 0..=15 FD).
    pub fn frame_dlc(&self) -> u8 {
        self.dlc
    }

    /// The payload length in bytes encoded by the DLC.
    pub fn len(&self) -> usize {
        dlc::dlc_to_len(self.dlc).unwrap_or(0)
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the frame uses a 29-bit extended identifier.
    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::XTD)
    }

    /// Whether the frame is a remote transmission request.
    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::RTR)
    }

    /// Whether the frame is in CAN FD format.
    pub fn is_fd(&self) -> bool {
        self.flags.contains(FrameFlags::FDF)
    }

    /// Whether the payload was transferred at the data bit-rate.
    pub fn is_brs(&self) -> bool {
        self.flags.contains(FrameFlags::BRS)
    }

    /// Whether the transmitting node signalled error passive state.
    pub fn is_esi(&self) -> bool {
        self.flags.contains(FrameFlags::ESI)
    }

    /// Whether this is a synthetic status frame.
    pub fn is_status(&self) -> bool {
        self.flags.contains(FrameFlags::STS)
    }

    /// The meaningful payload bytes (`len()` of them). Remote frames
    /// request `len()` bytes but carry none.
    pub fn payload(&self) -> &[u8] {
        if self.is_remote() {
            &[]
        } else {
            &self.data[..self.len()]
        }
    }

    /// The reception timestamp. Zero until assigned by the receiver.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, t: Timestamp) {
        self.timestamp = t;
    }

    /// Checks the frame invariants before transmission.
    ///
    /// Remote frames exclude the FD format; bit-rate switching requires
    /// the FD format; a DLC above 8 requires the FD format; the error
    /// state indicator and status flag are receive-only.
    pub(crate) fn check_tx(&self) -> Result<()> {
        let f = self.flags;
        if f.contains(FrameFlags::STS) || f.contains(FrameFlags::ESI) {
            return Err(Error::IllegalParameter);
        }
        if f.contains(FrameFlags::RTR) && f.contains(FrameFlags::FDF) {
            return Err(Error::IllegalParameter);
        }
        if f.contains(FrameFlags::BRS) && !f.contains(FrameFlags::FDF) {
            return Err(Error::IllegalParameter);
        }
        if self.dlc > CAN_MAX_DLC && !f.contains(FrameFlags::FDF) {
            return Err(Error::InvalidDlc(self.dlc));
        }
        let max_id = if f.contains(FrameFlags::XTD) {
            CAN_MAX_XTD_ID
        } else {
            CAN_MAX_STD_ID
        };
        if self.id > max_id {
            return Err(Error::IllegalParameter);
        }
        Ok(())
    }
}

/// Splits an embedded HAL `Id` into the raw value and the XTD flag.
fn split_id(id: Id) -> (u32, FrameFlags) {
    match id {
        Id::Standard(id) => (id.as_raw() as u32, FrameFlags::empty()),
        Id::Extended(id) => (id.as_raw(), FrameFlags::XTD),
    }
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an extended ID. If you require an extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Result<Id> {
    let id = match id {
        n if n <= CAN_MAX_STD_ID => StandardId::new(n as u16).map(Id::from),
        n => ExtendedId::new(n).map(Id::from),
    };
    id.ok_or(Error::IllegalParameter)
}

impl EmbeddedFrame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        CanFrame::new(id, data).ok()
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > CAN_MAX_DLC as usize {
            return None;
        }
        CanFrame::new_remote(id, dlc as u8).ok()
    }

    fn is_extended(&self) -> bool {
        CanFrame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        self.is_remote()
    }

    fn id(&self) -> Id {
        self.can_id()
    }

    fn dlc(&self) -> usize {
        self.len()
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

/// Equality ignores the timestamp, which is receiver-assigned.
impl PartialEq for CanFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.flags == other.flags
            && self.dlc == other.dlc
            && self.payload() == other.payload()
    }
}

impl Eq for CanFrame {}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("{:X}", self.id))
            .field("flags", &self.flags)
            .field("dlc", &self.dlc)
            .field("data", &format_args!("{:X}", self))
            .finish()
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sep = if self.is_fd() { "##" } else { "#" };
        write!(f, "{:X}{}", self.id, sep)?;
        let mut parts = self.payload().iter().map(|v| format!("{:02X}", v));
        write!(f, "{}", parts.join(" "))
    }
}
