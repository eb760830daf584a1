// serialcan/src/codec.rs
//
// Implements the SLCAN ASCII frame codec.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Frame encoding and decoding for the SLCAN wire protocol.
//!
//! Every wire line is a single-letter opcode followed by fixed-width hex
//! fields and terminated by CR. Classic frames:
//!
//! ```text
//! t<ID:3><DLC:1><DATA:2*DLC>    standard data frame
//! T<ID:8><DLC:1><DATA:2*DLC>    extended data frame
//! r<ID:3><DLC:1>                standard remote frame
//! R<ID:8><DLC:1>                extended remote frame
//! ```
//!
//! CAN FD frames (CANable 2.0 dialect) use `d`/`D` and, with bit-rate
//! switching, `b`/`B`; their DLC digit is the hex DLC value itself, so
//! `9`..`F` select the long payload lengths 12..64.
//!
//! Anything else on the wire is a command reply (ACK, NACK, transmit
//! confirmation `z`/`Z`, status `F<hh>`, version `V<hhhh>`, serial number
//! `N<hhhh>`) and decodes into a side-channel event instead of a frame.
//! Malformed lines decode to `None`; the reader drops and counts them.

use crate::{
    dlc,
    frame::{CanFrame, FrameFlags, Timestamp, CAN_MAX_STD_ID, CAN_MAX_XTD_ID},
    status::BusCondition,
    transport::{Line, LineEnding},
    Dialect, Error, Result,
};
use crate::dialect::CR;

/// One decoded wire line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A received CAN frame (timestamp assigned).
    Frame(CanFrame),
    /// Positive acknowledge (bare CR).
    Ack,
    /// Negative acknowledge (BEL).
    Nack,
    /// Confirmation of a transmitted frame (`z`/`Z`).
    TxConfirmation,
    /// The adapter status flag register (`F<hh>`), raw adapter layout.
    StatusFlags(u8),
    /// Hardware and software version (`V<hhhh>`).
    Version {
        /// Hardware version, major nibble / minor nibble.
        hardware: u8,
        /// Software version, major nibble / minor nibble.
        software: u8,
    },
    /// The adapter serial number (`N<hhhh>`).
    SerialNumber(u32),
}

/// Encoder/decoder between [`CanFrame`]s and the adapter command syntax,
/// parameterized by the dialect selected at channel-open time.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    dialect: Dialect,
}

impl FrameCodec {
    /// Creates a codec for the given dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The dialect this codec speaks.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Encodes a frame into a complete CR-terminated command line.
    ///
    /// Fails when the frame violates the transmit invariants or uses the
    /// FD format on a dialect without FD support.
    pub fn encode(&self, frame: &CanFrame) -> Result<Vec<u8>> {
        frame.check_tx()?;
        if frame.is_fd() && !self.dialect.supports_fd() {
            return Err(Error::NotSupported);
        }
        let opcode = match (frame.is_fd(), frame.is_brs(), frame.is_remote(), frame.is_extended()) {
            (false, _, false, false) => b't',
            (false, _, false, true) => b'T',
            (false, _, true, false) => b'r',
            (false, _, true, true) => b'R',
            (true, false, _, false) => b'd',
            (true, false, _, true) => b'D',
            (true, true, _, false) => b'b',
            (true, true, _, true) => b'B',
        };
        let mut cmd = Vec::with_capacity(2 + 8 + 1 + 2 * frame.len());
        cmd.push(opcode);
        if frame.is_extended() {
            cmd.extend_from_slice(format!("{:08X}", frame.raw_id()).as_bytes());
        } else {
            cmd.extend_from_slice(format!("{:03X}", frame.raw_id()).as_bytes());
        }
        cmd.extend_from_slice(format!("{:X}", frame.frame_dlc()).as_bytes());
        if !frame.is_remote() {
            cmd.extend_from_slice(hex::encode_upper(frame.payload()).as_bytes());
        }
        cmd.push(CR);
        Ok(cmd)
    }

    /// Decodes one delimited line into a frame or a side-channel event.
    ///
    /// Returns `None` for malformed lines; decoding never blocks.
    pub fn decode(&self, line: &Line) -> Option<Decoded> {
        if line.ending == LineEnding::Bell {
            return Some(Decoded::Nack);
        }
        let bytes = line.bytes.as_slice();
        match bytes.first() {
            None => Some(Decoded::Ack),
            Some(b't' | b'T' | b'r' | b'R' | b'd' | b'D' | b'b' | b'B') => {
                decode_frame(bytes).map(Decoded::Frame)
            }
            Some(b'z' | b'Z') if bytes.len() == 1 => Some(Decoded::TxConfirmation),
            Some(b'F') if bytes.len() >= 3 => {
                parse_hex(&bytes[1..3]).map(|v| Decoded::StatusFlags(v as u8))
            }
            Some(b'V') if bytes.len() >= 5 => parse_hex(&bytes[1..5]).map(|v| Decoded::Version {
                hardware: (v >> 8) as u8,
                software: v as u8,
            }),
            Some(b'N') if bytes.len() >= 5 => {
                parse_hex(&bytes[1..5]).map(Decoded::SerialNumber)
            }
            Some(_) => None,
        }
    }
}

/// Parses a frame line. The opcode fixes the flag set and the id width;
/// the rest is fixed-width hex, optionally followed by a timestamp which
/// is ignored.
fn decode_frame(bytes: &[u8]) -> Option<CanFrame> {
    let (flags, id_len) = match bytes[0] {
        b't' => (FrameFlags::empty(), 3),
        b'T' => (FrameFlags::XTD, 8),
        b'r' => (FrameFlags::RTR, 3),
        b'R' => (FrameFlags::RTR | FrameFlags::XTD, 8),
        b'd' => (FrameFlags::FDF, 3),
        b'D' => (FrameFlags::FDF | FrameFlags::XTD, 8),
        b'b' => (FrameFlags::FDF | FrameFlags::BRS, 3),
        b'B' => (FrameFlags::FDF | FrameFlags::BRS | FrameFlags::XTD, 8),
        _ => return None,
    };
    if bytes.len() < 1 + id_len + 1 {
        return None;
    }
    let id_mask = if flags.contains(FrameFlags::XTD) {
        CAN_MAX_XTD_ID
    } else {
        CAN_MAX_STD_ID
    };
    let id = parse_hex(&bytes[1..1 + id_len])? & id_mask;

    let frame_dlc = (bytes[1 + id_len] as char).to_digit(16)? as u8;
    if !flags.contains(FrameFlags::FDF) && frame_dlc > dlc::CAN_MAX_DLC {
        return None;
    }
    let len = dlc::dlc_to_len(frame_dlc).ok()?;

    let mut frame = if flags.contains(FrameFlags::RTR) {
        CanFrame::init(id, flags, frame_dlc, &[])
    } else {
        let data_start = 1 + id_len + 1;
        let data_end = data_start + 2 * len;
        if bytes.len() < data_end {
            return None;
        }
        let data = hex::decode(&bytes[data_start..data_end]).ok()?;
        CanFrame::init(id, flags, frame_dlc, &data)
    };
    frame.set_timestamp(Timestamp::now());
    Some(frame)
}

fn parse_hex(bytes: &[u8]) -> Option<u32> {
    let s = std::str::from_utf8(bytes).ok()?;
    u32::from_str_radix(s, 16).ok()
}

/// Maps the adapter status flag byte (SJA1000 layout: BEI, ALI, EPI,
/// DOI, EI, TxFIFO, RxFIFO) onto the unified bus condition, plus the
/// message-lost indication.
pub(crate) fn decode_adapter_flags(byte: u8) -> (BusCondition, bool) {
    let bei = byte & 0x01 != 0; // bus error
    let ali = byte & 0x02 != 0; // arbitration lost
    let epi = byte & 0x04 != 0; // error passive
    let doi = byte & 0x10 != 0; // data overrun
    let ei = byte & 0x20 != 0; // error warning
    let tx_fifo = byte & 0x40 != 0; // transmit FIFO full
    let rx_fifo = byte & 0x80 != 0; // receive FIFO full
    let condition = BusCondition {
        bus_off: ali,
        warning_level: ei || epi,
        // the flag byte does not carry the last error code
        bus_error: None,
        bus_error_flag: bei,
    };
    (condition, doi || tx_fifo || rx_fifo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::id_from_raw;
    use crate::transport::Line;

    fn cr_line(bytes: &[u8]) -> Line {
        Line {
            bytes: bytes.to_vec(),
            ending: LineEnding::Cr,
        }
    }

    fn decode_one(codec: &FrameCodec, bytes: &[u8]) -> Decoded {
        codec.decode(&cr_line(bytes)).unwrap()
    }

    #[test]
    fn encode_standard_data_frame() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        let frame = CanFrame::from_raw_id(0x123, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(codec.encode(&frame).unwrap(), b"t1233010203\r");
    }

    #[test]
    fn encode_extended_data_frame() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        let frame = CanFrame::from_raw_id(0x1234_5678, &[0xAA, 0xBB]).unwrap();
        assert_eq!(codec.encode(&frame).unwrap(), b"T123456782AABB\r");
    }

    #[test]
    fn encode_remote_frames() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        let frame = CanFrame::remote_from_raw_id(0x123, 4).unwrap();
        assert_eq!(codec.encode(&frame).unwrap(), b"r1234\r");
        let frame = CanFrame::remote_from_raw_id(0x1234_5678, 0).unwrap();
        assert_eq!(codec.encode(&frame).unwrap(), b"R123456780\r");
    }

    #[test]
    fn encode_fd_frames_uses_the_dlc_alphabet() {
        let codec = FrameCodec::new(Dialect::Canable);
        let frame = CanFrame::new_fd(id_from_raw(0x123).unwrap(), &[0x11; 12], false).unwrap();
        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(&encoded[..5], b"d1239");
        assert_eq!(encoded.len(), 1 + 3 + 1 + 24 + 1);

        let frame = CanFrame::new_fd(id_from_raw(0x123).unwrap(), &[0x22; 64], true).unwrap();
        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(&encoded[..5], b"b123F");
    }

    #[test]
    fn fd_on_lawicel_is_rejected() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        let frame = CanFrame::new_fd(id_from_raw(0x123).unwrap(), &[0; 12], false).unwrap();
        assert!(matches!(codec.encode(&frame), Err(Error::NotSupported)));
    }

    #[test]
    fn decode_standard_data_frame() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        match decode_one(&codec, b"t1234AABBCCDD") {
            Decoded::Frame(frame) => {
                assert_eq!(frame.raw_id(), 0x123);
                assert_eq!(frame.frame_dlc(), 4);
                assert_eq!(frame.payload(), &[0xAA, 0xBB, 0xCC, 0xDD]);
                assert!(!frame.is_extended());
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn decode_ignores_a_trailing_timestamp() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        match decode_one(&codec, b"t10021122A1B2") {
            Decoded::Frame(frame) => {
                assert_eq!(frame.raw_id(), 0x100);
                assert_eq!(frame.payload(), &[0x11, 0x22]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn decode_fd_frame_with_brs() {
        let codec = FrameCodec::new(Dialect::Canable);
        let mut line = b"B12345678A".to_vec();
        line.extend_from_slice("00".repeat(16).as_bytes());
        match decode_one(&codec, &line) {
            Decoded::Frame(frame) => {
                assert_eq!(frame.raw_id(), 0x1234_5678);
                assert!(frame.is_fd() && frame.is_brs() && frame.is_extended());
                assert_eq!(frame.len(), 16);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn round_trip_all_classic_shapes() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        let frames = [
            CanFrame::from_raw_id(0x000, &[]).unwrap(),
            CanFrame::from_raw_id(0x7FF, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap(),
            CanFrame::from_raw_id(0x1FFF_FFFF, &[0x00; 8]).unwrap(),
            CanFrame::remote_from_raw_id(0x42, 8).unwrap(),
            CanFrame::remote_from_raw_id(0x1234_5678, 3).unwrap(),
        ];
        for frame in frames {
            let encoded = codec.encode(&frame).unwrap();
            let line = cr_line(&encoded[..encoded.len() - 1]);
            match codec.decode(&line).unwrap() {
                Decoded::Frame(decoded) => assert_eq!(decoded, frame),
                other => panic!("expected frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn round_trip_fd_shapes() {
        let codec = FrameCodec::new(Dialect::Canable);
        for (len, brs) in [(0usize, false), (8, false), (12, true), (48, true), (64, false)] {
            let data = vec![0x5A; len];
            let frame = CanFrame::new_fd(id_from_raw(0x456).unwrap(), &data, brs).unwrap();
            let encoded = codec.encode(&frame).unwrap();
            let line = cr_line(&encoded[..encoded.len() - 1]);
            match codec.decode(&line).unwrap() {
                Decoded::Frame(decoded) => assert_eq!(decoded, frame),
                other => panic!("expected frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn decode_side_channel_events() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        assert_eq!(decode_one(&codec, b""), Decoded::Ack);
        assert_eq!(decode_one(&codec, b"z"), Decoded::TxConfirmation);
        assert_eq!(decode_one(&codec, b"Z"), Decoded::TxConfirmation);
        assert_eq!(decode_one(&codec, b"F04"), Decoded::StatusFlags(0x04));
        assert_eq!(
            decode_one(&codec, b"V1013"),
            Decoded::Version {
                hardware: 0x10,
                software: 0x13
            }
        );
        assert_eq!(decode_one(&codec, b"NA123"), Decoded::SerialNumber(0xA123));
        let nack = Line {
            bytes: vec![],
            ending: LineEnding::Bell,
        };
        assert_eq!(codec.decode(&nack), Some(Decoded::Nack));
    }

    #[test]
    fn malformed_lines_decode_to_none() {
        let codec = FrameCodec::new(Dialect::Lawicel);
        assert_eq!(codec.decode(&cr_line(b"x123")), None);
        assert_eq!(codec.decode(&cr_line(b"t12")), None); // truncated id
        assert_eq!(codec.decode(&cr_line(b"t123")), None); // missing dlc
        assert_eq!(codec.decode(&cr_line(b"t1239")), None); // classic dlc > 8
        assert_eq!(codec.decode(&cr_line(b"t12320A")), None); // short payload
        assert_eq!(codec.decode(&cr_line(b"tXYZ100")), None); // bad hex
    }

    #[test]
    fn adapter_flag_mapping() {
        // BEI + EI: bus error and warning level
        let (condition, lost) = decode_adapter_flags(0x21);
        assert!(condition.bus_error_flag);
        assert!(condition.warning_level);
        assert!(!condition.bus_off);
        assert!(!lost);

        // DOI: data overrun means lost messages
        let (_, lost) = decode_adapter_flags(0x10);
        assert!(lost);
    }
}
