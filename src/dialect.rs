// serialcan/src/dialect.rs
//
// Implements the SLCAN protocol dialects (Lawicel, CANable).
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! SLCAN dialect selection.
//!
//! The SLCAN family shares one grammar — single-letter opcodes, hex
//! arguments, CR-terminated lines, BEL as negative acknowledge — but the
//! vendors diverge on the token set:
//!
//! - **Lawicel** (CAN232/CANUSB): the full classic command set including
//!   SJA1000 BTR0/BTR1 register programming (`s`), acceptance filter
//!   (`M`/`m`), version (`V`) and serial number (`N`) queries, with
//!   ACK/NACK feedback on every command. Classic CAN only.
//! - **CANable** (canable/canable2 firmware): fixed rate commands only,
//!   no register programming, no acceptance filter, ACK feedback not
//!   relied upon; the 2.0 firmware adds CAN FD frames and a data
//!   bit-rate command.
//!
//! The dialect is configuration, selected at channel-open time; `Auto`
//! resolves by probing the version query during initialization.

use crate::{bitrate, OperationMode, Result};
use log::warn;

/// Positive acknowledge / line terminator.
pub const CR: u8 = b'\r';

/// Negative acknowledge (BEL).
pub const BELL: u8 = 0x07;

/// The SLCAN protocol dialect spoken by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Lawicel CAN232/CANUSB command set (default).
    #[default]
    Lawicel,
    /// CANable / CANable 2.0 firmware command set.
    Canable,
    /// Probe the adapter during initialization.
    Auto,
}

/// CAN FD data phase rates accepted by the CANable 2.0 firmware,
/// with their wire digits.
const DATA_RATE_TABLE: [(u32, u8); 2] = [(2_000_000, 2), (5_000_000, 5)];

impl Dialect {
    /// The operation modes the dialect can realize.
    ///
    /// `NXTD`/`NRTR` are driver-side frame suppression and work
    /// everywhere; FD operation needs the CANable 2.0 token set.
    pub fn capability(self) -> OperationMode {
        let classic = OperationMode::MON
            | OperationMode::ERR
            | OperationMode::NXTD
            | OperationMode::NRTR;
        match self {
            Dialect::Lawicel => classic,
            Dialect::Canable => classic | OperationMode::FDOE | OperationMode::BRSE,
            Dialect::Auto => classic,
        }
    }

    /// Whether the dialect can transfer CAN FD frames.
    pub fn supports_fd(self) -> bool {
        matches!(self, Dialect::Canable)
    }

    /// Whether the dialect accepts SJA1000 BTR0/BTR1 register programming.
    pub fn supports_btr(self) -> bool {
        matches!(self, Dialect::Lawicel)
    }

    /// Whether the dialect accepts the acceptance filter commands.
    pub fn supports_filter(self) -> bool {
        matches!(self, Dialect::Lawicel)
    }

    /// Whether every command is answered with ACK/NACK feedback.
    pub fn ack_feedback(self) -> bool {
        !matches!(self, Dialect::Canable)
    }

    // --- command builders, each a complete CR-terminated line ---

    /// Setup with one of the fixed rates: `S<digit>`.
    pub fn cmd_setup_bitrate(self, digit: u8) -> Vec<u8> {
        vec![b'S', b'0' + digit, CR]
    }

    /// Setup with a raw SJA1000 register pair: `s<BTR0><BTR1>`.
    pub fn cmd_setup_btr(self, btr0btr1: u16) -> Vec<u8> {
        let mut cmd = vec![b's'];
        cmd.extend_from_slice(format!("{:04X}", btr0btr1).as_bytes());
        cmd.push(CR);
        cmd
    }

    /// Setup the CAN FD data phase rate: `Y<digit>` (CANable 2.0).
    pub fn cmd_setup_data_bitrate(self, digit: u8) -> Vec<u8> {
        vec![b'Y', b'0' + digit, CR]
    }

    /// Open the CAN channel: `O`, or `L` for listen-only (monitor) mode.
    pub fn cmd_open_channel(self, mode: OperationMode) -> Vec<u8> {
        let opcode = if mode.contains(OperationMode::MON) {
            b'L'
        } else {
            b'O'
        };
        vec![opcode, CR]
    }

    /// Close the CAN channel: `C`.
    pub fn cmd_close_channel(self) -> Vec<u8> {
        vec![b'C', CR]
    }

    /// Query the status flag register: `F`.
    pub fn cmd_status_flags(self) -> Vec<u8> {
        vec![b'F', CR]
    }

    /// Query hardware and software version: `V`.
    pub fn cmd_version(self) -> Vec<u8> {
        vec![b'V', CR]
    }

    /// Query the serial number: `N`.
    pub fn cmd_serial_number(self) -> Vec<u8> {
        vec![b'N', CR]
    }

    /// Program the acceptance code register: `M<code>` (Lawicel).
    pub fn cmd_acceptance_code(self, code: u32) -> Vec<u8> {
        let mut cmd = vec![b'M'];
        cmd.extend_from_slice(format!("{:08X}", code).as_bytes());
        cmd.push(CR);
        cmd
    }

    /// Program the acceptance mask register: `m<mask>` (Lawicel).
    pub fn cmd_acceptance_mask(self, mask: u32) -> Vec<u8> {
        let mut cmd = vec![b'm'];
        cmd.extend_from_slice(format!("{:08X}", mask).as_bytes());
        cmd.push(CR);
        cmd
    }

    /// The wire digit for a CAN FD data phase rate.
    ///
    /// Rates without an exact wire representation fall back to the
    /// nearest supported one; the deviation is logged, not fatal.
    pub fn nearest_data_rate_digit(self, rate: u32) -> Result<u8> {
        let (table_rate, digit) = DATA_RATE_TABLE
            .iter()
            .min_by_key(|(r, _)| r.abs_diff(rate))
            .copied()
            .unwrap();
        if table_rate != rate {
            warn!(
                "no exact data phase wire rate for {} bit/s, falling back to {} bit/s",
                rate, table_rate
            );
        }
        Ok(digit)
    }

    /// Renders the rate-selection command(s) for a resolved timing.
    ///
    /// Lawicel prefers exact SJA1000 register programming for timings
    /// outside the fixed table; dialects without the register command use
    /// the nearest fixed rate.
    pub fn rate_commands(self, timing: &bitrate::ControllerTiming) -> Result<Vec<Vec<u8>>> {
        let mut commands = Vec::with_capacity(2);
        match timing.index {
            Some(index) => {
                commands.push(self.cmd_setup_bitrate(bitrate::index_wire_digit(index)?));
            }
            None if self.supports_btr() => match bitrate::timing_to_sja1000(timing) {
                Ok(btr0btr1) => commands.push(self.cmd_setup_btr(btr0btr1)),
                Err(_) => {
                    let index = bitrate::nearest_index(timing);
                    commands.push(self.cmd_setup_bitrate(bitrate::index_wire_digit(index)?));
                }
            },
            None => {
                let index = bitrate::nearest_index(timing);
                commands.push(self.cmd_setup_bitrate(bitrate::index_wire_digit(index)?));
            }
        }
        if let Some(data) = timing.data {
            let tq = data.brp as u32 * (1 + data.tseg1 + data.tseg2) as u32;
            let rate = timing.frequency as u32 / tq;
            commands.push(self.cmd_setup_data_bitrate(self.nearest_data_rate_digit(rate)?));
        }
        Ok(commands)
    }
}
