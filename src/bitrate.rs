// serialcan/src/bitrate.rs
//
// Implements CAN bit-rate and bit-timing conversions.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Bit-rate descriptors and controller timing.
//!
//! A bit-rate is requested either by one of nine predefined indexes
//! (`0` = 1 Mbit/s down to `-8` = 10 kbit/s, a numbering kept for
//! compatibility with the classic CAN API generation) or by an explicit
//! bit-timing register: controller clock frequency, nominal segment, and —
//! with CAN FD — a second data-phase segment.
//!
//! The predefined indexes resolve through the SJA1000 BTR0/BTR1 table of
//! the classic controllers (8 MHz clock). Adapters that only accept the
//! index commands get the nearest table rate for arbitrary register
//! settings; the deviation is logged, not fatal (callers that need exact
//! timing use the register form on a dialect that accepts raw register
//! programming).

use crate::{Error, Result};
use log::warn;

/// Predefined bit-rate index: 1 Mbit/s.
pub const INDEX_1M: i32 = 0;
/// Predefined bit-rate index: 800 kbit/s.
pub const INDEX_800K: i32 = -1;
/// Predefined bit-rate index: 500 kbit/s.
pub const INDEX_500K: i32 = -2;
/// Predefined bit-rate index: 250 kbit/s.
pub const INDEX_250K: i32 = -3;
/// Predefined bit-rate index: 125 kbit/s.
pub const INDEX_125K: i32 = -4;
/// Predefined bit-rate index: 100 kbit/s.
pub const INDEX_100K: i32 = -5;
/// Predefined bit-rate index: 50 kbit/s.
pub const INDEX_50K: i32 = -6;
/// Predefined bit-rate index: 20 kbit/s.
pub const INDEX_20K: i32 = -7;
/// Predefined bit-rate index: 10 kbit/s.
pub const INDEX_10K: i32 = -8;

/// Clock frequency of the SJA1000 controller behind the index table.
pub const SJA1000_FREQUENCY: i32 = 8_000_000;

/// The nine predefined rates: index, bit-rate, SJA1000 BTR0/BTR1 value.
const INDEX_TABLE: [(i32, u32, u16); 9] = [
    (INDEX_1M, 1_000_000, 0x0014),
    (INDEX_800K, 800_000, 0x0016),
    (INDEX_500K, 500_000, 0x001C),
    (INDEX_250K, 250_000, 0x011C),
    (INDEX_125K, 125_000, 0x031C),
    (INDEX_100K, 100_000, 0x441C),
    (INDEX_50K, 50_000, 0x491C),
    (INDEX_20K, 20_000, 0x581C),
    (INDEX_10K, 10_000, 0x711C),
];

// nominal segment limits (CAN 2.0 and CAN FD arbitration phase)
const NOMINAL_BRP_MAX: u16 = 1024;
const NOMINAL_TSEG1_MAX: u16 = 256;
const NOMINAL_TSEG2_MAX: u16 = 128;
const NOMINAL_SJW_MAX: u16 = 128;

// data segment limits (CAN FD data phase)
const DATA_BRP_MAX: u16 = 1024;
const DATA_TSEG1_MAX: u16 = 32;
const DATA_TSEG2_MAX: u16 = 16;
const DATA_SJW_MAX: u16 = 16;

// SJA1000 register limits
const SJA1000_BRP_MAX: u16 = 64;
const SJA1000_TSEG1_MAX: u16 = 16;
const SJA1000_TSEG2_MAX: u16 = 8;
const SJA1000_SJW_MAX: u16 = 4;

/// Bit-timing of the nominal (arbitration) phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NominalTiming {
    /// Bit-rate prescaler.
    pub brp: u16,
    /// Time segment 1, before the sample point.
    pub tseg1: u16,
    /// Time segment 2, after the sample point.
    pub tseg2: u16,
    /// Synchronization jump width.
    pub sjw: u16,
    /// Number of samples taken per bit (SJA1000: 1 or 3).
    pub sam: u8,
}

/// Bit-timing of the CAN FD data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTiming {
    /// Bit-rate prescaler.
    pub brp: u16,
    /// Time segment 1, before the sample point.
    pub tseg1: u16,
    /// Time segment 2, after the sample point.
    pub tseg2: u16,
    /// Synchronization jump width.
    pub sjw: u16,
}

/// A requested bit-rate: predefined index or explicit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateDescriptor {
    /// One of the nine predefined classic rates (`0..=-8`).
    Index(i32),
    /// Explicit bit-timing register values.
    Register {
        /// Controller clock frequency in Hz.
        frequency: i32,
        /// Nominal (arbitration) phase timing.
        nominal: NominalTiming,
        /// Data phase timing, only meaningful with CAN FD enabled.
        data: Option<DataTiming>,
    },
}

/// Resolved controller timing, ready for wire rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTiming {
    /// Controller clock frequency in Hz.
    pub frequency: i32,
    /// Nominal phase timing.
    pub nominal: NominalTiming,
    /// Data phase timing (CAN FD only).
    pub data: Option<DataTiming>,
    /// The predefined index this timing came from, if any.
    pub index: Option<i32>,
}

/// Transmission rate derived from a resolved timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusSpeed {
    /// Nominal bus speed in bit/s.
    pub nominal_speed: f64,
    /// Nominal sample point in percent.
    pub nominal_sample_point: f64,
    /// Data phase speed in bit/s (CAN FD only).
    pub data_speed: Option<f64>,
    /// Data phase sample point in percent (CAN FD only).
    pub data_sample_point: Option<f64>,
}

impl ControllerTiming {
    /// The nominal bit-rate in bit/s encoded by this timing.
    pub fn nominal_bitrate(&self) -> u32 {
        let tq = self.nominal.brp as u32 * (1 + self.nominal.tseg1 + self.nominal.tseg2) as u32;
        self.frequency as u32 / tq
    }

    /// The nominal and data phase speed and sample point.
    pub fn speed(&self) -> BusSpeed {
        let nbt = (1 + self.nominal.tseg1 + self.nominal.tseg2) as f64;
        let nominal_speed = self.frequency as f64 / (self.nominal.brp as f64 * nbt);
        let nominal_sample_point = 100.0 * (1 + self.nominal.tseg1) as f64 / nbt;
        let (data_speed, data_sample_point) = match self.data {
            Some(d) => {
                let dbt = (1 + d.tseg1 + d.tseg2) as f64;
                (
                    Some(self.frequency as f64 / (d.brp as f64 * dbt)),
                    Some(100.0 * (1 + d.tseg1) as f64 / dbt),
                )
            }
            None => (None, None),
        };
        BusSpeed {
            nominal_speed,
            nominal_sample_point,
            data_speed,
            data_sample_point,
        }
    }
}

/// Resolves a bit-rate descriptor into controller timing.
///
/// Index descriptors look up the fixed table; out-of-table indexes fail.
/// Register descriptors are validated against the controller limits. When
/// `fd_enabled` is false the data segment is ignored.
pub fn resolve(descriptor: BitrateDescriptor, fd_enabled: bool) -> Result<ControllerTiming> {
    match descriptor {
        BitrateDescriptor::Index(index) => {
            let (_, _, btr0btr1) = *INDEX_TABLE
                .iter()
                .find(|(i, _, _)| *i == index)
                .ok_or(Error::IllegalBitrate)?;
            Ok(ControllerTiming {
                frequency: SJA1000_FREQUENCY,
                nominal: sja1000_to_timing(btr0btr1),
                data: None,
                index: Some(index),
            })
        }
        BitrateDescriptor::Register {
            frequency,
            nominal,
            data,
        } => {
            if frequency <= 0 {
                return Err(Error::IllegalBitrate);
            }
            check_nominal(&nominal)?;
            let data = if fd_enabled {
                if let Some(ref d) = data {
                    check_data(d)?;
                }
                data
            } else {
                None
            };
            Ok(ControllerTiming {
                frequency,
                nominal,
                data,
                index: None,
            })
        }
    }
}

fn check_nominal(t: &NominalTiming) -> Result<()> {
    if t.brp == 0
        || t.brp > NOMINAL_BRP_MAX
        || t.tseg1 == 0
        || t.tseg1 > NOMINAL_TSEG1_MAX
        || t.tseg2 == 0
        || t.tseg2 > NOMINAL_TSEG2_MAX
        || t.sjw == 0
        || t.sjw > NOMINAL_SJW_MAX
        || t.sjw > t.tseg2
        || t.sam > 1
    {
        return Err(Error::IllegalBitrate);
    }
    Ok(())
}

fn check_data(t: &DataTiming) -> Result<()> {
    if t.brp == 0
        || t.brp > DATA_BRP_MAX
        || t.tseg1 == 0
        || t.tseg1 > DATA_TSEG1_MAX
        || t.tseg2 == 0
        || t.tseg2 > DATA_TSEG2_MAX
        || t.sjw == 0
        || t.sjw > DATA_SJW_MAX
        || t.sjw > t.tseg2
    {
        return Err(Error::IllegalBitrate);
    }
    Ok(())
}

/// Unpacks an SJA1000 BTR0/BTR1 register pair into nominal timing.
///
/// Register fields store each value minus one: BTR0 = SJW[7:6] BRP[5:0],
/// BTR1 = SAM[7] TSEG2[6:4] TSEG1[3:0].
pub fn sja1000_to_timing(btr0btr1: u16) -> NominalTiming {
    NominalTiming {
        sjw: ((btr0btr1 & 0xC000) >> 14) + 1,
        brp: ((btr0btr1 & 0x3F00) >> 8) + 1,
        sam: ((btr0btr1 & 0x0080) >> 7) as u8,
        tseg2: ((btr0btr1 & 0x0070) >> 4) + 1,
        tseg1: (btr0btr1 & 0x000F) + 1,
    }
}

/// Packs a resolved timing into the SJA1000 BTR0/BTR1 register pair.
///
/// Fails when the timing does not fit the SJA1000 field widths or the
/// clock is not the 8 MHz SJA1000 domain.
pub fn timing_to_sja1000(timing: &ControllerTiming) -> Result<u16> {
    let t = &timing.nominal;
    if timing.frequency != SJA1000_FREQUENCY
        || t.brp > SJA1000_BRP_MAX
        || t.tseg1 > SJA1000_TSEG1_MAX
        || t.tseg2 > SJA1000_TSEG2_MAX
        || t.sjw > SJA1000_SJW_MAX
    {
        return Err(Error::IllegalBitrate);
    }
    Ok(((t.sjw - 1) << 14)
        | ((t.brp - 1) << 8)
        | ((t.sam as u16) << 7)
        | ((t.tseg2 - 1) << 4)
        | (t.tseg1 - 1))
}

/// Finds the predefined index closest to the resolved nominal bit-rate.
///
/// Logs a warning when the match is not exact. Used for adapters that
/// only expose the fixed rate commands.
pub fn nearest_index(timing: &ControllerTiming) -> i32 {
    if let Some(index) = timing.index {
        return index;
    }
    let bitrate = timing.nominal_bitrate();
    let (index, table_rate, _) = INDEX_TABLE
        .iter()
        .min_by_key(|(_, rate, _)| rate.abs_diff(bitrate))
        .copied()
        .unwrap();
    if table_rate != bitrate {
        warn!(
            "no exact wire rate for {} bit/s, falling back to {} bit/s",
            bitrate, table_rate
        );
    }
    index
}

/// The bit-rate of a predefined index, in bit/s.
pub fn index_bitrate(index: i32) -> Result<u32> {
    INDEX_TABLE
        .iter()
        .find(|(i, _, _)| *i == index)
        .map(|(_, rate, _)| *rate)
        .ok_or(Error::IllegalBitrate)
}

/// The wire digit of a predefined index (`S0` = 10 kbit/s … `S8` = 1 Mbit/s).
///
/// The wire numbering runs opposite to the index numbering.
pub fn index_wire_digit(index: i32) -> Result<u8> {
    if !(INDEX_10K..=INDEX_1M).contains(&index) {
        return Err(Error::IllegalBitrate);
    }
    Ok((8 + index) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_table_resolves_to_sja1000_timing() {
        let timing = resolve(BitrateDescriptor::Index(INDEX_1M), false).unwrap();
        assert_eq!(timing.frequency, SJA1000_FREQUENCY);
        assert_eq!(timing.nominal.brp, 1);
        assert_eq!(timing.nominal.tseg1, 5);
        assert_eq!(timing.nominal.tseg2, 2);
        assert_eq!(timing.nominal_bitrate(), 1_000_000);

        let timing = resolve(BitrateDescriptor::Index(INDEX_250K), false).unwrap();
        assert_eq!(timing.nominal_bitrate(), 250_000);
    }

    #[test]
    fn all_nine_indexes_round_trip_through_the_registers() {
        for (index, rate, btr) in INDEX_TABLE {
            let timing = resolve(BitrateDescriptor::Index(index), false).unwrap();
            assert_eq!(timing.nominal_bitrate(), rate, "index {}", index);
            assert_eq!(timing_to_sja1000(&timing).unwrap(), btr, "index {}", index);
            assert_eq!(index_bitrate(index).unwrap(), rate);
        }
    }

    #[test]
    fn out_of_table_index_is_rejected() {
        assert!(resolve(BitrateDescriptor::Index(1), false).is_err());
        assert!(resolve(BitrateDescriptor::Index(-9), false).is_err());
    }

    #[test]
    fn register_form_is_validated() {
        let good = BitrateDescriptor::Register {
            frequency: 80_000_000,
            nominal: NominalTiming {
                brp: 8,
                tseg1: 15,
                tseg2: 4,
                sjw: 2,
                sam: 0,
            },
            data: None,
        };
        let timing = resolve(good, false).unwrap();
        assert_eq!(timing.nominal_bitrate(), 500_000);

        let zero_seg = BitrateDescriptor::Register {
            frequency: 80_000_000,
            nominal: NominalTiming {
                brp: 8,
                tseg1: 0,
                tseg2: 4,
                sjw: 2,
                sam: 0,
            },
            data: None,
        };
        assert!(matches!(resolve(zero_seg, false), Err(Error::IllegalBitrate)));
    }

    #[test]
    fn data_segment_ignored_without_fd() {
        let descriptor = BitrateDescriptor::Register {
            frequency: 80_000_000,
            nominal: NominalTiming {
                brp: 8,
                tseg1: 15,
                tseg2: 4,
                sjw: 2,
                sam: 0,
            },
            data: Some(DataTiming {
                brp: 2,
                tseg1: 15,
                tseg2: 4,
                sjw: 2,
            }),
        };
        assert!(resolve(descriptor, false).unwrap().data.is_none());
        let timing = resolve(descriptor, true).unwrap();
        assert!(timing.data.is_some());
        let speed = timing.speed();
        assert_eq!(speed.data_speed.unwrap().round() as u32, 2_000_000);
    }

    #[test]
    fn sample_point_of_the_fast_rates() {
        let timing = resolve(BitrateDescriptor::Index(INDEX_1M), false).unwrap();
        assert!((timing.speed().nominal_sample_point - 75.0).abs() < 0.1);
        let timing = resolve(BitrateDescriptor::Index(INDEX_500K), false).unwrap();
        assert!((timing.speed().nominal_sample_point - 87.5).abs() < 0.1);
    }

    #[test]
    fn nearest_index_fallback_rounds_to_the_table() {
        // 480 kbit/s register setting: nearest table rate is 500 kbit/s
        let timing = resolve(
            BitrateDescriptor::Register {
                frequency: 48_000_000,
                nominal: NominalTiming {
                    brp: 10,
                    tseg1: 7,
                    tseg2: 2,
                    sjw: 1,
                    sam: 0,
                },
                data: None,
            },
            false,
        )
        .unwrap();
        assert_eq!(timing.nominal_bitrate(), 480_000);
        assert_eq!(nearest_index(&timing), INDEX_500K);
    }

    #[test]
    fn wire_digit_numbering_is_reversed() {
        assert_eq!(index_wire_digit(INDEX_1M).unwrap(), 8);
        assert_eq!(index_wire_digit(INDEX_250K).unwrap(), 5);
        assert_eq!(index_wire_digit(INDEX_10K).unwrap(), 0);
        assert!(index_wire_digit(1).is_err());
    }
}
