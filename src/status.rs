// serialcan/src/status.rs
//
// Implements the CAN controller status register and its aggregation.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Channel status reporting.
//!
//! The [`StatusRegister`] is derived, never stored: each query recomputes
//! it from three sources with different lifetimes.
//!
//! - *Live* bits reflect the current controller condition and stay set on
//!   every query until the condition clears: bus-off, warning level, bus
//!   error, controller stopped.
//! - *Latched* bits answer "did this happen since the last query" and
//!   clear once read: queue overrun, message lost.
//! - *Computed* bits are evaluated at query time: receiver empty,
//!   transmitter busy (the outcome of the most recent write).

use crate::LineError;
use bitflags::bitflags;
use std::sync::Mutex;

bitflags! {
    /// The status register, one flag per bit, positions fixed.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusRegister: u8 {
        /// The event queue overran.
        const QUEUE_OVERRUN = 0x01;
        /// At least one message was lost.
        const MESSAGE_LOST = 0x02;
        /// No message waiting in the reception queue.
        const RECEIVER_EMPTY = 0x04;
        /// The transmitter did not accept the last frame in time.
        const TRANSMITTER_BUSY = 0x08;
        /// Bus error (last error code set).
        const BUS_ERROR = 0x10;
        /// The error warning level was reached.
        const WARNING_LEVEL = 0x20;
        /// The controller is bus-off.
        const BUS_OFF = 0x40;
        /// The controller is stopped.
        const CAN_STOPPED = 0x80;
    }
}

impl StatusRegister {
    /// The exact-width raw register value.
    pub fn as_byte(self) -> u8 {
        self.bits()
    }
}

/// The live bus condition as last reported by the adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusCondition {
    /// Controller is bus-off.
    pub bus_off: bool,
    /// Error warning level reached.
    pub warning_level: bool,
    /// A bus error is pending, optionally classified.
    pub bus_error: Option<LineError>,
    /// Set when any bus error (classified or not) is present.
    pub bus_error_flag: bool,
}

#[derive(Debug, Default)]
struct AggregatorState {
    condition: BusCondition,
    stopped: bool,
    tx_busy: bool,
    // latched until the next compute()
    queue_overrun: bool,
    message_lost: bool,
    dropped_lines: u64,
}

/// Merges controller condition, queue conditions and transmitter state
/// into one [`StatusRegister`].
///
/// Shared between the transport reader loop and caller threads; all
/// mutation is synchronized internally.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    state: Mutex<AggregatorState>,
}

impl StatusAggregator {
    /// Creates an aggregator for a freshly initialized channel
    /// (controller stopped).
    pub fn new() -> Self {
        let agg = Self::default();
        agg.state.lock().unwrap().stopped = true;
        agg
    }

    /// Records the bus condition decoded from an adapter status report.
    pub fn note_bus_condition(&self, condition: BusCondition) {
        self.state.lock().unwrap().condition = condition;
    }

    /// Records whether the controller is stopped.
    pub fn note_stopped(&self, stopped: bool) {
        let mut state = self.state.lock().unwrap();
        state.stopped = stopped;
        if stopped {
            // a stopped controller reports no bus condition
            state.condition = BusCondition::default();
        }
    }

    /// Latches a queue overrun.
    pub fn note_queue_overrun(&self) {
        self.state.lock().unwrap().queue_overrun = true;
    }

    /// Latches a lost message.
    pub fn note_message_lost(&self) {
        self.state.lock().unwrap().message_lost = true;
    }

    /// Records the outcome of the most recent write.
    pub fn note_tx_outcome(&self, busy: bool) {
        self.state.lock().unwrap().tx_busy = busy;
    }

    /// Counts a malformed wire line that was dropped.
    pub fn note_dropped_line(&self) {
        self.state.lock().unwrap().dropped_lines += 1;
    }

    /// The number of malformed wire lines dropped so far.
    pub fn dropped_lines(&self) -> u64 {
        self.state.lock().unwrap().dropped_lines
    }

    /// The live bus condition, for error classification on reads.
    pub fn bus_condition(&self) -> BusCondition {
        self.state.lock().unwrap().condition
    }

    /// Computes the status register and clears the latched bits.
    pub fn compute(&self, queue_empty: bool) -> StatusRegister {
        let mut state = self.state.lock().unwrap();
        let mut reg = StatusRegister::empty();
        reg.set(StatusRegister::QUEUE_OVERRUN, state.queue_overrun);
        reg.set(StatusRegister::MESSAGE_LOST, state.message_lost);
        reg.set(StatusRegister::RECEIVER_EMPTY, queue_empty);
        reg.set(StatusRegister::TRANSMITTER_BUSY, state.tx_busy);
        reg.set(
            StatusRegister::BUS_ERROR,
            state.condition.bus_error_flag || state.condition.bus_error.is_some(),
        );
        reg.set(StatusRegister::WARNING_LEVEL, state.condition.warning_level);
        reg.set(StatusRegister::BUS_OFF, state.condition.bus_off);
        reg.set(StatusRegister::CAN_STOPPED, state.stopped);
        // one-shot flags are consumed by the query
        state.queue_overrun = false;
        state.message_lost = false;
        reg
    }

    /// Resets all state for a controller restart; counters and latched
    /// flags are cleared.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        *state = AggregatorState::default();
    }
}
