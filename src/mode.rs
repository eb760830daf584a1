// serialcan/src/mode.rs
//
// Implements the CAN controller operation mode register.
//
// This file is part of the Rust 'serialcan-rs' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Operation mode of a CAN channel.
//!
//! The mode is an 8-bit flag register selected once at channel
//! initialization and validated against the capability of the adapter
//! dialect. Bit positions are fixed by the wire-compatible register
//! layout; [`OperationMode::as_byte`] exposes the exact-width raw form.

use crate::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// The operation mode register, one flag per bit, positions fixed.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OperationMode: u8 {
        /// Monitor mode (listen-only, no acknowledgement).
        const MON = 0x01;
        /// Reception of error frames enabled.
        const ERR = 0x02;
        /// Remote frames disabled.
        const NRTR = 0x04;
        /// Extended format disabled (11-bit identifiers only).
        const NXTD = 0x08;
        /// Shared access to the adapter enabled.
        const SHRD = 0x10;
        /// Non-ISO CAN FD operation.
        const NISO = 0x20;
        /// Bit-rate switching enabled (requires [`Self::FDOE`]).
        const BRSE = 0x40;
        /// CAN FD operation enabled.
        const FDOE = 0x80;
    }
}

impl OperationMode {
    /// The default CAN 2.0 operation mode: all flags cleared.
    pub const DEFAULT: OperationMode = OperationMode::empty();

    /// The exact-width raw register value.
    pub fn as_byte(self) -> u8 {
        self.bits()
    }

    /// Checks the internal consistency of the mode flags.
    pub fn validate(self) -> Result<()> {
        if self.contains(OperationMode::BRSE) && !self.contains(OperationMode::FDOE) {
            return Err(Error::IllegalParameter);
        }
        Ok(())
    }

    /// Checks this mode against a capability set, e.g. the one reported
    /// by an adapter dialect.
    pub fn check_capability(self, capability: OperationMode) -> Result<()> {
        self.validate()?;
        if self.intersects(!capability) {
            return Err(Error::NotSupported);
        }
        Ok(())
    }

    /// Whether CAN FD operation is enabled.
    pub fn fd_enabled(self) -> bool {
        self.contains(OperationMode::FDOE)
    }
}
