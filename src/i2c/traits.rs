// Licensed under the Apache-2.0 license

//! # TWI Hardware Abstraction Traits
//!
//! Three layers, each with one responsibility:
//!
//! ```text
//! TwiRegisters      raw register access (MMIO block or simulation)
//!     └── TwiMaster (crate::i2c::twi) drives the protocol over it
//!             └── I2cHardwareCore + I2cMaster (bus-level operations)
//!                     └── I2cController (embedded-hal front end)
//! ```
//!
//! Keeping register access behind [`TwiRegisters`] is what lets the protocol
//! engine run unchanged against the simulated controller in tests.

use crate::i2c::avr_dx::Register;
use embedded_hal::i2c::{AddressMode, Operation, SevenBitAddress};
use fugit::HertzU32;

/// Byte-wide access to one TWI register block.
///
/// Reads take `&mut self`: reading MDATA or MSTATUS has side effects on the
/// peripheral.
pub trait TwiRegisters {
    fn read(&mut self, register: Register) -> u8;
    fn write(&mut self, register: Register, value: u8);

    /// Read-modify-write helper.
    fn modify(&mut self, register: Register, f: impl FnOnce(u8) -> u8) {
        let value = self.read(register);
        self.write(register, f(value));
    }
}

impl<T: TwiRegisters + ?Sized> TwiRegisters for &mut T {
    fn read(&mut self, register: Register) -> u8 {
        (**self).read(register)
    }

    fn write(&mut self, register: Register, value: u8) {
        (**self).write(register, value);
    }
}

/// Bus-level operations every master controller provides.
pub trait I2cHardwareCore {
    /// Hardware-specific error type that implements embedded-hal error traits
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// SCL frequency programmed at initialization.
    fn bus_frequency(&self) -> HertzU32;

    /// Release the bus after a failed or abandoned transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus still does not read idle afterwards, for
    /// example because a target keeps a line low.
    fn recover_bus(&mut self) -> Result<(), Self::Error>;
}

/// I2C Master mode operations
///
/// All operations are blocking and bounded: they either complete with a stop
/// condition or fail after releasing the bus.
pub trait I2cMaster<A: AddressMode = SevenBitAddress>: I2cHardwareCore {
    /// Write `bytes` to the target at `addr`, then stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not acknowledge, a wait runs out of
    /// budget, or the request does not fit the transfer limits.
    fn write(&mut self, addr: A, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Fill `buffer` from the target at `addr`, then stop.
    ///
    /// # Errors
    ///
    /// As for [`I2cMaster::write`].
    fn read(&mut self, addr: A, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write, repeated start, read; the bus is not released in between.
    ///
    /// # Errors
    ///
    /// As for [`I2cMaster::write`], for either phase.
    fn write_read(&mut self, addr: A, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Execute a sequence of operations as one bus transaction.
    ///
    /// Adjacent operations of the same kind are merged, a change of direction
    /// emits a repeated start, and the last operation ends with a stop.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the bus is released before returning.
    fn transaction_slice(
        &mut self,
        addr: A,
        ops_slice: &mut [Operation<'_>],
    ) -> Result<(), Self::Error>;
}
