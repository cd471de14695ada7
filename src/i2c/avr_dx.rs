// Licensed under the Apache-2.0 license

//! Register map and MMIO back-end of the AVR Dx TWI master.
//!
//! Offsets and bit positions follow the AVR128DB48 data sheet. Only the
//! host-side registers are modelled; the client (slave) half is never touched.

use crate::i2c::traits::TwiRegisters;
use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// TWI register offsets from the peripheral base address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Ctrla = 0x00,
    Dualctrl = 0x01,
    Dbgctrl = 0x02,
    Mctrla = 0x03,
    Mctrlb = 0x04,
    Mstatus = 0x05,
    Mbaud = 0x06,
    Maddr = 0x07,
    Mdata = 0x08,
}

pub const DBGCTRL_DBGRUN: u8 = 0x01;

pub const MCTRLA_ENABLE: u8 = 0x01;
pub const MCTRLA_TIMEOUT_SHIFT: u8 = 2;

pub const MCTRLB_MCMD_MASK: u8 = 0x03;
pub const MCMD_NOACT: u8 = 0x00;
pub const MCMD_REPSTART: u8 = 0x01;
pub const MCMD_RECVTRANS: u8 = 0x02;
pub const MCMD_STOP: u8 = 0x03;
/// Set: answer the next received byte with NACK.
pub const MCTRLB_ACKACT_NACK: u8 = 0x04;
pub const MCTRLB_FLUSH: u8 = 0x08;

pub const MSTATUS_RIF: u8 = 0x80;
pub const MSTATUS_WIF: u8 = 0x40;
pub const MSTATUS_CLKHOLD: u8 = 0x20;
/// Set: the last address or data byte was not acknowledged.
pub const MSTATUS_RXACK: u8 = 0x10;
pub const MSTATUS_ARBLOST: u8 = 0x08;
pub const MSTATUS_BUSERR: u8 = 0x04;
pub const MSTATUS_BUSSTATE_MASK: u8 = 0x03;
/// Write-one-to-clear flags.
pub const MSTATUS_FLAGS: u8 = MSTATUS_RIF | MSTATUS_WIF | MSTATUS_ARBLOST | MSTATUS_BUSERR;

/// Decoded BUSSTATE field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    Unknown = 0,
    Idle = 1,
    Owner = 2,
    Busy = 3,
}

impl BusState {
    #[must_use]
    pub fn from_status(status: u8) -> Self {
        match status & MSTATUS_BUSSTATE_MASK {
            0 => BusState::Unknown,
            1 => BusState::Idle,
            2 => BusState::Owner,
            _ => BusState::Busy,
        }
    }
}

/// A TWI peripheral instance.
pub trait Instance {
    const BASE: usize;
    const NAME: &'static str;
}

macro_rules! twi_instances {
    ($($index:literal => $base:literal),* $(,)?) => {
        paste::paste! {
            $(
                #[doc = concat!("TWI", $index, " at `", stringify!($base), "`.")]
                pub struct [<Twi $index>];

                impl Instance for [<Twi $index>] {
                    const BASE: usize = $base;
                    const NAME: &'static str = concat!("TWI", $index);
                }
            )*
        }
    };
}

twi_instances!(0 => 0x0900, 1 => 0x0920);

/// Memory-mapped TWI register block.
pub struct DxTwi<I: Instance> {
    _instance: PhantomData<I>,
}

impl<I: Instance> DxTwi<I> {
    /// Create a handle to the peripheral's registers.
    ///
    /// # Safety
    ///
    /// The caller must hand out at most one handle per instance and must not
    /// access the same registers through any other path while it lives.
    #[must_use]
    pub unsafe fn steal() -> Self {
        Self {
            _instance: PhantomData,
        }
    }

    fn address(register: Register) -> usize {
        I::BASE + register as usize
    }
}

impl<I: Instance> TwiRegisters for DxTwi<I> {
    fn read(&mut self, register: Register) -> u8 {
        // SAFETY: the address lies inside the instance's register block and
        // `steal` guarantees exclusive access.
        unsafe { read_volatile(Self::address(register) as *const u8) }
    }

    fn write(&mut self, register: Register, value: u8) {
        // SAFETY: as in `read`.
        unsafe { write_volatile(Self::address(register) as *mut u8, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances() {
        assert_eq!(Twi0::BASE, 0x0900);
        assert_eq!(Twi1::BASE, 0x0920);
        assert_eq!(Twi0::NAME, "TWI0");
        assert_eq!(DxTwi::<Twi1>::address(Register::Mdata), 0x0928);
    }

    #[test]
    fn test_bus_state_decoding() {
        assert_eq!(BusState::from_status(0x00), BusState::Unknown);
        assert_eq!(BusState::from_status(MSTATUS_RIF | 0x01), BusState::Idle);
        assert_eq!(BusState::from_status(MSTATUS_WIF | MSTATUS_RXACK | 0x02), BusState::Owner);
        assert_eq!(BusState::from_status(0x03), BusState::Busy);
    }
}
