// Licensed under the Apache-2.0 license

//! MMIO back-end of the AVR Dx SPI peripheral.

use crate::spi::{SpiRegister, SpiRegisters};
use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// An SPI peripheral instance.
pub trait Instance {
    const BASE: usize;
    const NAME: &'static str;
}

macro_rules! spi_instances {
    ($($index:literal => $base:literal),* $(,)?) => {
        paste::paste! {
            $(
                #[doc = concat!("SPI", $index, " at `", stringify!($base), "`.")]
                pub struct [<Spi $index>];

                impl Instance for [<Spi $index>] {
                    const BASE: usize = $base;
                    const NAME: &'static str = concat!("SPI", $index);
                }
            )*
        }
    };
}

spi_instances!(0 => 0x0940, 1 => 0x0960);

pub struct DxSpi<I: Instance> {
    _instance: PhantomData<I>,
}

impl<I: Instance> DxSpi<I> {
    /// # Safety
    ///
    /// At most one handle per instance may exist, and nothing else may touch
    /// the instance's registers while it lives.
    #[must_use]
    pub unsafe fn steal() -> Self {
        Self {
            _instance: PhantomData,
        }
    }

    fn address(register: SpiRegister) -> usize {
        I::BASE + register as usize
    }
}

impl<I: Instance> SpiRegisters for DxSpi<I> {
    fn read(&mut self, register: SpiRegister) -> u8 {
        // SAFETY: inside the instance's register block; exclusive per `steal`.
        unsafe { read_volatile(Self::address(register) as *const u8) }
    }

    fn write(&mut self, register: SpiRegister, value: u8) {
        // SAFETY: as in `read`.
        unsafe { write_volatile(Self::address(register) as *mut u8, value) }
    }
}
