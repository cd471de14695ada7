// Licensed under the Apache-2.0 license

//! Polled SPI master.
//!
//! [`SpiMaster`] drives the AVR Dx SPI peripheral in host mode, one byte at a
//! time, and implements [`embedded_hal::spi::SpiBus`]. Chip select is left to
//! the caller: slave-select sensing is disabled so the SS pin can be used as
//! an ordinary output.

pub mod avr_dx;

use embedded_hal::spi::{ErrorKind, ErrorType, SpiBus};

/// SPI register offsets from the peripheral base address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpiRegister {
    Ctrla = 0x00,
    Ctrlb = 0x01,
    Intctrl = 0x02,
    Intflags = 0x03,
    Data = 0x04,
}

pub const CTRLA_ENABLE: u8 = 0x01;
pub const CTRLA_PRESC_SHIFT: u8 = 1;
pub const CTRLA_CLK2X: u8 = 0x10;
pub const CTRLA_MASTER: u8 = 0x20;
pub const CTRLA_DORD_LSB: u8 = 0x40;
/// Slave select disable: the SS pin does not demote the host.
pub const CTRLB_SSD: u8 = 0x04;
pub const CTRLB_MODE_MASK: u8 = 0x03;
pub const INTFLAGS_IF: u8 = 0x80;
/// DATA was written while a byte was still shifting.
pub const INTFLAGS_WRCOL: u8 = 0x40;

/// Byte-wide access to one SPI register block.
pub trait SpiRegisters {
    fn read(&mut self, register: SpiRegister) -> u8;
    fn write(&mut self, register: SpiRegister, value: u8);
}

impl<T: SpiRegisters + ?Sized> SpiRegisters for &mut T {
    fn read(&mut self, register: SpiRegister) -> u8 {
        (**self).read(register)
    }

    fn write(&mut self, register: SpiRegister, value: u8) {
        (**self).write(register, value);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiError {
    /// The transfer-complete flag never rose within the poll budget.
    Timeout,
    /// DATA was written before the previous byte finished; the byte in
    /// flight was corrupted.
    WriteCollision,
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Peripheral clock divider.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Prescaler {
    Div4 = 0,
    Div16 = 1,
    Div64 = 2,
    Div128 = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpiConfig {
    pub prescaler: Prescaler,
    pub double_speed: bool,
    pub lsb_first: bool,
    /// Clock polarity and phase, 0..=3.
    pub mode: u8,
    /// Status polls allowed per byte.
    pub poll_limit: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            prescaler: Prescaler::Div4,
            double_speed: false,
            lsb_first: false,
            mode: 0,
            poll_limit: crate::i2c::common::DEFAULT_POLL_LIMIT,
        }
    }
}

pub struct SpiMaster<R: SpiRegisters> {
    registers: R,
    poll_limit: u32,
}

impl<R: SpiRegisters> SpiMaster<R> {
    /// Enable the peripheral as host with slave-select sensing off.
    pub fn new(mut registers: R, config: SpiConfig) -> Self {
        let mut ctrla = CTRLA_ENABLE | CTRLA_MASTER | ((config.prescaler as u8) << CTRLA_PRESC_SHIFT);
        if config.double_speed {
            ctrla |= CTRLA_CLK2X;
        }
        if config.lsb_first {
            ctrla |= CTRLA_DORD_LSB;
        }
        registers.write(SpiRegister::Ctrlb, CTRLB_SSD | (config.mode & CTRLB_MODE_MASK));
        registers.write(SpiRegister::Ctrla, ctrla);
        Self {
            registers,
            poll_limit: config.poll_limit.max(1),
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub fn free(self) -> R {
        self.registers
    }

    fn wait_complete(&mut self) -> nb::Result<(), SpiError> {
        let flags = self.registers.read(SpiRegister::Intflags);
        if flags & INTFLAGS_IF == 0 {
            Err(nb::Error::WouldBlock)
        } else if flags & INTFLAGS_WRCOL != 0 {
            Err(nb::Error::Other(SpiError::WriteCollision))
        } else {
            Ok(())
        }
    }

    /// Shift one byte out and return the byte shifted in.
    pub fn exchange(&mut self, byte: u8) -> Result<u8, SpiError> {
        self.registers.write(SpiRegister::Data, byte);
        for _ in 0..self.poll_limit {
            match self.wait_complete() {
                // Reading DATA after the flag clears it.
                Ok(()) => return Ok(self.registers.read(SpiRegister::Data)),
                Err(nb::Error::WouldBlock) => core::hint::spin_loop(),
                Err(nb::Error::Other(e)) => {
                    // Clears IF and WRCOL so the next exchange starts clean.
                    self.registers.read(SpiRegister::Data);
                    return Err(e);
                }
            }
        }
        Err(SpiError::Timeout)
    }
}

impl<R: SpiRegisters> ErrorType for SpiMaster<R> {
    type Error = SpiError;
}

impl<R: SpiRegisters> SpiBus<u8> for SpiMaster<R> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.exchange(0x00)?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &word in words {
            self.exchange(word)?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let len = read.len().max(write.len());
        for index in 0..len {
            let received = self.exchange(write.get(index).copied().unwrap_or(0x00))?;
            if let Some(slot) = read.get_mut(index) {
                *slot = received;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words.iter_mut() {
            *word = self.exchange(*word)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        // Every exchange already waited for its byte to finish.
        Ok(())
    }
}
