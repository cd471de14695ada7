// Licensed under the Apache-2.0 license

//! embedded-hal front end for any [`I2cMaster`].
//!
//! Device drivers written against [`embedded_hal::i2c::I2c`] run unchanged on
//! top of [`TwiMaster`](crate::i2c::twi::TwiMaster). Failures are reported to
//! the controller's logger before they are handed back.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::traits::I2cMaster;
use embedded_hal::i2c::{Operation, SevenBitAddress};

pub struct I2cController<H: I2cMaster, L: Logger = NoOpLogger> {
    pub hardware: H,
    pub logger: L,
}

impl<H: I2cMaster, L: Logger> I2cController<H, L> {
    pub fn new(hardware: H, logger: L) -> Self {
        Self { hardware, logger }
    }

    pub fn into_inner(self) -> H {
        self.hardware
    }

    fn report<T>(&mut self, op: &str, addr: SevenBitAddress, result: Result<T, H::Error>) -> Result<T, H::Error> {
        if let Err(e) = &result {
            self.logger
                .error(format_args!("i2c: {} 0x{:02x}: {:?}", op, addr, e));
        }
        result
    }
}

impl<H: I2cMaster, L: Logger> embedded_hal::i2c::ErrorType for I2cController<H, L> {
    type Error = H::Error;
}

impl<H: I2cMaster, L: Logger> embedded_hal::i2c::I2c for I2cController<H, L> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let result = self.hardware.read(addr, buffer);
        self.report("read", addr, result)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        let result = self.hardware.write(addr, bytes);
        self.report("write", addr, result)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        let result = self.hardware.write_read(addr, bytes, buffer);
        self.report("write_read", addr, result)
    }

    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let result = self.hardware.transaction_slice(addr, operations);
        self.report("transaction", addr, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::common::{Error, I2cConfigBuilder};
    use crate::i2c::sim::{SimTarget, SimTwi};
    use crate::i2c::twi::TwiMaster;
    use embedded_hal::i2c::{I2c, NoAcknowledgeSource};

    struct CountingLogger {
        errors: usize,
    }

    impl Logger for CountingLogger {
        fn debug(&mut self, _args: core::fmt::Arguments<'_>) {}
        fn error(&mut self, _args: core::fmt::Arguments<'_>) {
            self.errors += 1;
        }
    }

    /// A typical device driver: write the register index, read its value.
    fn read_register<I: I2c>(bus: &mut I, address: u8, register: u8) -> Result<u8, I::Error> {
        let mut value = [0u8; 1];
        bus.write_read(address, &[register], &mut value)?;
        Ok(value[0])
    }

    fn controller() -> I2cController<TwiMaster<SimTwi>, CountingLogger> {
        let mut sim = SimTwi::new();
        sim.attach(SimTarget::registers(0x48));
        let twi = TwiMaster::init(sim, I2cConfigBuilder::new().poll_limit(32).build(), NoOpLogger).unwrap();
        I2cController::new(twi, CountingLogger { errors: 0 })
    }

    #[test]
    fn test_device_driver_through_embedded_hal() {
        let mut bus = controller();
        bus.write(0x48, &[0x07, 0x3c]).unwrap();
        assert_eq!(read_register(&mut bus, 0x48, 0x07), Ok(0x3c));
        assert_eq!(bus.logger.errors, 0);
    }

    #[test]
    fn test_transaction_delegates() {
        let mut bus = controller();
        let mut value = [0u8; 2];
        bus.transaction(
            0x48,
            &mut [
                Operation::Write(&[0x10, 0xaa, 0xbb]),
            ],
        )
        .unwrap();
        bus.transaction(0x48, &mut [Operation::Write(&[0x10]), Operation::Read(&mut value)])
            .unwrap();
        assert_eq!(value, [0xaa, 0xbb]);
    }

    #[test]
    fn test_errors_are_logged_and_returned() {
        let mut bus = controller();
        assert_eq!(
            read_register(&mut bus, 0x49, 0x00),
            Err(Error::NoAcknowledge(NoAcknowledgeSource::Address))
        );
        assert_eq!(bus.read(0x80, &mut [0u8; 1]), Err(Error::AddressOutOfRange));
        assert_eq!(bus.logger.errors, 2);

        let twi = bus.into_inner();
        assert_eq!(twi.registers().events().last(), Some(&crate::i2c::sim::BusEvent::Stop));
    }
}
