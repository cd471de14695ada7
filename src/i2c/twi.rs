// Licensed under the Apache-2.0 license

//! Blocking TWI bus-master driver.
//!
//! [`TwiMaster`] turns packet requests into the register sequence of the AVR Dx
//! TWI host: bus-idle gate, address phase, per-byte handshake and stop
//! condition. Every wait polls MSTATUS at most `poll_limit` times; an
//! exhausted wait releases the bus before the error is returned, so one
//! unresponsive target can never wedge later transfers.
//!
//! The driver keeps no shadow copy of the bus state. What it knows about the
//! bus it reads from MSTATUS at the moment it needs it.
//!
//! # Example
//!
//! ```no_run
//! use pth_ddk::common::NoOpLogger;
//! use pth_ddk::i2c::avr_dx::{DxTwi, Twi0};
//! use pth_ddk::i2c::common::I2cConfigBuilder;
//! use pth_ddk::i2c::packet::{StatusCode, WritePacket};
//! use pth_ddk::i2c::twi::TwiMaster;
//!
//! let registers = unsafe { DxTwi::<Twi0>::steal() };
//! let mut twi = TwiMaster::init(registers, I2cConfigBuilder::new().build(), NoOpLogger).unwrap();
//!
//! // Point the sensor at register 0xE3, then read two bytes back.
//! let mut reading = [0u8; 2];
//! let pending = twi.write_packet_no_stop(WritePacket::new(0x40, &[0xe3])).unwrap();
//! let status = StatusCode::from(pending.read(0x40, &mut reading));
//! assert_eq!(status, StatusCode::Ok);
//! ```

use crate::common::{Logger, NoOpLogger};
use crate::i2c::avr_dx::{
    BusState, Register, DBGCTRL_DBGRUN, MCMD_NOACT, MCMD_RECVTRANS, MCMD_STOP, MCTRLA_ENABLE,
    MCTRLA_TIMEOUT_SHIFT, MCTRLB_ACKACT_NACK, MCTRLB_FLUSH, MSTATUS_ARBLOST, MSTATUS_BUSERR,
    MSTATUS_FLAGS, MSTATUS_RIF, MSTATUS_RXACK, MSTATUS_WIF,
};
use crate::i2c::common::{ConfigurationError, Error, I2cConfig, WaitStage};
use crate::i2c::packet::{
    Packet, StatusCode, TransferDirection, WritePacket, MAX_ADDRESS, MAX_DATA_LENGTH,
};
use crate::i2c::traits::{I2cHardwareCore, I2cMaster, TwiRegisters};
use embedded_hal::i2c::{NoAcknowledgeSource, Operation, SevenBitAddress};
use fugit::HertzU32;

/// How a transfer acquires the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Start {
    /// Pass the idle gate, then emit a start condition.
    Fresh,
    /// The bus is already held by an open transaction: emit a repeated start.
    Repeated,
}

fn checked_target(address: u16, length: usize) -> Result<u8, Error> {
    if length > usize::from(MAX_DATA_LENGTH) {
        return Err(Error::Overflow);
    }
    match u8::try_from(address) {
        Ok(address) if u16::from(address) <= MAX_ADDRESS => Ok(address),
        _ => Err(Error::AddressOutOfRange),
    }
}

fn checked_request(address: u16, data_length: u16, buffer: Option<usize>) -> Result<u8, Error> {
    let address = checked_target(address, usize::from(data_length))?;
    if buffer.is_some_and(|len| len < usize::from(data_length)) {
        return Err(Error::Overflow);
    }
    Ok(address)
}

fn checked_packet(packet: &Packet<'_>) -> Result<u8, Error> {
    checked_request(packet.address, packet.data_length, packet.data.as_deref().map(<[u8]>::len))
}

fn checked_write(packet: &WritePacket<'_>) -> Result<u8, Error> {
    checked_request(packet.address, packet.data_length, packet.data.map(<[u8]>::len))
}

/// Buffer a read packet fills; nothing for a probe.
fn read_buffer<'b>(packet: &'b mut Packet<'_>) -> &'b mut [u8] {
    if packet.is_probe() {
        return &mut [];
    }
    packet.payload_mut().unwrap_or(&mut [])
}

/// Bytes a write packet sends; nothing for a probe.
fn write_bytes<'b>(packet: &WritePacket<'b>) -> &'b [u8] {
    if packet.is_probe() {
        return &[];
    }
    packet.payload().unwrap_or(&[])
}

fn check_faults(status: u8) -> Result<(), Error> {
    if status & MSTATUS_ARBLOST != 0 {
        Err(Error::ArbitrationLost)
    } else if status & MSTATUS_BUSERR != 0 {
        Err(Error::BusError)
    } else {
        Ok(())
    }
}

fn bus_idle(status: u8) -> nb::Result<(), Error> {
    if BusState::from_status(status) == BusState::Idle {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

/// RIF or WIF. The peripheral raises WIF instead of RIF for a refused read
/// address and for bus faults, so reads must accept either.
fn transfer_flag(status: u8) -> nb::Result<(), Error> {
    if status & (MSTATUS_RIF | MSTATUS_WIF) != 0 {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

fn write_flag(status: u8) -> nb::Result<(), Error> {
    if status & MSTATUS_WIF != 0 {
        Ok(())
    } else {
        Err(nb::Error::WouldBlock)
    }
}

/// Blocking TWI master over a register block `R`.
///
/// Created by [`TwiMaster::init`]; there is no way to issue a transfer on an
/// unconfigured peripheral. The handle is the bus: every operation takes
/// `&mut self`, so only one transfer can be in flight per controller. Callers
/// sharing a controller between threads must wrap it in their own lock.
pub struct TwiMaster<R: TwiRegisters, L: Logger = NoOpLogger> {
    registers: R,
    config: I2cConfig,
    frequency: HertzU32,
    logger: L,
}

impl<R: TwiRegisters, L: Logger> TwiMaster<R, L> {
    /// Configure the peripheral for master operation.
    ///
    /// Programs the smallest baud divisor that keeps SCL at or below
    /// `config.bus_frequency`, enables the master, clears stale flags and
    /// forces the bus state to idle, discarding whatever a previous run left
    /// behind. Must not be called while a transfer is in flight.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the frequency cannot be reached or
    /// the poll budget is zero. The peripheral is left untouched in that case.
    pub fn init(mut registers: R, config: I2cConfig, mut logger: L) -> Result<Self, ConfigurationError> {
        if config.poll_limit == 0 {
            return Err(ConfigurationError::ZeroPollLimit);
        }
        let baud = config.timing.baud_for(config.bus_frequency)?;
        let frequency = config.timing.frequency_for(baud);

        registers.write(Register::Mctrla, 0);
        registers.write(Register::Mbaud, baud);
        registers.modify(Register::Dbgctrl, |value| {
            if config.debug_run {
                value | DBGCTRL_DBGRUN
            } else {
                value & !DBGCTRL_DBGRUN
            }
        });
        registers.write(
            Register::Mctrla,
            MCTRLA_ENABLE | ((config.inactive_timeout as u8) << MCTRLA_TIMEOUT_SHIFT),
        );
        registers.write(Register::Mctrlb, MCTRLB_FLUSH);
        registers.write(Register::Mstatus, MSTATUS_FLAGS | BusState::Idle as u8);

        logger.debug(format_args!(
            "twi: baud {} for {} Hz (target {} Hz)",
            baud,
            frequency.raw(),
            config.bus_frequency.raw()
        ));

        Ok(Self {
            registers,
            config,
            frequency,
            logger,
        })
    }

    #[must_use]
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.registers
    }

    /// Give the register block and logger back.
    pub fn free(self) -> (R, L) {
        (self.registers, self.logger)
    }

    /// Current BUSSTATE as reported by the peripheral.
    pub fn bus_state(&mut self) -> BusState {
        BusState::from_status(self.registers.read(Register::Mstatus))
    }

    // ------------------------------------------------------------------
    // Packet interface
    // ------------------------------------------------------------------

    /// Read `packet.data_length` bytes into `packet.data`.
    ///
    /// A probe packet (no length or no buffer) addresses the target and stops.
    pub fn read_packet(&mut self, packet: &mut Packet<'_>) -> StatusCode {
        let result = checked_packet(packet)
            .and_then(|address| self.transfer_read(Start::Fresh, address, read_buffer(packet)));
        StatusCode::from(result)
    }

    /// Write `packet.data_length` bytes from `packet.data`, then stop.
    ///
    /// Takes a [`WritePacket`] or a borrowed [`Packet`].
    pub fn write_packet<'p>(&mut self, packet: impl Into<WritePacket<'p>>) -> StatusCode {
        let packet = packet.into();
        let result = checked_write(&packet)
            .and_then(|address| self.transfer_write(Start::Fresh, address, write_bytes(&packet), true));
        StatusCode::from(result)
    }

    /// Write without releasing the bus.
    ///
    /// The returned [`OpenTransaction`] holds the controller until the follow-up
    /// transfer is issued on it.
    ///
    /// # Errors
    ///
    /// The failure status; the bus has already been released.
    pub fn write_packet_no_stop<'p>(
        &mut self,
        packet: impl Into<WritePacket<'p>>,
    ) -> Result<OpenTransaction<'_, R, L>, StatusCode> {
        let packet = packet.into();
        let address = checked_write(&packet).map_err(Error::status)?;
        self.transfer_write(Start::Fresh, address, write_bytes(&packet), false)
            .map_err(Error::status)?;
        Ok(OpenTransaction::new(self))
    }

    // ------------------------------------------------------------------
    // Slice interface
    // ------------------------------------------------------------------

    /// Read `buffer.len()` bytes from `address`, then stop.
    ///
    /// # Errors
    ///
    /// See [`Error`]; the bus is released before any error is returned.
    pub fn read(&mut self, address: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Error> {
        let address = checked_target(address.into(), buffer.len())?;
        self.transfer_read(Start::Fresh, address, buffer)
    }

    /// Write `bytes` to `address`, then stop.
    ///
    /// # Errors
    ///
    /// See [`Error`]; the bus is released before any error is returned.
    pub fn write(&mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<(), Error> {
        let address = checked_target(address.into(), bytes.len())?;
        self.transfer_write(Start::Fresh, address, bytes, true)
    }

    /// Write `bytes` to `address` and keep the bus.
    ///
    /// # Errors
    ///
    /// See [`Error`]; the bus is released before any error is returned.
    pub fn write_no_stop(&mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<OpenTransaction<'_, R, L>, Error> {
        let address = checked_target(address.into(), bytes.len())?;
        self.transfer_write(Start::Fresh, address, bytes, false)?;
        Ok(OpenTransaction::new(self))
    }

    // ------------------------------------------------------------------
    // Protocol steps
    // ------------------------------------------------------------------

    fn poll(&mut self, stage: WaitStage, ready: fn(u8) -> nb::Result<(), Error>) -> Result<u8, Error> {
        for _ in 0..self.config.poll_limit {
            let status = self.registers.read(Register::Mstatus);
            match ready(status) {
                Ok(()) => return Ok(status),
                Err(nb::Error::WouldBlock) => core::hint::spin_loop(),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
        Err(Error::Timeout(stage))
    }

    /// Block until BUSSTATE reads idle, within the poll budget.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] with [`WaitStage::BusIdle`]; the peripheral has been
    /// forced back to idle so the next attempt starts clean.
    pub fn wait_bus_idle(&mut self) -> Result<(), Error> {
        self.poll(WaitStage::BusIdle, bus_idle).map(|_| ()).map_err(|e| {
            self.logger.error(format_args!("twi: bus never went idle"));
            self.release_bus();
            e
        })
    }

    /// Address phase: `(address << 1) | direction` into MADDR.
    ///
    /// Issues a start condition from idle, or a repeated start while the
    /// controller owns the bus. Returns once the target answered; a read has
    /// its first byte waiting in MDATA.
    fn start(&mut self, address: u8, direction: TransferDirection) -> Result<(), Error> {
        self.registers
            .write(Register::Maddr, direction.address_byte(address));
        let status = self.poll(WaitStage::AddressPhase, transfer_flag)?;
        check_faults(status)?;
        if status & MSTATUS_RXACK != 0 {
            return Err(Error::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        if direction == TransferDirection::Read && status & MSTATUS_RIF == 0 {
            return Err(Error::BusError);
        }
        Ok(())
    }

    /// Send each byte and wait for the target's acknowledgement.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for &byte in bytes {
            self.registers.write(Register::Mdata, byte);
            let status = self.poll(WaitStage::DataPhase, write_flag)?;
            check_faults(status)?;
            if status & MSTATUS_RXACK != 0 {
                return Err(Error::NoAcknowledge(NoAcknowledgeSource::Data));
            }
        }
        Ok(())
    }

    /// Drain received bytes into `buffer`.
    ///
    /// Each byte is taken out of MDATA before the ACK command, because the
    /// command makes the peripheral clock in the next byte over it. The last
    /// byte is left unanswered unless `ack_last` is set, so the caller can
    /// NACK it with the stop or a repeated start.
    fn receive(&mut self, buffer: &mut [u8], ack_last: bool) -> Result<(), Error> {
        let last = buffer.len().saturating_sub(1);
        for (index, slot) in buffer.iter_mut().enumerate() {
            *slot = self.registers.read(Register::Mdata);
            if index < last || ack_last {
                self.registers.write(Register::Mctrlb, MCMD_RECVTRANS);
                let status = self.poll(WaitStage::DataPhase, transfer_flag)?;
                check_faults(status)?;
                if status & MSTATUS_RIF == 0 {
                    return Err(Error::BusError);
                }
            }
        }
        Ok(())
    }

    /// Stop condition; after a read the pending byte is answered with NACK.
    fn stop(&mut self, after_read: bool) {
        let ack = if after_read { MCTRLB_ACKACT_NACK } else { 0 };
        self.registers.write(Register::Mctrlb, ack | MCMD_STOP);
    }

    /// Arrange for the pending received byte to be NACKed by the next MADDR write.
    fn nack_before_restart(&mut self) {
        self.registers
            .write(Register::Mctrlb, MCTRLB_ACKACT_NACK | MCMD_NOACT);
    }

    /// Stop if we hold the bus, clear flags, and force BUSSTATE to idle.
    fn release_bus(&mut self) {
        if self.bus_state() == BusState::Owner {
            self.stop(true);
        }
        self.registers
            .write(Register::Mstatus, MSTATUS_FLAGS | BusState::Idle as u8);
    }

    /// Release the bus after a failure that happened with the bus held.
    fn abort(&mut self, address: u8, error: Error, after_read: bool) -> Error {
        self.stop(after_read);
        if let Error::Timeout(_) = error {
            self.release_bus();
        }
        self.logger
            .error(format_args!("twi: transfer to 0x{:02x} failed: {:?}", address, error));
        error
    }

    fn acquire(&mut self, start: Start) -> Result<(), Error> {
        match start {
            Start::Fresh => self.wait_bus_idle(),
            Start::Repeated => Ok(()),
        }
    }

    fn transfer_read(&mut self, start: Start, address: u8, buffer: &mut [u8]) -> Result<(), Error> {
        self.acquire(start)?;
        match self
            .start(address, TransferDirection::Read)
            .and_then(|()| self.receive(buffer, false))
        {
            Ok(()) => {
                self.stop(true);
                Ok(())
            }
            Err(e) => Err(self.abort(address, e, true)),
        }
    }

    fn transfer_write(&mut self, start: Start, address: u8, bytes: &[u8], stop: bool) -> Result<(), Error> {
        self.acquire(start)?;
        match self
            .start(address, TransferDirection::Write)
            .and_then(|()| self.transmit(bytes))
        {
            Ok(()) => {
                if stop {
                    self.stop(false);
                }
                Ok(())
            }
            Err(e) => Err(self.abort(address, e, false)),
        }
    }

    fn run_operations(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Error> {
        let mut current: Option<TransferDirection> = None;
        let mut iter = operations.iter_mut().peekable();
        while let Some(operation) = iter.next() {
            let next_is_read = matches!(iter.peek(), Some(Operation::Read(_)));
            let outcome = match operation {
                Operation::Write(bytes) => {
                    let begin = if current == Some(TransferDirection::Write) {
                        Ok(())
                    } else {
                        if current == Some(TransferDirection::Read) {
                            self.nack_before_restart();
                        }
                        current = Some(TransferDirection::Write);
                        self.start(address, TransferDirection::Write)
                    };
                    begin.and_then(|()| self.transmit(bytes))
                }
                Operation::Read(buffer) => {
                    let begin = if current == Some(TransferDirection::Read) {
                        Ok(())
                    } else {
                        current = Some(TransferDirection::Read);
                        self.start(address, TransferDirection::Read)
                    };
                    begin.and_then(|()| self.receive(buffer, next_is_read))
                }
            };
            if let Err(e) = outcome {
                return Err(self.abort(address, e, current == Some(TransferDirection::Read)));
            }
        }
        self.stop(current == Some(TransferDirection::Read));
        Ok(())
    }
}

impl<R: TwiRegisters, L: Logger> I2cHardwareCore for TwiMaster<R, L> {
    type Error = Error;

    fn bus_frequency(&self) -> HertzU32 {
        self.frequency
    }

    fn recover_bus(&mut self) -> Result<(), Self::Error> {
        self.release_bus();
        self.poll(WaitStage::BusIdle, bus_idle).map(|_| ())
    }
}

impl<R: TwiRegisters, L: Logger> I2cMaster for TwiMaster<R, L> {
    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        TwiMaster::write(self, addr, bytes)
    }

    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        TwiMaster::read(self, addr, buffer)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.transaction_slice(addr, &mut [Operation::Write(bytes), Operation::Read(buffer)])
    }

    fn transaction_slice(
        &mut self,
        addr: SevenBitAddress,
        ops_slice: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let address = checked_target(addr.into(), 0)?;
        for operation in ops_slice.iter() {
            let length = match operation {
                Operation::Read(buffer) => buffer.len(),
                Operation::Write(bytes) => bytes.len(),
            };
            if length > usize::from(MAX_DATA_LENGTH) {
                return Err(Error::Overflow);
            }
        }
        if ops_slice.is_empty() {
            return Ok(());
        }
        self.wait_bus_idle()?;
        self.run_operations(address, ops_slice)
    }
}

/// A write that kept the bus.
///
/// Produced by [`TwiMaster::write_no_stop`]. It mutably borrows the controller,
/// so no unrelated transfer can start until the follow-up transfer has been
/// issued on it. Follow-ups use a repeated start and skip the idle gate.
/// Dropping it unconsumed issues a stop condition.
#[must_use = "dropping an open transaction issues a stop condition"]
pub struct OpenTransaction<'a, R: TwiRegisters, L: Logger> {
    master: &'a mut TwiMaster<R, L>,
    closed: bool,
}

impl<'a, R: TwiRegisters, L: Logger> OpenTransaction<'a, R, L> {
    fn new(master: &'a mut TwiMaster<R, L>) -> Self {
        Self {
            master,
            closed: false,
        }
    }

    /// Repeated start, read `buffer.len()` bytes, stop.
    ///
    /// # Errors
    ///
    /// See [`Error`]; the bus is released in every case.
    pub fn read(mut self, address: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Error> {
        let address = checked_target(address.into(), buffer.len())?;
        self.closed = true;
        self.master.transfer_read(Start::Repeated, address, buffer)
    }

    /// Repeated start, write `bytes`, stop.
    ///
    /// # Errors
    ///
    /// See [`Error`]; the bus is released in every case.
    pub fn write(mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<(), Error> {
        let address = checked_target(address.into(), bytes.len())?;
        self.closed = true;
        self.master
            .transfer_write(Start::Repeated, address, bytes, true)
    }

    /// Repeated start, write `bytes`, keep holding the bus.
    ///
    /// # Errors
    ///
    /// See [`Error`]; on failure the bus has been released.
    pub fn write_no_stop(mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<Self, Error> {
        let address = checked_target(address.into(), bytes.len())?;
        self.closed = true;
        self.master
            .transfer_write(Start::Repeated, address, bytes, false)?;
        self.closed = false;
        Ok(self)
    }

    /// Packet form of [`OpenTransaction::read`].
    pub fn read_packet(mut self, packet: &mut Packet<'_>) -> StatusCode {
        let address = match checked_packet(packet) {
            Ok(address) => address,
            Err(e) => return e.status(),
        };
        self.closed = true;
        StatusCode::from(
            self.master
                .transfer_read(Start::Repeated, address, read_buffer(packet)),
        )
    }

    /// Packet form of [`OpenTransaction::write`].
    pub fn write_packet<'p>(mut self, packet: impl Into<WritePacket<'p>>) -> StatusCode {
        let packet = packet.into();
        let address = match checked_write(&packet) {
            Ok(address) => address,
            Err(e) => return e.status(),
        };
        self.closed = true;
        StatusCode::from(
            self.master
                .transfer_write(Start::Repeated, address, write_bytes(&packet), true),
        )
    }

    /// Packet form of [`OpenTransaction::write_no_stop`].
    ///
    /// # Errors
    ///
    /// The failure status; the bus has been released.
    pub fn write_packet_no_stop<'p>(self, packet: impl Into<WritePacket<'p>>) -> Result<Self, StatusCode> {
        let packet = packet.into();
        let address = checked_write(&packet).map_err(Error::status)?;
        self.write_no_stop(address, write_bytes(&packet))
            .map_err(Error::status)
    }

    /// Release the bus without a further transfer.
    pub fn stop(mut self) {
        self.closed = true;
        self.master.stop(false);
    }
}

impl<R: TwiRegisters, L: Logger> Drop for OpenTransaction<'_, R, L> {
    fn drop(&mut self) {
        if !self.closed {
            self.master.stop(false);
            self.master
                .logger
                .debug(format_args!("twi: open transaction dropped, bus released"));
        }
    }
}
