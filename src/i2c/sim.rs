// Licensed under the Apache-2.0 license

//! Simulated TWI register block.
//!
//! [`SimTwi`] implements [`TwiRegisters`] with the host-side behaviour of the
//! AVR Dx peripheral and a small set of attached targets, so the protocol
//! engine can be exercised off-target. Every bus-visible step is appended to
//! an event log that tests can compare against the expected wire sequence.
//!
//! Faults are injected explicitly: a bus that never goes idle, a target that
//! stalls after a number of bytes, and one-shot bus errors or arbitration
//! losses on the next address phase.

use crate::i2c::avr_dx::{
    BusState, Register, MCMD_NOACT, MCMD_RECVTRANS, MCMD_REPSTART, MCMD_STOP, MCTRLA_ENABLE,
    MCTRLB_ACKACT_NACK, MCTRLB_FLUSH, MCTRLB_MCMD_MASK, MSTATUS_ARBLOST, MSTATUS_BUSERR,
    MSTATUS_BUSSTATE_MASK, MSTATUS_CLKHOLD, MSTATUS_FLAGS, MSTATUS_RIF, MSTATUS_RXACK,
    MSTATUS_WIF, DBGCTRL_DBGRUN,
};
use crate::i2c::traits::TwiRegisters;
use heapless::{Deque, Vec};

/// Targets a single simulated bus can carry.
pub const MAX_TARGETS: usize = 4;

/// Events kept before the log silently stops growing.
pub const EVENT_CAPACITY: usize = 2048;

/// Value a target drives when it has nothing to send.
const IDLE_LINE: u8 = 0xff;

/// One bus-visible step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    /// Start condition followed by this address byte.
    Start(u8),
    /// Repeated start followed by this address byte.
    RepeatedStart(u8),
    /// No target answered the address.
    AddressNack,
    /// Master sent a data byte.
    Transmitted(u8),
    /// Target refused the byte just transmitted.
    TargetNack,
    /// Target sent a data byte.
    Received(u8),
    /// Master acknowledged the received byte.
    MasterAck,
    /// Master refused the received byte.
    MasterNack,
    Stop,
}

#[derive(Debug)]
enum Behaviour {
    /// Bytes written are queued and read back in order.
    Loopback(Deque<u8, 256>),
    /// Register file: the first byte of a write selects the register, further
    /// bytes and reads auto-increment from there.
    Registers {
        memory: [u8; 256],
        pointer: u8,
        addressed: bool,
    },
}

/// A device attached to the simulated bus.
#[derive(Debug)]
pub struct SimTarget {
    address: u8,
    behaviour: Behaviour,
    accept_limit: Option<usize>,
    accepted: usize,
}

impl SimTarget {
    #[must_use]
    pub fn loopback(address: u8) -> Self {
        Self::with_behaviour(address, Behaviour::Loopback(Deque::new()))
    }

    #[must_use]
    pub fn registers(address: u8) -> Self {
        Self::with_behaviour(
            address,
            Behaviour::Registers {
                memory: [0; 256],
                pointer: 0,
                addressed: false,
            },
        )
    }

    fn with_behaviour(address: u8, behaviour: Behaviour) -> Self {
        Self {
            address,
            behaviour,
            accept_limit: None,
            accepted: 0,
        }
    }

    /// Acknowledge only the first `count` data bytes of each write.
    #[must_use]
    pub fn accepting(mut self, count: usize) -> Self {
        self.accept_limit = Some(count);
        self
    }

    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Register contents; all zero for a loopback target.
    #[must_use]
    pub fn memory(&self) -> &[u8; 256] {
        const EMPTY: [u8; 256] = [0; 256];
        match &self.behaviour {
            Behaviour::Registers { memory, .. } => memory,
            Behaviour::Loopback(_) => &EMPTY,
        }
    }

    fn begin(&mut self) {
        self.accepted = 0;
        if let Behaviour::Registers { addressed, .. } = &mut self.behaviour {
            *addressed = false;
        }
    }

    fn accept(&mut self, byte: u8) -> bool {
        if self.accept_limit.is_some_and(|limit| self.accepted >= limit) {
            return false;
        }
        self.accepted += 1;
        match &mut self.behaviour {
            Behaviour::Loopback(queue) => queue.push_back(byte).is_ok(),
            Behaviour::Registers {
                memory,
                pointer,
                addressed,
            } => {
                if *addressed {
                    if let Some(cell) = memory.get_mut(usize::from(*pointer)) {
                        *cell = byte;
                    }
                    *pointer = pointer.wrapping_add(1);
                } else {
                    *pointer = byte;
                    *addressed = true;
                }
                true
            }
        }
    }

    fn supply(&mut self) -> u8 {
        match &mut self.behaviour {
            Behaviour::Loopback(queue) => queue.pop_front().unwrap_or(IDLE_LINE),
            Behaviour::Registers {
                memory, pointer, ..
            } => {
                let byte = memory
                    .get(usize::from(*pointer))
                    .copied()
                    .unwrap_or(IDLE_LINE);
                *pointer = pointer.wrapping_add(1);
                byte
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    None,
    Write,
    /// A received byte is waiting for the master's ACK or NACK.
    Read,
}

/// Simulated TWI host with attached targets.
#[derive(Debug)]
pub struct SimTwi {
    dbgctrl: u8,
    mctrla: u8,
    mctrlb: u8,
    mbaud: u8,
    maddr: u8,
    mdata: u8,
    flags: u8,
    state: BusState,
    phase: Phase,
    active: Option<usize>,
    targets: Vec<SimTarget, MAX_TARGETS>,
    events: Vec<BusEvent, EVENT_CAPACITY>,
    status_reads: u32,
    stuck_busy: bool,
    hang: Option<usize>,
    fault: Option<u8>,
}

impl Default for SimTwi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTwi {
    /// Powered-up peripheral: disabled, bus state unknown, no targets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dbgctrl: 0,
            mctrla: 0,
            mctrlb: 0,
            mbaud: 0,
            maddr: 0,
            mdata: 0,
            flags: 0,
            state: BusState::Unknown,
            phase: Phase::None,
            active: None,
            targets: Vec::new(),
            events: Vec::new(),
            status_reads: 0,
            stuck_busy: false,
            hang: None,
            fault: None,
        }
    }

    /// Attach a target. Targets beyond [`MAX_TARGETS`] are ignored.
    pub fn attach(&mut self, target: SimTarget) {
        let _ = self.targets.push(target);
    }

    #[must_use]
    pub fn target(&self, address: u8) -> Option<&SimTarget> {
        self.targets.iter().find(|t| t.address == address)
    }

    /// Another master holds the bus: BUSSTATE reads busy and cannot be forced idle.
    /// Clearing the condition leaves the bus idle.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
        if !stuck {
            self.state = BusState::Idle;
            self.phase = Phase::None;
        }
    }

    /// Complete `bytes` more data bytes, then stop raising flags.
    ///
    /// With `bytes == 0` the next address phase already stalls. Stop
    /// conditions and forced-idle writes still take effect.
    pub fn hang_after(&mut self, bytes: usize) {
        self.hang = Some(bytes);
    }

    pub fn release_hang(&mut self) {
        self.hang = None;
    }

    /// Next address phase ends with a bus error.
    pub fn inject_bus_error(&mut self) {
        self.fault = Some(MSTATUS_BUSERR);
    }

    /// Next address phase loses arbitration.
    pub fn inject_arbitration_loss(&mut self) {
        self.fault = Some(MSTATUS_ARBLOST);
    }

    #[must_use]
    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// MSTATUS reads since creation or the last reset.
    #[must_use]
    pub fn status_reads(&self) -> u32 {
        self.status_reads
    }

    pub fn reset_status_reads(&mut self) {
        self.status_reads = 0;
    }

    #[must_use]
    pub fn baud(&self) -> u8 {
        self.mbaud
    }

    #[must_use]
    pub fn master_enabled(&self) -> bool {
        self.mctrla & MCTRLA_ENABLE != 0
    }

    #[must_use]
    pub fn debug_run(&self) -> bool {
        self.dbgctrl & DBGCTRL_DBGRUN != 0
    }

    fn bus_state(&self) -> BusState {
        if self.stuck_busy {
            BusState::Busy
        } else {
            self.state
        }
    }

    fn record(&mut self, event: BusEvent) {
        let _ = self.events.push(event);
    }

    /// Consume one unit of the hang budget; true if the bus is stalled.
    fn stalled(&mut self) -> bool {
        match self.hang {
            Some(0) => true,
            Some(remaining) => {
                self.hang = Some(remaining - 1);
                false
            }
            None => false,
        }
    }

    fn active_target(&mut self) -> Option<&mut SimTarget> {
        self.active.and_then(|index| self.targets.get_mut(index))
    }

    fn answer_pending_byte(&mut self) {
        if self.phase == Phase::Read {
            if self.mctrlb & MCTRLB_ACKACT_NACK != 0 {
                self.record(BusEvent::MasterNack);
            } else {
                self.record(BusEvent::MasterAck);
            }
        }
    }

    fn address_phase(&mut self, byte: u8) {
        if self.mctrla & MCTRLA_ENABLE == 0 {
            return;
        }
        let repeated = match self.bus_state() {
            BusState::Idle => false,
            BusState::Owner => true,
            BusState::Unknown | BusState::Busy => return,
        };
        if repeated {
            self.answer_pending_byte();
        }
        // Writing MADDR also clears stale fault flags.
        self.flags = 0;
        self.state = BusState::Owner;
        self.phase = Phase::None;
        self.active = None;

        if self.hang == Some(0) {
            return;
        }
        if let Some(fault) = self.fault.take() {
            self.flags |= fault | MSTATUS_WIF;
            return;
        }
        self.record(if repeated {
            BusEvent::RepeatedStart(byte)
        } else {
            BusEvent::Start(byte)
        });

        let address = byte >> 1;
        let Some(index) = self.targets.iter().position(|t| t.address == address) else {
            self.record(BusEvent::AddressNack);
            self.flags |= MSTATUS_WIF | MSTATUS_RXACK;
            return;
        };
        self.active = Some(index);
        if let Some(target) = self.active_target() {
            target.begin();
        }

        if byte & 1 == 1 {
            self.fetch();
        } else {
            self.phase = Phase::Write;
            self.flags |= MSTATUS_WIF | MSTATUS_CLKHOLD;
        }
    }

    fn fetch(&mut self) {
        let byte = self.active_target().map_or(IDLE_LINE, SimTarget::supply);
        self.mdata = byte;
        self.record(BusEvent::Received(byte));
        self.phase = Phase::Read;
        self.flags |= MSTATUS_RIF | MSTATUS_CLKHOLD;
    }

    fn transmit(&mut self, byte: u8) {
        if self.bus_state() != BusState::Owner || self.phase != Phase::Write {
            return;
        }
        self.flags &= !(MSTATUS_WIF | MSTATUS_RXACK | MSTATUS_CLKHOLD);
        if self.stalled() {
            return;
        }
        self.record(BusEvent::Transmitted(byte));
        let accepted = self.active_target().is_some_and(|t| t.accept(byte));
        if accepted {
            self.flags |= MSTATUS_WIF | MSTATUS_CLKHOLD;
        } else {
            self.record(BusEvent::TargetNack);
            self.flags |= MSTATUS_WIF | MSTATUS_RXACK | MSTATUS_CLKHOLD;
        }
    }

    fn command(&mut self, value: u8) {
        if value & MCTRLB_FLUSH != 0 {
            self.phase = Phase::None;
            self.active = None;
        }
        self.mctrlb = value & MCTRLB_ACKACT_NACK;
        match value & MCTRLB_MCMD_MASK {
            MCMD_NOACT => {}
            MCMD_REPSTART => self.address_phase(self.maddr),
            MCMD_RECVTRANS => {
                if self.phase != Phase::Read {
                    return;
                }
                self.answer_pending_byte();
                self.flags &= !(MSTATUS_RIF | MSTATUS_CLKHOLD);
                // A stalled target never delivers the next byte, so there is
                // nothing left to answer.
                if self.mctrlb & MCTRLB_ACKACT_NACK != 0 || self.stalled() {
                    self.phase = Phase::None;
                } else {
                    self.fetch();
                }
            }
            MCMD_STOP => {
                if self.bus_state() != BusState::Owner {
                    return;
                }
                self.answer_pending_byte();
                self.record(BusEvent::Stop);
                self.flags &= !(MSTATUS_RIF | MSTATUS_WIF | MSTATUS_RXACK | MSTATUS_CLKHOLD);
                self.phase = Phase::None;
                self.active = None;
                self.state = BusState::Idle;
            }
            _ => {}
        }
    }

    fn write_status(&mut self, value: u8) {
        self.flags &= !(value & MSTATUS_FLAGS);
        if value & MSTATUS_BUSSTATE_MASK == BusState::Idle as u8 && !self.stuck_busy {
            self.state = BusState::Idle;
            self.phase = Phase::None;
            self.active = None;
        }
    }
}

impl TwiRegisters for SimTwi {
    fn read(&mut self, register: Register) -> u8 {
        match register {
            Register::Ctrla | Register::Dualctrl => 0,
            Register::Dbgctrl => self.dbgctrl,
            Register::Mctrla => self.mctrla,
            Register::Mctrlb => self.mctrlb,
            Register::Mstatus => {
                self.status_reads = self.status_reads.saturating_add(1);
                self.flags | self.bus_state() as u8
            }
            Register::Mbaud => self.mbaud,
            Register::Maddr => self.maddr,
            Register::Mdata => {
                self.flags &= !(MSTATUS_RIF | MSTATUS_CLKHOLD);
                self.mdata
            }
        }
    }

    fn write(&mut self, register: Register, value: u8) {
        match register {
            Register::Ctrla | Register::Dualctrl => {}
            Register::Dbgctrl => self.dbgctrl = value,
            Register::Mctrla => {
                self.mctrla = value;
                if value & MCTRLA_ENABLE == 0 {
                    self.state = BusState::Unknown;
                    self.phase = Phase::None;
                }
            }
            Register::Mctrlb => self.command(value),
            Register::Mstatus => self.write_status(value),
            Register::Mbaud => self.mbaud = value,
            Register::Maddr => {
                self.maddr = value;
                self.address_phase(value);
            }
            Register::Mdata => {
                self.mdata = value;
                self.transmit(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> SimTwi {
        let mut sim = SimTwi::new();
        sim.write(Register::Mctrla, MCTRLA_ENABLE);
        sim.write(Register::Mstatus, MSTATUS_FLAGS | BusState::Idle as u8);
        sim
    }

    #[test]
    fn test_unknown_until_forced_idle() {
        let mut sim = SimTwi::new();
        assert_eq!(BusState::from_status(sim.read(Register::Mstatus)), BusState::Unknown);
        sim.attach(SimTarget::loopback(0x10));
        sim.write(Register::Maddr, 0x20);
        assert!(sim.events().is_empty());
        assert_eq!(sim.read(Register::Mstatus) & MSTATUS_WIF, 0);
    }

    #[test]
    fn test_register_target_pointer() {
        let mut sim = enabled();
        sim.attach(SimTarget::registers(0x40));
        sim.write(Register::Maddr, 0x80);
        sim.write(Register::Mdata, 0x05);
        sim.write(Register::Mdata, 0xaa);
        sim.write(Register::Mdata, 0xbb);
        sim.write(Register::Mctrlb, MCMD_STOP);
        let memory = sim.target(0x40).map(SimTarget::memory).unwrap();
        assert_eq!((memory[5], memory[6]), (0xaa, 0xbb));
    }

    #[test]
    fn test_address_nack_sets_wif_and_rxack() {
        let mut sim = enabled();
        sim.write(Register::Maddr, 0x31);
        let status = sim.read(Register::Mstatus);
        assert_eq!(status & (MSTATUS_WIF | MSTATUS_RXACK | MSTATUS_RIF), MSTATUS_WIF | MSTATUS_RXACK);
        assert_eq!(BusState::from_status(status), BusState::Owner);
        assert_eq!(sim.events(), &[BusEvent::Start(0x31), BusEvent::AddressNack]);
    }

    #[test]
    fn test_stuck_bus_ignores_forced_idle() {
        let mut sim = enabled();
        sim.set_stuck_busy(true);
        sim.write(Register::Mstatus, BusState::Idle as u8);
        assert_eq!(BusState::from_status(sim.read(Register::Mstatus)), BusState::Busy);
        assert_eq!(sim.status_reads(), 1);
        sim.set_stuck_busy(false);
        assert_eq!(BusState::from_status(sim.read(Register::Mstatus)), BusState::Idle);
    }

    #[test]
    fn test_stalled_read_answers_each_byte_once() {
        let mut sim = enabled();
        sim.attach(SimTarget::loopback(0x10));
        sim.write(Register::Maddr, 0x21);
        sim.hang_after(0);
        assert_eq!(sim.read(Register::Mdata), IDLE_LINE);
        sim.write(Register::Mctrlb, MCMD_RECVTRANS);
        assert_eq!(sim.read(Register::Mstatus) & MSTATUS_RIF, 0);

        sim.write(Register::Mctrlb, MCTRLB_ACKACT_NACK | MCMD_STOP);
        assert_eq!(
            sim.events(),
            &[
                BusEvent::Start(0x21),
                BusEvent::Received(IDLE_LINE),
                BusEvent::MasterAck,
                BusEvent::Stop,
            ]
        );
    }

    #[test]
    fn test_reading_mdata_clears_rif() {
        let mut sim = enabled();
        sim.attach(SimTarget::loopback(0x10));
        sim.write(Register::Maddr, 0x21);
        assert_ne!(sim.read(Register::Mstatus) & MSTATUS_RIF, 0);
        assert_eq!(sim.read(Register::Mdata), IDLE_LINE);
        assert_eq!(sim.read(Register::Mstatus) & MSTATUS_RIF, 0);
    }
}
