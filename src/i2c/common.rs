// Licensed under the Apache-2.0 license

//! Common types for the TWI master driver.
//!
//! This module provides the configuration builder, baud-rate derivation, and
//! the error taxonomy shared by the register-level driver and its embedded-hal
//! front end.

use crate::i2c::packet::StatusCode;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::HertzU32;

/// Default bound on status-register polls for a single wait.
pub const DEFAULT_POLL_LIMIT: u32 = 50_000;

/// Fixed part of the TWI SCL period, in peripheral clock cycles.
const SCL_FIXED_CYCLES: u64 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// Hardware timeout that lets the peripheral leave an unknown bus state on its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BusTimeout {
    Disabled = 0,
    Us50 = 1,
    Us100 = 2,
    Us200 = 3,
}

/// Which bounded wait gave up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitStage {
    /// Waiting for the bus state to read idle before a start condition.
    BusIdle,
    /// Waiting for the address byte to be acknowledged or refused.
    AddressPhase,
    /// Waiting for a data byte to be sent or received.
    DataPhase,
}

/// Driver error. Every variant maps onto a [`StatusCode`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Requested length exceeds the caller's buffer or [`MAX_DATA_LENGTH`](crate::i2c::packet::MAX_DATA_LENGTH).
    Overflow,
    /// Address does not fit in seven bits.
    AddressOutOfRange,
    /// A bounded wait exhausted its poll budget.
    Timeout(WaitStage),
    /// The target refused the address or a data byte.
    NoAcknowledge(NoAcknowledgeSource),
    /// Misplaced start or stop condition seen on the bus.
    BusError,
    /// Another master took the bus.
    ArbitrationLost,
}

impl Error {
    pub fn status(self) -> StatusCode {
        match self {
            Error::Overflow | Error::AddressOutOfRange => StatusCode::Overflow,
            Error::Timeout(_) => StatusCode::Timeout,
            Error::NoAcknowledge(_) => StatusCode::NoAcknowledge,
            Error::BusError | Error::ArbitrationLost => StatusCode::BusFault,
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Overflow => ErrorKind::Overrun,
            Error::NoAcknowledge(source) => ErrorKind::NoAcknowledge(*source),
            Error::BusError => ErrorKind::Bus,
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::AddressOutOfRange | Error::Timeout(_) => ErrorKind::Other,
        }
    }
}

impl From<Result<(), Error>> for StatusCode {
    fn from(result: Result<(), Error>) -> Self {
        match result {
            Ok(()) => StatusCode::Ok,
            Err(e) => e.status(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Reference clock or bus frequency is zero.
    ZeroFrequency,
    /// Even the largest divisor runs the bus faster than requested.
    FrequencyTooLow,
    /// A zero poll budget would fail every wait.
    ZeroPollLimit,
}

/// Clock inputs to the baud-rate derivation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    /// Peripheral clock feeding the TWI.
    pub reference_clock: HertzU32,
    /// SCL rise time of the physical bus.
    pub rise_time_ns: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reference_clock: HertzU32::MHz(4),
            rise_time_ns: 0,
        }
    }
}

impl TimingConfig {
    fn rise_cycles(&self) -> u64 {
        u64::from(self.reference_clock.raw()) * u64::from(self.rise_time_ns) / 1_000_000_000
    }

    /// Smallest MBAUD value whose bus frequency does not exceed `target`.
    ///
    /// `f_scl = f_clk / (10 + 2 * baud + f_clk * t_rise)`. The rise term is
    /// rounded down, which can only overestimate the resulting frequency, so the
    /// bound still holds on real hardware.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::ZeroFrequency`] for a zero clock or target, and
    /// [`ConfigurationError::FrequencyTooLow`] when no 8-bit divisor is slow enough.
    pub fn baud_for(&self, target: HertzU32) -> Result<u8, ConfigurationError> {
        let clock = u64::from(self.reference_clock.raw());
        let target = u64::from(target.raw());
        if clock == 0 || target == 0 {
            return Err(ConfigurationError::ZeroFrequency);
        }

        let period = clock.div_ceil(target);
        let fixed = SCL_FIXED_CYCLES + self.rise_cycles();
        if period <= fixed {
            return Ok(0);
        }
        u8::try_from((period - fixed).div_ceil(2)).map_err(|_| ConfigurationError::FrequencyTooLow)
    }

    /// Bus frequency produced by `baud`.
    #[must_use]
    pub fn frequency_for(&self, baud: u8) -> HertzU32 {
        let clock = u64::from(self.reference_clock.raw());
        let period = SCL_FIXED_CYCLES + 2 * u64::from(baud) + self.rise_cycles();
        HertzU32::from_raw(u32::try_from(clock / period).unwrap_or(u32::MAX))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    /// Upper bound for the SCL frequency.
    pub bus_frequency: HertzU32,
    pub timing: TimingConfig,
    /// Status-register polls allowed per wait before giving up with a timeout.
    pub poll_limit: u32,
    /// Keep the peripheral running while the CPU is halted by a debugger.
    pub debug_run: bool,
    pub inactive_timeout: BusTimeout,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    bus_frequency: HertzU32,
    timing: Option<TimingConfig>,
    poll_limit: u32,
    debug_run: bool,
    inactive_timeout: BusTimeout,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus_frequency: I2cSpeed::Fast.frequency(),
            timing: None,
            poll_limit: DEFAULT_POLL_LIMIT,
            debug_run: true,
            inactive_timeout: BusTimeout::Disabled,
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.bus_frequency = speed.frequency();
        self
    }
    #[must_use]
    pub fn frequency(mut self, frequency: HertzU32) -> Self {
        self.bus_frequency = frequency;
        self
    }
    #[must_use]
    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing = Some(config);
        self
    }
    #[must_use]
    pub fn poll_limit(mut self, limit: u32) -> Self {
        self.poll_limit = limit;
        self
    }
    #[must_use]
    pub fn debug_run(mut self, enabled: bool) -> Self {
        self.debug_run = enabled;
        self
    }
    #[must_use]
    pub fn inactive_timeout(mut self, timeout: BusTimeout) -> Self {
        self.inactive_timeout = timeout;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            bus_frequency: self.bus_frequency,
            timing: self.timing.unwrap_or_default(),
            poll_limit: self.poll_limit,
            debug_run: self.debug_run,
            inactive_timeout: self.inactive_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(mhz: u32, rise_time_ns: u32) -> TimingConfig {
        TimingConfig {
            reference_clock: HertzU32::MHz(mhz),
            rise_time_ns,
        }
    }

    #[test]
    fn test_baud_never_exceeds_target() {
        let speeds = [I2cSpeed::Standard, I2cSpeed::Fast, I2cSpeed::FastPlus];
        for mhz in [1, 4, 8, 16, 20, 24] {
            for rise in [0, 120, 300, 1000] {
                let t = timing(mhz, rise);
                for speed in speeds {
                    let baud = t.baud_for(speed.frequency()).unwrap();
                    assert!(
                        t.frequency_for(baud) <= speed.frequency(),
                        "{mhz} MHz, {rise} ns, {speed:?}: baud {baud}"
                    );
                    if baud > 0 {
                        // One step faster would break the bound.
                        assert!(t.frequency_for(baud - 1) > speed.frequency());
                    }
                }
            }
        }
    }

    #[test]
    fn test_baud_known_values() {
        // 4 MHz core asking for 400 kHz needs no extra divisor.
        assert_eq!(timing(4, 0).baud_for(I2cSpeed::Fast.frequency()), Ok(0));
        // 24 MHz at 100 kHz: 240 cycles per period.
        assert_eq!(timing(24, 0).baud_for(I2cSpeed::Standard.frequency()), Ok(115));
        assert_eq!(timing(24, 0).frequency_for(115), HertzU32::kHz(100));
    }

    #[test]
    fn test_baud_rejects_unreachable_targets() {
        assert_eq!(
            timing(24, 0).baud_for(HertzU32::kHz(10)),
            Err(ConfigurationError::FrequencyTooLow)
        );
        assert_eq!(
            timing(4, 0).baud_for(HertzU32::from_raw(0)),
            Err(ConfigurationError::ZeroFrequency)
        );
        assert_eq!(
            timing(0, 0).baud_for(HertzU32::kHz(100)),
            Err(ConfigurationError::ZeroFrequency)
        );
    }

    #[test]
    fn test_builder_defaults() {
        let config = I2cConfig::default();
        assert_eq!(config.bus_frequency, HertzU32::kHz(400));
        assert_eq!(config.poll_limit, DEFAULT_POLL_LIMIT);
        assert_eq!(config.timing, TimingConfig::default());
        assert!(config.debug_run);
        assert_eq!(config.inactive_timeout, BusTimeout::Disabled);
    }

    #[test]
    fn test_builder_overrides() {
        let config = I2cConfigBuilder::new()
            .speed(I2cSpeed::Standard)
            .poll_limit(16)
            .debug_run(false)
            .inactive_timeout(BusTimeout::Us200)
            .timing_config(timing(24, 300))
            .build();
        assert_eq!(config.bus_frequency, HertzU32::kHz(100));
        assert_eq!(config.poll_limit, 16);
        assert!(!config.debug_run);
        assert_eq!(config.inactive_timeout, BusTimeout::Us200);
        assert_eq!(config.timing.rise_time_ns, 300);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(Error::Overflow.status(), StatusCode::Overflow);
        assert_eq!(Error::AddressOutOfRange.status(), StatusCode::Overflow);
        assert_eq!(Error::Timeout(WaitStage::BusIdle).status(), StatusCode::Timeout);
        assert_eq!(
            Error::NoAcknowledge(NoAcknowledgeSource::Address).status(),
            StatusCode::NoAcknowledge
        );
        assert_eq!(Error::ArbitrationLost.status(), StatusCode::BusFault);
        assert_eq!(StatusCode::from(Ok(())), StatusCode::Ok);
        assert_eq!(StatusCode::from(Err(Error::BusError)), StatusCode::BusFault);
    }

    #[test]
    fn test_error_kinds() {
        use embedded_hal::i2c::Error as _;
        assert_eq!(
            Error::NoAcknowledge(NoAcknowledgeSource::Data).kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        );
        assert_eq!(Error::Overflow.kind(), ErrorKind::Overrun);
        assert_eq!(Error::Timeout(WaitStage::DataPhase).kind(), ErrorKind::Other);
    }
}
