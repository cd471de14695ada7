// Licensed under the Apache-2.0 license

//! EA DOGM163 character display (ST7036 controller) over SPI.
//!
//! Every byte is framed by its own chip-select pulse. The register-select line
//! is driven low for instructions and high for display data, and the
//! controller is given a fixed settling delay after each byte since it cannot
//! be read back over SPI.
//!
//! ```text
//! DogLcd ── SpiBus (SpiMaster) ── MOSI/SCK
//!        ├─ CS  (OutputPin, active low)
//!        ├─ RS  (OutputPin)
//!        └─ DelayNs
//! ```

pub mod buffer;

pub use buffer::{DisplayBuffer, Line, LINE_COUNT, LINE_WIDTH};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use fugit::{MicrosDurationU32, MillisDurationU32};

/// Wait after power-up before the first instruction.
pub const POWER_UP_DELAY: MillisDurationU32 = MillisDurationU32::millis(40);

/// Wait after every instruction or data byte.
pub const COMMAND_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(30);

/// Wait for the voltage follower to settle.
pub const FOLLOWER_DELAY: MillisDurationU32 = MillisDurationU32::millis(40);

pub const CMD_CLEAR: u8 = 0x01;
pub const CMD_ENTRY_MODE_INCREMENT: u8 = 0x06;
pub const CMD_DISPLAY_ON: u8 = 0x0c;
/// 8-bit interface, two-line addressing, instruction table 1.
pub const CMD_FUNCTION_SET: u8 = 0x39;
pub const CMD_BIAS: u8 = 0x1e;
pub const CMD_FOLLOWER_ON: u8 = 0x6c;
pub const CMD_SET_DDRAM: u8 = 0x80;

/// DDRAM address of the first character of each line.
pub const LINE_ADDRESSES: [u8; LINE_COUNT] = [0x00, 0x10, 0x20];

/// Module supply; selects booster and contrast settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SupplyVoltage {
    #[default]
    V3_3,
    V5,
}

impl SupplyVoltage {
    /// Power control instruction (booster, contrast high bits).
    #[must_use]
    pub fn power_control(self) -> u8 {
        match self {
            SupplyVoltage::V3_3 => 0x55,
            SupplyVoltage::V5 => 0x50,
        }
    }

    /// Contrast set instruction (contrast low bits).
    #[must_use]
    pub fn contrast(self) -> u8 {
        match self {
            SupplyVoltage::V3_3 => 0x7f,
            SupplyVoltage::V5 => 0x77,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LcdError<S, P> {
    Spi(S),
    Pin(P),
}

/// Power-up instruction sequence for the given supply.
#[must_use]
pub fn init_sequence(supply: SupplyVoltage) -> [u8; 9] {
    [
        CMD_FUNCTION_SET,
        CMD_FUNCTION_SET,
        CMD_BIAS,
        supply.power_control(),
        CMD_FOLLOWER_ON,
        supply.contrast(),
        CMD_DISPLAY_ON,
        CMD_CLEAR,
        CMD_ENTRY_MODE_INCREMENT,
    ]
}

pub struct DogLcd<SPI, CS, RS, D> {
    spi: SPI,
    cs: CS,
    rs: RS,
    delay: D,
    supply: SupplyVoltage,
}

impl<SPI, CS, RS, D> DogLcd<SPI, CS, RS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    RS: OutputPin<Error = CS::Error>,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, rs: RS, delay: D, supply: SupplyVoltage) -> Self {
        Self {
            spi,
            cs,
            rs,
            delay,
            supply,
        }
    }

    fn pin(result: Result<(), CS::Error>) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        result.map_err(LcdError::Pin)
    }

    /// Release the bus, pins and delay provider.
    pub fn free(self) -> (SPI, CS, RS, D) {
        (self.spi, self.cs, self.rs, self.delay)
    }

    /// Power-up sequence. Leaves the display on, cleared, cursor hidden.
    ///
    /// # Errors
    ///
    /// The first SPI or pin failure; the sequence is not resumed.
    pub fn init(&mut self) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        Self::pin(self.cs.set_high())?;
        self.delay.delay_ms(POWER_UP_DELAY.to_millis());
        for byte in init_sequence(self.supply) {
            self.command(byte)?;
            if byte == CMD_FOLLOWER_ON {
                self.delay.delay_ms(FOLLOWER_DELAY.to_millis());
            }
        }
        Ok(())
    }

    /// Send one instruction byte.
    ///
    /// # Errors
    ///
    /// SPI or pin failure.
    pub fn command(&mut self, byte: u8) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        Self::pin(self.rs.set_low())?;
        self.transmit(byte)
    }

    /// Send one character to the current DDRAM address.
    ///
    /// # Errors
    ///
    /// SPI or pin failure.
    pub fn data(&mut self, byte: u8) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        Self::pin(self.rs.set_high())?;
        self.transmit(byte)
    }

    fn transmit(&mut self, byte: u8) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        Self::pin(self.cs.set_low())?;
        let sent = self
            .spi
            .write(&[byte])
            .and_then(|()| self.spi.flush())
            .map_err(LcdError::Spi);
        // Deselect even when the transfer failed.
        let released = Self::pin(self.cs.set_high());
        sent.and(released)?;
        self.delay.delay_us(COMMAND_DELAY.to_micros());
        Ok(())
    }

    /// Clear the display and home the cursor.
    ///
    /// # Errors
    ///
    /// SPI or pin failure.
    pub fn clear(&mut self) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        self.command(CMD_CLEAR)
    }

    /// Rewrite all three lines from `buffer`.
    ///
    /// # Errors
    ///
    /// SPI or pin failure; the display may show a partial update.
    pub fn update(&mut self, buffer: &DisplayBuffer) -> Result<(), LcdError<SPI::Error, CS::Error>> {
        for (line, address) in buffer.lines().iter().zip(LINE_ADDRESSES) {
            self.command(CMD_SET_DDRAM | address)?;
            for byte in line.padded() {
                self.data(byte)?;
            }
        }
        Ok(())
    }
}
