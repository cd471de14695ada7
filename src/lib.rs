// Licensed under the Apache-2.0 license

//! Peripheral drivers for the AVR128DB48 sensor board: a blocking TWI (I2C)
//! bus master, a polled SPI master and the DOG character display it feeds.

// Prevent panic-prone patterns in production code only
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), no_std)]
pub mod common;
pub mod i2c;
pub mod lcd;
pub mod spi;
