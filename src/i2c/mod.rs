// Licensed under the Apache-2.0 license

//! TWI (I2C) bus-master driver module.
//!
//! This module provides a blocking master driver for the AVR Dx TWI
//! peripheral, designed for bare-metal and `no_std` environments. The packet
//! interface in [`twi`] reports every outcome as a [`packet::StatusCode`];
//! [`i2c_controller`] exposes the same engine through embedded-hal.

pub mod avr_dx;
pub mod common;
pub mod i2c_controller;
pub mod packet;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod traits;
pub mod twi;
