//! This crate defines a low-layer HAL for the Cortex-M0 STM32F0 family.
//!
//! Every driver reaches the hardware through the [`Bus`] trait, so the same
//! code runs against the memory-mapped registers of the chip ([`Mmio`]) or
//! against any other register file implementation.
//!
//! # Usage
//!
//! ```ignore
//! let bus = unsafe { Mmio::new() };
//! let rcc = rcc::Rcc::new(&bus);
//! rcc.enable_clock(rcc::Apb2Mask::SPI1);
//!
//! let spi = spi::Spi::new(&bus, spi::Instance::Spi1);
//! spi.init(&spi::Config::default())?;
//! spi.enable();
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]

#[macro_use]
mod fmt;

pub mod adc;
pub mod bus;
pub mod cortex;
pub mod crc;
pub mod delay;
pub mod dma;
pub mod error;
pub mod exti;
pub mod i2c;
pub mod map;
pub mod poll;
pub mod pwr;
pub mod rcc;
pub mod rtc;
pub mod spi;
pub mod tim;

#[cfg(test)]
pub(crate) mod sim;

pub use bus::{Bus, Mmio};
pub use embedded_hal as hal;
pub use error::Error;
