//! CRC calculation unit

use crate::bus::Bus;
use crate::map;
use crate::rcc::{AhbMask, Rcc};

const DR: u32 = map::CRC;
const IDR: u32 = map::CRC + 0x04;
const CR: u32 = map::CRC + 0x08;
const INIT: u32 = map::CRC + 0x10;
const POL: u32 = map::CRC + 0x14;

const CR_RESET: u32 = 1 << 0;
const CR_POLYSIZE: u32 = 0b11 << 3;
const CR_REV_IN: u32 = 0b11 << 5;
const CR_REV_OUT: u32 = 1 << 7;

pub const DEFAULT_POLYNOMIAL: u32 = 0x04C1_1DB7;
pub const DEFAULT_INIT_VALUE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PolynomialSize {
    Bits32 = 0b00 << 3,
    Bits16 = 0b01 << 3,
    Bits8 = 0b10 << 3,
    Bits7 = 0b11 << 3,
}

/// Bit reversal applied to the input data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputReverse {
    None = 0b00 << 5,
    Byte = 0b01 << 5,
    HalfWord = 0b10 << 5,
    Word = 0b11 << 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub polynomial_size: PolynomialSize,
    pub polynomial: u32,
    pub init_value: u32,
    pub input_reverse: InputReverse,
    pub output_reverse: bool,
}

/// CRC-32 (MPEG-2 ordering), the reset configuration.
impl Default for Config {
    fn default() -> Self {
        Self {
            polynomial_size: PolynomialSize::Bits32,
            polynomial: DEFAULT_POLYNOMIAL,
            init_value: DEFAULT_INIT_VALUE,
            input_reverse: InputReverse::None,
            output_reverse: false,
        }
    }
}

#[derive(Debug)]
pub struct Crc<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Crc<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Enable the clock of the unit.
    pub fn enable_clock<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        rcc.enable_clock(AhbMask::CRC);
    }

    pub fn init(&self, config: &Config) {
        self.bus.modify_bits(
            CR,
            CR_POLYSIZE | CR_REV_IN | CR_REV_OUT,
            config.polynomial_size as u32
                | config.input_reverse as u32
                | if config.output_reverse { CR_REV_OUT } else { 0 },
        );
        self.set_polynomial(config.polynomial);
        self.set_init_value(config.init_value);
        self.reset();
    }

    /// Restore every register to its reset value.
    pub fn deinit(&self) {
        self.bus.write(DR, 0xFFFF_FFFF);
        self.bus
            .clear_bits(CR, CR_POLYSIZE | CR_REV_IN | CR_REV_OUT);
        self.set_init_value(DEFAULT_INIT_VALUE);
        self.set_polynomial(DEFAULT_POLYNOMIAL);
        self.reset();
        self.write_idr(0);
    }

    /// Load the init value into DR. The bit clears itself.
    pub fn reset(&self) {
        self.bus.set_bits(CR, CR_RESET);
    }

    pub fn set_polynomial_size(&self, size: PolynomialSize) {
        self.bus.modify_bits(CR, CR_POLYSIZE, size as u32);
    }

    pub fn polynomial_size(&self) -> PolynomialSize {
        match self.bus.field(CR, CR_POLYSIZE) >> 3 {
            0b00 => PolynomialSize::Bits32,
            0b01 => PolynomialSize::Bits16,
            0b10 => PolynomialSize::Bits8,
            _ => PolynomialSize::Bits7,
        }
    }

    pub fn set_input_reverse(&self, reverse: InputReverse) {
        self.bus.modify_bits(CR, CR_REV_IN, reverse as u32);
    }

    pub fn set_output_reverse(&self, on: bool) {
        let set = if on { CR_REV_OUT } else { 0 };
        self.bus.modify_bits(CR, CR_REV_OUT, set);
    }

    pub fn set_polynomial(&self, polynomial: u32) {
        self.bus.write(POL, polynomial);
    }

    pub fn polynomial(&self) -> u32 {
        self.bus.read(POL)
    }

    pub fn set_init_value(&self, value: u32) {
        self.bus.write(INIT, value);
    }

    pub fn init_value(&self) -> u32 {
        self.bus.read(INIT)
    }

    // Data. The access width decides how many bits enter the computation.

    pub fn feed8(&self, data: u8) {
        self.bus.write_u8(DR, data);
    }

    pub fn feed16(&self, data: u16) {
        self.bus.write_u16(DR, data);
    }

    pub fn feed32(&self, data: u32) {
        self.bus.write(DR, data);
    }

    pub fn read32(&self) -> u32 {
        self.bus.read(DR)
    }

    pub fn read16(&self) -> u16 {
        self.bus.read_u16(DR)
    }

    pub fn read8(&self) -> u8 {
        self.bus.read_u8(DR)
    }

    pub fn read7(&self) -> u8 {
        self.bus.read_u8(DR) & 0x7F
    }

    /// Free byte register, not affected by [`Crc::reset`].
    pub fn read_idr(&self) -> u8 {
        self.bus.read_u8(IDR)
    }

    pub fn write_idr(&self, value: u8) {
        self.bus.write_u8(IDR, value);
    }

    /// Restart from the init value and return the CRC of `data`, fed one
    /// byte at a time.
    pub fn compute(&self, data: &[u8]) -> u32 {
        self.reset();
        for &byte in data {
            self.feed8(byte);
        }
        self.read32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    /// A CRC unit in its reset configuration taking byte writes.
    fn crc_bus() -> SimBus {
        let bus = SimBus::new();
        bus.poke(INIT, DEFAULT_INIT_VALUE);
        bus.poke(POL, DEFAULT_POLYNOMIAL);
        bus.on_write(CR, |regs, v| {
            if v & CR_RESET != 0 {
                regs.set(DR, regs.get(INIT));
            }
            regs.set(CR, v & !CR_RESET);
        });
        bus.on_write(DR, |regs, v| {
            let poly = regs.get(POL);
            let mut crc = regs.get(DR) ^ ((v & 0xFF) << 24);
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ poly
                } else {
                    crc << 1
                };
            }
            regs.set(DR, crc);
        });
        bus
    }

    #[test]
    fn crc32_mpeg2_check_value() {
        let bus = crc_bus();
        let crc = Crc::new(&bus);
        crc.init(&Config::default());
        assert_eq!(crc.compute(b"123456789"), 0x0376_E6E7);
        // A second run starts over from the init value.
        assert_eq!(crc.compute(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn init_writes_the_layout() {
        let bus = crc_bus();
        let crc = Crc::new(&bus);
        crc.init(&Config {
            polynomial_size: PolynomialSize::Bits16,
            polynomial: 0x8005,
            init_value: 0,
            input_reverse: InputReverse::Byte,
            output_reverse: true,
        });
        assert_eq!(crc.polynomial_size(), PolynomialSize::Bits16);
        assert_eq!(bus.peek(CR), (0b01 << 3) | (0b01 << 5) | CR_REV_OUT);
        assert_eq!(crc.polynomial(), 0x8005);
        assert_eq!(crc.init_value(), 0);
    }

    #[test]
    fn deinit_restores_defaults() {
        let bus = crc_bus();
        let crc = Crc::new(&bus);
        crc.set_polynomial(0x07);
        crc.set_init_value(0);
        crc.write_idr(0x5A);
        crc.deinit();
        assert_eq!(crc.polynomial(), DEFAULT_POLYNOMIAL);
        assert_eq!(crc.init_value(), DEFAULT_INIT_VALUE);
        assert_eq!(crc.read_idr(), 0);
        assert_eq!(crc.read32(), DEFAULT_INIT_VALUE);
    }
}
