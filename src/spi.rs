//! Serial peripheral interface and I2S
//!
//! SPI1 and SPI2 are full-duplex SPI controllers with a 32-bit FIFO on each
//! side. SPI1 can also run as an I2S audio interface (see [`Spi::init_i2s`]).
//! The data register must be accessed with the width of a frame: byte
//! accesses for frames up to 8 bits, half-word accesses above.

use embedded_hal::spi::{ErrorType, SpiBus};

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;
use crate::poll::{poll_until, Spin};
use crate::rcc::{Apb1Mask, Apb2Mask, Rcc};

const CR1: u32 = 0x00;
const CR2: u32 = 0x04;
const SR: u32 = 0x08;
const DR: u32 = 0x0C;
const CRCPR: u32 = 0x10;
const RXCRCR: u32 = 0x14;
const TXCRCR: u32 = 0x18;
const I2SCFGR: u32 = 0x1C;
const I2SPR: u32 = 0x20;

const CR1_CPHA: u32 = 1 << 0;
const CR1_CPOL: u32 = 1 << 1;
const CR1_MSTR: u32 = 1 << 2;
const CR1_BR: u32 = 0b111 << 3;
const CR1_SPE: u32 = 1 << 6;
const CR1_LSBFIRST: u32 = 1 << 7;
const CR1_SSI: u32 = 1 << 8;
const CR1_SSM: u32 = 1 << 9;
const CR1_RXONLY: u32 = 1 << 10;
const CR1_CRCL: u32 = 1 << 11;
const CR1_CRCNEXT: u32 = 1 << 12;
const CR1_CRCEN: u32 = 1 << 13;
const CR1_BIDIOE: u32 = 1 << 14;
const CR1_BIDIMODE: u32 = 1 << 15;
/// CR1 fields written by [`Spi::init`].
const CR1_INIT: u32 = CR1_BIDIMODE
    | CR1_BIDIOE
    | CR1_RXONLY
    | CR1_MSTR
    | CR1_SSI
    | CR1_CPOL
    | CR1_CPHA
    | CR1_SSM
    | CR1_BR
    | CR1_LSBFIRST
    | CR1_CRCEN;

const CR2_RXDMAEN: u32 = 1 << 0;
const CR2_TXDMAEN: u32 = 1 << 1;
const CR2_SSOE: u32 = 1 << 2;
const CR2_NSSP: u32 = 1 << 3;
const CR2_FRF: u32 = 1 << 4;
const CR2_ERRIE: u32 = 1 << 5;
const CR2_RXNEIE: u32 = 1 << 6;
const CR2_TXEIE: u32 = 1 << 7;
const CR2_DS: u32 = 0xF << 8;
const CR2_FRXTH: u32 = 1 << 12;
const CR2_LDMARX: u32 = 1 << 13;
const CR2_LDMATX: u32 = 1 << 14;
const CR2_IE: u32 = CR2_ERRIE | CR2_RXNEIE | CR2_TXEIE;

const SR_RXNE: u32 = 1 << 0;
const SR_TXE: u32 = 1 << 1;
const SR_CRCERR: u32 = 1 << 4;
const SR_MODF: u32 = 1 << 5;
const SR_OVR: u32 = 1 << 6;
const SR_BSY: u32 = 1 << 7;
const SR_FRLVL: u32 = 0b11 << 9;
const SR_FTLVL: u32 = 0b11 << 11;

const I2SCFGR_CHLEN: u32 = 1 << 0;
const I2SCFGR_DATLEN: u32 = 0b11 << 1;
const I2SCFGR_CKPOL: u32 = 1 << 3;
const I2SCFGR_I2SSTD: u32 = 0b11 << 4;
const I2SCFGR_PCMSYNC: u32 = 1 << 7;
const I2SCFGR_I2SCFG: u32 = 0b11 << 8;
const I2SCFGR_I2SE: u32 = 1 << 10;
const I2SCFGR_I2SMOD: u32 = 1 << 11;
/// I2SCFGR fields written by [`Spi::init_i2s`].
const I2SCFGR_INIT: u32 = I2SCFGR_CHLEN
    | I2SCFGR_DATLEN
    | I2SCFGR_CKPOL
    | I2SCFGR_I2SSTD
    | I2SCFGR_PCMSYNC
    | I2SCFGR_I2SCFG
    | I2SCFGR_I2SE
    | I2SCFGR_I2SMOD;

const I2SPR_I2SDIV: u32 = 0xFF;
const I2SPR_ODD: u32 = 1 << 8;
const I2SPR_MCKOE: u32 = 1 << 9;

/// Audio frequency value that keeps the default prescaler.
pub const AUDIO_FREQ_DEFAULT: u32 = 2;

/// Polls of BSY before a blocking flush gives up.
pub const FLUSH_TIMEOUT_POLLS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Instance {
    Spi1,
    Spi2,
}

impl Instance {
    const fn base(self) -> u32 {
        match self {
            Instance::Spi1 => map::SPI1,
            Instance::Spi2 => map::SPI2,
        }
    }

    pub const fn interrupt(self) -> Interrupt {
        match self {
            Instance::Spi1 => Interrupt::Spi1,
            Instance::Spi2 => Interrupt::Spi2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferDirection {
    FullDuplex = 0,
    SimplexRx = CR1_RXONLY as isize,
    HalfDuplexRx = CR1_BIDIMODE as isize,
    HalfDuplexTx = (CR1_BIDIMODE | CR1_BIDIOE) as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Slave = 0,
    /// Master, with the internal slave select held high.
    Master = (CR1_MSTR | CR1_SSI) as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataWidth {
    Bits4 = 0x3 << 8,
    Bits5 = 0x4 << 8,
    Bits6 = 0x5 << 8,
    Bits7 = 0x6 << 8,
    Bits8 = 0x7 << 8,
    Bits9 = 0x8 << 8,
    Bits10 = 0x9 << 8,
    Bits11 = 0xA << 8,
    Bits12 = 0xB << 8,
    Bits13 = 0xC << 8,
    Bits14 = 0xD << 8,
    Bits15 = 0xE << 8,
    Bits16 = 0xF << 8,
}

impl DataWidth {
    /// Number of bits per frame.
    pub const fn bits(self) -> u8 {
        ((self as u32 >> 8) + 1) as u8
    }

    fn from_field(ds: u32) -> Self {
        match ds >> 8 {
            0x0..=0x3 => DataWidth::Bits4,
            0x4 => DataWidth::Bits5,
            0x5 => DataWidth::Bits6,
            0x6 => DataWidth::Bits7,
            0x7 => DataWidth::Bits8,
            0x8 => DataWidth::Bits9,
            0x9 => DataWidth::Bits10,
            0xA => DataWidth::Bits11,
            0xB => DataWidth::Bits12,
            0xC => DataWidth::Bits13,
            0xD => DataWidth::Bits14,
            0xE => DataWidth::Bits15,
            _ => DataWidth::Bits16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    IdleLow = 0,
    IdleHigh = CR1_CPOL as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    CaptureOnFirstTransition = 0,
    CaptureOnSecondTransition = CR1_CPHA as isize,
}

/// Slave select management. The CR2 part is kept in the upper half-word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Nss {
    /// Managed by software through SSI.
    Soft = CR1_SSM as isize,
    HardInput = 0,
    HardOutput = (CR2_SSOE << 16) as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaudRatePrescaler {
    Div2 = 0b000 << 3,
    Div4 = 0b001 << 3,
    Div8 = 0b010 << 3,
    Div16 = 0b011 << 3,
    Div32 = 0b100 << 3,
    Div64 = 0b101 << 3,
    Div128 = 0b110 << 3,
    Div256 = 0b111 << 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    MsbFirst = 0,
    LsbFirst = CR1_LSBFIRST as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Motorola = 0,
    Ti = CR2_FRF as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcLength {
    Bits8 = 0,
    Bits16 = CR1_CRCL as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxFifoThreshold {
    /// RXNE once 16 bits are in the FIFO.
    Half = 0,
    /// RXNE once 8 bits are in the FIFO.
    Quarter = CR2_FRXTH as isize,
}

/// FIFO occupation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoLevel {
    Empty = 0b00,
    Quarter = 0b01,
    Half = 0b10,
    Full = 0b11,
}

impl FifoLevel {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => FifoLevel::Empty,
            0b01 => FifoLevel::Quarter,
            0b10 => FifoLevel::Half,
            _ => FifoLevel::Full,
        }
    }
}

/// Odd number of DMA transfers, for data packing with 8-bit frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaParity {
    Even,
    Odd,
}

/// Status flags in SR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    Rxne = 1 << 0,
    Txe = 1 << 1,
    /// I2S channel side, set for the right channel.
    Chside = 1 << 2,
    /// I2S underrun.
    Udr = 1 << 3,
    CrcErr = 1 << 4,
    Modf = 1 << 5,
    Ovr = 1 << 6,
    Bsy = 1 << 7,
    /// TI or I2S frame format error.
    Fre = 1 << 8,
}

/// The error flags, cleared by software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorFlag {
    Udr = 1 << 3,
    CrcErr = 1 << 4,
    Modf = 1 << 5,
    Ovr = 1 << 6,
    Fre = 1 << 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Overrun, mode fault, CRC and frame errors.
    Error = CR2_ERRIE as isize,
    Rxne = CR2_RXNEIE as isize,
    Txe = CR2_TXEIE as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub transfer_direction: TransferDirection,
    pub mode: Mode,
    pub data_width: DataWidth,
    pub polarity: Polarity,
    pub phase: Phase,
    pub nss: Nss,
    pub baud_rate: BaudRatePrescaler,
    pub bit_order: BitOrder,
    pub crc_calculation: bool,
    /// Written only when `crc_calculation` is set.
    pub crc_polynomial: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer_direction: TransferDirection::FullDuplex,
            mode: Mode::Slave,
            data_width: DataWidth::Bits8,
            polarity: Polarity::IdleLow,
            phase: Phase::CaptureOnFirstTransition,
            nss: Nss::HardInput,
            baud_rate: BaudRatePrescaler::Div2,
            bit_order: BitOrder::MsbFirst,
            crc_calculation: false,
            crc_polynomial: 7,
        }
    }
}

// I2S.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sMode {
    SlaveTx = 0b00 << 8,
    SlaveRx = 0b01 << 8,
    MasterTx = 0b10 << 8,
    MasterRx = 0b11 << 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sStandard {
    Philips = 0b00 << 4,
    Msb = 0b01 << 4,
    Lsb = 0b10 << 4,
    PcmShort = 0b11 << 4,
    PcmLong = (0b11 << 4) | I2SCFGR_PCMSYNC as isize,
}

/// Data length and channel length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sDataFormat {
    Data16Channel16 = 0,
    Data16Channel32 = I2SCFGR_CHLEN as isize,
    Data24Channel32 = (I2SCFGR_CHLEN | 0b01 << 1) as isize,
    Data32Channel32 = (I2SCFGR_CHLEN | 0b10 << 1) as isize,
}

impl I2sDataFormat {
    /// Channel length in 16-bit units.
    const fn packet_length(self) -> u32 {
        match self {
            I2sDataFormat::Data16Channel16 => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sPolarity {
    IdleLow = 0,
    IdleHigh = I2SCFGR_CKPOL as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2sConfig {
    pub mode: I2sMode,
    pub standard: I2sStandard,
    pub data_format: I2sDataFormat,
    pub mclk_output: bool,
    /// Sampling frequency in Hz, or [`AUDIO_FREQ_DEFAULT`].
    pub audio_freq: u32,
    pub polarity: I2sPolarity,
}

impl Default for I2sConfig {
    fn default() -> Self {
        Self {
            mode: I2sMode::SlaveTx,
            standard: I2sStandard::Philips,
            data_format: I2sDataFormat::Data16Channel16,
            mclk_output: false,
            audio_freq: AUDIO_FREQ_DEFAULT,
            polarity: I2sPolarity::IdleLow,
        }
    }
}

/// I2S clock divider: the clock is divided by `2 * linear + odd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2sPrescaler {
    pub linear: u8,
    pub odd: bool,
}

impl I2sPrescaler {
    pub const DEFAULT: Self = Self {
        linear: 2,
        odd: false,
    };

    pub const fn divider(self) -> u32 {
        2 * self.linear as u32 + self.odd as u32
    }
}

/// Compute the I2S prescaler for `config.audio_freq`.
///
/// `source_clock` returns the I2S kernel clock (SYSCLK) in Hz and is only
/// called when a frequency other than [`AUDIO_FREQ_DEFAULT`] is requested.
/// The divider is rounded to the nearest integer; a zero frequency, or a
/// linear part below 2 or above 255, falls back to [`I2sPrescaler::DEFAULT`].
pub fn compute_i2s_prescaler(config: &I2sConfig, source_clock: impl FnOnce() -> u32) -> I2sPrescaler {
    if config.audio_freq == AUDIO_FREQ_DEFAULT || config.audio_freq == 0 {
        return I2sPrescaler::DEFAULT;
    }

    let source = source_clock();
    let frame_clock = if config.mclk_output {
        source / 256
    } else {
        source / (32 * config.data_format.packet_length())
    };
    // Tenths, plus one half for rounding.
    let tmp = (frame_clock as u64 * 10 / config.audio_freq as u64 + 5) / 10;
    let odd = tmp & 1;
    let linear = (tmp - odd) / 2;

    if !(2..=0xFF).contains(&linear) {
        return I2sPrescaler::DEFAULT;
    }
    I2sPrescaler {
        linear: linear as u8,
        odd: odd != 0,
    }
}

#[derive(Debug)]
pub struct Spi<'a, B: Bus> {
    bus: &'a B,
    instance: Instance,
}

impl<'a, B: Bus> Spi<'a, B> {
    pub fn new(bus: &'a B, instance: Instance) -> Self {
        Self { bus, instance }
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    #[inline]
    fn reg(&self, offset: u32) -> u32 {
        self.instance.base() + offset
    }

    /// Configure a disabled SPI. Fails with [`Error::Enabled`] and writes
    /// nothing if SPE is set.
    pub fn init(&self, config: &Config) -> Result<(), Error> {
        if self.is_enabled() {
            return Err(Error::Enabled);
        }

        let nss = config.nss as u32;
        self.bus.modify_bits(
            self.reg(CR1),
            CR1_INIT,
            config.transfer_direction as u32
                | config.mode as u32
                | config.polarity as u32
                | config.phase as u32
                | (nss & CR1_SSM)
                | config.baud_rate as u32
                | config.bit_order as u32
                | if config.crc_calculation { CR1_CRCEN } else { 0 },
        );
        self.bus.modify_bits(
            self.reg(CR2),
            CR2_DS | CR2_SSOE,
            config.data_width as u32 | (nss >> 16),
        );
        if config.data_width.bits() <= 8 {
            self.set_rx_fifo_threshold(RxFifoThreshold::Quarter);
        }
        if config.crc_calculation {
            self.set_crc_polynomial(config.crc_polynomial);
        }
        self.bus.clear_bits(self.reg(I2SCFGR), I2SCFGR_I2SMOD);
        Ok(())
    }

    /// Reset the instance through the RCC.
    pub fn deinit<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        match self.instance {
            Instance::Spi1 => rcc.reset_pulse(Apb2Mask::SPI1),
            Instance::Spi2 => rcc.reset_pulse(Apb1Mask::SPI2),
        }
    }

    pub fn enable(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_SPE);
    }

    pub fn disable(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_SPE);
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_set(self.reg(CR1), CR1_SPE)
    }

    pub fn set_mode(&self, mode: Mode) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_MSTR | CR1_SSI, mode as u32);
    }

    pub fn mode(&self) -> Mode {
        if self.bus.is_set(self.reg(CR1), CR1_MSTR) {
            Mode::Master
        } else {
            Mode::Slave
        }
    }

    pub fn set_protocol(&self, protocol: Protocol) {
        self.bus
            .modify_bits(self.reg(CR2), CR2_FRF, protocol as u32);
    }

    pub fn set_phase(&self, phase: Phase) {
        self.bus.modify_bits(self.reg(CR1), CR1_CPHA, phase as u32);
    }

    pub fn set_polarity(&self, polarity: Polarity) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_CPOL, polarity as u32);
    }

    pub fn set_baud_rate_prescaler(&self, prescaler: BaudRatePrescaler) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_BR, prescaler as u32);
    }

    pub fn baud_rate_prescaler(&self) -> BaudRatePrescaler {
        match self.bus.field(self.reg(CR1), CR1_BR) >> 3 {
            0b000 => BaudRatePrescaler::Div2,
            0b001 => BaudRatePrescaler::Div4,
            0b010 => BaudRatePrescaler::Div8,
            0b011 => BaudRatePrescaler::Div16,
            0b100 => BaudRatePrescaler::Div32,
            0b101 => BaudRatePrescaler::Div64,
            0b110 => BaudRatePrescaler::Div128,
            _ => BaudRatePrescaler::Div256,
        }
    }

    pub fn set_bit_order(&self, order: BitOrder) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_LSBFIRST, order as u32);
    }

    pub fn set_transfer_direction(&self, direction: TransferDirection) {
        self.bus.modify_bits(
            self.reg(CR1),
            CR1_RXONLY | CR1_BIDIMODE | CR1_BIDIOE,
            direction as u32,
        );
    }

    pub fn set_data_width(&self, width: DataWidth) {
        self.bus.modify_bits(self.reg(CR2), CR2_DS, width as u32);
    }

    pub fn data_width(&self) -> DataWidth {
        DataWidth::from_field(self.bus.field(self.reg(CR2), CR2_DS))
    }

    pub fn set_rx_fifo_threshold(&self, threshold: RxFifoThreshold) {
        self.bus
            .modify_bits(self.reg(CR2), CR2_FRXTH, threshold as u32);
    }

    // CRC.

    pub fn enable_crc(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_CRCEN);
    }

    pub fn disable_crc(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_CRCEN);
    }

    pub fn is_crc_enabled(&self) -> bool {
        self.bus.is_set(self.reg(CR1), CR1_CRCEN)
    }

    pub fn set_crc_length(&self, length: CrcLength) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_CRCL, length as u32);
    }

    /// Send the CRC after the next data frame.
    pub fn set_crc_next(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_CRCNEXT);
    }

    pub fn set_crc_polynomial(&self, polynomial: u16) {
        self.bus.write(self.reg(CRCPR), polynomial as u32);
    }

    pub fn crc_polynomial(&self) -> u16 {
        self.bus.read(self.reg(CRCPR)) as u16
    }

    pub fn rx_crc(&self) -> u16 {
        self.bus.read(self.reg(RXCRCR)) as u16
    }

    pub fn tx_crc(&self) -> u16 {
        self.bus.read(self.reg(TXCRCR)) as u16
    }

    // Slave select.

    pub fn set_nss_mode(&self, nss: Nss) {
        let nss = nss as u32;
        self.bus
            .modify_bits(self.reg(CR1), CR1_SSM, nss & CR1_SSM);
        self.bus
            .modify_bits(self.reg(CR2), CR2_SSOE, nss >> 16);
    }

    pub fn nss_mode(&self) -> Nss {
        if self.bus.is_set(self.reg(CR1), CR1_SSM) {
            Nss::Soft
        } else if self.bus.is_set(self.reg(CR2), CR2_SSOE) {
            Nss::HardOutput
        } else {
            Nss::HardInput
        }
    }

    /// Pulse NSS between frames in master mode.
    pub fn enable_nss_pulse(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_NSSP);
    }

    pub fn disable_nss_pulse(&self) {
        self.bus.clear_bits(self.reg(CR2), CR2_NSSP);
    }

    // FIFOs and DMA.

    pub fn rx_fifo_level(&self) -> FifoLevel {
        FifoLevel::from_bits(self.bus.field(self.reg(SR), SR_FRLVL) >> 9)
    }

    pub fn tx_fifo_level(&self) -> FifoLevel {
        FifoLevel::from_bits(self.bus.field(self.reg(SR), SR_FTLVL) >> 11)
    }

    pub fn enable_dma_rx(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_RXDMAEN);
    }

    pub fn disable_dma_rx(&self) {
        self.bus.clear_bits(self.reg(CR2), CR2_RXDMAEN);
    }

    pub fn enable_dma_tx(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_TXDMAEN);
    }

    pub fn disable_dma_tx(&self) {
        self.bus.clear_bits(self.reg(CR2), CR2_TXDMAEN);
    }

    pub fn set_dma_parity_rx(&self, parity: DmaParity) {
        let set = if parity == DmaParity::Odd { CR2_LDMARX } else { 0 };
        self.bus.modify_bits(self.reg(CR2), CR2_LDMARX, set);
    }

    pub fn set_dma_parity_tx(&self, parity: DmaParity) {
        let set = if parity == DmaParity::Odd { CR2_LDMATX } else { 0 };
        self.bus.modify_bits(self.reg(CR2), CR2_LDMATX, set);
    }

    /// Address of the data register, for DMA.
    pub fn data_register_address(&self) -> u32 {
        self.reg(DR)
    }

    // Data.

    pub fn receive_data8(&self) -> u8 {
        self.bus.read_u8(self.reg(DR))
    }

    pub fn receive_data16(&self) -> u16 {
        self.bus.read_u16(self.reg(DR))
    }

    pub fn transmit_data8(&self, data: u8) {
        self.bus.write_u8(self.reg(DR), data);
    }

    pub fn transmit_data16(&self, data: u16) {
        self.bus.write_u16(self.reg(DR), data);
    }

    fn check_errors(&self, sr: u32) -> Result<(), Error> {
        if sr & SR_OVR != 0 {
            Err(Error::Overrun)
        } else if sr & SR_MODF != 0 {
            Err(Error::ModeFault)
        } else {
            Ok(())
        }
    }

    /// Queue one frame of up to 8 bits.
    pub fn send(&self, word: u8) -> nb::Result<(), Error> {
        let sr = self.bus.read(self.reg(SR));
        self.check_errors(sr)?;
        if sr & SR_TXE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.transmit_data8(word);
        Ok(())
    }

    /// Take one received frame of up to 8 bits.
    pub fn read(&self) -> nb::Result<u8, Error> {
        let sr = self.bus.read(self.reg(SR));
        self.check_errors(sr)?;
        if sr & SR_RXNE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.receive_data8())
    }

    pub fn send_u16(&self, word: u16) -> nb::Result<(), Error> {
        let sr = self.bus.read(self.reg(SR));
        self.check_errors(sr)?;
        if sr & SR_TXE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.transmit_data16(word);
        Ok(())
    }

    pub fn read_u16(&self) -> nb::Result<u16, Error> {
        let sr = self.bus.read(self.reg(SR));
        self.check_errors(sr)?;
        if sr & SR_RXNE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.receive_data16())
    }

    pub fn is_busy(&self) -> bool {
        self.bus.is_set(self.reg(SR), SR_BSY)
    }

    // I2S.

    /// Configure the instance as I2S. Fails with [`Error::Enabled`] and
    /// writes nothing if I2SE is set.
    ///
    /// `source_clock` is only called if a specific audio frequency is
    /// requested, see [`compute_i2s_prescaler`].
    pub fn init_i2s(&self, config: &I2sConfig, source_clock: impl FnOnce() -> u32) -> Result<(), Error> {
        if self.is_i2s_enabled() {
            return Err(Error::Enabled);
        }

        self.bus.modify_bits(
            self.reg(I2SCFGR),
            I2SCFGR_INIT,
            I2SCFGR_I2SMOD
                | config.mode as u32
                | config.standard as u32
                | config.data_format as u32
                | config.polarity as u32,
        );

        let prescaler = compute_i2s_prescaler(config, source_clock);
        trace!("i2s: divider {=u32}", prescaler.divider());
        self.bus.write(
            self.reg(I2SPR),
            prescaler.linear as u32
                | if prescaler.odd { I2SPR_ODD } else { 0 }
                | if config.mclk_output { I2SPR_MCKOE } else { 0 },
        );
        Ok(())
    }

    pub fn configure_prescaler(&self, prescaler: I2sPrescaler) {
        self.bus.modify_bits(
            self.reg(I2SPR),
            I2SPR_I2SDIV | I2SPR_ODD,
            prescaler.linear as u32 | if prescaler.odd { I2SPR_ODD } else { 0 },
        );
    }

    pub fn prescaler(&self) -> I2sPrescaler {
        let pr = self.bus.read(self.reg(I2SPR));
        I2sPrescaler {
            linear: (pr & I2SPR_I2SDIV) as u8,
            odd: pr & I2SPR_ODD != 0,
        }
    }

    pub fn enable_i2s(&self) {
        self.bus.set_bits(self.reg(I2SCFGR), I2SCFGR_I2SE);
    }

    pub fn disable_i2s(&self) {
        self.bus.clear_bits(self.reg(I2SCFGR), I2SCFGR_I2SE);
    }

    pub fn is_i2s_enabled(&self) -> bool {
        self.bus.is_set(self.reg(I2SCFGR), I2SCFGR_I2SE)
    }

    pub fn set_i2s_data_format(&self, format: I2sDataFormat) {
        self.bus.modify_bits(
            self.reg(I2SCFGR),
            I2SCFGR_CHLEN | I2SCFGR_DATLEN,
            format as u32,
        );
    }

    pub fn set_i2s_polarity(&self, polarity: I2sPolarity) {
        self.bus
            .modify_bits(self.reg(I2SCFGR), I2SCFGR_CKPOL, polarity as u32);
    }

    pub fn set_i2s_standard(&self, standard: I2sStandard) {
        self.bus.modify_bits(
            self.reg(I2SCFGR),
            I2SCFGR_I2SSTD | I2SCFGR_PCMSYNC,
            standard as u32,
        );
    }

    pub fn set_i2s_mode(&self, mode: I2sMode) {
        self.bus
            .modify_bits(self.reg(I2SCFGR), I2SCFGR_I2SCFG, mode as u32);
    }

    pub fn enable_master_clock_output(&self) {
        self.bus.set_bits(self.reg(I2SPR), I2SPR_MCKOE);
    }

    pub fn disable_master_clock_output(&self) {
        self.bus.clear_bits(self.reg(I2SPR), I2SPR_MCKOE);
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(self.reg(SR)) & flag as u32 != 0
    }

    /// Clear an error flag with the sequence the hardware expects.
    pub fn clear_flag(&self, flag: ErrorFlag) {
        match flag {
            ErrorFlag::CrcErr => self.bus.clear_bits(self.reg(SR), SR_CRCERR),
            ErrorFlag::Modf => {
                let _ = self.bus.read(self.reg(SR));
                self.bus.clear_bits(self.reg(CR1), CR1_SPE);
            }
            ErrorFlag::Ovr => {
                let _ = self.bus.read(self.reg(DR));
                let _ = self.bus.read(self.reg(SR));
            }
            ErrorFlag::Fre | ErrorFlag::Udr => {
                let _ = self.bus.read(self.reg(SR));
            }
        }
    }

    /// Read the error flag, clearing it if it was set.
    pub fn take_flag(&self, flag: ErrorFlag) -> bool {
        if self.bus.read(self.reg(SR)) & flag as u32 != 0 {
            self.clear_flag(flag);
            true
        } else {
            false
        }
    }

    // Interrupts.

    pub fn is_interrupt_enabled(&self, event: Event) -> bool {
        self.bus.is_set(self.reg(CR2), event as u32)
    }

    /// Clear the error flags, enable or disable the `events`, then route the
    /// instance line in the NVIC according to the remaining enables.
    pub fn configure_interrupts(&self, events: &[Event], enable: bool, priority: u8) {
        for flag in [ErrorFlag::CrcErr, ErrorFlag::Modf, ErrorFlag::Ovr, ErrorFlag::Fre] {
            self.take_flag(flag);
        }

        let mask = events.iter().fold(0, |m, e| m | *e as u32);
        if enable {
            self.bus.set_bits(self.reg(CR2), mask);
        } else {
            self.bus.clear_bits(self.reg(CR2), mask);
        }

        let active = self.bus.read(self.reg(CR2)) & CR2_IE != 0;
        Nvic::new(self.bus).route(self.instance.interrupt(), active, priority);
    }
}

impl<B: Bus> ErrorType for Spi<'_, B> {
    type Error = Error;
}

impl<B: Bus> SpiBus<u8> for Spi<'_, B> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Error> {
        for word in words {
            nb::block!(self.send(0))?;
            *word = nb::block!(Spi::read(self))?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Error> {
        for &word in words {
            nb::block!(self.send(word))?;
            nb::block!(Spi::read(self))?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Error> {
        let len = read.len().max(write.len());
        for i in 0..len {
            nb::block!(self.send(write.get(i).copied().unwrap_or(0)))?;
            let word = nb::block!(Spi::read(self))?;
            if let Some(r) = read.get_mut(i) {
                *r = word;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Error> {
        for word in words {
            nb::block!(self.send(*word))?;
            *word = nb::block!(Spi::read(self))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        poll_until(Spin, FLUSH_TIMEOUT_POLLS, || !self.is_busy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Access, SimBus};
    use proptest::prelude::*;

    const SPI1_CR1: u32 = map::SPI1 + CR1;
    const SPI1_CR2: u32 = map::SPI1 + CR2;
    const SPI1_SR: u32 = map::SPI1 + SR;
    const SPI1_DR: u32 = map::SPI1 + DR;
    const SPI1_I2SCFGR: u32 = map::SPI1 + I2SCFGR;
    const SPI1_I2SPR: u32 = map::SPI1 + I2SPR;

    #[test]
    fn init_is_refused_while_enabled() {
        let bus = SimBus::new();
        bus.poke(SPI1_CR1, CR1_SPE);
        let spi = Spi::new(&bus, Instance::Spi1);
        assert_eq!(spi.init(&Config::default()), Err(Error::Enabled));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn init_master_with_software_nss() {
        let bus = SimBus::new();
        bus.poke(SPI1_I2SCFGR, I2SCFGR_I2SMOD);
        let spi = Spi::new(&bus, Instance::Spi1);
        spi.init(&Config {
            mode: Mode::Master,
            nss: Nss::Soft,
            baud_rate: BaudRatePrescaler::Div16,
            polarity: Polarity::IdleHigh,
            crc_calculation: true,
            crc_polynomial: 0x1021,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            bus.peek(SPI1_CR1),
            CR1_MSTR | CR1_SSI | CR1_SSM | CR1_CPOL | (0b011 << 3) | CR1_CRCEN
        );
        assert_eq!(bus.peek(SPI1_CR2), (0x7 << 8) | CR2_FRXTH);
        assert_eq!(spi.crc_polynomial(), 0x1021);
        assert_eq!(bus.peek(SPI1_I2SCFGR), 0);
        assert_eq!(spi.nss_mode(), Nss::Soft);
        assert_eq!(spi.data_width(), DataWidth::Bits8);
    }

    #[test]
    fn hard_output_nss_lands_in_cr2() {
        let bus = SimBus::new();
        let spi = Spi::new(&bus, Instance::Spi2);
        spi.init(&Config {
            nss: Nss::HardOutput,
            data_width: DataWidth::Bits16,
            ..Default::default()
        })
        .unwrap();
        let cr2 = bus.peek(map::SPI2 + CR2);
        assert_eq!(cr2, CR2_SSOE | (0xF << 8));
        assert_eq!(bus.peek(map::SPI2 + CR1) & CR1_SSM, 0);
    }

    #[test]
    fn default_audio_freq_does_not_query_the_clock() {
        let config = I2sConfig::default();
        let prescaler = compute_i2s_prescaler(&config, || panic!("clock queried"));
        assert_eq!(prescaler, I2sPrescaler::DEFAULT);
    }

    #[test]
    fn i2s_prescaler_for_48khz() {
        let config = I2sConfig {
            audio_freq: 48_000,
            ..Default::default()
        };
        // 48 MHz / 32 / 48 kHz = 31.25, rounded to 31.
        let prescaler = compute_i2s_prescaler(&config, || 48_000_000);
        assert_eq!(
            prescaler,
            I2sPrescaler {
                linear: 15,
                odd: true
            }
        );
    }

    #[test]
    fn i2s_prescaler_with_master_clock() {
        let config = I2sConfig {
            audio_freq: 8_000,
            mclk_output: true,
            ..Default::default()
        };
        // 48 MHz / 256 / 8 kHz = 23.4, rounded to 23.
        let prescaler = compute_i2s_prescaler(&config, || 48_000_000);
        assert_eq!(prescaler.divider(), 23);
    }

    #[test]
    fn i2s_prescaler_out_of_range_falls_back() {
        let fast = I2sConfig {
            audio_freq: 192_000,
            data_format: I2sDataFormat::Data32Channel32,
            ..Default::default()
        };
        // 8 MHz / 64 / 192 kHz rounds to 1.
        assert_eq!(compute_i2s_prescaler(&fast, || 8_000_000), I2sPrescaler::DEFAULT);

        let slow = I2sConfig {
            audio_freq: 8_000,
            ..Default::default()
        };
        // 48 MHz / 32 / 8 kHz = 187.5, still in range.
        assert_ne!(compute_i2s_prescaler(&slow, || 48_000_000), I2sPrescaler::DEFAULT);
        let slower = I2sConfig {
            audio_freq: 100,
            ..Default::default()
        };
        assert_eq!(compute_i2s_prescaler(&slower, || 48_000_000), I2sPrescaler::DEFAULT);
    }

    #[test]
    fn i2s_prescaler_zero_frequency_and_full_scale_clock() {
        let zero = I2sConfig {
            audio_freq: 0,
            ..Default::default()
        };
        assert_eq!(compute_i2s_prescaler(&zero, || 48_000_000), I2sPrescaler::DEFAULT);

        let mclk = I2sConfig {
            audio_freq: 48_000,
            mclk_output: true,
            ..Default::default()
        };
        // (2^32 - 1) / 256 / 48 kHz = 349.5, rounded to 350.
        assert_eq!(
            compute_i2s_prescaler(&mclk, || u32::MAX),
            I2sPrescaler {
                linear: 175,
                odd: false
            }
        );
    }

    proptest! {
        #[test]
        fn i2s_divider_reproduces_the_frequency(
            source in 8_000_000u32..=48_000_000,
            freq in prop::sample::select(vec![8_000u32, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 96_000]),
            wide in any::<bool>(),
        ) {
            let data_format = if wide {
                I2sDataFormat::Data32Channel32
            } else {
                I2sDataFormat::Data16Channel16
            };
            let config = I2sConfig { audio_freq: freq, data_format, ..Default::default() };
            let prescaler = compute_i2s_prescaler(&config, || source);

            let bits_per_frame = 32.0 * data_format.packet_length() as f64;
            let exact = source as f64 / bits_per_frame / freq as f64;
            if prescaler != I2sPrescaler::DEFAULT {
                prop_assert!((prescaler.divider() as f64 - exact).abs() <= 1.0);
            } else {
                // Only out of range dividers fall back, or an exact divider of 4.
                prop_assert!(exact < 5.0 || exact > 511.0 || (exact - 4.0).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn init_i2s_writes_the_prescaler() {
        let bus = SimBus::new();
        let spi = Spi::new(&bus, Instance::Spi1);
        spi.init_i2s(
            &I2sConfig {
                mode: I2sMode::MasterTx,
                audio_freq: 48_000,
                mclk_output: true,
                ..Default::default()
            },
            || 48_000_000,
        )
        .unwrap();
        assert_eq!(bus.peek(SPI1_I2SCFGR), I2SCFGR_I2SMOD | (0b10 << 8));
        // 48 MHz / 256 / 48 kHz = 3.9, rounded to 4.
        assert_eq!(bus.peek(SPI1_I2SPR), 2 | I2SPR_MCKOE);
    }

    #[test]
    fn init_i2s_is_refused_while_enabled() {
        let bus = SimBus::new();
        bus.poke(SPI1_I2SCFGR, I2SCFGR_I2SE | I2SCFGR_I2SMOD);
        let spi = Spi::new(&bus, Instance::Spi1);
        assert_eq!(
            spi.init_i2s(&I2sConfig::default(), || 8_000_000),
            Err(Error::Enabled)
        );
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn crc_error_is_cleared_by_writing_zero() {
        let bus = SimBus::new();
        bus.poke(SPI1_SR, SR_CRCERR | SR_TXE);
        let spi = Spi::new(&bus, Instance::Spi1);
        assert!(spi.take_flag(ErrorFlag::CrcErr));
        assert_eq!(bus.writes_to(SPI1_SR), vec![SR_TXE]);
        assert!(!spi.take_flag(ErrorFlag::CrcErr));
    }

    #[test]
    fn mode_fault_is_cleared_by_reading_sr_then_writing_cr1() {
        let bus = SimBus::new();
        bus.poke(SPI1_SR, SR_MODF);
        bus.poke(SPI1_CR1, CR1_MSTR | CR1_SPE);
        // Writing CR1 after the SR read clears MODF.
        bus.on_write(SPI1_CR1, |regs, v| {
            regs.set(SPI1_CR1, v);
            regs.set(SPI1_SR, regs.get(SPI1_SR) & !SR_MODF);
        });
        let spi = Spi::new(&bus, Instance::Spi1);
        assert!(spi.take_flag(ErrorFlag::Modf));
        assert!(!spi.take_flag(ErrorFlag::Modf));

        let log = bus.log();
        let pos = log
            .iter()
            .position(|a| matches!(a, Access::Write(addr, _) if *addr == SPI1_CR1))
            .unwrap();
        assert!(matches!(log[pos - 2], Access::Read(addr, _) if addr == SPI1_SR));
    }

    #[test]
    fn overrun_is_cleared_by_reading_dr_then_sr() {
        let bus = SimBus::new();
        bus.poke(SPI1_SR, SR_OVR);
        let spi = Spi::new(&bus, Instance::Spi1);
        spi.clear_flag(ErrorFlag::Ovr);
        let log = bus.log();
        assert!(matches!(log[0], Access::Read(addr, _) if addr == SPI1_DR));
        assert!(matches!(log[1], Access::Read(addr, _) if addr == SPI1_SR));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn nb_send_blocks_until_txe() {
        let bus = SimBus::new();
        let spi = Spi::new(&bus, Instance::Spi1);
        assert_eq!(spi.send(0xA5), Err(nb::Error::WouldBlock));
        bus.poke(SPI1_SR, SR_TXE);
        assert_eq!(spi.send(0xA5), Ok(()));
        assert_eq!(bus.writes_to(SPI1_DR), vec![0xA5]);
        bus.poke(SPI1_SR, SR_OVR | SR_RXNE);
        assert_eq!(spi.read(), Err(nb::Error::Other(Error::Overrun)));
    }

    #[test]
    fn blocking_transfer_exchanges_bytes() {
        let bus = SimBus::new();
        // Loopback: what is written comes back, inverted.
        bus.poke(SPI1_SR, SR_TXE);
        bus.on_write(SPI1_DR, |regs, v| {
            regs.set(SPI1_DR, !v & 0xFF);
            regs.set(SPI1_SR, SR_TXE | SR_RXNE);
        });
        bus.on_read(SPI1_DR, |regs| {
            regs.set(SPI1_SR, SR_TXE);
            regs.get(SPI1_DR)
        });
        let mut spi = Spi::new(&bus, Instance::Spi1);
        let mut buf = [0x00, 0x0F, 0xF0];
        SpiBus::transfer_in_place(&mut spi, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xF0, 0x0F]);

        let mut read = [0u8; 2];
        SpiBus::transfer(&mut spi, &mut read, &[0x55]).unwrap();
        assert_eq!(read, [0xAA, 0xFF]);
    }

    #[test]
    fn flush_gives_up_on_a_stuck_busy_flag() {
        let bus = SimBus::new();
        let mut spi = Spi::new(&bus, Instance::Spi1);
        assert_eq!(SpiBus::flush(&mut spi), Ok(()));

        bus.poke(SPI1_SR, SR_BSY);
        assert_eq!(SpiBus::flush(&mut spi), Err(Error::Timeout));
        assert_eq!(bus.reads_of(SPI1_SR), FLUSH_TIMEOUT_POLLS as usize + 2);
    }

    #[test]
    fn interrupts_route_to_the_instance_line() {
        let bus = SimBus::new().with_nvic();
        let spi = Spi::new(&bus, Instance::Spi2);
        let nvic = Nvic::new(&bus);
        spi.configure_interrupts(&[Event::Rxne, Event::Error], true, 3);
        assert!(nvic.is_enabled(Interrupt::Spi2));
        assert!(!nvic.is_enabled(Interrupt::Spi1));
        assert_eq!(nvic.priority(Interrupt::Spi2), 3);
        spi.configure_interrupts(&[Event::Rxne, Event::Error], false, 3);
        assert!(!nvic.is_enabled(Interrupt::Spi2));
    }

    #[test]
    fn deinit_resets_the_right_bus() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        Spi::new(&bus, Instance::Spi2).deinit(&rcc);
        assert!(rcc.is_clock_enabled(Apb1Mask::SPI2));
        assert!(!rcc.is_clock_enabled(Apb2Mask::SPI1));
    }
}
