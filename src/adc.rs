//! Analog to digital converter
//!
//! The converter has a single instance with one regular group. Conversions
//! are started by software or by a timer trigger and run over the channels
//! selected in CHSELR, in scan order.

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;
use crate::poll::{poll_until, Spin};
use crate::rcc::{Apb2Mask, Rcc};

const ISR: u32 = map::ADC1;
const IER: u32 = map::ADC1 + 0x04;
const CR: u32 = map::ADC1 + 0x08;
const CFGR1: u32 = map::ADC1 + 0x0C;
const CFGR2: u32 = map::ADC1 + 0x10;
const SMPR: u32 = map::ADC1 + 0x14;
const TR: u32 = map::ADC1 + 0x20;
const CHSELR: u32 = map::ADC1 + 0x28;
const DR: u32 = map::ADC1 + 0x40;
const CCR: u32 = map::ADC_COMMON;

const CR_ADEN: u32 = 1 << 0;
const CR_ADDIS: u32 = 1 << 1;
const CR_ADSTART: u32 = 1 << 2;
const CR_ADSTP: u32 = 1 << 4;
const CR_ADCAL: u32 = 1 << 31;
/// CR bits that software can only set. Writing a 1 to one of them again
/// would re-issue the command, so commands write only their own bit.
const CR_SET_ONLY: u32 = CR_ADCAL | CR_ADSTP | CR_ADSTART | CR_ADDIS | CR_ADEN;

const CFGR1_DMAEN: u32 = 1 << 0;
const CFGR1_DMACFG: u32 = 1 << 1;
const CFGR1_SCANDIR: u32 = 1 << 2;
const CFGR1_RES: u32 = 0b11 << 3;
const CFGR1_ALIGN: u32 = 1 << 5;
const CFGR1_EXTSEL: u32 = 0b111 << 6;
const CFGR1_EXTEN: u32 = 0b11 << 10;
const CFGR1_OVRMOD: u32 = 1 << 12;
const CFGR1_CONT: u32 = 1 << 13;
const CFGR1_WAIT: u32 = 1 << 14;
const CFGR1_AUTOFF: u32 = 1 << 15;
const CFGR1_DISCEN: u32 = 1 << 16;
const CFGR1_AWDSGL: u32 = 1 << 22;
const CFGR1_AWDEN: u32 = 1 << 23;
const CFGR1_AWDCH: u32 = 0x1F << 26;

const CFGR2_CKMODE: u32 = 0b11 << 30;
const SMPR_SMP: u32 = 0b111;
const TR_LT: u32 = 0xFFF;
const TR_HT: u32 = 0xFFF << 16;
const CHSELR_ALL: u32 = 0x7FFFF;

const CCR_VREFEN: u32 = 1 << 22;
const CCR_TSEN: u32 = 1 << 23;
const CCR_VBATEN: u32 = 1 << 24;

const ISR_ALL: u32 = 0b1001_1111;
const DR_CALFACT: u32 = 0x7F;

/// Worst case for a conversion to stop: the longest conversion (239.5 + 12.5
/// ADC cycles, rounded to 512) at the slowest ADC clock (PCLK/4, with 16 as
/// the largest CPU/ADC ratio), times 4 CPU cycles per poll iteration.
pub const STOP_CONVERSION_TIMEOUT_CYCLES: u32 = 512 * 16 * 4;
/// Same bound for the disable command to complete.
pub const DISABLE_TIMEOUT_CYCLES: u32 = 512 * 16 * 4;
/// Bound for the calibration and for ADRDY after enabling.
pub const CALIBRATION_TIMEOUT_CYCLES: u32 = 512 * 16 * 4;

/// Clock of the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Clock {
    /// Dedicated 14 MHz oscillator.
    Async = 0,
    SyncPclkDiv2 = 0b01 << 30,
    SyncPclkDiv4 = 0b10 << 30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits12 = 0b00 << 3,
    Bits10 = 0b01 << 3,
    Bits8 = 0b10 << 3,
    Bits6 = 0b11 << 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataAlignment {
    Right = 0,
    Left = CFGR1_ALIGN as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LowPowerMode {
    None = 0,
    /// Hold the next conversion until the data register was read.
    AutoWait = CFGR1_WAIT as isize,
    /// Power down between conversions.
    AutoPowerOff = CFGR1_AUTOFF as isize,
    AutoWaitAutoPowerOff = (CFGR1_WAIT | CFGR1_AUTOFF) as isize,
}

/// Start of conversion source. External sources trigger on the rising edge
/// unless changed with [`Adc::set_trigger_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerSource {
    Software = 0,
    Tim1Trgo = (0b000 << 6) | (0b01 << 10),
    Tim1Ch4 = (0b001 << 6) | (0b01 << 10),
    Tim2Trgo = (0b010 << 6) | (0b01 << 10),
    Tim3Trgo = (0b011 << 6) | (0b01 << 10),
    Tim15Trgo = (0b100 << 6) | (0b01 << 10),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    Rising = 0b01 << 10,
    Falling = 0b10 << 10,
    Both = 0b11 << 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerDiscont {
    Disabled = 0,
    /// One channel converted per trigger.
    Rank1 = CFGR1_DISCEN as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConversionMode {
    Single = 0,
    Continuous = CFGR1_CONT as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaTransfer {
    None = 0,
    /// Requests stop when the DMA transfer count reaches zero.
    Limited = CFGR1_DMAEN as isize,
    /// Requests continue regardless of the DMA transfer count (circular DMA).
    Unlimited = (CFGR1_DMAEN | CFGR1_DMACFG) as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Overrun {
    DataPreserved = 0,
    DataOverwritten = CFGR1_OVRMOD as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanDirection {
    Forward = 0,
    Backward = CFGR1_SCANDIR as isize,
}

/// Sampling time in ADC clock cycles, common to all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingTime {
    Cycles1_5 = 0b000,
    Cycles7_5 = 0b001,
    Cycles13_5 = 0b010,
    Cycles28_5 = 0b011,
    Cycles41_5 = 0b100,
    Cycles55_5 = 0b101,
    Cycles71_5 = 0b110,
    Cycles239_5 = 0b111,
}

impl SamplingTime {
    fn from_bits(bits: u32) -> Self {
        match bits & SMPR_SMP {
            0b000 => Self::Cycles1_5,
            0b001 => Self::Cycles7_5,
            0b010 => Self::Cycles13_5,
            0b011 => Self::Cycles28_5,
            0b100 => Self::Cycles41_5,
            0b101 => Self::Cycles55_5,
            0b110 => Self::Cycles71_5,
            _ => Self::Cycles239_5,
        }
    }
}

/// Input channel. Channels 16 to 18 are internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    In0 = 0,
    In1 = 1,
    In2 = 2,
    In3 = 3,
    In4 = 4,
    In5 = 5,
    In6 = 6,
    In7 = 7,
    In8 = 8,
    In9 = 9,
    In10 = 10,
    In11 = 11,
    In12 = 12,
    In13 = 13,
    In14 = 14,
    In15 = 15,
    TempSensor = 16,
    VrefInt = 17,
    Vbat = 18,
}

impl Channel {
    #[inline]
    const fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// Channels observed by the analog watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogChannels {
    Disabled,
    AllRegular,
    Single(Channel),
}

impl WatchdogChannels {
    const fn bits(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::AllRegular => CFGR1_AWDEN,
            Self::Single(ch) => ((ch as u32) << 26) | CFGR1_AWDSGL | CFGR1_AWDEN,
        }
    }
}

/// Status flags in ISR. The same positions are the interrupt enables in IER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// Ready after enabling.
    Adrdy = 1 << 0,
    /// End of sampling phase.
    Eosmp = 1 << 1,
    /// End of conversion of one channel.
    Eoc = 1 << 2,
    /// End of the sequence.
    Eos = 1 << 3,
    Ovr = 1 << 4,
    /// Analog watchdog.
    Awd = 1 << 7,
}

/// Interrupt sources, at the same positions as [`Flag`].
pub type Event = Flag;

/// Converter settings. Written only while the ADC is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub clock: Clock,
    pub resolution: Resolution,
    pub data_alignment: DataAlignment,
    pub low_power_mode: LowPowerMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock: Clock::SyncPclkDiv2,
            resolution: Resolution::Bits12,
            data_alignment: DataAlignment::Right,
            low_power_mode: LowPowerMode::None,
        }
    }
}

/// Regular group settings. Written only while the ADC is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegularConfig {
    pub trigger_source: TriggerSource,
    pub sequencer_discont: SequencerDiscont,
    pub continuous_mode: ConversionMode,
    pub dma_transfer: DmaTransfer,
    pub overrun: Overrun,
}

impl Default for RegularConfig {
    fn default() -> Self {
        Self {
            trigger_source: TriggerSource::Software,
            sequencer_discont: SequencerDiscont::Disabled,
            continuous_mode: ConversionMode::Single,
            dma_transfer: DmaTransfer::None,
            overrun: Overrun::DataOverwritten,
        }
    }
}

/// Internal measurement paths in the common register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommonConfig {
    pub vrefint: bool,
    pub temperature_sensor: bool,
    pub vbat: bool,
}

impl CommonConfig {
    const fn bits(&self) -> u32 {
        (if self.vrefint { CCR_VREFEN } else { 0 })
            | (if self.temperature_sensor { CCR_TSEN } else { 0 })
            | (if self.vbat { CCR_VBATEN } else { 0 })
    }
}

/// The ADC1 instance.
#[derive(Debug)]
pub struct Adc<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Adc<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Apply `config`. Fails with [`Error::Enabled`] and writes nothing if
    /// the ADC is enabled.
    pub fn init(&self, config: &Config) -> Result<(), Error> {
        if self.is_enabled() {
            return Err(Error::Enabled);
        }
        self.bus.modify_bits(
            CFGR1,
            CFGR1_RES | CFGR1_ALIGN | CFGR1_WAIT | CFGR1_AUTOFF,
            config.resolution as u32 | config.data_alignment as u32 | config.low_power_mode as u32,
        );
        self.bus
            .modify_bits(CFGR2, CFGR2_CKMODE, config.clock as u32);
        Ok(())
    }

    /// Apply the regular group `config`. Fails with [`Error::Enabled`] and
    /// writes nothing if the ADC is enabled.
    pub fn init_regular(&self, config: &RegularConfig) -> Result<(), Error> {
        if self.is_enabled() {
            return Err(Error::Enabled);
        }
        self.bus.modify_bits(
            CFGR1,
            CFGR1_EXTSEL
                | CFGR1_EXTEN
                | CFGR1_DISCEN
                | CFGR1_CONT
                | CFGR1_DMAEN
                | CFGR1_DMACFG
                | CFGR1_OVRMOD,
            config.trigger_source as u32
                | config.sequencer_discont as u32
                | config.continuous_mode as u32
                | config.dma_transfer as u32
                | config.overrun as u32,
        );
        Ok(())
    }

    /// Select the internal measurement paths.
    pub fn init_common(&self, config: &CommonConfig) {
        self.bus
            .modify_bits(CCR, CCR_VREFEN | CCR_TSEN | CCR_VBATEN, config.bits());
    }

    /// Reset the common part of the ADC through the RCC.
    pub fn deinit_common<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        rcc.reset_pulse(Apb2Mask::ADC1);
    }

    /// Bring the ADC back to its reset state.
    ///
    /// An enabled ADC first has its trigger switched to software so that no
    /// external event restarts it, its conversion stopped, then is disabled,
    /// each step waiting for the hardware within a bounded number of polls.
    /// A timeout is remembered but the sequence continues.
    ///
    /// The registers are reset only if CR shows no pending command and the
    /// ADC disabled. Otherwise nothing is written and [`Error::InvalidState`]
    /// is returned: the ADC needs a reset through
    /// [`Adc::deinit_common`].
    pub fn deinit(&self) -> Result<(), Error> {
        let mut status = Ok(());

        if self.is_enabled() {
            self.set_trigger_source(TriggerSource::Software);

            if self.is_conversion_ongoing() && !self.is_stop_conversion_ongoing() {
                self.stop_conversion();
            }
            if let Err(e) = poll_until(Spin, STOP_CONVERSION_TIMEOUT_CYCLES, || {
                !self.is_stop_conversion_ongoing()
            }) {
                warn!("adc: conversion did not stop");
                status = Err(e);
            }

            self.disable();
            if let Err(e) = poll_until(Spin, DISABLE_TIMEOUT_CYCLES, || {
                !self.is_disable_ongoing()
            }) {
                warn!("adc: disable did not complete");
                status = Err(e);
            }
        }

        if self.bus.read(CR) & (CR_ADSTP | CR_ADSTART | CR_ADDIS | CR_ADEN) != 0 {
            return Err(Error::InvalidState);
        }

        self.bus.clear_bits(IER, ISR_ALL);
        self.bus.write(ISR, ISR_ALL);
        self.bus.clear_bits(
            CFGR1,
            CFGR1_AWDCH
                | CFGR1_AWDEN
                | CFGR1_AWDSGL
                | CFGR1_DISCEN
                | CFGR1_AUTOFF
                | CFGR1_WAIT
                | CFGR1_CONT
                | CFGR1_OVRMOD
                | CFGR1_EXTEN
                | CFGR1_EXTSEL
                | CFGR1_ALIGN
                | CFGR1_RES
                | CFGR1_SCANDIR
                | CFGR1_DMACFG
                | CFGR1_DMAEN,
        );
        self.bus.clear_bits(CFGR2, CFGR2_CKMODE);
        self.bus.clear_bits(SMPR, SMPR_SMP);
        self.bus.modify_bits(TR, TR_HT | TR_LT, TR_HT);
        self.bus.clear_bits(CHSELR, CHSELR_ALL);

        status
    }

    // Commands. Each writes its own set-only bit and none of the others.

    #[inline]
    fn command(&self, bit: u32) {
        self.bus.modify_bits(CR, CR_SET_ONLY, bit);
    }

    /// Power on the converter. Wait for [`Flag::Adrdy`] before converting.
    pub fn enable(&self) {
        self.command(CR_ADEN);
    }

    /// Power on and wait until ready.
    pub fn enable_blocking(&self) -> Result<(), Error> {
        self.clear_flag(Flag::Adrdy);
        self.enable();
        poll_until(Spin, CALIBRATION_TIMEOUT_CYCLES, || {
            self.is_flag_set(Flag::Adrdy)
        })
    }

    pub fn disable(&self) {
        self.command(CR_ADDIS);
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_set(CR, CR_ADEN)
    }

    pub fn is_disable_ongoing(&self) -> bool {
        self.bus.is_set(CR, CR_ADDIS)
    }

    pub fn start_calibration(&self) {
        self.command(CR_ADCAL);
    }

    pub fn is_calibration_ongoing(&self) -> bool {
        self.bus.is_set(CR, CR_ADCAL)
    }

    /// Run the self calibration and return the calibration factor.
    ///
    /// The ADC must be disabled, with DMA requests off during the calibration.
    pub fn calibrate(&self) -> Result<u8, Error> {
        if self.is_enabled() {
            return Err(Error::Enabled);
        }
        let dma = self.bus.field(CFGR1, CFGR1_DMAEN);
        self.bus.clear_bits(CFGR1, CFGR1_DMAEN);

        self.start_calibration();
        let res = poll_until(Spin, CALIBRATION_TIMEOUT_CYCLES, || {
            !self.is_calibration_ongoing()
        });

        self.bus.set_bits(CFGR1, dma);
        res.map(|()| (self.bus.read(DR) & DR_CALFACT) as u8)
    }

    pub fn start_conversion(&self) {
        self.command(CR_ADSTART);
    }

    pub fn stop_conversion(&self) {
        self.command(CR_ADSTP);
    }

    pub fn is_conversion_ongoing(&self) -> bool {
        self.bus.is_set(CR, CR_ADSTART)
    }

    pub fn is_stop_conversion_ongoing(&self) -> bool {
        self.bus.is_set(CR, CR_ADSTP)
    }

    // Data.

    pub fn read_data(&self) -> u16 {
        self.bus.read(DR) as u16
    }

    pub fn read_data12(&self) -> u16 {
        (self.bus.read(DR) & 0x0FFF) as u16
    }

    pub fn read_data10(&self) -> u16 {
        (self.bus.read(DR) & 0x03FF) as u16
    }

    pub fn read_data8(&self) -> u8 {
        self.bus.read(DR) as u8
    }

    pub fn read_data6(&self) -> u8 {
        (self.bus.read(DR) & 0x3F) as u8
    }

    /// Address of the data register, for DMA.
    pub const fn data_register_address(&self) -> u32 {
        DR
    }

    /// Start a single software conversion of the selected channels and
    /// return the first result.
    pub fn convert_blocking(&self) -> Result<u16, Error> {
        self.start_conversion();
        poll_until(Spin, STOP_CONVERSION_TIMEOUT_CYCLES, || {
            self.is_flag_set(Flag::Eoc)
        })?;
        // Reading DR clears EOC.
        Ok(self.read_data())
    }

    // Converter configuration.

    pub fn set_clock(&self, clock: Clock) {
        self.bus.modify_bits(CFGR2, CFGR2_CKMODE, clock as u32);
    }

    pub fn clock(&self) -> Clock {
        match self.bus.field(CFGR2, CFGR2_CKMODE) >> 30 {
            0b00 => Clock::Async,
            0b01 => Clock::SyncPclkDiv2,
            _ => Clock::SyncPclkDiv4,
        }
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.bus.modify_bits(CFGR1, CFGR1_RES, resolution as u32);
    }

    pub fn resolution(&self) -> Resolution {
        match self.bus.field(CFGR1, CFGR1_RES) >> 3 {
            0b00 => Resolution::Bits12,
            0b01 => Resolution::Bits10,
            0b10 => Resolution::Bits8,
            _ => Resolution::Bits6,
        }
    }

    pub fn set_data_alignment(&self, alignment: DataAlignment) {
        self.bus.modify_bits(CFGR1, CFGR1_ALIGN, alignment as u32);
    }

    pub fn set_low_power_mode(&self, mode: LowPowerMode) {
        self.bus
            .modify_bits(CFGR1, CFGR1_WAIT | CFGR1_AUTOFF, mode as u32);
    }

    pub fn set_sampling_time(&self, time: SamplingTime) {
        self.bus.modify_bits(SMPR, SMPR_SMP, time as u32);
    }

    pub fn sampling_time(&self) -> SamplingTime {
        SamplingTime::from_bits(self.bus.read(SMPR))
    }

    // Regular group.

    pub fn set_trigger_source(&self, source: TriggerSource) {
        self.bus
            .modify_bits(CFGR1, CFGR1_EXTSEL | CFGR1_EXTEN, source as u32);
    }

    pub fn is_trigger_source_software(&self) -> bool {
        self.bus.field(CFGR1, CFGR1_EXTEN) == 0
    }

    pub fn set_trigger_edge(&self, edge: TriggerEdge) {
        self.bus.modify_bits(CFGR1, CFGR1_EXTEN, edge as u32);
    }

    pub fn set_sequencer_discont(&self, discont: SequencerDiscont) {
        self.bus.modify_bits(CFGR1, CFGR1_DISCEN, discont as u32);
    }

    pub fn set_continuous_mode(&self, mode: ConversionMode) {
        self.bus.modify_bits(CFGR1, CFGR1_CONT, mode as u32);
    }

    pub fn set_dma_transfer(&self, transfer: DmaTransfer) {
        self.bus
            .modify_bits(CFGR1, CFGR1_DMAEN | CFGR1_DMACFG, transfer as u32);
    }

    pub fn set_overrun(&self, overrun: Overrun) {
        self.bus.modify_bits(CFGR1, CFGR1_OVRMOD, overrun as u32);
    }

    pub fn set_scan_direction(&self, direction: ScanDirection) {
        self.bus.modify_bits(CFGR1, CFGR1_SCANDIR, direction as u32);
    }

    /// Replace the channel selection.
    pub fn set_sequence(&self, channels: &[Channel]) {
        let mask = channels.iter().fold(0, |m, ch| m | ch.mask());
        self.bus.write(CHSELR, mask);
    }

    pub fn add_channel(&self, channel: Channel) {
        self.bus.set_bits(CHSELR, channel.mask());
    }

    pub fn remove_channel(&self, channel: Channel) {
        self.bus.clear_bits(CHSELR, channel.mask());
    }

    pub fn is_channel_selected(&self, channel: Channel) -> bool {
        self.bus.is_set(CHSELR, channel.mask())
    }

    // Analog watchdog.

    pub fn set_watchdog_channels(&self, channels: WatchdogChannels) {
        self.bus.modify_bits(
            CFGR1,
            CFGR1_AWDCH | CFGR1_AWDSGL | CFGR1_AWDEN,
            channels.bits(),
        );
    }

    /// Thresholds are compared to the 12-bit right aligned conversion result.
    pub fn set_watchdog_thresholds(&self, low: u16, high: u16) {
        self.bus
            .write(TR, (((high as u32) << 16) & TR_HT) | ((low as u32) & TR_LT));
    }

    pub fn watchdog_thresholds(&self) -> (u16, u16) {
        let tr = self.bus.read(TR);
        ((tr & TR_LT) as u16, ((tr & TR_HT) >> 16) as u16)
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(ISR) & flag as u32 != 0
    }

    /// Write the flag back to ISR, which clears it.
    pub fn clear_flag(&self, flag: Flag) {
        self.bus.write(ISR, flag as u32);
    }

    /// Read the flag, clearing it if it was set.
    pub fn take_flag(&self, flag: Flag) -> bool {
        if self.is_flag_set(flag) {
            self.clear_flag(flag);
            true
        } else {
            false
        }
    }

    // Interrupts.

    pub fn is_interrupt_enabled(&self, event: Event) -> bool {
        self.bus.read(IER) & event as u32 != 0
    }

    /// Clear every pending flag, enable or disable the `events`, then route
    /// the ADC line in the NVIC according to the remaining enables.
    pub fn configure_interrupts(&self, events: &[Event], enable: bool, priority: u8) {
        self.bus.write(ISR, ISR_ALL);

        let mask = events.iter().fold(0, |m, e| m | *e as u32);
        if enable {
            self.bus.set_bits(IER, mask);
        } else {
            self.bus.clear_bits(IER, mask);
        }

        let active = self.bus.read(IER) & ISR_ALL != 0;
        Nvic::new(self.bus).route(Interrupt::Adc1Comp, active, priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn adc_bus() -> SimBus {
        let bus = SimBus::new().with_nvic();
        bus.write_one_to_clear(ISR);
        bus
    }

    #[test]
    fn init_is_refused_while_enabled() {
        let bus = adc_bus();
        bus.poke(CR, CR_ADEN);
        let adc = Adc::new(&bus);
        assert_eq!(adc.init(&Config::default()), Err(Error::Enabled));
        assert_eq!(adc.init_regular(&RegularConfig::default()), Err(Error::Enabled));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn init_writes_the_configuration() {
        let bus = adc_bus();
        let adc = Adc::new(&bus);
        let config = Config {
            resolution: Resolution::Bits8,
            data_alignment: DataAlignment::Left,
            ..Default::default()
        };
        adc.init(&config).unwrap();
        adc.init_regular(&RegularConfig {
            trigger_source: TriggerSource::Tim3Trgo,
            continuous_mode: ConversionMode::Continuous,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(adc.resolution(), Resolution::Bits8);
        assert_eq!(adc.clock(), Clock::SyncPclkDiv2);
        let cfgr1 = bus.peek(CFGR1);
        assert_eq!(cfgr1 & CFGR1_EXTSEL, 0b011 << 6);
        assert_eq!(cfgr1 & CFGR1_EXTEN, 0b01 << 10);
        assert_ne!(cfgr1 & CFGR1_CONT, 0);
        assert_ne!(cfgr1 & CFGR1_OVRMOD, 0);
        assert_ne!(cfgr1 & CFGR1_ALIGN, 0);
    }

    #[test]
    fn commands_do_not_rewrite_other_set_only_bits() {
        let bus = adc_bus();
        bus.poke(CR, CR_ADEN | CR_ADSTART);
        let adc = Adc::new(&bus);
        adc.stop_conversion();
        assert_eq!(bus.writes_to(CR), vec![CR_ADSTP]);
    }

    /// ADSTP and ADDIS complete when written: the hardware clears ADSTART
    /// and ADEN.
    fn well_behaved_cr(bus: &SimBus) {
        bus.on_write(CR, |regs, v| {
            let mut cr = regs.get(CR) | v;
            if v & CR_ADSTP != 0 {
                cr &= !(CR_ADSTP | CR_ADSTART);
            }
            if v & CR_ADDIS != 0 {
                cr &= !(CR_ADDIS | CR_ADEN);
            }
            regs.set(CR, cr);
        });
    }

    #[test]
    fn deinit_stops_disables_and_resets() {
        let bus = adc_bus();
        well_behaved_cr(&bus);
        bus.poke(CR, CR_ADEN | CR_ADSTART);
        bus.poke(CFGR1, TriggerSource::Tim2Trgo as u32 | CFGR1_CONT);
        bus.poke(CHSELR, 0b101);
        bus.poke(TR, 0x0123_0456);
        bus.poke(IER, Flag::Eoc as u32);

        let adc = Adc::new(&bus);
        assert_eq!(adc.deinit(), Ok(()));

        let cr_writes = bus.writes_to(CR);
        assert_eq!(cr_writes, vec![CR_ADSTP, CR_ADDIS]);
        // Trigger forced to software before the stop command.
        let first_cfgr1 = bus.writes_to(CFGR1)[0];
        assert_eq!(first_cfgr1 & (CFGR1_EXTEN | CFGR1_EXTSEL), 0);

        assert_eq!(bus.peek(CFGR1), 0);
        assert_eq!(bus.peek(CHSELR), 0);
        assert_eq!(bus.peek(IER), 0);
        assert_eq!(bus.peek(TR), TR_HT);
    }

    #[test]
    fn deinit_of_a_disabled_adc_skips_the_sequence() {
        let bus = adc_bus();
        bus.poke(SMPR, 0b111);
        let adc = Adc::new(&bus);
        assert_eq!(adc.deinit(), Ok(()));
        assert!(bus.writes_to(CR).is_empty());
        assert_eq!(bus.peek(SMPR), 0);
    }

    #[test]
    fn stuck_stop_reports_error_and_leaves_registers() {
        let bus = adc_bus();
        // The stop never completes, disable is ignored.
        bus.poke(CR, CR_ADEN | CR_ADSTART | CR_ADSTP);
        bus.on_write(CR, |regs, v| regs.set(CR, regs.get(CR) | v));
        bus.poke(CHSELR, 0b11);
        bus.poke(SMPR, 0b101);

        let adc = Adc::new(&bus);
        assert_eq!(adc.deinit(), Err(Error::InvalidState));

        assert_eq!(bus.peek(CHSELR), 0b11);
        assert_eq!(bus.peek(SMPR), 0b101);
        assert!(bus.writes_to(CHSELR).is_empty());
        assert!(bus.writes_to(ISR).is_empty());
        // A stop was already pending, so no second stop command.
        assert_eq!(bus.writes_to(CR), vec![CR_ADDIS]);
        // The polls ran their full budgets.
        assert!(bus.reads_of(CR) as u32 > STOP_CONVERSION_TIMEOUT_CYCLES + DISABLE_TIMEOUT_CYCLES);
    }

    #[test]
    fn late_stop_still_reports_the_timeout() {
        let bus = adc_bus();
        // ADSTP clears only after the stop budget ran out, disable then
        // completes at once.
        let mut reads = 0u32;
        bus.poke(CR, CR_ADEN | CR_ADSTART | CR_ADSTP);
        bus.on_read(CR, move |regs| {
            reads += 1;
            if reads == STOP_CONVERSION_TIMEOUT_CYCLES + 10 {
                regs.set(CR, regs.get(CR) & !(CR_ADSTP | CR_ADSTART));
            }
            regs.get(CR)
        });
        bus.on_write(CR, |regs, v| {
            let mut cr = regs.get(CR) | v;
            if v & CR_ADDIS != 0 {
                cr &= !(CR_ADDIS | CR_ADEN | CR_ADSTP | CR_ADSTART);
            }
            regs.set(CR, cr);
        });
        bus.poke(CHSELR, 0b11);

        let adc = Adc::new(&bus);
        assert_eq!(adc.deinit(), Err(Error::Timeout));
        // The final state was consistent, so registers were reset anyway.
        assert_eq!(bus.peek(CHSELR), 0);
    }

    #[test]
    fn take_flag_consumes_the_flag() {
        let bus = adc_bus();
        let adc = Adc::new(&bus);

        assert!(!adc.take_flag(Flag::Eoc));
        assert!(bus.writes().is_empty());

        bus.poke(ISR, Flag::Eoc as u32 | Flag::Eos as u32);
        assert!(adc.take_flag(Flag::Eoc));
        assert_eq!(bus.writes_to(ISR), vec![Flag::Eoc as u32]);
        assert!(!adc.take_flag(Flag::Eoc));
        assert!(adc.is_flag_set(Flag::Eos));
    }

    #[test]
    fn interrupt_config_routes_the_nvic_line() {
        let bus = adc_bus();
        bus.poke(ISR, Flag::Ovr as u32);
        let adc = Adc::new(&bus);
        let nvic = Nvic::new(&bus);

        adc.configure_interrupts(&[Flag::Eoc, Flag::Ovr], true, 1);
        assert_eq!(bus.peek(ISR), 0);
        assert_eq!(bus.peek(IER), Flag::Eoc as u32 | Flag::Ovr as u32);
        assert!(nvic.is_enabled(Interrupt::Adc1Comp));
        assert_eq!(nvic.priority(Interrupt::Adc1Comp), 1);

        adc.configure_interrupts(&[Flag::Eoc], false, 1);
        assert!(nvic.is_enabled(Interrupt::Adc1Comp));
        adc.configure_interrupts(&[Flag::Ovr], false, 1);
        assert!(!nvic.is_enabled(Interrupt::Adc1Comp));
    }

    #[test]
    fn calibration_returns_the_factor_and_restores_dma() {
        let bus = adc_bus();
        bus.poke(CFGR1, CFGR1_DMAEN);
        bus.on_write(CR, |regs, v| {
            // Calibration completes at once.
            regs.set(CR, regs.get(CR) | (v & !CR_ADCAL));
            regs.set(DR, 0x45);
        });
        let adc = Adc::new(&bus);
        assert_eq!(adc.calibrate(), Ok(0x45));
        assert_eq!(bus.peek(CFGR1) & CFGR1_DMAEN, CFGR1_DMAEN);
    }

    #[test]
    fn watchdog_single_channel() {
        let bus = adc_bus();
        let adc = Adc::new(&bus);
        adc.set_watchdog_channels(WatchdogChannels::Single(Channel::In5));
        assert_eq!(
            bus.peek(CFGR1),
            (5 << 26) | CFGR1_AWDSGL | CFGR1_AWDEN
        );
        adc.set_watchdog_thresholds(0x100, 0xE00);
        assert_eq!(adc.watchdog_thresholds(), (0x100, 0xE00));
    }
}
