//! Timers
//!
//! One driver covers the advanced (TIM1), general purpose (TIM2, TIM3,
//! TIM14 to TIM17) and basic (TIM6, TIM7) timers. They share one register
//! layout; [`Instance::capabilities`] tells which parts of it an instance
//! implements. Configuration functions needing a missing feature fail with
//! [`Error::Unsupported`] before any write.

use paste::paste;

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;
use crate::rcc::{Apb1Mask, Apb2Mask, Rcc};

const CR1: u32 = 0x00;
const CR2: u32 = 0x04;
const SMCR: u32 = 0x08;
const DIER: u32 = 0x0C;
const SR: u32 = 0x10;
const EGR: u32 = 0x14;
const CCMR1: u32 = 0x18;
const CCMR2: u32 = 0x1C;
const CCER: u32 = 0x20;
const CNT: u32 = 0x24;
const PSC: u32 = 0x28;
const ARR: u32 = 0x2C;
const RCR: u32 = 0x30;
const CCR1: u32 = 0x34;
const BDTR: u32 = 0x44;
const DCR: u32 = 0x48;

const CR1_CEN: u32 = 1 << 0;
const CR1_UDIS: u32 = 1 << 1;
const CR1_URS: u32 = 1 << 2;
const CR1_OPM: u32 = 1 << 3;
const CR1_DIR: u32 = 1 << 4;
const CR1_CMS: u32 = 0b11 << 5;
const CR1_ARPE: u32 = 1 << 7;
const CR1_CKD: u32 = 0b11 << 8;

const CR2_CCPC: u32 = 1 << 0;
const CR2_CCUS: u32 = 1 << 2;
const CR2_CCDS: u32 = 1 << 3;
const CR2_MMS: u32 = 0b111 << 4;
const CR2_TI1S: u32 = 1 << 7;
const CR2_OIS1: u32 = 1 << 8;

const SMCR_SMS: u32 = 0b111;
const SMCR_TS: u32 = 0b111 << 4;
const SMCR_MSM: u32 = 1 << 7;
const SMCR_ETF: u32 = 0xF << 8;
const SMCR_ETPS: u32 = 0b11 << 12;
const SMCR_ECE: u32 = 1 << 14;
const SMCR_ETP: u32 = 1 << 15;

const DIER_IE: u32 = 0xFF;
/// Interrupts on the capture/compare line of TIM1.
const DIER_CC_IE: u32 = 0b1_1110;

const SR_ALL: u32 = 0x1EFF;

// Channel 1 fields of CCMRx; channel 2 (4) sits 8 bits higher.
const CCMR_CCS: u32 = 0b11;
const CCMR_OCFE: u32 = 1 << 2;
const CCMR_OCPE: u32 = 1 << 3;
const CCMR_OCM: u32 = 0b111 << 4;
const CCMR_OCCE: u32 = 1 << 7;
const CCMR_ICPSC: u32 = 0b11 << 2;
const CCMR_ICF: u32 = 0xF << 4;

// Channel 1 bits of CCER; channel n sits 4 * (n - 1) bits higher.
const CCER_CCE: u32 = 1 << 0;
const CCER_CCP: u32 = 1 << 1;
const CCER_CCNE: u32 = 1 << 2;
const CCER_CCNP: u32 = 1 << 3;

const BDTR_DTG: u32 = 0xFF;
const BDTR_LOCK: u32 = 0b11 << 8;
const BDTR_OSSI: u32 = 1 << 10;
const BDTR_OSSR: u32 = 1 << 11;
const BDTR_BKE: u32 = 1 << 12;
const BDTR_BKP: u32 = 1 << 13;
const BDTR_AOE: u32 = 1 << 14;
const BDTR_MOE: u32 = 1 << 15;

const DCR_DBA: u32 = 0x1F;
const DCR_DBL: u32 = 0x1F << 8;

/// Trigger output used by the hall sensor interface.
const HALL_TRGO: u32 = Trgo::Oc2Ref as u32;

/// What an instance implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    pub channels: u8,
    /// Channels 1 to n have a complementary output.
    pub complementary_channels: u8,
    pub counter_32bit: bool,
    pub counter_mode_select: bool,
    pub clock_division: bool,
    pub repetition_counter: bool,
    /// Break input, dead-time and main output enable.
    pub break_input: bool,
    pub encoder: bool,
    pub hall_sensor: bool,
    pub master: bool,
    pub slave: bool,
}

const ADVANCED: Capabilities = Capabilities {
    channels: 4,
    complementary_channels: 3,
    counter_32bit: false,
    counter_mode_select: true,
    clock_division: true,
    repetition_counter: true,
    break_input: true,
    encoder: true,
    hall_sensor: true,
    master: true,
    slave: true,
};

const GENERAL_PURPOSE: Capabilities = Capabilities {
    complementary_channels: 0,
    repetition_counter: false,
    break_input: false,
    ..ADVANCED
};

const BASIC: Capabilities = Capabilities {
    channels: 0,
    complementary_channels: 0,
    counter_32bit: false,
    counter_mode_select: false,
    clock_division: false,
    repetition_counter: false,
    break_input: false,
    encoder: false,
    hall_sensor: false,
    master: true,
    slave: false,
};

const ONE_CHANNEL: Capabilities = Capabilities {
    channels: 1,
    clock_division: true,
    master: false,
    ..BASIC
};

/// TIM16 and TIM17.
const ONE_CHANNEL_COMPLEMENTARY: Capabilities = Capabilities {
    complementary_channels: 1,
    repetition_counter: true,
    break_input: true,
    ..ONE_CHANNEL
};

const TIM15_CAPABILITIES: Capabilities = Capabilities {
    channels: 2,
    master: true,
    slave: true,
    ..ONE_CHANNEL_COMPLEMENTARY
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Instance {
    Tim1,
    Tim2,
    Tim3,
    Tim6,
    Tim7,
    Tim14,
    Tim15,
    Tim16,
    Tim17,
}

impl Instance {
    const fn base(self) -> u32 {
        match self {
            Instance::Tim1 => map::TIM1,
            Instance::Tim2 => map::TIM2,
            Instance::Tim3 => map::TIM3,
            Instance::Tim6 => map::TIM6,
            Instance::Tim7 => map::TIM7,
            Instance::Tim14 => map::TIM14,
            Instance::Tim15 => map::TIM15,
            Instance::Tim16 => map::TIM16,
            Instance::Tim17 => map::TIM17,
        }
    }

    pub const fn capabilities(self) -> Capabilities {
        match self {
            Instance::Tim1 => ADVANCED,
            Instance::Tim2 => Capabilities {
                counter_32bit: true,
                ..GENERAL_PURPOSE
            },
            Instance::Tim3 => GENERAL_PURPOSE,
            Instance::Tim6 | Instance::Tim7 => BASIC,
            Instance::Tim14 => ONE_CHANNEL,
            Instance::Tim15 => TIM15_CAPABILITIES,
            Instance::Tim16 | Instance::Tim17 => ONE_CHANNEL_COMPLEMENTARY,
        }
    }

    /// Line of the update, trigger, commutation and break interrupts.
    pub const fn update_interrupt(self) -> Interrupt {
        match self {
            Instance::Tim1 => Interrupt::Tim1BrkUpTrgCom,
            _ => self.cc_interrupt(),
        }
    }

    /// Line of the capture/compare interrupts.
    pub const fn cc_interrupt(self) -> Interrupt {
        match self {
            Instance::Tim1 => Interrupt::Tim1Cc,
            Instance::Tim2 => Interrupt::Tim2,
            Instance::Tim3 => Interrupt::Tim3,
            Instance::Tim6 => Interrupt::Tim6Dac,
            Instance::Tim7 => Interrupt::Tim7,
            Instance::Tim14 => Interrupt::Tim14,
            Instance::Tim15 => Interrupt::Tim15,
            Instance::Tim16 => Interrupt::Tim16,
            Instance::Tim17 => Interrupt::Tim17,
        }
    }
}

/// A capture/compare channel output. The discriminant is its enable bit in
/// CCER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Ch1 = 1 << 0,
    Ch1N = 1 << 2,
    Ch2 = 1 << 4,
    Ch2N = 1 << 6,
    Ch3 = 1 << 8,
    Ch3N = 1 << 10,
    Ch4 = 1 << 12,
}

impl Channel {
    /// 0 for channel 1 (and 1N) to 3 for channel 4.
    const fn index(self) -> u32 {
        (self as u32).trailing_zeros() / 4
    }

    const fn is_complementary(self) -> bool {
        (self as u32).trailing_zeros() % 4 != 0
    }

    /// Mode register and field offset of the channel.
    const fn ccmr(self) -> (u32, u32) {
        let index = self.index();
        let reg = if index < 2 { CCMR1 } else { CCMR2 };
        (reg, 8 * (index % 2))
    }

    /// First CCER bit of the channel.
    const fn ccer_shift(self) -> u32 {
        4 * self.index()
    }

    /// OISx and OISxN follow each other in CR2 in channel order.
    const fn idle_state_bit(self) -> u32 {
        CR2_OIS1 << ((self as u32).trailing_zeros() / 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterMode {
    Up = 0,
    Down = CR1_DIR as isize,
    /// Compare flags set while counting down.
    CenterDown = 0b01 << 5,
    /// Compare flags set while counting up.
    CenterUp = 0b10 << 5,
    CenterUpDown = 0b11 << 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDivision {
    Div1 = 0b00 << 8,
    Div2 = 0b01 << 8,
    Div4 = 0b10 << 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateSource {
    /// Overflow, underflow, UG and slave mode controller.
    Regular = 0,
    /// Overflow and underflow only.
    Counter = CR1_URS as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OcMode {
    Frozen = 0b000 << 4,
    ActiveOnMatch = 0b001 << 4,
    InactiveOnMatch = 0b010 << 4,
    Toggle = 0b011 << 4,
    ForcedInactive = 0b100 << 4,
    ForcedActive = 0b101 << 4,
    Pwm1 = 0b110 << 4,
    Pwm2 = 0b111 << 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OcPolarity {
    High,
    Low,
}

/// Output level while the main output is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OcIdleState {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IcActiveInput {
    /// TIx of the channel.
    Direct = 0b01,
    /// TIx of the paired channel.
    Indirect = 0b10,
    Trc = 0b11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IcPrescaler {
    Div1 = 0b00 << 2,
    Div2 = 0b01 << 2,
    Div4 = 0b10 << 2,
    Div8 = 0b11 << 2,
}

/// Digital filter: sampling clock and number of consecutive samples. Also
/// used for the external trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Filter {
    None = 0,
    CkIntN2,
    CkIntN4,
    CkIntN8,
    Div2N6,
    Div2N8,
    Div4N6,
    Div4N8,
    Div8N6,
    Div8N8,
    Div16N5,
    Div16N6,
    Div16N8,
    Div32N5,
    Div32N6,
    Div32N8,
}

/// Relative to the channel bits of CCER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IcPolarity {
    Rising = 0,
    Falling = CCER_CCP as isize,
    BothEdges = (CCER_CCP | CCER_CCNP) as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncoderMode {
    /// Count on TI1 edges.
    X2Ti1 = 0b001,
    /// Count on TI2 edges.
    X2Ti2 = 0b010,
    X4Ti12 = 0b011,
}

/// Master mode: signal sent on TRGO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trgo {
    Reset = 0b000 << 4,
    Enable = 0b001 << 4,
    Update = 0b010 << 4,
    Cc1If = 0b011 << 4,
    Oc1Ref = 0b100 << 4,
    Oc2Ref = 0b101 << 4,
    Oc3Ref = 0b110 << 4,
    Oc4Ref = 0b111 << 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveMode {
    Disabled = 0b000,
    Reset = 0b100,
    Gated = 0b101,
    Trigger = 0b110,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerInput {
    Itr0 = 0b000 << 4,
    Itr1 = 0b001 << 4,
    Itr2 = 0b010 << 4,
    Itr3 = 0b011 << 4,
    Ti1FEdge = 0b100 << 4,
    Ti1Fp1 = 0b101 << 4,
    Ti2Fp2 = 0b110 << 4,
    Etrf = 0b111 << 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    Internal,
    /// Rising edges of the selected trigger input.
    ExternalMode1,
    /// The external trigger input.
    ExternalMode2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EtrPolarity {
    NonInverted = 0,
    Inverted = SMCR_ETP as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EtrPrescaler {
    Div1 = 0b00 << 12,
    Div2 = 0b01 << 12,
    Div4 = 0b10 << 12,
    Div8 = 0b11 << 12,
}

/// Event that sets the capture/compare control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcUpdateSource {
    Comg = 0,
    ComgAndTrgi = CR2_CCUS as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcDmaRequest {
    OnCapture = 0,
    OnUpdate = CR2_CCDS as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockLevel {
    Off = 0b00 << 8,
    Level1 = 0b01 << 8,
    Level2 = 0b10 << 8,
    Level3 = 0b11 << 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BreakPolarity {
    Low = 0,
    High = BDTR_BKP as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    Update = 1 << 0,
    Cc1 = 1 << 1,
    Cc2 = 1 << 2,
    Cc3 = 1 << 3,
    Cc4 = 1 << 4,
    Commutation = 1 << 5,
    Trigger = 1 << 6,
    Break = 1 << 7,
    Cc1Overcapture = 1 << 9,
    Cc2Overcapture = 1 << 10,
    Cc3Overcapture = 1 << 11,
    Cc4Overcapture = 1 << 12,
}

/// Interrupt sources, by their DIER bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Update = 1 << 0,
    Cc1 = 1 << 1,
    Cc2 = 1 << 2,
    Cc3 = 1 << 3,
    Cc4 = 1 << 4,
    Commutation = 1 << 5,
    Trigger = 1 << 6,
    Break = 1 << 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaRequest {
    Update = 1 << 8,
    Cc1 = 1 << 9,
    Cc2 = 1 << 10,
    Cc3 = 1 << 11,
    Cc4 = 1 << 12,
    Commutation = 1 << 13,
    Trigger = 1 << 14,
}

/// Software generated events, by their EGR bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GeneratedEvent {
    Update = 1 << 0,
    Cc1 = 1 << 1,
    Cc2 = 1 << 2,
    Cc3 = 1 << 3,
    Cc4 = 1 << 4,
    Commutation = 1 << 5,
    Trigger = 1 << 6,
    Break = 1 << 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaseConfig {
    pub prescaler: u16,
    pub counter_mode: CounterMode,
    pub autoreload: u32,
    pub clock_division: ClockDivision,
    pub repetition_counter: u8,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            prescaler: 0,
            counter_mode: CounterMode::Up,
            autoreload: 0xFFFF,
            clock_division: ClockDivision::Div1,
            repetition_counter: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OcConfig {
    pub mode: OcMode,
    pub output: bool,
    pub complementary_output: bool,
    pub compare_value: u32,
    pub polarity: OcPolarity,
    pub complementary_polarity: OcPolarity,
    pub idle_state: OcIdleState,
    pub complementary_idle_state: OcIdleState,
}

impl Default for OcConfig {
    fn default() -> Self {
        Self {
            mode: OcMode::Frozen,
            output: false,
            complementary_output: false,
            compare_value: 0,
            polarity: OcPolarity::High,
            complementary_polarity: OcPolarity::High,
            idle_state: OcIdleState::Low,
            complementary_idle_state: OcIdleState::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IcConfig {
    pub polarity: IcPolarity,
    pub active_input: IcActiveInput,
    pub prescaler: IcPrescaler,
    pub filter: Filter,
}

impl Default for IcConfig {
    fn default() -> Self {
        Self {
            polarity: IcPolarity::Rising,
            active_input: IcActiveInput::Direct,
            prescaler: IcPrescaler::Div1,
            filter: Filter::None,
        }
    }
}

impl IcConfig {
    /// CCMRx field of channel 1.
    const fn ccmr_bits(&self) -> u32 {
        self.active_input as u32 | self.prescaler as u32 | ((self.filter as u32) << 4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderConfig {
    pub mode: EncoderMode,
    pub ic1: IcConfig,
    pub ic2: IcConfig,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: EncoderMode::X2Ti1,
            ic1: IcConfig::default(),
            ic2: IcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallSensorConfig {
    pub ic1_polarity: IcPolarity,
    pub ic1_prescaler: IcPrescaler,
    pub ic1_filter: Filter,
    /// Delay between a hall sensor edge and the commutation, in CCR2.
    pub commutation_delay: u32,
}

impl Default for HallSensorConfig {
    fn default() -> Self {
        Self {
            ic1_polarity: IcPolarity::Rising,
            ic1_prescaler: IcPrescaler::Div1,
            ic1_filter: Filter::None,
            commutation_delay: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BdtrConfig {
    pub off_state_run: bool,
    pub off_state_idle: bool,
    pub lock_level: LockLevel,
    pub dead_time: u8,
    pub break_enable: bool,
    pub break_polarity: BreakPolarity,
    pub automatic_output: bool,
}

impl Default for BdtrConfig {
    fn default() -> Self {
        Self {
            off_state_run: false,
            off_state_idle: false,
            lock_level: LockLevel::Off,
            dead_time: 0,
            break_enable: false,
            break_polarity: BreakPolarity::Low,
            automatic_output: false,
        }
    }
}

/// Compare/capture register accessors of channels 1 to 4.
macro_rules! channel_registers {
    ($($n:literal),+) => {
        paste! {
            $(
                pub fn [<set_compare_ch $n>](&self, value: u32) {
                    self.bus.write(self.ccr($n - 1), value);
                }

                pub fn [<compare_ch $n>](&self) -> u32 {
                    self.bus.read(self.ccr($n - 1))
                }

                /// Counter value latched by the last capture.
                pub fn [<capture_ch $n>](&self) -> u32 {
                    self.bus.read(self.ccr($n - 1))
                }
            )+
        }
    };
}

#[derive(Debug)]
pub struct Tim<'a, B: Bus> {
    bus: &'a B,
    instance: Instance,
}

impl<'a, B: Bus> Tim<'a, B> {
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

    #[inline]
    fn ccr(&self, index: u32) -> u32 {
        self.reg(CCR1 + 4 * index)
    }

    fn check_channel(&self, channel: Channel) -> Result<Capabilities, Error> {
        let caps = self.instance.capabilities();
        if channel.index() >= caps.channels as u32
            || (channel.is_complementary() && channel.index() >= caps.complementary_channels as u32)
        {
            return Err(Error::Unsupported);
        }
        Ok(caps)
    }

    /// Configure the time base and generate an update event so the
    /// prescaler and repetition counter are loaded at once. Fields the
    /// instance does not implement are skipped.
    pub fn init(&self, config: &BaseConfig) {
        let caps = self.instance.capabilities();
        let mut cr1 = self.bus.read(self.reg(CR1));
        if caps.counter_mode_select {
            cr1 = (cr1 & !(CR1_DIR | CR1_CMS)) | config.counter_mode as u32;
        }
        if caps.clock_division {
            cr1 = (cr1 & !CR1_CKD) | config.clock_division as u32;
        }
        self.bus.write(self.reg(CR1), cr1);

        self.set_autoreload(config.autoreload);
        self.set_prescaler(config.prescaler);
        if caps.repetition_counter {
            self.set_repetition_counter(config.repetition_counter);
        }
        self.generate_event(GeneratedEvent::Update);
    }

    /// Configure `channel` as an output compare. The channel output is off
    /// while its registers are written.
    pub fn init_oc(&self, channel: Channel, config: &OcConfig) -> Result<(), Error> {
        let caps = self.check_channel(channel)?;
        let index = channel.index();
        let shift = channel.ccer_shift();
        let (ccmr, field) = channel.ccmr();

        self.bus.clear_bits(self.reg(CCER), CCER_CCE << shift);

        let mut ccer = self.bus.read(self.reg(CCER));
        let mut cr2 = self.bus.read(self.reg(CR2));
        let mut mode = self.bus.read(self.reg(ccmr));

        mode &= !((CCMR_CCS | CCMR_OCM) << field);
        mode |= (config.mode as u32) << field;

        ccer &= !((CCER_CCP | CCER_CCE) << shift);
        if config.polarity == OcPolarity::Low {
            ccer |= CCER_CCP << shift;
        }
        if config.output {
            ccer |= CCER_CCE << shift;
        }

        if caps.break_input {
            let ois = CR2_OIS1 << (2 * index);
            cr2 &= !ois;
            if config.idle_state == OcIdleState::High {
                cr2 |= ois;
            }
            if index < caps.complementary_channels as u32 {
                ccer &= !((CCER_CCNP | CCER_CCNE) << shift);
                if config.complementary_polarity == OcPolarity::Low {
                    ccer |= CCER_CCNP << shift;
                }
                if config.complementary_output {
                    ccer |= CCER_CCNE << shift;
                }
                cr2 &= !(ois << 1);
                if config.complementary_idle_state == OcIdleState::High {
                    cr2 |= ois << 1;
                }
            }
        }

        self.bus.write(self.reg(CR2), cr2);
        self.bus.write(self.reg(ccmr), mode);
        self.bus.write(self.ccr(index), config.compare_value);
        self.bus.write(self.reg(CCER), ccer);
        Ok(())
    }

    /// Configure `channel` as an input capture and enable it.
    pub fn init_ic(&self, channel: Channel, config: &IcConfig) -> Result<(), Error> {
        self.check_channel(channel)?;
        let shift = channel.ccer_shift();
        let (ccmr, field) = channel.ccmr();

        self.bus.clear_bits(self.reg(CCER), CCER_CCE << shift);
        self.bus.modify_bits(
            self.reg(ccmr),
            (CCMR_CCS | CCMR_ICPSC | CCMR_ICF) << field,
            config.ccmr_bits() << field,
        );
        self.bus.modify_bits(
            self.reg(CCER),
            (CCER_CCP | CCER_CCNP) << shift,
            (config.polarity as u32 | CCER_CCE) << shift,
        );
        Ok(())
    }

    /// Count the edges of TI1 and TI2 in encoder mode. Channels 1 and 2 are
    /// taken as inputs and enabled.
    pub fn init_encoder(&self, config: &EncoderConfig) -> Result<(), Error> {
        if !self.instance.capabilities().encoder {
            return Err(Error::Unsupported);
        }

        let ccer_12 = (CCER_CCE | CCER_CCP | CCER_CCNP) * 0x11;
        self.bus.clear_bits(self.reg(CCER), CCER_CCE * 0x11);

        let input = CCMR_CCS | CCMR_ICPSC | CCMR_ICF;
        self.bus.modify_bits(
            self.reg(CCMR1),
            input | (input << 8),
            config.ic1.ccmr_bits() | (config.ic2.ccmr_bits() << 8),
        );

        let ccer = self.bus.read(self.reg(CCER)) & !ccer_12;
        let ccer = ccer
            | config.ic1.polarity as u32
            | ((config.ic2.polarity as u32) << 4)
            | (CCER_CCE * 0x11);
        self.bus
            .modify_bits(self.reg(SMCR), SMCR_SMS, config.mode as u32);
        self.bus.write(self.reg(CCER), ccer);
        Ok(())
    }

    /// Hall sensor interface: TI1 is the XOR of CH1 to CH3, each edge
    /// resets the counter and is captured in CCR1, and OC2REF (delayed by
    /// `commutation_delay`) goes out on TRGO.
    pub fn init_hall_sensor(&self, config: &HallSensorConfig) -> Result<(), Error> {
        if !self.instance.capabilities().hall_sensor {
            return Err(Error::Unsupported);
        }

        self.bus.clear_bits(self.reg(CCER), CCER_CCE * 0x11);

        let cr2 = self.bus.read(self.reg(CR2));
        let cr2 = (cr2 & !CR2_MMS) | CR2_TI1S | HALL_TRGO;

        let smcr = self.bus.read(self.reg(SMCR)) & !(SMCR_TS | SMCR_SMS);
        let smcr = smcr | TriggerInput::Ti1FEdge as u32 | SlaveMode::Reset as u32;

        let ic1 = IcConfig {
            polarity: config.ic1_polarity,
            active_input: IcActiveInput::Trc,
            prescaler: config.ic1_prescaler,
            filter: config.ic1_filter,
        };
        let mut ccmr1 = self.bus.read(self.reg(CCMR1));
        ccmr1 &= !(CCMR_CCS | CCMR_ICPSC | CCMR_ICF);
        ccmr1 |= ic1.ccmr_bits();
        ccmr1 &= !((CCMR_OCM | CCMR_OCFE | CCMR_OCPE | CCMR_OCCE) << 8);
        ccmr1 |= (OcMode::Pwm2 as u32) << 8;

        let ccer = self.bus.read(self.reg(CCER)) & !((CCER_CCP | CCER_CCNP) * 0x11);
        let ccer = ccer | ic1.polarity as u32 | (CCER_CCE * 0x11);

        self.bus.write(self.reg(CR2), cr2);
        self.bus.write(self.reg(SMCR), smcr);
        self.bus.write(self.reg(CCMR1), ccmr1);
        self.bus.write(self.reg(CCER), ccer);
        self.set_compare_ch2(config.commutation_delay);
        Ok(())
    }

    /// Break, dead-time and lock configuration. The main output enable is
    /// left alone.
    pub fn init_bdtr(&self, config: &BdtrConfig) -> Result<(), Error> {
        if !self.instance.capabilities().break_input {
            return Err(Error::Unsupported);
        }

        let mut bdtr = self.bus.read(self.reg(BDTR));
        bdtr &= !(BDTR_DTG | BDTR_LOCK | BDTR_OSSI | BDTR_OSSR | BDTR_BKE | BDTR_BKP | BDTR_AOE);
        bdtr |= config.dead_time as u32 | config.lock_level as u32 | config.break_polarity as u32;
        if config.off_state_idle {
            bdtr |= BDTR_OSSI;
        }
        if config.off_state_run {
            bdtr |= BDTR_OSSR;
        }
        if config.break_enable {
            bdtr |= BDTR_BKE;
        }
        if config.automatic_output {
            bdtr |= BDTR_AOE;
        }
        self.bus.write(self.reg(BDTR), bdtr);
        Ok(())
    }

    /// Reset the instance through the RCC.
    pub fn deinit<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        match self.instance {
            Instance::Tim1 => rcc.reset_pulse(Apb2Mask::TIM1),
            Instance::Tim2 => rcc.reset_pulse(Apb1Mask::TIM2),
            Instance::Tim3 => rcc.reset_pulse(Apb1Mask::TIM3),
            Instance::Tim6 => rcc.reset_pulse(Apb1Mask::TIM6),
            Instance::Tim7 => rcc.reset_pulse(Apb1Mask::TIM7),
            Instance::Tim14 => rcc.reset_pulse(Apb1Mask::TIM14),
            Instance::Tim15 => rcc.reset_pulse(Apb2Mask::TIM15),
            Instance::Tim16 => rcc.reset_pulse(Apb2Mask::TIM16),
            Instance::Tim17 => rcc.reset_pulse(Apb2Mask::TIM17),
        }
    }

    // Time base.

    pub fn enable_counter(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_CEN);
    }

    pub fn disable_counter(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_CEN);
    }

    pub fn is_counter_enabled(&self) -> bool {
        self.bus.is_set(self.reg(CR1), CR1_CEN)
    }

    pub fn enable_update_event(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_UDIS);
    }

    pub fn disable_update_event(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_UDIS);
    }

    pub fn set_update_source(&self, source: UpdateSource) {
        self.bus.modify_bits(self.reg(CR1), CR1_URS, source as u32);
    }

    /// Stop the counter at the next update event.
    pub fn set_one_pulse_mode(&self, on: bool) {
        let set = if on { CR1_OPM } else { 0 };
        self.bus.modify_bits(self.reg(CR1), CR1_OPM, set);
    }

    pub fn set_counter_mode(&self, mode: CounterMode) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_DIR | CR1_CMS, mode as u32);
    }

    pub fn direction(&self) -> Direction {
        if self.bus.read(self.reg(CR1)) & CR1_DIR != 0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }

    /// Buffer ARR until the next update event.
    pub fn enable_arr_preload(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_ARPE);
    }

    pub fn disable_arr_preload(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_ARPE);
    }

    pub fn set_clock_division(&self, division: ClockDivision) {
        self.bus
            .modify_bits(self.reg(CR1), CR1_CKD, division as u32);
    }

    pub fn set_counter(&self, value: u32) {
        self.bus.write(self.reg(CNT), value);
    }

    pub fn counter(&self) -> u32 {
        self.bus.read(self.reg(CNT))
    }

    /// The counter clock is the timer clock divided by `prescaler + 1`.
    pub fn set_prescaler(&self, prescaler: u16) {
        self.bus.write(self.reg(PSC), prescaler as u32);
    }

    pub fn prescaler(&self) -> u16 {
        self.bus.read(self.reg(PSC)) as u16
    }

    /// Upper bits are dropped on the 16-bit instances.
    pub fn set_autoreload(&self, value: u32) {
        let value = if self.instance.capabilities().counter_32bit {
            value
        } else {
            value & 0xFFFF
        };
        self.bus.write(self.reg(ARR), value);
    }

    pub fn autoreload(&self) -> u32 {
        self.bus.read(self.reg(ARR))
    }

    pub fn set_repetition_counter(&self, value: u8) {
        self.bus.write(self.reg(RCR), value as u32);
    }

    pub fn repetition_counter(&self) -> u8 {
        self.bus.read(self.reg(RCR)) as u8
    }

    // Capture/compare control.

    /// Buffer CCxE, CCxNE and OCxM until the next commutation event.
    pub fn enable_cc_preload(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_CCPC);
    }

    pub fn disable_cc_preload(&self) {
        self.bus.clear_bits(self.reg(CR2), CR2_CCPC);
    }

    pub fn set_cc_update_source(&self, source: CcUpdateSource) {
        self.bus
            .modify_bits(self.reg(CR2), CR2_CCUS, source as u32);
    }

    pub fn set_cc_dma_request(&self, request: CcDmaRequest) {
        self.bus
            .modify_bits(self.reg(CR2), CR2_CCDS, request as u32);
    }

    pub fn enable_channel(&self, channel: Channel) {
        self.bus.set_bits(self.reg(CCER), channel as u32);
    }

    pub fn disable_channel(&self, channel: Channel) {
        self.bus.clear_bits(self.reg(CCER), channel as u32);
    }

    pub fn is_channel_enabled(&self, channel: Channel) -> bool {
        self.bus.is_set(self.reg(CCER), channel as u32)
    }

    // Output compare.

    pub fn set_oc_mode(&self, channel: Channel, mode: OcMode) {
        let (ccmr, field) = channel.ccmr();
        self.bus.modify_bits(
            self.reg(ccmr),
            (CCMR_CCS | CCMR_OCM) << field,
            (mode as u32) << field,
        );
    }

    /// CCxNP for a complementary channel, CCxP otherwise.
    pub fn set_oc_polarity(&self, channel: Channel, polarity: OcPolarity) {
        let bit = (channel as u32) << 1;
        let set = if polarity == OcPolarity::Low { bit } else { 0 };
        self.bus.modify_bits(self.reg(CCER), bit, set);
    }

    pub fn set_oc_idle_state(&self, channel: Channel, state: OcIdleState) {
        let bit = channel.idle_state_bit();
        let set = if state == OcIdleState::High { bit } else { 0 };
        self.bus.modify_bits(self.reg(CR2), bit, set);
    }

    /// React to the trigger input without waiting for the comparison.
    pub fn set_oc_fast(&self, channel: Channel, on: bool) {
        self.set_ccmr_flag(channel, CCMR_OCFE, on);
    }

    /// Buffer CCRx until the next update event.
    pub fn set_oc_preload(&self, channel: Channel, on: bool) {
        self.set_ccmr_flag(channel, CCMR_OCPE, on);
    }

    /// Clear OCxREF on a high level of ETRF.
    pub fn set_oc_clear(&self, channel: Channel, on: bool) {
        self.set_ccmr_flag(channel, CCMR_OCCE, on);
    }

    fn set_ccmr_flag(&self, channel: Channel, flag: u32, on: bool) {
        let (ccmr, field) = channel.ccmr();
        let set = if on { flag << field } else { 0 };
        self.bus.modify_bits(self.reg(ccmr), flag << field, set);
    }

    channel_registers!(1, 2, 3, 4);

    // Input capture.

    pub fn set_ic_active_input(&self, channel: Channel, input: IcActiveInput) {
        let (ccmr, field) = channel.ccmr();
        self.bus
            .modify_bits(self.reg(ccmr), CCMR_CCS << field, (input as u32) << field);
    }

    pub fn set_ic_prescaler(&self, channel: Channel, prescaler: IcPrescaler) {
        let (ccmr, field) = channel.ccmr();
        self.bus.modify_bits(
            self.reg(ccmr),
            CCMR_ICPSC << field,
            (prescaler as u32) << field,
        );
    }

    pub fn set_ic_filter(&self, channel: Channel, filter: Filter) {
        let (ccmr, field) = channel.ccmr();
        self.bus.modify_bits(
            self.reg(ccmr),
            CCMR_ICF << field,
            (filter as u32) << (4 + field),
        );
    }

    pub fn set_ic_polarity(&self, channel: Channel, polarity: IcPolarity) {
        let shift = channel.ccer_shift();
        self.bus.modify_bits(
            self.reg(CCER),
            (CCER_CCP | CCER_CCNP) << shift,
            (polarity as u32) << shift,
        );
    }

    // Clock source, master and slave modes.

    pub fn set_clock_source(&self, source: ClockSource) {
        let (clear, set) = match source {
            ClockSource::Internal => (SMCR_SMS | SMCR_ECE, 0),
            ClockSource::ExternalMode1 => (SMCR_SMS | SMCR_ECE, SMCR_SMS),
            ClockSource::ExternalMode2 => (SMCR_ECE, SMCR_ECE),
        };
        self.bus.modify_bits(self.reg(SMCR), clear, set);
    }

    pub fn set_encoder_mode(&self, mode: EncoderMode) {
        self.bus
            .modify_bits(self.reg(SMCR), SMCR_SMS, mode as u32);
    }

    pub fn set_trigger_output(&self, trgo: Trgo) {
        self.bus.modify_bits(self.reg(CR2), CR2_MMS, trgo as u32);
    }

    pub fn set_slave_mode(&self, mode: SlaveMode) {
        self.bus
            .modify_bits(self.reg(SMCR), SMCR_SMS, mode as u32);
    }

    pub fn set_trigger_input(&self, input: TriggerInput) {
        self.bus.modify_bits(self.reg(SMCR), SMCR_TS, input as u32);
    }

    /// Delay the trigger input so master and slaves start together.
    pub fn set_master_slave_mode(&self, on: bool) {
        let set = if on { SMCR_MSM } else { 0 };
        self.bus.modify_bits(self.reg(SMCR), SMCR_MSM, set);
    }

    /// Connect CH1, CH2 and CH3 to TI1 through a XOR gate.
    pub fn set_ti1_xor(&self, on: bool) {
        let set = if on { CR2_TI1S } else { 0 };
        self.bus.modify_bits(self.reg(CR2), CR2_TI1S, set);
    }

    pub fn configure_etr(&self, polarity: EtrPolarity, prescaler: EtrPrescaler, filter: Filter) {
        self.bus.modify_bits(
            self.reg(SMCR),
            SMCR_ETP | SMCR_ETPS | SMCR_ETF,
            polarity as u32 | prescaler as u32 | ((filter as u32) << 8),
        );
    }

    // Break and dead-time.

    pub fn enable_break(&self) {
        self.bus.set_bits(self.reg(BDTR), BDTR_BKE);
    }

    pub fn disable_break(&self) {
        self.bus.clear_bits(self.reg(BDTR), BDTR_BKE);
    }

    pub fn set_break_polarity(&self, polarity: BreakPolarity) {
        self.bus
            .modify_bits(self.reg(BDTR), BDTR_BKP, polarity as u32);
    }

    /// Raw DTG field; its decoding depends on the upper bits.
    pub fn set_dead_time(&self, dead_time: u8) {
        self.bus
            .modify_bits(self.reg(BDTR), BDTR_DTG, dead_time as u32);
    }

    /// Writable once after reset.
    pub fn set_lock_level(&self, level: LockLevel) {
        self.bus
            .modify_bits(self.reg(BDTR), BDTR_LOCK, level as u32);
    }

    /// Main output enable.
    pub fn enable_all_outputs(&self) {
        self.bus.set_bits(self.reg(BDTR), BDTR_MOE);
    }

    pub fn disable_all_outputs(&self) {
        self.bus.clear_bits(self.reg(BDTR), BDTR_MOE);
    }

    pub fn are_all_outputs_enabled(&self) -> bool {
        self.bus.is_set(self.reg(BDTR), BDTR_MOE)
    }

    /// Set MOE again at the next update event after a break.
    pub fn set_automatic_output(&self, on: bool) {
        let set = if on { BDTR_AOE } else { 0 };
        self.bus.modify_bits(self.reg(BDTR), BDTR_AOE, set);
    }

    // DMA.

    /// Transfer `length` registers starting `base` words after CR1 on
    /// each access to DMAR.
    pub fn configure_dma_burst(&self, base: u8, length: u8) {
        let length = length.clamp(1, 18) as u32 - 1;
        self.bus.modify_bits(
            self.reg(DCR),
            DCR_DBA | DCR_DBL,
            (base as u32 & DCR_DBA) | (length << 8),
        );
    }

    pub fn enable_dma_request(&self, request: DmaRequest) {
        self.bus.set_bits(self.reg(DIER), request as u32);
    }

    pub fn disable_dma_request(&self, request: DmaRequest) {
        self.bus.clear_bits(self.reg(DIER), request as u32);
    }

    pub fn generate_event(&self, event: GeneratedEvent) {
        self.bus.write(self.reg(EGR), event as u32);
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(self.reg(SR)) & flag as u32 != 0
    }

    /// SR flags clear on a written 0 and ignore written ones.
    pub fn clear_flag(&self, flag: Flag) {
        self.bus.write(self.reg(SR), !(flag as u32));
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

    /// TIM1 has a line for the capture/compare interrupts and one for the
    /// others; only the lines serving `events` are routed.
    pub fn configure_interrupts(&self, events: &[Event], enable: bool, priority: u8) {
        self.bus.write(self.reg(SR), !SR_ALL);

        let mask = events.iter().fold(0, |m, e| m | *e as u32);
        if enable {
            self.bus.set_bits(self.reg(DIER), mask);
        } else {
            self.bus.clear_bits(self.reg(DIER), mask);
        }

        let dier = self.bus.read(self.reg(DIER)) & DIER_IE;
        let nvic = Nvic::new(self.bus);
        let update = self.instance.update_interrupt();
        let cc = self.instance.cc_interrupt();
        if update == cc {
            nvic.route(cc, dier != 0, priority);
            return;
        }
        let update_group = DIER_IE & !DIER_CC_IE;
        if mask & update_group != 0 {
            nvic.route(update, dier & update_group != 0, priority);
        }
        if mask & DIER_CC_IE != 0 {
            nvic.route(cc, dier & DIER_CC_IE != 0, priority);
        }
    }
}
