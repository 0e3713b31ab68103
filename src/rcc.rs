//! Reset and Clock Control

use core::ops::{BitOr, BitOrAssign};

use crate::bus::Bus;
use crate::error::Error;
use crate::map;
use crate::poll::{poll_until, Spin};

const CR: u32 = map::RCC;
const CFGR: u32 = map::RCC + 0x04;
const CIR: u32 = map::RCC + 0x08;
const APB2RSTR: u32 = map::RCC + 0x0C;
const APB1RSTR: u32 = map::RCC + 0x10;
const AHBENR: u32 = map::RCC + 0x14;
const APB2ENR: u32 = map::RCC + 0x18;
const APB1ENR: u32 = map::RCC + 0x1C;
const BDCR: u32 = map::RCC + 0x20;
const CSR: u32 = map::RCC + 0x24;
const AHBRSTR: u32 = map::RCC + 0x28;
const CFGR2: u32 = map::RCC + 0x2C;
const CFGR3: u32 = map::RCC + 0x30;
const CR2: u32 = map::RCC + 0x34;

const FLASH_ACR: u32 = map::FLASH;

const CR_HSION: u32 = 1 << 0;
const CR_HSIRDY: u32 = 1 << 1;
const CR_HSITRIM: u32 = 0x1F << 3;
const CR_HSEON: u32 = 1 << 16;
const CR_HSERDY: u32 = 1 << 17;
const CR_HSEBYP: u32 = 1 << 18;
const CR_CSSON: u32 = 1 << 19;
const CR_PLLON: u32 = 1 << 24;
const CR_PLLRDY: u32 = 1 << 25;

const CFGR_SW: u32 = 0b11;
const CFGR_SWS: u32 = 0b11 << 2;
const CFGR_HPRE: u32 = 0xF << 4;
const CFGR_PPRE: u32 = 0b111 << 8;
const CFGR_PLLSRC: u32 = 0b11 << 15;
const CFGR_PLLMUL: u32 = 0xF << 18;
const CFGR_MCO: u32 = 0xF << 24;
const CFGR_MCOPRE: u32 = 0b111 << 28;

const CFGR2_PREDIV: u32 = 0xF;
const CFGR3_I2C1SW: u32 = 1 << 4;

const CR2_HSI14ON: u32 = 1 << 0;
const CR2_HSI14RDY: u32 = 1 << 1;
const CR2_HSI14DIS: u32 = 1 << 2;
const CR2_HSI48ON: u32 = 1 << 16;
const CR2_HSI48RDY: u32 = 1 << 17;

const BDCR_LSEON: u32 = 1 << 0;
const BDCR_LSERDY: u32 = 1 << 1;
const BDCR_LSEBYP: u32 = 1 << 2;
const BDCR_LSEDRV: u32 = 0b11 << 3;
const BDCR_RTCSEL: u32 = 0b11 << 8;
const BDCR_RTCEN: u32 = 1 << 15;
const BDCR_BDRST: u32 = 1 << 16;

const CSR_LSION: u32 = 1 << 0;
const CSR_LSIRDY: u32 = 1 << 1;
const CSR_RMVF: u32 = 1 << 24;
const CSR_RESET_FLAGS: u32 = 0xFF << 24 & !CSR_RMVF;

const FLASH_ACR_LATENCY: u32 = 0b111;
const FLASH_ACR_PRFTBE: u32 = 1 << 4;

/// Internal high speed oscillator frequency.
pub const HSI_HZ: u32 = 8_000_000;
/// Internal 48 MHz oscillator frequency.
pub const HSI48_HZ: u32 = 48_000_000;
/// Internal low speed oscillator frequency.
pub const LSI_HZ: u32 = 40_000;
/// External low speed crystal frequency.
pub const LSE_HZ: u32 = 32_768;
/// Default external crystal frequency.
pub const HSE_HZ: u32 = 8_000_000;

/// Highest HCLK that runs with zero flash wait states.
const ZERO_WAIT_STATE_MAX_HZ: u32 = 24_000_000;

/// Poll budget for oscillators and clock switches.
pub const CLOCK_TIMEOUT_CYCLES: u32 = 0x5000;

/// A set of peripherals gated by one enable register and reset by one reset register.
pub trait PeripheralMask: Copy {
    /// Clock-enable register.
    const ENR: u32;
    /// Reset register.
    const RSTR: u32;
    /// Bits of the set that have a reset line in `RSTR`.
    const RESETTABLE: u32;

    fn bits(self) -> u32;
}

macro_rules! peripheral_masks {
    ($(
        $(#[$doc:meta])*
        $Mask:ident: ($enr:expr, $rstr:expr $(, no_reset: [$($NoReset:ident),+])?) {
            $($NAME:ident = $bit:expr),+ $(,)?
        }
    )+) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            #[cfg_attr(feature = "defmt", derive(defmt::Format))]
            pub struct $Mask(u32);

            impl $Mask {
                $(pub const $NAME: Self = Self(1 << $bit);)+

                pub const fn empty() -> Self {
                    Self(0)
                }

                pub const fn all() -> Self {
                    Self(0 $(| (1 << $bit))+)
                }

                pub const fn bits(self) -> u32 {
                    self.0
                }

                pub const fn contains(self, other: Self) -> bool {
                    self.0 & other.0 == other.0
                }
            }

            impl BitOr for $Mask {
                type Output = Self;

                fn bitor(self, rhs: Self) -> Self {
                    Self(self.0 | rhs.0)
                }
            }

            impl BitOrAssign for $Mask {
                fn bitor_assign(&mut self, rhs: Self) {
                    self.0 |= rhs.0;
                }
            }

            impl PeripheralMask for $Mask {
                const ENR: u32 = $enr;
                const RSTR: u32 = $rstr;
                const RESETTABLE: u32 = Self::all().0 $($(& !Self::$NoReset.0)+)?;

                fn bits(self) -> u32 {
                    self.0
                }
            }
        )+
    };
}

peripheral_masks! {
    /// Peripherals on the AHB bus.
    ///
    /// DMA, SRAM, flash interface and CRC have no reset line; the reset
    /// functions leave their bits out.
    AhbMask: (AHBENR, AHBRSTR, no_reset: [DMA1, DMA2, SRAM, FLITF, CRC]) {
        DMA1 = 0,
        DMA2 = 1,
        SRAM = 2,
        FLITF = 4,
        CRC = 6,
        GPIOA = 17,
        GPIOB = 18,
        GPIOC = 19,
        GPIOD = 20,
        GPIOE = 21,
        GPIOF = 22,
        TSC = 24,
    }

    /// Peripherals on the APB bus, first register group.
    Apb1Mask: (APB1ENR, APB1RSTR) {
        TIM2 = 0,
        TIM3 = 1,
        TIM6 = 4,
        TIM7 = 5,
        TIM14 = 8,
        WWDG = 11,
        SPI2 = 14,
        USART2 = 17,
        USART3 = 18,
        USART4 = 19,
        USART5 = 20,
        I2C1 = 21,
        I2C2 = 22,
        USB = 23,
        CAN = 25,
        CRS = 27,
        PWR = 28,
        DAC = 29,
        CEC = 30,
    }

    /// Peripherals on the APB bus, second register group.
    Apb2Mask: (APB2ENR, APB2RSTR) {
        SYSCFG = 0,
        USART6 = 5,
        USART7 = 6,
        USART8 = 7,
        ADC1 = 9,
        TIM1 = 11,
        SPI1 = 12,
        USART1 = 14,
        TIM15 = 16,
        TIM16 = 17,
        TIM17 = 18,
        DBGMCU = 22,
    }
}

/// System clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysClkSource {
    Hsi = 0b00,
    Hse = 0b01,
    Pll = 0b10,
    Hsi48 = 0b11,
}

impl SysClkSource {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Self::Hsi,
            0b01 => Self::Hse,
            0b10 => Self::Pll,
            _ => Self::Hsi48,
        }
    }
}

/// PLL input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllSource {
    /// HSI divided by 2, the predivider is ignored.
    HsiDiv2 = 0b00 << 15,
    HsiPrediv = 0b01 << 15,
    HsePrediv = 0b10 << 15,
    Hsi48Prediv = 0b11 << 15,
}

/// AHB prescaler applied to SYSCLK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AhbPrescaler {
    Div1 = 0b0000 << 4,
    Div2 = 0b1000 << 4,
    Div4 = 0b1001 << 4,
    Div8 = 0b1010 << 4,
    Div16 = 0b1011 << 4,
    Div64 = 0b1100 << 4,
    Div128 = 0b1101 << 4,
    Div256 = 0b1110 << 4,
    Div512 = 0b1111 << 4,
}

/// APB prescaler applied to HCLK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApbPrescaler {
    Div1 = 0b000 << 8,
    Div2 = 0b100 << 8,
    Div4 = 0b101 << 8,
    Div8 = 0b110 << 8,
    Div16 = 0b111 << 8,
}

/// RTC clock source, stored in the backup domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcClockSource {
    None = 0b00 << 8,
    Lse = 0b01 << 8,
    Lsi = 0b10 << 8,
    HseDiv32 = 0b11 << 8,
}

/// LSE oscillator drive capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LseDrive {
    Low = 0b00 << 3,
    MediumLow = 0b01 << 3,
    MediumHigh = 0b10 << 3,
    High = 0b11 << 3,
}

/// I2C1 kernel clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cClockSource {
    Hsi = 0,
    SysClk = CFGR3_I2C1SW as isize,
}

/// Signal routed to the MCO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum McoSource {
    None = 0x0 << 24,
    Hsi14 = 0x1 << 24,
    Lsi = 0x2 << 24,
    Lse = 0x3 << 24,
    SysClk = 0x4 << 24,
    Hsi = 0x5 << 24,
    Hse = 0x6 << 24,
    Pll = 0x7 << 24,
    Hsi48 = 0x8 << 24,
}

/// Oscillator interrupt flags in CIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    LsiRdy = 1 << 0,
    LseRdy = 1 << 1,
    HsiRdy = 1 << 2,
    HseRdy = 1 << 3,
    PllRdy = 1 << 4,
    Hsi14Rdy = 1 << 5,
    Hsi48Rdy = 1 << 6,
    Css = 1 << 7,
}

/// Cause of the last reset, from CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum ResetFlag {
    V18PwrRst = 1 << 23,
    OptionByteLoader = 1 << 25,
    Pin = 1 << 26,
    PowerOn = 1 << 27,
    Software = 1 << 28,
    IndependentWatchdog = 1 << 29,
    WindowWatchdog = 1 << 30,
    LowPower = 1 << 31,
}

/// PLL setup used by [`Rcc::configure_pll_system_clock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfig {
    pub source: PllSource,
    /// Input divider, 1..=16. Ignored for [`PllSource::HsiDiv2`].
    pub prediv: u8,
    /// Multiplier, 2..=16.
    pub mul: u8,
}

impl Default for PllConfig {
    /// 48 MHz from HSI/2.
    fn default() -> Self {
        Self {
            source: PllSource::HsiDiv2,
            prediv: 1,
            mul: 12,
        }
    }
}

impl PllConfig {
    /// `prediv` brought into 1..=16, as programmed.
    const fn divider(&self) -> u32 {
        match self.prediv {
            0 => 1,
            d if d > 16 => 16,
            d => d as u32,
        }
    }

    /// `mul` brought into 2..=16, as programmed.
    const fn multiplier(&self) -> u32 {
        match self.mul {
            0 | 1 => 2,
            m if m > 16 => 16,
            m => m as u32,
        }
    }

    /// The PLL output frequency for a given HSE frequency.
    pub const fn output_freq(&self, hse_hz: u32) -> u32 {
        let input = match self.source {
            PllSource::HsiDiv2 => HSI_HZ / 2,
            PllSource::HsiPrediv => HSI_HZ / self.divider(),
            PllSource::HsePrediv => hse_hz / self.divider(),
            PllSource::Hsi48Prediv => HSI48_HZ / self.divider(),
        };
        input * self.multiplier()
    }
}

/// Bus clock frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    pub sysclk: u32,
    pub hclk: u32,
    pub pclk: u32,
}

/// Clock and reset controller.
#[derive(Debug)]
pub struct Rcc<'a, B: Bus> {
    bus: &'a B,
    hse_hz: u32,
}

impl<'a, B: Bus> Rcc<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self::with_hse(bus, HSE_HZ)
    }

    /// Use a crystal or external clock of `hse_hz` for frequency computations.
    pub fn with_hse(bus: &'a B, hse_hz: u32) -> Self {
        Self { bus, hse_hz }
    }

    // Peripheral clock gating and resets.

    /// Enable the clocks of the peripherals in `mask`.
    ///
    /// The register is read back so that the peripheral is usable on return.
    pub fn enable_clock<M: PeripheralMask>(&self, mask: M) {
        self.bus.set_bits(M::ENR, mask.bits());
        let _ = self.bus.read(M::ENR);
    }

    pub fn disable_clock<M: PeripheralMask>(&self, mask: M) {
        self.bus.clear_bits(M::ENR, mask.bits());
    }

    /// True if the clocks of all peripherals in `mask` are enabled.
    pub fn is_clock_enabled<M: PeripheralMask>(&self, mask: M) -> bool {
        self.bus.is_set(M::ENR, mask.bits())
    }

    /// Hold the peripherals of `mask` in reset. Bits without a reset line
    /// are ignored.
    pub fn force_reset<M: PeripheralMask>(&self, mask: M) {
        self.bus.set_bits(M::RSTR, mask.bits() & M::RESETTABLE);
    }

    pub fn release_reset<M: PeripheralMask>(&self, mask: M) {
        self.bus.clear_bits(M::RSTR, mask.bits() & M::RESETTABLE);
    }

    /// Enable the clock, then pulse the reset line, restoring the power-on
    /// register values.
    pub fn reset_pulse<M: PeripheralMask>(&self, mask: M) {
        self.enable_clock(mask);
        self.force_reset(mask);
        self.release_reset(mask);
    }

    // Oscillators.

    pub fn enable_hsi(&self) {
        self.bus.set_bits(CR, CR_HSION);
    }

    pub fn disable_hsi(&self) {
        self.bus.clear_bits(CR, CR_HSION);
    }

    pub fn is_hsi_ready(&self) -> bool {
        self.bus.is_set(CR, CR_HSIRDY)
    }

    /// HSI trimming, 0..=31, default 16.
    pub fn set_hsi_trimming(&self, trim: u8) {
        self.bus
            .modify_bits(CR, CR_HSITRIM, ((trim as u32) << 3) & CR_HSITRIM);
    }

    pub fn hsi_trimming(&self) -> u8 {
        (self.bus.field(CR, CR_HSITRIM) >> 3) as u8
    }

    pub fn enable_hse(&self) {
        self.bus.set_bits(CR, CR_HSEON);
    }

    pub fn disable_hse(&self) {
        self.bus.clear_bits(CR, CR_HSEON);
    }

    pub fn is_hse_ready(&self) -> bool {
        self.bus.is_set(CR, CR_HSERDY)
    }

    pub fn enable_hse_bypass(&self) {
        self.bus.set_bits(CR, CR_HSEBYP);
    }

    pub fn disable_hse_bypass(&self) {
        self.bus.clear_bits(CR, CR_HSEBYP);
    }

    pub fn enable_css(&self) {
        self.bus.set_bits(CR, CR_CSSON);
    }

    pub fn enable_hsi14(&self) {
        self.bus.set_bits(CR2, CR2_HSI14ON);
    }

    pub fn disable_hsi14(&self) {
        self.bus.clear_bits(CR2, CR2_HSI14ON);
    }

    pub fn is_hsi14_ready(&self) -> bool {
        self.bus.is_set(CR2, CR2_HSI14RDY)
    }

    /// Let the ADC switch HSI14 on and off by itself.
    pub fn enable_hsi14_adc_control(&self) {
        self.bus.clear_bits(CR2, CR2_HSI14DIS);
    }

    pub fn disable_hsi14_adc_control(&self) {
        self.bus.set_bits(CR2, CR2_HSI14DIS);
    }

    pub fn enable_hsi48(&self) {
        self.bus.set_bits(CR2, CR2_HSI48ON);
    }

    pub fn disable_hsi48(&self) {
        self.bus.clear_bits(CR2, CR2_HSI48ON);
    }

    pub fn is_hsi48_ready(&self) -> bool {
        self.bus.is_set(CR2, CR2_HSI48RDY)
    }

    pub fn enable_lsi(&self) {
        self.bus.set_bits(CSR, CSR_LSION);
    }

    pub fn disable_lsi(&self) {
        self.bus.clear_bits(CSR, CSR_LSION);
    }

    pub fn is_lsi_ready(&self) -> bool {
        self.bus.is_set(CSR, CSR_LSIRDY)
    }

    // The LSE and RTC bits live in the backup domain: PWR backup access
    // must be enabled before writing them.

    pub fn enable_lse(&self) {
        self.bus.set_bits(BDCR, BDCR_LSEON);
    }

    pub fn disable_lse(&self) {
        self.bus.clear_bits(BDCR, BDCR_LSEON);
    }

    pub fn is_lse_ready(&self) -> bool {
        self.bus.is_set(BDCR, BDCR_LSERDY)
    }

    pub fn enable_lse_bypass(&self) {
        self.bus.set_bits(BDCR, BDCR_LSEBYP);
    }

    pub fn disable_lse_bypass(&self) {
        self.bus.clear_bits(BDCR, BDCR_LSEBYP);
    }

    pub fn set_lse_drive(&self, drive: LseDrive) {
        self.bus.modify_bits(BDCR, BDCR_LSEDRV, drive as u32);
    }

    pub fn set_rtc_clock_source(&self, source: RtcClockSource) {
        self.bus.modify_bits(BDCR, BDCR_RTCSEL, source as u32);
    }

    pub fn rtc_clock_source(&self) -> RtcClockSource {
        match self.bus.field(BDCR, BDCR_RTCSEL) >> 8 {
            0b00 => RtcClockSource::None,
            0b01 => RtcClockSource::Lse,
            0b10 => RtcClockSource::Lsi,
            _ => RtcClockSource::HseDiv32,
        }
    }

    pub fn enable_rtc(&self) {
        self.bus.set_bits(BDCR, BDCR_RTCEN);
    }

    pub fn disable_rtc(&self) {
        self.bus.clear_bits(BDCR, BDCR_RTCEN);
    }

    pub fn is_rtc_enabled(&self) -> bool {
        self.bus.is_set(BDCR, BDCR_RTCEN)
    }

    /// Pulse the backup domain reset, clearing the RTC and its clock selection.
    pub fn reset_backup_domain(&self) {
        self.bus.set_bits(BDCR, BDCR_BDRST);
        self.bus.clear_bits(BDCR, BDCR_BDRST);
    }

    /// Start an oscillator and wait for its ready flag.
    pub fn start_lsi(&self) -> Result<(), Error> {
        self.enable_lsi();
        poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_lsi_ready())
    }

    pub fn start_lse(&self) -> Result<(), Error> {
        self.enable_lse();
        poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_lse_ready())
    }

    pub fn start_hsi14(&self) -> Result<(), Error> {
        self.enable_hsi14();
        poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_hsi14_ready())
    }

    // System clock tree.

    pub fn set_sysclk_source(&self, source: SysClkSource) {
        self.bus.modify_bits(CFGR, CFGR_SW, source as u32);
    }

    /// The clock actually driving SYSCLK.
    pub fn sysclk_source(&self) -> SysClkSource {
        SysClkSource::from_bits(self.bus.field(CFGR, CFGR_SWS) >> 2)
    }

    pub fn set_ahb_prescaler(&self, prescaler: AhbPrescaler) {
        self.bus.modify_bits(CFGR, CFGR_HPRE, prescaler as u32);
    }

    pub fn set_apb_prescaler(&self, prescaler: ApbPrescaler) {
        self.bus.modify_bits(CFGR, CFGR_PPRE, prescaler as u32);
    }

    pub fn set_mco(&self, source: McoSource, prescaler_log2: u8) {
        self.bus.modify_bits(
            CFGR,
            CFGR_MCO | CFGR_MCOPRE,
            source as u32 | (((prescaler_log2 as u32) << 28) & CFGR_MCOPRE),
        );
    }

    /// Program the PLL. It must be off.
    pub fn configure_pll(&self, config: &PllConfig) {
        let mul = (config.multiplier() - 2) << 18;
        self.bus
            .modify_bits(CFGR, CFGR_PLLSRC | CFGR_PLLMUL, config.source as u32 | mul);
        self.bus
            .modify_bits(CFGR2, CFGR2_PREDIV, config.divider() - 1);
    }

    pub fn enable_pll(&self) {
        self.bus.set_bits(CR, CR_PLLON);
    }

    pub fn disable_pll(&self) {
        self.bus.clear_bits(CR, CR_PLLON);
    }

    pub fn is_pll_ready(&self) -> bool {
        self.bus.is_set(CR, CR_PLLRDY)
    }

    pub fn set_i2c1_clock_source(&self, source: I2cClockSource) {
        self.bus.modify_bits(CFGR3, CFGR3_I2C1SW, source as u32);
    }

    pub fn i2c1_clock_freq(&self) -> u32 {
        if self.bus.is_set(CFGR3, CFGR3_I2C1SW) {
            self.sysclk_freq()
        } else {
            HSI_HZ
        }
    }

    /// The PLL output as currently programmed.
    pub fn pll_freq(&self) -> u32 {
        let cfgr = self.bus.read(CFGR);
        let mul = ((cfgr & CFGR_PLLMUL) >> 18) + 2;
        let prediv = (self.bus.read(CFGR2) & CFGR2_PREDIV) + 1;
        let input = match (cfgr & CFGR_PLLSRC) >> 15 {
            0b00 => HSI_HZ / 2,
            0b01 => HSI_HZ / prediv,
            0b10 => self.hse_hz / prediv,
            _ => HSI48_HZ / prediv,
        };
        input * mul.min(16)
    }

    pub fn sysclk_freq(&self) -> u32 {
        match self.sysclk_source() {
            SysClkSource::Hsi => HSI_HZ,
            SysClkSource::Hse => self.hse_hz,
            SysClkSource::Pll => self.pll_freq(),
            SysClkSource::Hsi48 => HSI48_HZ,
        }
    }

    /// The frequencies of the bus clocks as the registers program them.
    pub fn clocks(&self) -> Clocks {
        let sysclk = self.sysclk_freq();
        let cfgr = self.bus.read(CFGR);
        let hclk = sysclk >> ahb_shift(cfgr);
        let pclk = hclk >> apb_shift(cfgr);
        Clocks { sysclk, hclk, pclk }
    }

    /// Switch SYSCLK to the PLL.
    ///
    /// Starts the PLL input oscillator, programs and locks the PLL, raises the
    /// flash latency if needed, then switches. Fails with [`Error::Enabled`]
    /// if the PLL is already running.
    pub fn configure_pll_system_clock(
        &self,
        pll: &PllConfig,
        ahb: AhbPrescaler,
        apb: ApbPrescaler,
    ) -> Result<Clocks, Error> {
        if self.is_pll_ready() {
            return Err(Error::Enabled);
        }

        match pll.source {
            PllSource::HsiDiv2 | PllSource::HsiPrediv => {
                self.enable_hsi();
                poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_hsi_ready())?;
            }
            PllSource::HsePrediv => {
                self.enable_hse();
                poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_hse_ready())?;
            }
            PllSource::Hsi48Prediv => {
                self.enable_hsi48();
                poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_hsi48_ready())?;
            }
        }

        let sysclk = pll.output_freq(self.hse_hz);
        let hclk = sysclk >> ahb_shift(ahb as u32);
        if hclk > ZERO_WAIT_STATE_MAX_HZ {
            self.set_flash_latency(1);
        }

        self.configure_pll(pll);
        self.enable_pll();
        poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || self.is_pll_ready())?;

        self.set_ahb_prescaler(ahb);
        self.set_sysclk_source(SysClkSource::Pll);
        poll_until(Spin, CLOCK_TIMEOUT_CYCLES, || {
            self.sysclk_source() == SysClkSource::Pll
        })?;
        self.set_apb_prescaler(apb);

        if hclk <= ZERO_WAIT_STATE_MAX_HZ {
            self.set_flash_latency(0);
        }

        debug!("sysclk switched to PLL: {} Hz", sysclk);
        Ok(self.clocks())
    }

    // Flash interface.

    pub fn set_flash_latency(&self, wait_states: u8) {
        self.bus
            .modify_bits(FLASH_ACR, FLASH_ACR_LATENCY, wait_states as u32 & FLASH_ACR_LATENCY);
    }

    pub fn flash_latency(&self) -> u8 {
        self.bus.field(FLASH_ACR, FLASH_ACR_LATENCY) as u8
    }

    pub fn enable_prefetch(&self) {
        self.bus.set_bits(FLASH_ACR, FLASH_ACR_PRFTBE);
    }

    pub fn disable_prefetch(&self) {
        self.bus.clear_bits(FLASH_ACR, FLASH_ACR_PRFTBE);
    }

    // Interrupt flags.

    pub fn enable_interrupt(&self, flag: Flag) {
        if flag != Flag::Css {
            self.bus.set_bits(CIR, (flag as u32) << 8);
        }
    }

    pub fn disable_interrupt(&self, flag: Flag) {
        if flag != Flag::Css {
            self.bus.clear_bits(CIR, (flag as u32) << 8);
        }
    }

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(CIR) & flag as u32 != 0
    }

    /// Clear through the clear bits, 16 positions above the flag.
    pub fn clear_flag(&self, flag: Flag) {
        self.bus.set_bits(CIR, (flag as u32) << 16);
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

    pub fn is_reset_flag_set(&self, flag: ResetFlag) -> bool {
        self.bus.read(CSR) & flag as u32 != 0
    }

    /// Clear all reset cause flags.
    pub fn clear_reset_flags(&self) {
        self.bus.set_bits(CSR, CSR_RMVF);
    }

    /// All reset cause flags, as a raw mask.
    pub fn reset_flags(&self) -> u32 {
        self.bus.field(CSR, CSR_RESET_FLAGS | ResetFlag::V18PwrRst as u32)
    }
}

fn ahb_shift(cfgr: u32) -> u32 {
    match (cfgr & CFGR_HPRE) >> 4 {
        0b1000 => 1,
        0b1001 => 2,
        0b1010 => 3,
        0b1011 => 4,
        0b1100 => 6,
        0b1101 => 7,
        0b1110 => 8,
        0b1111 => 9,
        _ => 0,
    }
}

fn apb_shift(cfgr: u32) -> u32 {
    match (cfgr & CFGR_PPRE) >> 8 {
        0b100 => 1,
        0b101 => 2,
        0b110 => 3,
        0b111 => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use proptest::prelude::*;

    #[test]
    fn enable_clock_reads_back_the_register() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        rcc.enable_clock(Apb2Mask::SPI1);
        let log = bus.log();
        assert_eq!(
            log.last(),
            Some(&crate::sim::Access::Read(APB2ENR, 1 << 12))
        );
    }

    #[test]
    fn is_clock_enabled_requires_every_bit() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        rcc.enable_clock(Apb1Mask::TIM2);
        assert!(rcc.is_clock_enabled(Apb1Mask::TIM2));
        assert!(!rcc.is_clock_enabled(Apb1Mask::TIM2 | Apb1Mask::TIM3));
        rcc.enable_clock(Apb1Mask::TIM3);
        assert!(rcc.is_clock_enabled(Apb1Mask::TIM2 | Apb1Mask::TIM3));
    }

    #[test]
    fn reset_pulse_leaves_reset_released() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        rcc.reset_pulse(Apb1Mask::I2C1);
        assert_eq!(bus.writes_to(APB1RSTR), vec![1 << 21, 0]);
        assert!(rcc.is_clock_enabled(Apb1Mask::I2C1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enable(u32),
        Disable(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        let mask = any::<u32>().prop_map(|m| m & Apb1Mask::all().bits());
        prop_oneof![
            mask.clone().prop_map(Op::Enable),
            mask.prop_map(Op::Disable),
        ]
    }

    proptest! {
        #[test]
        fn enable_register_tracks_mask_algebra(ops in prop::collection::vec(op(), 0..32)) {
            let bus = SimBus::new();
            let rcc = Rcc::new(&bus);
            let mut model = 0u32;
            for op in &ops {
                match *op {
                    Op::Enable(m) => {
                        rcc.enable_clock(Apb1Mask(m));
                        model |= m;
                    }
                    Op::Disable(m) => {
                        rcc.disable_clock(Apb1Mask(m));
                        model &= !m;
                    }
                }
            }
            prop_assert_eq!(bus.peek(APB1ENR), model);
            prop_assert!(rcc.is_clock_enabled(Apb1Mask(model)));
            for bit in 0..32 {
                let m = Apb1Mask(1 << bit);
                if Apb1Mask::all().contains(m) {
                    prop_assert_eq!(rcc.is_clock_enabled(m), model & (1 << bit) != 0);
                }
            }
        }

        #[test]
        fn enabling_twice_is_idempotent(m in any::<u32>()) {
            let m = m & Apb2Mask::all().bits();
            let bus = SimBus::new();
            let rcc = Rcc::new(&bus);
            rcc.enable_clock(Apb2Mask(m));
            let once = bus.peek(APB2ENR);
            rcc.enable_clock(Apb2Mask(m));
            prop_assert_eq!(bus.peek(APB2ENR), once);
        }
    }

    #[test]
    fn clocks_follow_prescalers() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        // PLL from HSI/2 x12, selected and reported by SWS.
        bus.poke(CFGR, (10 << 18) | 0b10 << 2 | AhbPrescaler::Div2 as u32 | ApbPrescaler::Div4 as u32);
        assert_eq!(
            rcc.clocks(),
            Clocks {
                sysclk: 48_000_000,
                hclk: 24_000_000,
                pclk: 6_000_000
            }
        );
    }

    #[test]
    fn ahb_reset_skips_bits_without_a_reset_line() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        rcc.force_reset(AhbMask::DMA1 | AhbMask::CRC | AhbMask::GPIOA);
        assert_eq!(bus.peek(AHBRSTR), 1 << 17);
        rcc.release_reset(AhbMask::GPIOA);

        bus.clear_log();
        rcc.reset_pulse(AhbMask::CRC);
        assert!(rcc.is_clock_enabled(AhbMask::CRC));
        assert_eq!(bus.peek(AHBRSTR), 0);
        assert!(bus.writes_to(AHBRSTR).iter().all(|&v| v == 0));
    }

    #[test]
    fn pll_fields_out_of_range_are_clamped() {
        let pll = PllConfig {
            source: PllSource::HsePrediv,
            prediv: 0,
            mul: 6,
        };
        assert_eq!(pll.output_freq(8_000_000), 48_000_000);

        let bus = SimBus::new();
        let rcc = Rcc::with_hse(&bus, 8_000_000);
        rcc.configure_pll(&pll);
        assert_eq!(bus.peek(CFGR2) & CFGR2_PREDIV, 0);
        assert_eq!(bus.peek(CFGR) & CFGR_PLLMUL, 4 << 18);
        assert_eq!(rcc.pll_freq(), 48_000_000);

        let wide = PllConfig {
            source: PllSource::Hsi48Prediv,
            prediv: 40,
            mul: 0,
        };
        assert_eq!(wide.output_freq(0), 48_000_000 / 16 * 2);
        rcc.configure_pll(&wide);
        assert_eq!(bus.peek(CFGR2) & CFGR2_PREDIV, 15);
        assert_eq!(bus.peek(CFGR) & CFGR_PLLMUL, 0);
    }

    #[test]
    fn pll_switch_sets_latency_and_waits_for_sws() {
        let bus = SimBus::new();
        bus.poke(CR, CR_HSIRDY);
        // PLLON locks immediately.
        bus.on_write(CR, |regs, v| {
            let rdy = if v & CR_PLLON != 0 { CR_PLLRDY } else { 0 };
            regs.set(CR, v | rdy);
        });
        // SW is mirrored into SWS.
        bus.on_write(CFGR, |regs, v| regs.set(CFGR, (v & !CFGR_SWS) | ((v & CFGR_SW) << 2)));

        let rcc = Rcc::new(&bus);
        let clocks = rcc
            .configure_pll_system_clock(&PllConfig::default(), AhbPrescaler::Div1, ApbPrescaler::Div1)
            .unwrap();
        assert_eq!(clocks.sysclk, 48_000_000);
        assert_eq!(rcc.flash_latency(), 1);
        assert_eq!(rcc.sysclk_source(), SysClkSource::Pll);
    }

    #[test]
    fn pll_switch_times_out_without_lock() {
        let bus = SimBus::new();
        bus.poke(CR, CR_HSIRDY);
        let rcc = Rcc::new(&bus);
        assert_eq!(
            rcc.configure_pll_system_clock(&PllConfig::default(), AhbPrescaler::Div1, ApbPrescaler::Div1),
            Err(Error::Timeout)
        );
        assert_eq!(rcc.sysclk_source(), SysClkSource::Hsi);
    }

    #[test]
    fn take_flag_clears_through_cir() {
        let bus = SimBus::new();
        bus.poke(CIR, Flag::LseRdy as u32);
        bus.on_write(CIR, |regs, v| {
            let flags = regs.get(CIR) & !(v >> 16) & 0xFF;
            regs.set(CIR, (v & 0xFF00) | flags);
        });
        let rcc = Rcc::new(&bus);
        assert!(rcc.take_flag(Flag::LseRdy));
        assert!(!rcc.take_flag(Flag::LseRdy));
    }
}
