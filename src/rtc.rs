//! Real-time clock
//!
//! The calendar registers hold BCD values; functions taking a [`Format`]
//! convert from or to binary when asked to.
//!
//! Most RTC registers are write protected. [`Rtc::unlock`] lifts the
//! protection and returns an [`Unlocked`] guard which restores it when
//! dropped. Setters of protected registers are only available on the guard.
//!
//! The RTC interrupts reach the NVIC through EXTI lines 17 (alarm), 19
//! (tamper and timestamp) and 20 (wake-up), which have to be configured with
//! [`crate::exti`] as well.

use core::ops::{BitOr, Deref, DerefMut};

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;
use crate::poll::{poll_until, SysTickTicks, TickSource};

const TR: u32 = map::RTC;
const DR: u32 = map::RTC + 0x04;
const CR: u32 = map::RTC + 0x08;
const ISR: u32 = map::RTC + 0x0C;
const PRER: u32 = map::RTC + 0x10;
const WUTR: u32 = map::RTC + 0x14;
const ALRMAR: u32 = map::RTC + 0x1C;
const WPR: u32 = map::RTC + 0x24;
const SSR: u32 = map::RTC + 0x28;
const SHIFTR: u32 = map::RTC + 0x2C;
const TSTR: u32 = map::RTC + 0x30;
const TSDR: u32 = map::RTC + 0x34;
const TSSSR: u32 = map::RTC + 0x38;
const CALR: u32 = map::RTC + 0x3C;
const TAFCR: u32 = map::RTC + 0x40;
const ALRMASSR: u32 = map::RTC + 0x44;
const BKP0R: u32 = map::RTC + 0x50;

const TR_MASK: u32 = 0x007F_7F7F;
const DR_RESET: u32 = 0x0000_2101;

const CR_WUCKSEL: u32 = 0b111;
const CR_TSEDGE: u32 = 1 << 3;
const CR_REFCKON: u32 = 1 << 4;
const CR_BYPSHAD: u32 = 1 << 5;
const CR_FMT: u32 = 1 << 6;
const CR_ALRAE: u32 = 1 << 8;
const CR_WUTE: u32 = 1 << 10;
const CR_TSE: u32 = 1 << 11;
const CR_ALRAIE: u32 = 1 << 12;
const CR_WUTIE: u32 = 1 << 14;
const CR_TSIE: u32 = 1 << 15;
const CR_ADD1H: u32 = 1 << 16;
const CR_SUB1H: u32 = 1 << 17;
const CR_BKP: u32 = 1 << 18;
const CR_COSEL: u32 = 1 << 19;
const CR_POL: u32 = 1 << 20;
const CR_OSEL: u32 = 0b11 << 21;
const CR_COE: u32 = 1 << 23;
const CR_IE: u32 = CR_ALRAIE | CR_WUTIE | CR_TSIE;

const ISR_ALRAWF: u32 = 1 << 0;
const ISR_WUTWF: u32 = 1 << 2;
const ISR_SHPF: u32 = 1 << 3;
const ISR_INITS: u32 = 1 << 4;
const ISR_RSF: u32 = 1 << 5;
const ISR_INITF: u32 = 1 << 6;
const ISR_INIT: u32 = 1 << 7;
const ISR_RECALPF: u32 = 1 << 16;
/// Flags raised by the interrupt sources.
const ISR_EVENT_FLAGS: u32 = 0xFD00;
/// Writing all ones sets INIT without clearing any rc_w0 flag.
const ISR_INIT_MASK: u32 = 0xFFFF_FFFF;

const PRER_PREDIV_S: u32 = 0x7FFF;
const PRER_PREDIV_A: u32 = 0x7F << 16;
const PRER_RESET: u32 = PRER_PREDIV_A | 0xFF;

const WUTR_WUT: u32 = 0xFFFF;

const SHIFTR_SUBFS: u32 = 0x7FFF;
const SHIFTR_ADD1S: u32 = 1 << 31;

const CALR_CALM: u32 = 0x1FF;

const TAFCR_TAMPIE: u32 = 1 << 2;
const TAFCR_TAMPTS: u32 = 1 << 7;
const TAFCR_TAMPFREQ: u32 = 0b111 << 8;
const TAFCR_TAMPFLT: u32 = 0b11 << 11;
const TAFCR_TAMPPRCH: u32 = 0b11 << 13;
const TAFCR_TAMPPUDIS: u32 = 1 << 15;

const ALRMASSR_SS: u32 = 0x7FFF;
const ALRMASSR_MASKSS: u32 = 0xF << 24;

const WPR_KEY1: u32 = 0xCA;
const WPR_KEY2: u32 = 0x53;
const WPR_LOCK: u32 = 0xFF;

/// Budgets in SysTick ticks, milliseconds with a 1 ms tick.
const INIT_MODE_TIMEOUT: u32 = 1000;
const SYNCHRO_TIMEOUT: u32 = 1000;
const WRITE_ACCESS_TIMEOUT: u32 = 1000;

pub const ASYNCH_PRESCALER_DEFAULT: u8 = 0x7F;
pub const SYNCH_PRESCALER_DEFAULT: u16 = 0xFF;

pub const fn bin_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub const fn bcd_to_bin(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// Encoding of the calendar values passed to and returned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Format {
    Bin,
    Bcd,
}

impl Format {
    fn encode(self, value: u8) -> u32 {
        match self {
            Format::Bin => bin_to_bcd(value) as u32,
            Format::Bcd => value as u32,
        }
    }

    fn decode(self, bits: u32) -> u8 {
        match self {
            Format::Bin => bcd_to_bin(bits as u8),
            Format::Bcd => bits as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HourFormat {
    H24 = 0,
    AmPm = CR_FMT as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeFormat {
    Am = 0,
    Pm = 1 << 22,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Weekday {
    Monday = 1,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// The weekday field is never 0 once the calendar is running; it reads
    /// back as Monday.
    fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            2 => Weekday::Tuesday,
            3 => Weekday::Wednesday,
            4 => Weekday::Thursday,
            5 => Weekday::Friday,
            6 => Weekday::Saturday,
            7 => Weekday::Sunday,
            _ => Weekday::Monday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub hour_format: HourFormat,
    /// 7 bits.
    pub asynch_prescaler: u8,
    /// 15 bits.
    pub synch_prescaler: u16,
}

/// 24 hour format, 1 Hz from a 32.768 kHz clock.
impl Default for Config {
    fn default() -> Self {
        Self {
            hour_format: HourFormat::H24,
            asynch_prescaler: ASYNCH_PRESCALER_DEFAULT,
            synch_prescaler: SYNCH_PRESCALER_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Time {
    /// Ignored in 24 hour format.
    pub time_format: TimeFormat,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl Default for Time {
    fn default() -> Self {
        Self {
            time_format: TimeFormat::Am,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

impl Time {
    /// Layout shared by TR, TSTR and the time part of ALRMAR.
    fn bits(&self, format: Format) -> u32 {
        self.time_format as u32
            | (format.encode(self.hours) << 16)
            | (format.encode(self.minutes) << 8)
            | format.encode(self.seconds)
    }

    fn from_bits(bits: u32, format: Format) -> Self {
        Self {
            time_format: if bits & TimeFormat::Pm as u32 != 0 {
                TimeFormat::Pm
            } else {
                TimeFormat::Am
            },
            hours: format.decode((bits >> 16) & 0x3F),
            minutes: format.decode((bits >> 8) & 0x7F),
            seconds: format.decode(bits & 0x7F),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Date {
    pub weekday: Weekday,
    pub day: u8,
    pub month: u8,
    /// Years since 2000.
    pub year: u8,
}

/// Monday, January 1st 2000: the reset value of DR.
impl Default for Date {
    fn default() -> Self {
        Self {
            weekday: Weekday::Monday,
            day: 1,
            month: 1,
            year: 0,
        }
    }
}

impl Date {
    fn bits(&self, format: Format) -> u32 {
        (format.encode(self.year) << 16)
            | ((self.weekday as u32) << 13)
            | (format.encode(self.month) << 8)
            | format.encode(self.day)
    }

    fn from_bits(bits: u32, format: Format) -> Self {
        Self {
            weekday: Weekday::from_bits(bits >> 13),
            day: format.decode(bits & 0x3F),
            month: format.decode((bits >> 8) & 0x1F),
            year: format.decode((bits >> 16) & 0xFF),
        }
    }
}

/// Alarm fields left out of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmMask(u32);

impl AlarmMask {
    pub const NONE: Self = Self(0);
    pub const SECONDS: Self = Self(1 << 7);
    pub const MINUTES: Self = Self(1 << 15);
    pub const HOURS: Self = Self(1 << 23);
    pub const DATE_WEEKDAY: Self = Self(1 << 31);
    pub const ALL: Self = Self((1 << 7) | (1 << 15) | (1 << 23) | (1 << 31));

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for AlarmMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmDaySelect {
    /// `date_weekday` is a day of the month.
    Date = 0,
    /// `date_weekday` is a [`Weekday`] number.
    Weekday = 1 << 30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Alarm {
    pub time: Time,
    pub mask: AlarmMask,
    pub day_select: AlarmDaySelect,
    pub date_weekday: u8,
}

impl Default for Alarm {
    fn default() -> Self {
        Self {
            time: Time::default(),
            mask: AlarmMask::NONE,
            day_select: AlarmDaySelect::Date,
            date_weekday: 1,
        }
    }
}

impl Alarm {
    fn bits(&self, format: Format) -> u32 {
        let day = match self.day_select {
            AlarmDaySelect::Date => format.encode(self.date_weekday),
            AlarmDaySelect::Weekday => self.date_weekday as u32 & 0b111,
        };
        self.mask.0 | self.day_select as u32 | (day << 24) | self.time.bits(format)
    }

    fn from_bits(bits: u32, format: Format) -> Self {
        let day_select = if bits & AlarmDaySelect::Weekday as u32 != 0 {
            AlarmDaySelect::Weekday
        } else {
            AlarmDaySelect::Date
        };
        let day = (bits >> 24) & 0x3F;
        Self {
            time: Time::from_bits(bits & TR_MASK, format),
            mask: AlarmMask(bits & AlarmMask::ALL.0),
            day_select,
            date_weekday: match day_select {
                AlarmDaySelect::Date => format.decode(day),
                AlarmDaySelect::Weekday => (day & 0b111) as u8,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimestampEdge {
    Rising = 0,
    Falling = CR_TSEDGE as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimestampConfig {
    pub edge: TimestampEdge,
    /// Also save a timestamp on every tamper event.
    pub on_tamper: bool,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            edge: TimestampEdge::Rising,
            on_tamper: false,
        }
    }
}

/// Calendar captured on a timestamp event. TSDR has no year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    pub time: Time,
    pub weekday: Weekday,
    pub day: u8,
    pub month: u8,
    pub subsecond: u16,
}

/// A set of tamper inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tampers(u32);

impl Tampers {
    pub const TAMPER1: Self = Self(1 << 0);
    pub const TAMPER2: Self = Self(1 << 3);
    pub const TAMPER3: Self = Self(1 << 5);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// TAMPxTRG sits right above each TAMPxE.
    const fn triggers(self) -> u32 {
        self.0 << 1
    }
}

impl BitOr for Tampers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Edge detection without filter, level detection otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperActive {
    RisingOrLow,
    FallingOrHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperFilter {
    Edge = 0b00 << 11,
    Samples2 = 0b01 << 11,
    Samples4 = 0b10 << 11,
    Samples8 = 0b11 << 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperSampling {
    Div32768 = 0 << 8,
    Div16384 = 1 << 8,
    Div8192 = 2 << 8,
    Div4096 = 3 << 8,
    Div2048 = 4 << 8,
    Div1024 = 5 << 8,
    Div512 = 6 << 8,
    Div256 = 7 << 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperPrecharge {
    Cycles1 = 0b00 << 13,
    Cycles2 = 0b01 << 13,
    Cycles4 = 0b10 << 13,
    Cycles8 = 0b11 << 13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TamperConfig {
    pub tampers: Tampers,
    pub active: TamperActive,
    /// Shared by all tamper inputs.
    pub filter: TamperFilter,
    pub sampling: TamperSampling,
    pub precharge: TamperPrecharge,
    pub pull_up: bool,
    pub timestamp: bool,
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            tampers: Tampers::default(),
            active: TamperActive::RisingOrLow,
            filter: TamperFilter::Edge,
            sampling: TamperSampling::Div32768,
            precharge: TamperPrecharge::Cycles1,
            pull_up: true,
            timestamp: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupClock {
    RtcDiv16 = 0b000,
    RtcDiv8 = 0b001,
    RtcDiv4 = 0b010,
    RtcDiv2 = 0b011,
    /// The 1 Hz calendar clock.
    CkSpre = 0b100,
    /// The 1 Hz calendar clock, with 2^16 added to the reload value.
    CkSpreExtended = 0b110,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationPeriod {
    Seconds32 = 0,
    Seconds16 = 1 << 13,
    Seconds8 = 1 << 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationPulse {
    None = 0,
    /// Add one RTCCLK pulse every 2^11 cycles (+488.5 ppm).
    Insert = 1 << 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationOutput {
    Hz512 = 0,
    Hz1 = CR_COSEL as isize,
}

/// Signal routed to RTC_ALARM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Output {
    Disabled = 0b00 << 21,
    AlarmA = 0b01 << 21,
    Wakeup = 0b11 << 21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Backup {
    Bkp0,
    Bkp1,
    Bkp2,
    Bkp3,
    Bkp4,
}

impl Backup {
    const fn addr(self) -> u32 {
        BKP0R + 4 * self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    AlarmAWrite = ISR_ALRAWF as isize,
    WakeupWrite = ISR_WUTWF as isize,
    ShiftPending = ISR_SHPF as isize,
    Initialized = ISR_INITS as isize,
    /// Cleared only while the write protection is lifted.
    RegistersSynchronized = ISR_RSF as isize,
    InitMode = ISR_INITF as isize,
    AlarmA = 1 << 8,
    Wakeup = 1 << 10,
    Timestamp = 1 << 11,
    TimestampOverflow = 1 << 12,
    Tamper1 = 1 << 13,
    Tamper2 = 1 << 14,
    Tamper3 = 1 << 15,
    RecalibrationPending = ISR_RECALPF as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    AlarmA,
    Wakeup,
    Timestamp,
    Tamper,
}

impl Event {
    const fn enable_bit(self) -> (u32, u32) {
        match self {
            Event::AlarmA => (CR, CR_ALRAIE),
            Event::Wakeup => (CR, CR_WUTIE),
            Event::Timestamp => (CR, CR_TSIE),
            Event::Tamper => (TAFCR, TAFCR_TAMPIE),
        }
    }
}

/// The RTC, polling with the tick source `T`.
#[derive(Debug)]
pub struct Rtc<'a, B: Bus, T: TickSource = SysTickTicks<'a, B>> {
    bus: &'a B,
    ticks: T,
}

impl<'a, B: Bus> Rtc<'a, B> {
    /// Budgets are counted in SysTick wraps.
    pub fn new(bus: &'a B) -> Self {
        Self {
            bus,
            ticks: SysTickTicks::new(bus),
        }
    }
}

impl<'a, B: Bus, T: TickSource> Rtc<'a, B, T> {
    pub fn with_ticks(bus: &'a B, ticks: T) -> Self {
        Self { bus, ticks }
    }

    /// Lift the write protection until the returned guard is dropped.
    pub fn unlock(&mut self) -> Unlocked<'_, 'a, B, T> {
        self.bus.write(WPR, WPR_KEY1);
        self.bus.write(WPR, WPR_KEY2);
        Unlocked { rtc: self }
    }

    pub fn init(&mut self, config: &Config) -> Result<(), Error> {
        let mut rtc = self.unlock();
        rtc.enter_init_mode()?;
        rtc.set_hour_format(config.hour_format);
        rtc.set_synch_prescaler(config.synch_prescaler);
        rtc.set_asynch_prescaler(config.asynch_prescaler);
        rtc.disable_init_mode();
        Ok(())
    }

    /// Restore the reset values of the calendar, alarm, calibration and
    /// tamper registers. The wake-up clock selection and the backup
    /// registers are kept.
    pub fn deinit(&mut self) -> Result<(), Error> {
        let mut rtc = self.unlock();
        rtc.enter_init_mode()?;

        let bus = rtc.bus;
        bus.write(TR, 0);
        bus.write(WUTR, WUTR_WUT);
        bus.write(DR, DR_RESET);
        let wucksel = bus.read(CR) & CR_WUCKSEL;
        bus.write(CR, wucksel);
        bus.write(PRER, PRER_RESET);
        bus.write(ALRMAR, 0);
        bus.write(SHIFTR, 0);
        bus.write(CALR, 0);
        bus.write(ALRMASSR, 0);
        // Also leaves init mode.
        bus.write(ISR, 0);
        bus.write(TAFCR, 0);

        rtc.wait_for_synchro()
    }

    /// Set the time. In 24 hour format the AM/PM indication is forced to AM.
    pub fn init_time(&mut self, format: Format, time: &Time) -> Result<(), Error> {
        let mut time = *time;
        if self.hour_format() == HourFormat::H24 {
            time.time_format = TimeFormat::Am;
        }

        let mut rtc = self.unlock();
        rtc.enter_init_mode()?;
        rtc.bus.write(TR, time.bits(format));
        rtc.exit_init_mode()
    }

    pub fn init_date(&mut self, format: Format, date: &Date) -> Result<(), Error> {
        let mut rtc = self.unlock();
        rtc.enter_init_mode()?;
        rtc.bus.write(DR, date.bits(format));
        rtc.exit_init_mode()
    }

    /// Program and leave disabled alarm A. Enable it with
    /// [`Unlocked::enable_alarm`].
    pub fn init_alarm(&mut self, format: Format, alarm: &Alarm) -> Result<(), Error> {
        let mut alarm = *alarm;
        if self.hour_format() == HourFormat::H24 {
            alarm.time.time_format = TimeFormat::Am;
        }

        let mut rtc = self.unlock();
        rtc.disable_alarm();
        let bus = rtc.bus;
        poll_until(&mut rtc.rtc.ticks, WRITE_ACCESS_TIMEOUT, || {
            bus.read(ISR) & ISR_ALRAWF != 0
        })?;
        bus.write(ALRMAR, alarm.bits(format));
        Ok(())
    }

    pub fn hour_format(&self) -> HourFormat {
        if self.bus.read(CR) & CR_FMT != 0 {
            HourFormat::AmPm
        } else {
            HourFormat::H24
        }
    }

    pub fn synch_prescaler(&self) -> u16 {
        self.bus.field(PRER, PRER_PREDIV_S) as u16
    }

    pub fn asynch_prescaler(&self) -> u8 {
        (self.bus.field(PRER, PRER_PREDIV_A) >> 16) as u8
    }

    /// True once the calendar has been initialized since the last backup
    /// domain reset.
    pub fn is_calendar_initialized(&self) -> bool {
        self.bus.read(ISR) & ISR_INITS != 0
    }

    pub fn is_init_mode(&self) -> bool {
        self.bus.read(ISR) & ISR_INITF != 0
    }

    pub fn is_shadow_bypassed(&self) -> bool {
        self.bus.read(CR) & CR_BYPSHAD != 0
    }

    // Calendar.

    /// Reading TR freezes the shadow DR until it is read; use
    /// [`Rtc::datetime`] for a consistent pair.
    pub fn time(&self, format: Format) -> Time {
        Time::from_bits(self.bus.read(TR), format)
    }

    pub fn date(&self, format: Format) -> Date {
        Date::from_bits(self.bus.read(DR), format)
    }

    pub fn datetime(&self, format: Format) -> (Date, Time) {
        let time = self.time(format);
        (self.date(format), time)
    }

    /// Down-counter of the synchronous prescaler.
    pub fn subsecond(&self) -> u16 {
        self.bus.read(SSR) as u16
    }

    pub fn alarm(&self, format: Format) -> Alarm {
        Alarm::from_bits(self.bus.read(ALRMAR), format)
    }

    pub fn alarm_subsecond(&self) -> (u8, u16) {
        let ssr = self.bus.read(ALRMASSR);
        (
            ((ssr & ALRMASSR_MASKSS) >> 24) as u8,
            (ssr & ALRMASSR_SS) as u16,
        )
    }

    pub fn wakeup_reload(&self) -> u16 {
        self.bus.field(WUTR, WUTR_WUT) as u16
    }

    // Timestamp.

    pub fn timestamp(&self, format: Format) -> Timestamp {
        let tsdr = self.bus.read(TSDR);
        Timestamp {
            time: Time::from_bits(self.bus.read(TSTR), format),
            weekday: Weekday::from_bits(tsdr >> 13),
            day: format.decode(tsdr & 0x3F),
            month: format.decode((tsdr >> 8) & 0x1F),
            subsecond: self.bus.read(TSSSR) as u16,
        }
    }

    // Tamper. TAFCR is not write protected.

    pub fn configure_tamper(&self, config: &TamperConfig) {
        let enable = config.tampers.bits();
        let triggers = config.tampers.triggers();
        let mut set = config.filter as u32
            | config.sampling as u32
            | config.precharge as u32
            | enable;
        if config.active == TamperActive::FallingOrHigh {
            set |= triggers;
        }
        if !config.pull_up {
            set |= TAFCR_TAMPPUDIS;
        }
        if config.timestamp {
            set |= TAFCR_TAMPTS;
        }
        self.bus.modify_bits(
            TAFCR,
            enable
                | triggers
                | TAFCR_TAMPFREQ
                | TAFCR_TAMPFLT
                | TAFCR_TAMPPRCH
                | TAFCR_TAMPPUDIS
                | TAFCR_TAMPTS,
            set,
        );
    }

    pub fn disable_tamper(&self, tampers: Tampers) {
        self.bus.clear_bits(TAFCR, tampers.bits());
    }

    // Backup registers, kept across resets while VBAT is present.

    pub fn write_backup(&self, register: Backup, value: u32) {
        self.bus.write(register.addr(), value);
    }

    pub fn read_backup(&self, register: Backup) -> u32 {
        self.bus.read(register.addr())
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(ISR) & flag as u32 != 0
    }

    /// ISR flags clear on a written 0. Every other flag gets a 1 and INIT is
    /// written back as it is.
    pub fn clear_flag(&self, flag: Flag) {
        self.clear_flags(flag as u32);
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

    fn clear_flags(&self, flags: u32) {
        let init = self.bus.read(ISR) & ISR_INIT;
        self.bus.write(ISR, !((flags | ISR_INIT) & 0xFFFF) | init);
    }

    // Interrupts.

    pub fn configure_interrupts(&mut self, events: &[Event], enable: bool, priority: u8) {
        self.clear_flags(ISR_EVENT_FLAGS);

        {
            let rtc = self.unlock();
            for event in events {
                let (reg, bit) = event.enable_bit();
                if enable {
                    rtc.bus.set_bits(reg, bit);
                } else {
                    rtc.bus.clear_bits(reg, bit);
                }
            }
        }

        let active =
            self.bus.read(CR) & CR_IE != 0 || self.bus.read(TAFCR) & TAFCR_TAMPIE != 0;
        Nvic::new(self.bus).route(Interrupt::Rtc, active, priority);
    }
}

/// The RTC with its write protection lifted. Dropping the guard locks the
/// registers again.
#[derive(Debug)]
pub struct Unlocked<'r, 'a, B: Bus, T: TickSource> {
    rtc: &'r mut Rtc<'a, B, T>,
}

impl<'a, B: Bus, T: TickSource> Deref for Unlocked<'_, 'a, B, T> {
    type Target = Rtc<'a, B, T>;

    fn deref(&self) -> &Self::Target {
        &*self.rtc
    }
}

impl<B: Bus, T: TickSource> DerefMut for Unlocked<'_, '_, B, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.rtc
    }
}

impl<B: Bus, T: TickSource> Drop for Unlocked<'_, '_, B, T> {
    fn drop(&mut self) {
        self.rtc.bus.write(WPR, WPR_LOCK);
    }
}

impl<B: Bus, T: TickSource> Unlocked<'_, '_, B, T> {
    /// Stop the calendar for initialization. Nothing is written if the RTC
    /// is already in init mode.
    pub fn enter_init_mode(&mut self) -> Result<(), Error> {
        let bus = self.rtc.bus;
        if bus.read(ISR) & ISR_INITF != 0 {
            return Ok(());
        }
        bus.write(ISR, ISR_INIT_MASK);
        poll_until(&mut self.rtc.ticks, INIT_MODE_TIMEOUT, || {
            bus.read(ISR) & ISR_INITF != 0
        })
        .map_err(|e| {
            warn!("rtc: init mode not acknowledged");
            e
        })
    }

    /// Clear INIT without waiting for the shadow registers.
    pub fn disable_init_mode(&self) {
        self.bus.write(ISR, !ISR_INIT);
    }

    /// Leave init mode, then wait for the shadow registers unless they are
    /// bypassed.
    pub fn exit_init_mode(&mut self) -> Result<(), Error> {
        self.disable_init_mode();
        if self.is_shadow_bypassed() {
            Ok(())
        } else {
            self.wait_for_synchro()
        }
    }

    /// Clear RSF, then wait for it to clear and to be set again by the next
    /// shadow register update.
    pub fn wait_for_synchro(&mut self) -> Result<(), Error> {
        self.clear_flags(ISR_RSF);
        let bus = self.rtc.bus;
        poll_until(&mut self.rtc.ticks, SYNCHRO_TIMEOUT, || {
            bus.read(ISR) & ISR_RSF == 0
        })?;
        poll_until(&mut self.rtc.ticks, SYNCHRO_TIMEOUT, || {
            bus.read(ISR) & ISR_RSF != 0
        })
        .map_err(|e| {
            warn!("rtc: shadow registers not synchronized");
            e
        })
    }

    /// Only takes effect in init mode.
    pub fn set_hour_format(&self, format: HourFormat) {
        self.bus.modify_bits(CR, CR_FMT, format as u32);
    }

    /// Only takes effect in init mode.
    pub fn set_synch_prescaler(&self, prescaler: u16) {
        self.bus
            .modify_bits(PRER, PRER_PREDIV_S, prescaler as u32 & PRER_PREDIV_S);
    }

    /// Only takes effect in init mode.
    pub fn set_asynch_prescaler(&self, prescaler: u8) {
        self.bus
            .modify_bits(PRER, PRER_PREDIV_A, ((prescaler as u32) << 16) & PRER_PREDIV_A);
    }

    pub fn enable_bypass_shadow(&self) {
        self.bus.set_bits(CR, CR_BYPSHAD);
    }

    pub fn disable_bypass_shadow(&self) {
        self.bus.clear_bits(CR, CR_BYPSHAD);
    }

    /// 50 or 60 Hz reference clock detection. Only takes effect in init mode.
    pub fn enable_reference_clock(&self) {
        self.bus.set_bits(CR, CR_REFCKON);
    }

    pub fn disable_reference_clock(&self) {
        self.bus.clear_bits(CR, CR_REFCKON);
    }

    // Daylight saving.

    pub fn add_one_hour(&self) {
        self.bus.set_bits(CR, CR_ADD1H);
    }

    pub fn subtract_one_hour(&self) {
        self.bus.set_bits(CR, CR_SUB1H);
    }

    /// Free bit for the application to remember a daylight saving change.
    pub fn set_summer_time_stored(&self, stored: bool) {
        let set = if stored { CR_BKP } else { 0 };
        self.bus.modify_bits(CR, CR_BKP, set);
    }

    // Outputs.

    pub fn set_calibration_output(&self, output: Option<CalibrationOutput>) {
        match output {
            Some(output) => self
                .bus
                .modify_bits(CR, CR_COSEL | CR_COE, output as u32 | CR_COE),
            None => self.bus.clear_bits(CR, CR_COE),
        }
    }

    pub fn set_output(&self, output: Output) {
        self.bus.modify_bits(CR, CR_OSEL, output as u32);
    }

    /// Drive RTC_ALARM low when the selected flag is set.
    pub fn set_output_active_low(&self, low: bool) {
        let set = if low { CR_POL } else { 0 };
        self.bus.modify_bits(CR, CR_POL, set);
    }

    // Alarm.

    pub fn enable_alarm(&self) {
        self.bus.set_bits(CR, CR_ALRAE);
    }

    pub fn disable_alarm(&self) {
        self.bus.clear_bits(CR, CR_ALRAE);
    }

    /// Compare the `mask_bits` least significant bits of the sub-second
    /// counter against `subsecond`. Write only while the alarm is disabled.
    pub fn set_alarm_subsecond(&self, mask_bits: u8, subsecond: u16) {
        self.bus.write(
            ALRMASSR,
            (((mask_bits as u32) << 24) & ALRMASSR_MASKSS) | (subsecond as u32 & ALRMASSR_SS),
        );
    }

    // Wake-up timer.

    /// Stop the timer, wait for write access, then restart it with `clock`
    /// and `reload`.
    pub fn configure_wakeup(&mut self, clock: WakeupClock, reload: u16) -> Result<(), Error> {
        self.disable_wakeup();
        let bus = self.rtc.bus;
        poll_until(&mut self.rtc.ticks, WRITE_ACCESS_TIMEOUT, || {
            bus.read(ISR) & ISR_WUTWF != 0
        })?;
        bus.modify_bits(CR, CR_WUCKSEL, clock as u32);
        bus.write(WUTR, reload as u32);
        bus.set_bits(CR, CR_WUTE);
        Ok(())
    }

    pub fn disable_wakeup(&self) {
        self.bus.clear_bits(CR, CR_WUTE);
    }

    // Timestamp.

    pub fn enable_timestamp(&self, config: &TimestampConfig) {
        // The edge may only change while timestamping is off.
        self.bus.clear_bits(CR, CR_TSE);
        self.bus.modify_bits(CR, CR_TSEDGE, config.edge as u32);
        let on_tamper = if config.on_tamper { TAFCR_TAMPTS } else { 0 };
        self.bus.modify_bits(TAFCR, TAFCR_TAMPTS, on_tamper);
        self.bus.set_bits(CR, CR_TSE);
    }

    pub fn disable_timestamp(&self) {
        self.bus.clear_bits(CR, CR_TSE);
    }

    // Calibration.

    /// Delay the clock by `subtract` 1/(PREDIV_S+1) second steps, or
    /// advance it by one second minus that when `add_one_second` is set.
    pub fn shift(&mut self, add_one_second: bool, subtract: u16) -> Result<(), Error> {
        if self.bus.read(CR) & CR_REFCKON != 0 {
            return Err(Error::Enabled);
        }
        let bus = self.rtc.bus;
        poll_until(&mut self.rtc.ticks, WRITE_ACCESS_TIMEOUT, || {
            bus.read(ISR) & ISR_SHPF == 0
        })?;
        let add = if add_one_second { SHIFTR_ADD1S } else { 0 };
        bus.write(SHIFTR, add | (subtract as u32 & SHIFTR_SUBFS));

        if self.is_shadow_bypassed() {
            Ok(())
        } else {
            self.wait_for_synchro()
        }
    }

    /// Mask `minus` RTCCLK pulses out of 2^20 over `period`, optionally
    /// inserting one pulse every 2^11.
    pub fn smooth_calibration(
        &mut self,
        period: CalibrationPeriod,
        pulse: CalibrationPulse,
        minus: u16,
    ) -> Result<(), Error> {
        let bus = self.rtc.bus;
        poll_until(&mut self.rtc.ticks, WRITE_ACCESS_TIMEOUT, || {
            bus.read(ISR) & ISR_RECALPF == 0
        })?;
        bus.write(
            CALR,
            period as u32 | pulse as u32 | (minus as u32 & CALR_CALM),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::Spin;
    use crate::sim::SimBus;

    const ISR_RC_W0: u32 = ISR_RSF | ISR_EVENT_FLAGS;

    /// ISR model: INITF follows INIT, rc_w0 flags clear on a written 0, the
    /// remaining status bits are read-only. RSF comes back on the read after
    /// it was cleared.
    fn rtc_bus() -> SimBus {
        let bus = SimBus::new().with_nvic();
        bus.on_write(ISR, |regs, v| {
            let current = regs.get(ISR);
            let status = current & !(ISR_RC_W0 | ISR_INIT | ISR_INITF);
            let kept = current & ISR_RC_W0 & v;
            let init = if v & ISR_INIT != 0 {
                ISR_INIT | ISR_INITF
            } else {
                0
            };
            regs.set(ISR, status | kept | init);
        });
        bus.on_read(ISR, |regs| {
            let v = regs.get(ISR);
            if v & ISR_RSF == 0 {
                regs.set(ISR, v | ISR_RSF);
            }
            v
        });
        bus
    }

    fn rtc(bus: &SimBus) -> Rtc<'_, SimBus, Spin> {
        Rtc::with_ticks(bus, Spin)
    }

    #[test]
    fn bcd_conversions() {
        assert_eq!(bin_to_bcd(59), 0x59);
        assert_eq!(bcd_to_bin(0x23), 23);
        for v in 0..100 {
            assert_eq!(bcd_to_bin(bin_to_bcd(v)), v);
        }
    }

    #[test]
    fn init_is_bracketed_by_the_write_protection() {
        let bus = rtc_bus();
        let mut rtc = rtc(&bus);
        rtc.init(&Config {
            hour_format: HourFormat::AmPm,
            asynch_prescaler: 0x7C,
            synch_prescaler: 0x137,
        })
        .unwrap();

        assert_eq!(bus.writes_to(WPR), vec![WPR_KEY1, WPR_KEY2, WPR_LOCK]);
        assert_eq!(rtc.hour_format(), HourFormat::AmPm);
        assert_eq!(rtc.synch_prescaler(), 0x137);
        assert_eq!(rtc.asynch_prescaler(), 0x7C);
        assert!(!rtc.is_init_mode());
    }

    #[test]
    fn init_mode_timeout_still_locks() {
        let bus = SimBus::new();
        // INIT is never acknowledged.
        bus.on_write(ISR, |_, _| {});
        let mut rtc = rtc(&bus);
        assert_eq!(rtc.init(&Config::default()), Err(Error::Timeout));
        assert_eq!(bus.writes_to(WPR), vec![WPR_KEY1, WPR_KEY2, WPR_LOCK]);
        assert!(bus.writes_to(PRER).is_empty());
        assert!(bus.writes_to(CR).is_empty());
    }

    #[test]
    fn enter_init_mode_does_not_request_twice() {
        let bus = rtc_bus();
        bus.poke(ISR, ISR_INIT | ISR_INITF);
        let mut rtc = rtc(&bus);
        rtc.unlock().enter_init_mode().unwrap();
        assert!(bus.writes_to(ISR).is_empty());
    }

    #[test]
    fn synchro_times_out_when_rsf_never_clears() {
        let bus = SimBus::new();
        bus.poke(ISR, ISR_RSF);
        bus.on_write(ISR, |_, _| {});
        let mut rtc = rtc(&bus);
        assert_eq!(rtc.unlock().wait_for_synchro(), Err(Error::Timeout));
        assert_eq!(bus.writes_to(WPR).last(), Some(&WPR_LOCK));
    }

    #[test]
    fn time_in_binary_is_stored_as_bcd() {
        let bus = rtc_bus();
        let mut rtc = rtc(&bus);
        let time = Time {
            time_format: TimeFormat::Pm,
            hours: 13,
            minutes: 45,
            seconds: 30,
        };
        rtc.init_time(Format::Bin, &time).unwrap();

        // 24 hour format drops the PM indication.
        assert_eq!(bus.peek(TR), 0x0013_4530);
        assert_eq!(
            rtc.time(Format::Bin),
            Time {
                time_format: TimeFormat::Am,
                ..time
            }
        );
        assert_eq!(rtc.time(Format::Bcd).hours, 0x13);
        assert!(!rtc.is_init_mode());
        assert_eq!(bus.writes_to(WPR).last(), Some(&WPR_LOCK));
    }

    #[test]
    fn pm_is_kept_in_am_pm_format() {
        let bus = rtc_bus();
        bus.poke(CR, CR_FMT);
        let mut rtc = rtc(&bus);
        let time = Time {
            time_format: TimeFormat::Pm,
            hours: 0x11,
            minutes: 0x02,
            seconds: 0x03,
        };
        rtc.init_time(Format::Bcd, &time).unwrap();
        assert_eq!(bus.peek(TR), (1 << 22) | 0x0011_0203);
        assert_eq!(rtc.time(Format::Bcd), time);
    }

    #[test]
    fn date_round_trip() {
        let bus = rtc_bus();
        let mut rtc = rtc(&bus);
        let date = Date {
            weekday: Weekday::Friday,
            day: 31,
            month: 12,
            year: 25,
        };
        rtc.init_date(Format::Bin, &date).unwrap();
        assert_eq!(bus.peek(DR), 0x0025_B231);
        assert_eq!(rtc.date(Format::Bin), date);
    }

    #[test]
    fn bypassed_shadow_skips_synchro() {
        let bus = SimBus::new();
        bus.poke(CR, CR_BYPSHAD);
        bus.on_write(ISR, |regs, v| {
            let initf = if v & ISR_INIT != 0 { ISR_INITF } else { 0 };
            regs.set(ISR, (v & ISR_INIT) | initf);
        });
        let mut rtc = rtc(&bus);
        rtc.init_date(Format::Bin, &Date::default()).unwrap();
        // Enter, then leave init mode: no RSF clear.
        assert_eq!(bus.writes_to(ISR), vec![ISR_INIT_MASK, !ISR_INIT]);
    }

    #[test]
    fn alarm_waits_for_write_access() {
        let bus = rtc_bus();
        bus.poke(CR, CR_ALRAE);
        let mut rtc = rtc(&bus);
        let alarm = Alarm {
            time: Time {
                hours: 7,
                minutes: 30,
                ..Time::default()
            },
            mask: AlarmMask::DATE_WEEKDAY | AlarmMask::SECONDS,
            day_select: AlarmDaySelect::Weekday,
            date_weekday: Weekday::Wednesday as u8,
        };
        assert_eq!(rtc.init_alarm(Format::Bin, &alarm), Err(Error::Timeout));
        assert_eq!(bus.peek(CR) & CR_ALRAE, 0);
        assert!(bus.writes_to(ALRMAR).is_empty());

        bus.poke(ISR, ISR_ALRAWF);
        rtc.init_alarm(Format::Bin, &alarm).unwrap();
        assert_eq!(
            bus.peek(ALRMAR),
            (1 << 31) | (1 << 30) | (3 << 24) | 0x0007_3000 | (1 << 7)
        );
        assert_eq!(rtc.alarm(Format::Bin), alarm);
        assert_eq!(bus.writes_to(WPR).last(), Some(&WPR_LOCK));
    }

    #[test]
    fn flags_clear_on_zero_and_keep_init() {
        let bus = rtc_bus();
        bus.poke(ISR, ISR_INIT | ISR_INITF | (1 << 8) | (1 << 10));
        let rtc = rtc(&bus);

        assert!(rtc.take_flag(Flag::AlarmA));
        assert_eq!(bus.writes_to(ISR), vec![0xFFFF_FEFF]);
        assert!(!rtc.is_flag_set(Flag::AlarmA));
        assert!(rtc.is_flag_set(Flag::Wakeup));
        assert!(rtc.is_init_mode());

        bus.clear_log();
        assert!(!rtc.take_flag(Flag::AlarmA));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn interrupts_route_the_rtc_line() {
        let bus = rtc_bus();
        bus.poke(ISR, 1 << 8);
        let mut rtc = rtc(&bus);
        let nvic = Nvic::new(&bus);

        rtc.configure_interrupts(&[Event::AlarmA, Event::Tamper], true, 1);
        assert!(!rtc.is_flag_set(Flag::AlarmA));
        assert_eq!(bus.peek(CR) & CR_IE, CR_ALRAIE);
        assert_eq!(bus.peek(TAFCR), TAFCR_TAMPIE);
        assert!(nvic.is_enabled(Interrupt::Rtc));
        assert_eq!(nvic.priority(Interrupt::Rtc), 1);
        assert_eq!(bus.writes_to(WPR), vec![WPR_KEY1, WPR_KEY2, WPR_LOCK]);

        rtc.configure_interrupts(&[Event::AlarmA], false, 1);
        assert!(nvic.is_enabled(Interrupt::Rtc));
        rtc.configure_interrupts(&[Event::Tamper], false, 1);
        assert!(!nvic.is_enabled(Interrupt::Rtc));
    }

    #[test]
    fn deinit_restores_reset_values() {
        let bus = rtc_bus();
        bus.poke(CR, CR_ALRAE | CR_FMT | 0b100);
        bus.poke(TR, 0x0012_0000);
        bus.poke(TAFCR, 0x1);
        let mut rtc = rtc(&bus);
        rtc.deinit().unwrap();

        assert_eq!(bus.peek(TR), 0);
        assert_eq!(bus.peek(DR), DR_RESET);
        assert_eq!(bus.peek(CR), 0b100);
        assert_eq!(bus.peek(PRER), PRER_RESET);
        assert_eq!(bus.peek(WUTR), WUTR_WUT);
        assert_eq!(bus.peek(TAFCR), 0);
        assert!(!rtc.is_init_mode());
        assert_eq!(bus.writes_to(WPR).last(), Some(&WPR_LOCK));
    }

    #[test]
    fn wakeup_timer_restarts_with_new_reload() {
        let bus = rtc_bus();
        bus.poke(CR, CR_WUTE);
        bus.poke(ISR, ISR_WUTWF);
        let mut rtc = rtc(&bus);
        rtc.unlock()
            .configure_wakeup(WakeupClock::CkSpre, 9)
            .unwrap();
        assert_eq!(bus.peek(CR), CR_WUTE | 0b100);
        assert_eq!(rtc.wakeup_reload(), 9);
        // WUTE was cleared before WUTR was written.
        assert_eq!(bus.writes_to(CR).first(), Some(&0));
    }

    #[test]
    fn shift_refused_with_reference_clock() {
        let bus = rtc_bus();
        bus.poke(CR, CR_REFCKON);
        let mut rtc = rtc(&bus);
        assert_eq!(rtc.unlock().shift(true, 10), Err(Error::Enabled));
        assert!(bus.writes_to(SHIFTR).is_empty());

        bus.poke(CR, 0);
        rtc.unlock().shift(true, 10).unwrap();
        assert_eq!(bus.peek(SHIFTR), SHIFTR_ADD1S | 10);
    }

    #[test]
    fn smooth_calibration_waits_for_pending_recalibration() {
        let bus = rtc_bus();
        bus.poke(ISR, ISR_RSF | ISR_RECALPF);
        let mut rtc = rtc(&bus);
        assert_eq!(
            rtc.unlock()
                .smooth_calibration(CalibrationPeriod::Seconds8, CalibrationPulse::Insert, 100),
            Err(Error::Timeout)
        );
        bus.poke(ISR, ISR_RSF);
        rtc.unlock()
            .smooth_calibration(CalibrationPeriod::Seconds8, CalibrationPulse::Insert, 100)
            .unwrap();
        assert_eq!(bus.peek(CALR), (1 << 14) | (1 << 15) | 100);
    }

    #[test]
    fn tamper_configuration() {
        let bus = rtc_bus();
        let rtc = rtc(&bus);
        rtc.configure_tamper(&TamperConfig {
            tampers: Tampers::TAMPER1 | Tampers::TAMPER2,
            active: TamperActive::FallingOrHigh,
            filter: TamperFilter::Samples4,
            sampling: TamperSampling::Div256,
            precharge: TamperPrecharge::Cycles2,
            pull_up: false,
            timestamp: true,
        });
        assert_eq!(
            bus.peek(TAFCR),
            0b1 | 0b10 | (0b1 << 3) | (0b1 << 4)
                | TAFCR_TAMPTS
                | (7 << 8)
                | (0b10 << 11)
                | (0b01 << 13)
                | TAFCR_TAMPPUDIS
        );
        rtc.disable_tamper(Tampers::TAMPER2);
        assert_eq!(bus.peek(TAFCR) & (1 << 3), 0);
    }

    #[test]
    fn timestamp_enable_and_read() {
        let bus = rtc_bus();
        bus.poke(TSTR, 0x0008_1520);
        bus.poke(TSDR, (3 << 13) | 0x0411);
        bus.poke(TSSSR, 0x42);
        let mut rtc = rtc(&bus);
        rtc.unlock().enable_timestamp(&TimestampConfig {
            edge: TimestampEdge::Falling,
            on_tamper: true,
        });
        assert_eq!(bus.peek(CR), CR_TSE | CR_TSEDGE);
        assert_eq!(bus.peek(TAFCR), TAFCR_TAMPTS);

        let ts = rtc.timestamp(Format::Bin);
        assert_eq!(ts.time.hours, 8);
        assert_eq!(ts.time.minutes, 15);
        assert_eq!(ts.time.seconds, 20);
        assert_eq!(ts.weekday, Weekday::Wednesday);
        assert_eq!(ts.month, 4);
        assert_eq!(ts.day, 11);
        assert_eq!(ts.subsecond, 0x42);
    }

    #[test]
    fn backup_registers() {
        let bus = rtc_bus();
        let rtc = rtc(&bus);
        rtc.write_backup(Backup::Bkp3, 0xDEAD_BEEF);
        assert_eq!(bus.peek(BKP0R + 12), 0xDEAD_BEEF);
        assert_eq!(rtc.read_backup(Backup::Bkp3), 0xDEAD_BEEF);
    }
}
