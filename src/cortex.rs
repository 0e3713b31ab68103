//! Cortex-M0 core peripherals: NVIC, SysTick and SCB

use crate::bus::Bus;
use crate::error::Error;
use crate::map;

const NVIC_ISER: u32 = map::NVIC;
const NVIC_ICER: u32 = map::NVIC + 0x080;
const NVIC_ISPR: u32 = map::NVIC + 0x100;
const NVIC_ICPR: u32 = map::NVIC + 0x180;
const NVIC_IPR: u32 = map::NVIC + 0x300;

const SYST_CSR: u32 = map::SYSTICK;
const SYST_RVR: u32 = map::SYSTICK + 0x04;
const SYST_CVR: u32 = map::SYSTICK + 0x08;
const SYST_CALIB: u32 = map::SYSTICK + 0x0C;

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;
const SYST_CSR_COUNTFLAG: u32 = 1 << 16;
const SYST_RELOAD_MAX: u32 = 0x00FF_FFFF;

const SCB_CPUID: u32 = map::SCB;
const SCB_ICSR: u32 = map::SCB + 0x04;
const SCB_AIRCR: u32 = map::SCB + 0x0C;
const SCB_SCR: u32 = map::SCB + 0x10;
const SCB_SHPR3: u32 = map::SCB + 0x20;

const SCB_SCR_SLEEPONEXIT: u32 = 1 << 1;
const SCB_SCR_SLEEPDEEP: u32 = 1 << 2;
const SCB_SCR_SEVONPEND: u32 = 1 << 4;
const SCB_AIRCR_VECTKEY: u32 = 0x05FA << 16;
const SCB_AIRCR_SYSRESETREQ: u32 = 1 << 2;

/// Number of priority bits implemented by the Cortex-M0.
pub const PRIO_BITS: u8 = 2;
/// Lowest priority that can be programmed.
pub const LOWEST_PRIORITY: u8 = (1 << PRIO_BITS) - 1;

/// Device interrupt lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    Wwdg = 0,
    PvdVddio2 = 1,
    Rtc = 2,
    Flash = 3,
    RccCrs = 4,
    Exti0_1 = 5,
    Exti2_3 = 6,
    Exti4_15 = 7,
    Tsc = 8,
    Dma1Ch1 = 9,
    Dma1Ch2_3 = 10,
    Dma1Ch4_7 = 11,
    Adc1Comp = 12,
    Tim1BrkUpTrgCom = 13,
    Tim1Cc = 14,
    Tim2 = 15,
    Tim3 = 16,
    Tim6Dac = 17,
    Tim7 = 18,
    Tim14 = 19,
    Tim15 = 20,
    Tim16 = 21,
    Tim17 = 22,
    I2c1 = 23,
    I2c2 = 24,
    Spi1 = 25,
    Spi2 = 26,
    Usart1 = 27,
    Usart2 = 28,
    Usart3_4 = 29,
    CecCan = 30,
    Usb = 31,
}

impl Interrupt {
    #[inline]
    pub const fn number(self) -> u32 {
        self as u32
    }

    #[inline]
    const fn mask(self) -> u32 {
        1 << (self as u32 & 0x1F)
    }
}

/// Nested vectored interrupt controller.
#[derive(Debug)]
pub struct Nvic<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Nvic<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Unmask the interrupt line.
    pub fn enable(&self, irq: Interrupt) {
        self.bus.write(NVIC_ISER, irq.mask());
    }

    /// Mask the interrupt line.
    pub fn disable(&self, irq: Interrupt) {
        self.bus.write(NVIC_ICER, irq.mask());
        self.bus.barrier();
    }

    pub fn is_enabled(&self, irq: Interrupt) -> bool {
        self.bus.read(NVIC_ISER) & irq.mask() != 0
    }

    pub fn pend(&self, irq: Interrupt) {
        self.bus.write(NVIC_ISPR, irq.mask());
    }

    pub fn unpend(&self, irq: Interrupt) {
        self.bus.write(NVIC_ICPR, irq.mask());
    }

    pub fn is_pending(&self, irq: Interrupt) -> bool {
        self.bus.read(NVIC_ISPR) & irq.mask() != 0
    }

    /// Set the priority of the line. Only the two upper bits of the priority
    /// byte exist, so `priority` is taken modulo 4; 0 is the most urgent.
    pub fn set_priority(&self, irq: Interrupt, priority: u8) {
        let (addr, shift) = Self::ipr(irq);
        let value = (((priority as u32) << (8 - PRIO_BITS)) & 0xFF) << shift;
        self.bus.modify_bits(addr, 0xFF << shift, value);
    }

    pub fn priority(&self, irq: Interrupt) -> u8 {
        let (addr, shift) = Self::ipr(irq);
        (((self.bus.read(addr) >> shift) & 0xFF) >> (8 - PRIO_BITS)) as u8
    }

    /// Enable or disable the line depending on `active`, programming the
    /// priority when enabling.
    ///
    /// This is the last step of every `configure_interrupts` helper.
    pub(crate) fn route(&self, irq: Interrupt, active: bool, priority: u8) {
        if active {
            self.set_priority(irq, priority);
            self.enable(irq);
        } else {
            self.disable(irq);
        }
    }

    // The M0 only allows word access to the priority registers.
    const fn ipr(irq: Interrupt) -> (u32, u32) {
        let n = irq as u32;
        (NVIC_IPR + (n >> 2) * 4, (n & 0x3) * 8)
    }
}

/// Clock source of the SysTick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysTickClock {
    /// HCLK / 8.
    External = 0,
    /// HCLK.
    Core = SYST_CSR_CLKSOURCE as isize,
}

/// The 24-bit SysTick down-counter.
#[derive(Debug)]
pub struct SysTick<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> SysTick<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Start the counter with an interrupt every `ticks` core clocks at the
    /// lowest priority.
    pub fn configure(&self, ticks: u32) -> Result<(), Error> {
        if ticks == 0 || ticks - 1 > SYST_RELOAD_MAX {
            return Err(Error::OutOfRange);
        }
        self.bus.write(SYST_RVR, ticks - 1);
        self.bus
            .modify_bits(SCB_SHPR3, 0xFF << 24, ((LOWEST_PRIORITY as u32) << 6) << 24);
        self.bus.write(SYST_CVR, 0);
        self.bus
            .write(SYST_CSR, SYST_CSR_CLKSOURCE | SYST_CSR_TICKINT | SYST_CSR_ENABLE);
        Ok(())
    }

    /// Start the counter so that it wraps `ticks_per_second` times per second
    /// without interrupt. Nothing is written if the reload does not fit.
    pub fn init_tick(&self, hclk: u32, ticks_per_second: u32) -> Result<(), Error> {
        let ticks = hclk.checked_div(ticks_per_second).unwrap_or(0);
        if ticks == 0 || ticks - 1 > SYST_RELOAD_MAX {
            return Err(Error::OutOfRange);
        }
        self.bus.write(SYST_RVR, ticks - 1);
        self.bus.write(SYST_CVR, 0);
        self.bus.write(SYST_CSR, SYST_CSR_CLKSOURCE | SYST_CSR_ENABLE);
        Ok(())
    }

    pub fn set_clock_source(&self, source: SysTickClock) {
        self.bus
            .modify_bits(SYST_CSR, SYST_CSR_CLKSOURCE, source as u32);
    }

    pub fn clock_source(&self) -> SysTickClock {
        if self.bus.read(SYST_CSR) & SYST_CSR_CLKSOURCE != 0 {
            SysTickClock::Core
        } else {
            SysTickClock::External
        }
    }

    pub fn enable_counter(&self) {
        self.bus.set_bits(SYST_CSR, SYST_CSR_ENABLE);
    }

    pub fn disable_counter(&self) {
        self.bus.clear_bits(SYST_CSR, SYST_CSR_ENABLE);
    }

    pub fn enable_interrupt(&self) {
        self.bus.set_bits(SYST_CSR, SYST_CSR_TICKINT);
    }

    pub fn disable_interrupt(&self) {
        self.bus.clear_bits(SYST_CSR, SYST_CSR_TICKINT);
    }

    pub fn set_reload(&self, reload: u32) {
        self.bus.write(SYST_RVR, reload & SYST_RELOAD_MAX);
    }

    pub fn reload(&self) -> u32 {
        self.bus.read(SYST_RVR)
    }

    pub fn clear_current(&self) {
        self.bus.write(SYST_CVR, 0);
    }

    pub fn current(&self) -> u32 {
        self.bus.read(SYST_CVR) & SYST_RELOAD_MAX
    }

    pub fn calibration(&self) -> u32 {
        self.bus.read(SYST_CALIB)
    }

    /// True if the counter reached zero since the last read. Reading clears it.
    pub fn has_wrapped(&self) -> bool {
        self.bus.read(SYST_CSR) & SYST_CSR_COUNTFLAG != 0
    }
}

/// System control block.
#[derive(Debug)]
pub struct Scb<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Scb<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    pub fn cpuid(&self) -> u32 {
        self.bus.read(SCB_CPUID)
    }

    pub fn icsr(&self) -> u32 {
        self.bus.read(SCB_ICSR)
    }

    /// Select deep sleep (STOP/STANDBY) for the next WFI/WFE.
    pub fn set_sleepdeep(&self) {
        self.bus.set_bits(SCB_SCR, SCB_SCR_SLEEPDEEP);
    }

    pub fn clear_sleepdeep(&self) {
        self.bus.clear_bits(SCB_SCR, SCB_SCR_SLEEPDEEP);
    }

    pub fn is_sleepdeep(&self) -> bool {
        self.bus.is_set(SCB_SCR, SCB_SCR_SLEEPDEEP)
    }

    pub fn enable_sleep_on_exit(&self) {
        self.bus.set_bits(SCB_SCR, SCB_SCR_SLEEPONEXIT);
    }

    pub fn disable_sleep_on_exit(&self) {
        self.bus.clear_bits(SCB_SCR, SCB_SCR_SLEEPONEXIT);
    }

    pub fn enable_event_on_pend(&self) {
        self.bus.set_bits(SCB_SCR, SCB_SCR_SEVONPEND);
    }

    pub fn disable_event_on_pend(&self) {
        self.bus.clear_bits(SCB_SCR, SCB_SCR_SEVONPEND);
    }

    /// Request a system reset and wait for it.
    pub fn system_reset(&self) -> ! {
        self.bus.barrier();
        self.bus.write(SCB_AIRCR, SCB_AIRCR_VECTKEY | SCB_AIRCR_SYSRESETREQ);
        self.bus.barrier();
        loop {
            cortex_m::asm::nop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn priority_uses_the_two_upper_bits_of_the_byte() {
        let bus = SimBus::new();
        let nvic = Nvic::new(&bus);
        nvic.set_priority(Interrupt::Spi1, 2);
        // SPI1 is line 25: IPR6, byte 1.
        assert_eq!(bus.peek(NVIC_IPR + 6 * 4), 0x80 << 8);
        assert_eq!(nvic.priority(Interrupt::Spi1), 2);

        nvic.set_priority(Interrupt::Spi2, 3);
        assert_eq!(bus.peek(NVIC_IPR + 6 * 4), (0x80 << 8) | (0xC0 << 16));
        assert_eq!(nvic.priority(Interrupt::Spi1), 2);
    }

    #[test]
    fn enable_and_disable_lines() {
        let bus = SimBus::new().with_nvic();
        let nvic = Nvic::new(&bus);
        nvic.enable(Interrupt::Rtc);
        nvic.enable(Interrupt::Tim2);
        assert!(nvic.is_enabled(Interrupt::Rtc));
        nvic.disable(Interrupt::Rtc);
        assert!(!nvic.is_enabled(Interrupt::Rtc));
        assert!(nvic.is_enabled(Interrupt::Tim2));
    }

    #[test]
    fn systick_rejects_reload_out_of_range() {
        let bus = SimBus::new();
        let syst = SysTick::new(&bus);
        assert_eq!(syst.configure(0x0100_0001), Err(Error::OutOfRange));
        assert_eq!(syst.configure(0), Err(Error::OutOfRange));
        assert!(bus.writes().is_empty());
        assert_eq!(syst.configure(8_000), Ok(()));
        assert_eq!(bus.peek(SYST_RVR), 7_999);
        assert_eq!(bus.peek(SYST_CSR), 0b111);
    }

    #[test]
    fn init_tick_programs_one_millisecond() {
        let bus = SimBus::new();
        SysTick::new(&bus).init_tick(48_000_000, 1_000).unwrap();
        assert_eq!(bus.peek(SYST_RVR), 47_999);
        assert_eq!(bus.peek(SYST_CSR), SYST_CSR_CLKSOURCE | SYST_CSR_ENABLE);
    }

    #[test]
    fn init_tick_rejects_rates_that_do_not_fit() {
        let bus = SimBus::new();
        let syst = SysTick::new(&bus);
        assert_eq!(syst.init_tick(48_000_000, 0), Err(Error::OutOfRange));
        assert_eq!(syst.init_tick(500, 1_000), Err(Error::OutOfRange));
        // 48 MHz at 1 Hz needs a 26-bit reload.
        assert_eq!(syst.init_tick(48_000_000, 1), Err(Error::OutOfRange));
        assert!(bus.writes().is_empty());
    }
}
