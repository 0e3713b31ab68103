//! Extended interrupt and event controller

use core::ops::BitOr;

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::map;

const IMR: u32 = map::EXTI;
const EMR: u32 = map::EXTI + 0x04;
const RTSR: u32 = map::EXTI + 0x08;
const FTSR: u32 = map::EXTI + 0x0C;
const SWIER: u32 = map::EXTI + 0x10;
const PR: u32 = map::EXTI + 0x14;

/// IMR after reset: the direct lines are unmasked.
const IMR_RESET: u32 = 0x0F94_0000;
/// Pending bits of the configurable lines.
const PR_ALL: u32 = 0x007B_FFFF;

/// NVIC line serving each group of EXTI lines.
const ROUTES: [(u32, Interrupt); 6] = [
    (0x0000_0003, Interrupt::Exti0_1),
    (0x0000_000C, Interrupt::Exti2_3),
    (0x0000_FFF0, Interrupt::Exti4_15),
    (1 << 16, Interrupt::PvdVddio2),
    ((1 << 17) | (1 << 19) | (1 << 20), Interrupt::Rtc),
    ((1 << 21) | (1 << 22), Interrupt::Adc1Comp),
];

/// A set of EXTI lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lines(u32);

impl Lines {
    pub const PVD: Self = Self(1 << 16);
    pub const RTC_ALARM: Self = Self(1 << 17);
    pub const USB_WAKEUP: Self = Self(1 << 18);
    pub const RTC_TAMPER_TIMESTAMP: Self = Self(1 << 19);
    pub const RTC_WAKEUP: Self = Self(1 << 20);
    pub const COMP1: Self = Self(1 << 21);
    pub const COMP2: Self = Self(1 << 22);

    /// Line `n`, 0 to 31. Lines 0 to 15 follow the GPIO pin number.
    pub const fn line(n: u8) -> Self {
        Self(1 << (n & 0x1F))
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Lines {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Interrupt,
    Event,
    InterruptEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Leave the edge selection as it is.
    None,
    Rising,
    Falling,
    RisingFalling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineConfig {
    pub lines: Lines,
    /// Enable the lines, or mask them when false.
    pub command: bool,
    pub mode: Mode,
    pub trigger: Trigger,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            lines: Lines::empty(),
            command: false,
            mode: Mode::Interrupt,
            trigger: Trigger::Falling,
        }
    }
}

#[derive(Debug)]
pub struct Exti<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Exti<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    pub fn init(&self, config: &LineConfig) {
        let lines = config.lines;
        if !config.command {
            self.disable_interrupt(lines);
            self.disable_event(lines);
            return;
        }

        match config.mode {
            Mode::Interrupt => {
                self.disable_event(lines);
                self.enable_interrupt(lines);
            }
            Mode::Event => {
                self.disable_interrupt(lines);
                self.enable_event(lines);
            }
            Mode::InterruptEvent => {
                self.enable_interrupt(lines);
                self.enable_event(lines);
            }
        }

        match config.trigger {
            Trigger::None => {}
            Trigger::Rising => {
                self.disable_falling_trigger(lines);
                self.enable_rising_trigger(lines);
            }
            Trigger::Falling => {
                self.disable_rising_trigger(lines);
                self.enable_falling_trigger(lines);
            }
            Trigger::RisingFalling => {
                self.enable_rising_trigger(lines);
                self.enable_falling_trigger(lines);
            }
        }
    }

    /// Restore the reset values and clear every pending line.
    pub fn deinit(&self) {
        self.bus.write(IMR, IMR_RESET);
        self.bus.write(EMR, 0);
        self.bus.write(RTSR, 0);
        self.bus.write(FTSR, 0);
        self.bus.write(SWIER, 0);
        self.bus.write(PR, PR_ALL);
    }

    pub fn enable_interrupt(&self, lines: Lines) {
        self.bus.set_bits(IMR, lines.0);
    }

    pub fn disable_interrupt(&self, lines: Lines) {
        self.bus.clear_bits(IMR, lines.0);
    }

    pub fn is_interrupt_enabled(&self, lines: Lines) -> bool {
        self.bus.is_set(IMR, lines.0)
    }

    pub fn enable_event(&self, lines: Lines) {
        self.bus.set_bits(EMR, lines.0);
    }

    pub fn disable_event(&self, lines: Lines) {
        self.bus.clear_bits(EMR, lines.0);
    }

    pub fn is_event_enabled(&self, lines: Lines) -> bool {
        self.bus.is_set(EMR, lines.0)
    }

    pub fn enable_rising_trigger(&self, lines: Lines) {
        self.bus.set_bits(RTSR, lines.0);
    }

    pub fn disable_rising_trigger(&self, lines: Lines) {
        self.bus.clear_bits(RTSR, lines.0);
    }

    pub fn enable_falling_trigger(&self, lines: Lines) {
        self.bus.set_bits(FTSR, lines.0);
    }

    pub fn disable_falling_trigger(&self, lines: Lines) {
        self.bus.clear_bits(FTSR, lines.0);
    }

    /// Raise the lines from software. They stay pending until cleared.
    pub fn generate_software_interrupt(&self, lines: Lines) {
        self.bus.set_bits(SWIER, lines.0);
    }

    // Flags.

    /// True if all `lines` are pending.
    pub fn is_flag_set(&self, lines: Lines) -> bool {
        self.bus.is_set(PR, lines.0)
    }

    /// The pending lines among `lines`.
    pub fn pending(&self, lines: Lines) -> Lines {
        Lines(self.bus.read(PR) & lines.0)
    }

    /// Write the line bits to PR, which clears them.
    pub fn clear_flag(&self, lines: Lines) {
        self.bus.write(PR, lines.0);
    }

    /// Read the pending state of `line`, clearing it if it was set.
    pub fn take_flag(&self, line: Lines) -> bool {
        if self.bus.read(PR) & line.0 != 0 {
            self.clear_flag(line);
            true
        } else {
            false
        }
    }

    // Interrupts.

    /// Clear the pending `lines`, unmask or mask them, then route each NVIC
    /// line serving them according to the lines it still has unmasked.
    pub fn configure_interrupts(&self, lines: Lines, enable: bool, priority: u8) {
        self.clear_flag(lines);
        if enable {
            self.enable_interrupt(lines);
        } else {
            self.disable_interrupt(lines);
        }

        let imr = self.bus.read(IMR);
        let nvic = Nvic::new(self.bus);
        for (group, irq) in ROUTES {
            if group & lines.0 != 0 {
                nvic.route(irq, imr & group != 0, priority);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn exti_bus() -> SimBus {
        let bus = SimBus::new().with_nvic();
        bus.write_one_to_clear(PR);
        bus
    }

    #[test]
    fn init_interrupt_on_rising_edge() {
        let bus = exti_bus();
        bus.poke(EMR, 0b1000);
        bus.poke(FTSR, 0b1000);
        let exti = Exti::new(&bus);
        exti.init(&LineConfig {
            lines: Lines::line(3),
            command: true,
            mode: Mode::Interrupt,
            trigger: Trigger::Rising,
        });
        assert_eq!(bus.peek(IMR), 0b1000);
        assert_eq!(bus.peek(EMR), 0);
        assert_eq!(bus.peek(RTSR), 0b1000);
        assert_eq!(bus.peek(FTSR), 0);
    }

    #[test]
    fn init_without_command_masks_the_lines() {
        let bus = exti_bus();
        bus.poke(IMR, 0b11);
        bus.poke(EMR, 0b11);
        let exti = Exti::new(&bus);
        exti.init(&LineConfig {
            lines: Lines::line(0),
            ..Default::default()
        });
        assert_eq!(bus.peek(IMR), 0b10);
        assert_eq!(bus.peek(EMR), 0b10);
    }

    #[test]
    fn pending_line_is_consumed() {
        let bus = exti_bus();
        bus.poke(PR, (1 << 5) | (1 << 6));
        let exti = Exti::new(&bus);
        assert!(exti.take_flag(Lines::line(5)));
        assert!(!exti.take_flag(Lines::line(5)));
        assert!(exti.is_flag_set(Lines::line(6)));
        assert_eq!(bus.writes_to(PR), vec![1 << 5]);
    }

    #[test]
    fn lines_share_the_nvic_line_of_their_group() {
        let bus = exti_bus();
        let exti = Exti::new(&bus);
        let nvic = Nvic::new(&bus);

        exti.configure_interrupts(Lines::line(4) | Lines::line(9), true, 2);
        assert!(nvic.is_enabled(Interrupt::Exti4_15));
        assert!(!nvic.is_enabled(Interrupt::Exti0_1));
        assert_eq!(nvic.priority(Interrupt::Exti4_15), 2);

        exti.configure_interrupts(Lines::line(4), false, 2);
        assert!(nvic.is_enabled(Interrupt::Exti4_15));
        exti.configure_interrupts(Lines::line(9), false, 2);
        assert!(!nvic.is_enabled(Interrupt::Exti4_15));
    }

    #[test]
    fn rtc_lines_route_to_the_rtc_interrupt() {
        let bus = exti_bus();
        let exti = Exti::new(&bus);
        exti.configure_interrupts(Lines::RTC_ALARM, true, 0);
        assert!(Nvic::new(&bus).is_enabled(Interrupt::Rtc));
    }

    #[test]
    fn deinit_restores_reset_values() {
        let bus = exti_bus();
        bus.poke(RTSR, 0xFF);
        bus.poke(PR, 0x11);
        Exti::new(&bus).deinit();
        assert_eq!(bus.peek(IMR), IMR_RESET);
        assert_eq!(bus.peek(RTSR), 0);
        assert_eq!(bus.peek(PR), 0);
    }
}
