//! Power control
//!
//! Backup domain write access, the programmable voltage detector, wakeup
//! pins and the entry into the SLEEP, STOP and STANDBY modes.

use crate::bus::Bus;
use crate::cortex::Scb;
use crate::map;
use crate::rcc::{Apb1Mask, Rcc};

const CR: u32 = map::PWR;
const CSR: u32 = map::PWR + 0x04;

const CR_LPDS: u32 = 1 << 0;
const CR_PDDS: u32 = 1 << 1;
const CR_PVDE: u32 = 1 << 4;
const CR_PLS: u32 = 0b111 << 5;
const CR_DBP: u32 = 1 << 8;

const CSR_PVDO: u32 = 1 << 2;
const CSR_VREFINTRDYF: u32 = 1 << 3;

/// Offset between a CSR flag and its clear bit in CR.
const CLEAR_SHIFT: u32 = 2;

/// PVD threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PvdLevel {
    /// 2.2 V rising, 2.08 V falling.
    Level0 = 0b000 << 5,
    Level1 = 0b001 << 5,
    Level2 = 0b010 << 5,
    Level3 = 0b011 << 5,
    Level4 = 0b100 << 5,
    Level5 = 0b101 << 5,
    Level6 = 0b110 << 5,
    /// 2.9 V rising, 2.78 V falling.
    Level7 = 0b111 << 5,
}

/// Voltage detector settings. The PVD output reaches the NVIC through EXTI
/// line 16, configured with [`crate::exti`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PvdConfig {
    pub level: PvdLevel,
}

impl Default for PvdConfig {
    fn default() -> Self {
        Self {
            level: PvdLevel::Level0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupPin {
    Pin1 = 1 << 8,
    Pin2 = 1 << 9,
    Pin3 = 1 << 10,
    Pin4 = 1 << 11,
    Pin5 = 1 << 12,
    Pin6 = 1 << 13,
    Pin7 = 1 << 14,
    Pin8 = 1 << 15,
}

/// Regulator state while in STOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Regulator {
    MainOn = 0,
    LowPower = CR_LPDS as isize,
}

/// Instruction used to suspend the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Entry {
    /// Wake on interrupt.
    Wfi,
    /// Wake on event.
    Wfe,
}

/// Clearable status flags in CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// A wakeup event occurred.
    WakeUp = 1 << 0,
    /// The device resumed from STANDBY.
    Standby = 1 << 1,
}

#[derive(Debug)]
pub struct Pwr<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Pwr<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Reset the power controller through the RCC.
    pub fn deinit<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        rcc.reset_pulse(Apb1Mask::PWR);
    }

    // Backup domain.

    /// Allow writes to the RTC and backup domain registers.
    pub fn enable_backup_access(&self) {
        self.bus.set_bits(CR, CR_DBP);
    }

    pub fn disable_backup_access(&self) {
        self.bus.clear_bits(CR, CR_DBP);
    }

    pub fn is_backup_access_enabled(&self) -> bool {
        self.bus.is_set(CR, CR_DBP)
    }

    // Voltage detector.

    pub fn configure_pvd(&self, config: &PvdConfig) {
        self.set_pvd_level(config.level);
        self.enable_pvd();
    }

    pub fn set_pvd_level(&self, level: PvdLevel) {
        self.bus.modify_bits(CR, CR_PLS, level as u32);
    }

    pub fn pvd_level(&self) -> PvdLevel {
        match self.bus.field(CR, CR_PLS) >> 5 {
            0b000 => PvdLevel::Level0,
            0b001 => PvdLevel::Level1,
            0b010 => PvdLevel::Level2,
            0b011 => PvdLevel::Level3,
            0b100 => PvdLevel::Level4,
            0b101 => PvdLevel::Level5,
            0b110 => PvdLevel::Level6,
            _ => PvdLevel::Level7,
        }
    }

    pub fn enable_pvd(&self) {
        self.bus.set_bits(CR, CR_PVDE);
    }

    pub fn disable_pvd(&self) {
        self.bus.clear_bits(CR, CR_PVDE);
    }

    pub fn is_pvd_enabled(&self) -> bool {
        self.bus.is_set(CR, CR_PVDE)
    }

    /// True while VDD is below the PVD threshold.
    pub fn is_pvd_output_high(&self) -> bool {
        self.bus.is_set(CSR, CSR_PVDO)
    }

    pub fn is_vrefint_ready(&self) -> bool {
        self.bus.is_set(CSR, CSR_VREFINTRDYF)
    }

    // Wakeup pins.

    pub fn enable_wakeup_pin(&self, pin: WakeupPin) {
        self.bus.set_bits(CSR, pin as u32);
    }

    pub fn disable_wakeup_pin(&self, pin: WakeupPin) {
        self.bus.clear_bits(CSR, pin as u32);
    }

    pub fn is_wakeup_pin_enabled(&self, pin: WakeupPin) -> bool {
        self.bus.is_set(CSR, pin as u32)
    }

    // Low power modes.

    fn suspend(&self, entry: Entry) {
        match entry {
            Entry::Wfi => self.bus.wait_for_interrupt(),
            Entry::Wfe => {
                // Clear a pending event first so that the second WFE sleeps.
                self.bus.send_event();
                self.bus.wait_for_event();
                self.bus.wait_for_event();
            }
        }
    }

    /// Enter SLEEP: the core stops, peripherals keep running.
    pub fn enter_sleep<S: Bus>(&self, scb: &Scb<'_, S>, entry: Entry) {
        scb.clear_sleepdeep();
        self.suspend(entry);
    }

    /// Enter STOP: all clocks in the core domain stop, SRAM and registers
    /// are kept. Returns after wakeup, running on HSI.
    pub fn enter_stop<S: Bus>(&self, scb: &Scb<'_, S>, regulator: Regulator, entry: Entry) {
        self.bus
            .modify_bits(CR, CR_PDDS | CR_LPDS, regulator as u32);
        scb.set_sleepdeep();
        self.suspend(entry);
        scb.clear_sleepdeep();
    }

    /// Enter STANDBY. On the chip this does not return: wakeup goes through
    /// reset, with [`Flag::Standby`] set.
    pub fn enter_standby<S: Bus>(&self, scb: &Scb<'_, S>) {
        self.bus.set_bits(CR, CR_PDDS);
        scb.set_sleepdeep();
        self.bus.wait_for_interrupt();
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(CSR) & flag as u32 != 0
    }

    /// Write the clear bit of the flag, two positions above it, to CR.
    pub fn clear_flag(&self, flag: Flag) {
        self.bus.set_bits(CR, (flag as u32) << CLEAR_SHIFT);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    /// CWUF and CSBF clear the matching CSR flag and always read as zero.
    fn pwr_bus() -> SimBus {
        let bus = SimBus::new();
        bus.on_write(CR, |regs, v| {
            let cleared = (v >> CLEAR_SHIFT) & 0b11;
            regs.set(CSR, regs.get(CSR) & !cleared);
            regs.set(CR, v & !(0b11 << CLEAR_SHIFT));
        });
        bus
    }

    #[test]
    fn take_flag_clears_through_cr() {
        let bus = pwr_bus();
        bus.poke(CR, CR_DBP);
        bus.poke(CSR, Flag::WakeUp as u32 | Flag::Standby as u32);
        let pwr = Pwr::new(&bus);

        assert!(pwr.take_flag(Flag::Standby));
        assert_eq!(bus.writes_to(CR), vec![CR_DBP | (1 << 3)]);
        assert!(!pwr.take_flag(Flag::Standby));
        assert!(pwr.is_flag_set(Flag::WakeUp));
        // DBP survives the clear.
        assert!(pwr.is_backup_access_enabled());
    }

    #[test]
    fn unset_flag_is_not_written() {
        let bus = pwr_bus();
        let pwr = Pwr::new(&bus);
        assert!(!pwr.take_flag(Flag::WakeUp));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn pvd_config() {
        let bus = pwr_bus();
        let pwr = Pwr::new(&bus);
        pwr.configure_pvd(&PvdConfig {
            level: PvdLevel::Level5,
        });
        assert_eq!(pwr.pvd_level(), PvdLevel::Level5);
        assert!(pwr.is_pvd_enabled());
    }

    #[test]
    fn stop_sets_deep_sleep_only_while_suspended() {
        let bus = pwr_bus();
        bus.poke(CR, CR_PDDS);
        let pwr = Pwr::new(&bus);
        let scb = Scb::new(&bus);

        pwr.enter_stop(&scb, Regulator::LowPower, Entry::Wfi);

        assert_eq!(bus.peek(CR) & (CR_PDDS | CR_LPDS), CR_LPDS);
        assert_eq!(bus.waits(), 1);
        assert!(!scb.is_sleepdeep());
    }

    #[test]
    fn wfe_entry_waits_twice() {
        let bus = pwr_bus();
        let pwr = Pwr::new(&bus);
        pwr.enter_sleep(&Scb::new(&bus), Entry::Wfe);
        assert_eq!(bus.waits(), 2);
    }

    #[test]
    fn standby_selects_power_down() {
        let bus = pwr_bus();
        let pwr = Pwr::new(&bus);
        let scb = Scb::new(&bus);
        pwr.enter_standby(&scb);
        assert!(bus.peek(CR) & CR_PDDS != 0);
        assert!(scb.is_sleepdeep());
    }

    #[test]
    fn deinit_pulses_the_reset_line() {
        let bus = SimBus::new();
        let rcc = Rcc::new(&bus);
        Pwr::new(&bus).deinit(&rcc);
        assert!(rcc.is_clock_enabled(Apb1Mask::PWR));
        assert_eq!(
            bus.writes_to(map::RCC + 0x10),
            vec![Apb1Mask::PWR.bits(), 0]
        );
    }
}
