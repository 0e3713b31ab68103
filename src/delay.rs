//! Delays

pub use crate::hal::delay::DelayNs;

use crate::bus::Bus;
use crate::cortex::SysTick;
use crate::error::Error;
use crate::poll::{SysTickTicks, TickSource};

/// Largest delay accepted without the extra guard tick.
pub const MAX_DELAY_MS: u32 = u32::MAX;

/// Blocking millisecond delay on a free-running 1 ms SysTick.
pub struct Delay<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Delay<'a, B> {
    /// Start SysTick with a 1 ms period from `hclk` and return the delay.
    /// Fails with [`Error::OutOfRange`] if `hclk` is below 1 kHz or too fast
    /// for the 24-bit reload.
    pub fn new(bus: &'a B, hclk: u32) -> Result<Self, Error> {
        SysTick::new(bus).init_tick(hclk, 1_000)?;
        Ok(Self { bus })
    }

    /// Use a SysTick that already ticks every millisecond.
    pub fn from_running(bus: &'a B) -> Self {
        Self { bus }
    }

    pub fn free(self) -> &'a B {
        self.bus
    }

    /// Wait at least `ms` milliseconds.
    ///
    /// One tick is added because the first wrap may come right after the
    /// call, except for [`MAX_DELAY_MS`] which would overflow.
    pub fn wait_ms(&mut self, ms: u32) {
        let mut ticks = SysTickTicks::new(self.bus);
        ticks.restart();

        let mut remaining = if ms < MAX_DELAY_MS { ms + 1 } else { ms };
        while remaining > 0 {
            if ticks.tick() {
                remaining -= 1;
            }
        }
    }
}

impl<B: Bus> DelayNs for Delay<'_, B> {
    fn delay_ns(&mut self, ns: u32) {
        self.wait_ms(ns.div_ceil(1_000_000));
    }

    fn delay_us(&mut self, us: u32) {
        self.wait_ms(us.div_ceil(1_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.wait_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;
    use crate::sim::SimBus;

    const SYST_CSR: u32 = map::SYSTICK;

    fn ticking_bus() -> SimBus {
        let bus = SimBus::new();
        bus.on_read(SYST_CSR, |_| (1 << 16) | 0b101);
        bus
    }

    #[test]
    fn waits_one_extra_tick() {
        let bus = ticking_bus();
        let mut delay = Delay::from_running(&bus);
        delay.wait_ms(3);
        // One read to clear the flag and one per tick.
        assert_eq!(bus.reads_of(SYST_CSR), 1 + 4);
    }

    #[test]
    fn sub_millisecond_delays_round_up() {
        let bus = ticking_bus();
        let mut delay = Delay::from_running(&bus);
        delay.delay_us(10);
        assert_eq!(bus.reads_of(SYST_CSR), 1 + 2);
    }

    #[test]
    fn new_starts_a_millisecond_tick() {
        let bus = SimBus::new();
        let _delay = Delay::new(&bus, 8_000_000).unwrap();
        assert_eq!(bus.peek(map::SYSTICK + 0x04), 7_999);
        assert!(Delay::new(&bus, 100).is_err());
    }
}
