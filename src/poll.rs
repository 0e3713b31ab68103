//! Bounded busy-waits
//!
//! Every wait on a hardware flag goes through [`poll_until`]. The budget is
//! counted in ticks of a [`TickSource`]: [`Spin`] ticks once per poll, which
//! turns the budget into an instruction-count bound, while [`SysTickTicks`]
//! ticks on each SysTick wrap, which bounds the wait in real time.

use crate::bus::Bus;
use crate::error::Error;
use crate::map;

const SYST_CSR: u32 = map::SYSTICK;
const SYST_CSR_COUNTFLAG: u32 = 1 << 16;

/// Something that tells a polling loop whether time has advanced.
pub trait TickSource {
    /// Called once before the first poll.
    fn restart(&mut self) {}

    /// Returns true if one tick elapsed since the previous call.
    fn tick(&mut self) -> bool;
}

impl<T: TickSource + ?Sized> TickSource for &mut T {
    fn restart(&mut self) {
        (**self).restart()
    }

    fn tick(&mut self) -> bool {
        (**self).tick()
    }
}

/// Every poll counts as one tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct Spin;

impl TickSource for Spin {
    #[inline]
    fn tick(&mut self) -> bool {
        true
    }
}

/// One tick per SysTick wrap, read from the self-clearing COUNTFLAG.
///
/// With a 1 ms SysTick (see [`crate::delay`]) a budget is a number of
/// milliseconds.
#[derive(Debug)]
pub struct SysTickTicks<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> SysTickTicks<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }
}

impl<B: Bus> TickSource for SysTickTicks<'_, B> {
    fn restart(&mut self) {
        // Reading CSR clears a stale COUNTFLAG.
        let _ = self.bus.read(SYST_CSR);
    }

    #[inline]
    fn tick(&mut self) -> bool {
        self.bus.read(SYST_CSR) & SYST_CSR_COUNTFLAG != 0
    }
}

/// Poll `done` until it returns true or `budget` ticks have elapsed.
///
/// The condition is evaluated before the budget is charged, so a condition
/// that already holds succeeds even with a zero budget.
pub fn poll_until<T, F>(mut ticks: T, budget: u32, mut done: F) -> Result<(), Error>
where
    T: TickSource,
    F: FnMut() -> bool,
{
    ticks.restart();
    let mut remaining = budget;
    loop {
        if done() {
            return Ok(());
        }
        if remaining == 0 {
            return Err(Error::Timeout);
        }
        if ticks.tick() {
            remaining -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    /// Ticks every `n`-th call.
    struct Every {
        n: u32,
        calls: u32,
    }

    impl TickSource for Every {
        fn tick(&mut self) -> bool {
            self.calls += 1;
            self.calls % self.n == 0
        }
    }

    #[test]
    fn condition_already_true_succeeds_without_budget() {
        assert_eq!(poll_until(Spin, 0, || true), Ok(()));
    }

    #[test]
    fn spin_budget_bounds_the_number_of_polls() {
        let mut polls = 0;
        let res = poll_until(Spin, 10, || {
            polls += 1;
            false
        });
        assert_eq!(res, Err(Error::Timeout));
        assert_eq!(polls, 11);
    }

    #[test]
    fn budget_is_charged_per_tick_not_per_poll() {
        let mut polls = 0;
        let res = poll_until(Every { n: 4, calls: 0 }, 3, || {
            polls += 1;
            false
        });
        assert_eq!(res, Err(Error::Timeout));
        assert_eq!(polls, 13);
    }

    #[test]
    fn condition_met_before_timeout() {
        let mut polls = 0;
        let res = poll_until(Spin, 100, || {
            polls += 1;
            polls == 5
        });
        assert_eq!(res, Ok(()));
    }

    #[test]
    fn systick_ticks_follow_countflag() {
        let bus = SimBus::new();
        let mut reads = 0u32;
        // COUNTFLAG asserted on every other read.
        bus.on_read(SYST_CSR, move |_| {
            reads += 1;
            if reads % 2 == 0 {
                SYST_CSR_COUNTFLAG | 1
            } else {
                1
            }
        });
        let mut ticks = SysTickTicks::new(&bus);
        ticks.restart();
        assert!(ticks.tick());
        assert!(!ticks.tick());
        assert!(ticks.tick());
    }
}
