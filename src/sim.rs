//! Simulated register bank for host tests.
//!
//! Registers default to zero and behave as plain memory. Per-address hooks
//! model hardware side effects such as write-1-to-clear flags, clear
//! registers acting on a status register, or flags that change while the
//! driver polls them. Every access goes to a log.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::vec::Vec;

use crate::bus::Bus;
use crate::map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(u32, u32),
    Write(u32, u32),
}

#[derive(Debug, Default)]
pub struct Registers(HashMap<u32, u32>);

impl Registers {
    pub fn get(&self, addr: u32) -> u32 {
        self.0.get(&addr).copied().unwrap_or(0)
    }

    pub fn set(&mut self, addr: u32, value: u32) {
        self.0.insert(addr, value);
    }
}

type ReadHook = Box<dyn FnMut(&mut Registers) -> u32>;
type WriteHook = Box<dyn FnMut(&mut Registers, u32)>;

#[derive(Default)]
pub struct SimBus {
    regs: RefCell<Registers>,
    log: RefCell<Vec<Access>>,
    read_hooks: RefCell<HashMap<u32, ReadHook>>,
    write_hooks: RefCell<HashMap<u32, WriteHook>>,
    waits: Cell<u32>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a register without side effects or logging.
    pub fn peek(&self, addr: u32) -> u32 {
        self.regs.borrow().get(addr)
    }

    /// Set a register without side effects or logging.
    pub fn poke(&self, addr: u32, value: u32) {
        self.regs.borrow_mut().set(addr, value);
    }

    pub fn on_read(&self, addr: u32, hook: impl FnMut(&mut Registers) -> u32 + 'static) {
        self.read_hooks.borrow_mut().insert(addr, Box::new(hook));
    }

    pub fn on_write(&self, addr: u32, hook: impl FnMut(&mut Registers, u32) + 'static) {
        self.write_hooks.borrow_mut().insert(addr, Box::new(hook));
    }

    /// Writing a 1 to a bit of `addr` clears it, writing 0 has no effect.
    pub fn write_one_to_clear(&self, addr: u32) {
        self.on_write(addr, move |regs, value| {
            let current = regs.get(addr);
            regs.set(addr, current & !value);
        });
    }

    /// Writing a 1 to a bit of `clear_reg` clears the same bit of `status`.
    pub fn clear_register(&self, clear_reg: u32, status: u32) {
        self.on_write(clear_reg, move |regs, value| {
            let current = regs.get(status);
            regs.set(status, current & !value);
        });
    }

    /// Writing 0 to one of the `mask` bits of `addr` clears it, writing 1
    /// keeps it. Bits outside `mask` are stored as written.
    pub fn write_zero_to_clear(&self, addr: u32, mask: u32) {
        self.on_write(addr, move |regs, value| {
            let current = regs.get(addr);
            regs.set(addr, (current & mask & value) | (value & !mask));
        });
    }

    /// NVIC set/clear enable and pending pairs share one state register.
    pub fn with_nvic(self) -> Self {
        const ISER: u32 = map::NVIC;
        const ICER: u32 = map::NVIC + 0x80;
        const ISPR: u32 = map::NVIC + 0x100;
        const ICPR: u32 = map::NVIC + 0x180;
        for (set, clear) in [(ISER, ICER), (ISPR, ICPR)] {
            self.on_write(set, move |regs, value| {
                let current = regs.get(set);
                regs.set(set, current | value);
            });
            self.on_write(clear, move |regs, value| {
                let current = regs.get(set);
                regs.set(set, current & !value);
            });
            self.on_read(clear, move |regs| regs.get(set));
        }
        self
    }

    pub fn log(&self) -> Vec<Access> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(addr, value) => Some((addr, value)),
                Access::Read(..) => None,
            })
            .collect()
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn reads_of(&self, addr: u32) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|a| matches!(a, Access::Read(a, _) if *a == addr))
            .count()
    }

    pub fn waits(&self) -> u32 {
        self.waits.get()
    }
}

impl Bus for SimBus {
    fn read(&self, addr: u32) -> u32 {
        let value = match self.read_hooks.borrow_mut().get_mut(&addr) {
            Some(hook) => hook(&mut self.regs.borrow_mut()),
            None => self.regs.borrow().get(addr),
        };
        self.log.borrow_mut().push(Access::Read(addr, value));
        value
    }

    fn write(&self, addr: u32, value: u32) {
        self.log.borrow_mut().push(Access::Write(addr, value));
        match self.write_hooks.borrow_mut().get_mut(&addr) {
            Some(hook) => hook(&mut self.regs.borrow_mut(), value),
            None => self.regs.borrow_mut().set(addr, value),
        }
    }

    fn wait_for_interrupt(&self) {
        self.waits.set(self.waits.get() + 1);
    }

    fn wait_for_event(&self) {
        self.waits.set(self.waits.get() + 1);
    }
}
