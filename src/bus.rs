//! Register file access
//!
//! All drivers take a [`Bus`] and address registers by their absolute
//! address. [`Mmio`] is the implementation backed by the memory-mapped
//! registers of the chip.

/// A 32-bit register file.
pub trait Bus {
    /// Read the register at `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Write `value` to the register at `addr`.
    fn write(&self, addr: u32, value: u32);

    /// Byte read, for data registers whose behaviour depends on the access
    /// width.
    #[inline]
    fn read_u8(&self, addr: u32) -> u8 {
        self.read(addr) as u8
    }

    #[inline]
    fn write_u8(&self, addr: u32, value: u8) {
        self.write(addr, value as u32)
    }

    #[inline]
    fn read_u16(&self, addr: u32) -> u16 {
        self.read(addr) as u16
    }

    #[inline]
    fn write_u16(&self, addr: u32, value: u16) {
        self.write(addr, value as u32)
    }

    /// Suspend the core until an interrupt arrives (`WFI`).
    fn wait_for_interrupt(&self);

    /// Suspend the core until an event arrives (`WFE`).
    fn wait_for_event(&self);

    /// Signal an event to the core (`SEV`).
    fn send_event(&self) {}

    /// Complete all outstanding memory accesses (`DSB`).
    fn barrier(&self) {}

    /// Read-modify-write the register at `addr`.
    #[inline]
    fn modify(&self, addr: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read(addr);
        self.write(addr, f(value));
    }

    /// Clear the `clear` bits and set the `set` bits in one read-modify-write.
    #[inline]
    fn modify_bits(&self, addr: u32, clear: u32, set: u32) {
        self.modify(addr, |r| (r & !clear) | set);
    }

    #[inline]
    fn set_bits(&self, addr: u32, mask: u32) {
        self.modify(addr, |r| r | mask);
    }

    #[inline]
    fn clear_bits(&self, addr: u32, mask: u32) {
        self.modify(addr, |r| r & !mask);
    }

    /// True if all bits of `mask` are set.
    #[inline]
    fn is_set(&self, addr: u32, mask: u32) -> bool {
        self.read(addr) & mask == mask
    }

    /// The masked bits of the register.
    #[inline]
    fn field(&self, addr: u32, mask: u32) -> u32 {
        self.read(addr) & mask
    }
}

impl<B: Bus + ?Sized> Bus for &B {
    #[inline]
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    #[inline]
    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }

    #[inline]
    fn read_u8(&self, addr: u32) -> u8 {
        (**self).read_u8(addr)
    }

    #[inline]
    fn write_u8(&self, addr: u32, value: u8) {
        (**self).write_u8(addr, value)
    }

    #[inline]
    fn read_u16(&self, addr: u32) -> u16 {
        (**self).read_u16(addr)
    }

    #[inline]
    fn write_u16(&self, addr: u32, value: u16) {
        (**self).write_u16(addr, value)
    }

    #[inline]
    fn wait_for_interrupt(&self) {
        (**self).wait_for_interrupt()
    }

    #[inline]
    fn wait_for_event(&self) {
        (**self).wait_for_event()
    }

    #[inline]
    fn send_event(&self) {
        (**self).send_event()
    }

    #[inline]
    fn barrier(&self) {
        (**self).barrier()
    }
}

/// Volatile access to the memory-mapped registers.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create the register file of the running chip.
    ///
    /// # Safety
    ///
    /// Only valid on the target chip. The drivers do not arbitrate access, so
    /// the caller must not let two execution contexts drive the same
    /// peripheral concurrently.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Bus for Mmio {
    #[inline]
    fn read(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write(&self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }

    #[inline]
    fn read_u8(&self, addr: u32) -> u8 {
        unsafe { core::ptr::read_volatile(addr as *const u8) }
    }

    #[inline]
    fn write_u8(&self, addr: u32, value: u8) {
        unsafe { core::ptr::write_volatile(addr as *mut u8, value) }
    }

    #[inline]
    fn read_u16(&self, addr: u32) -> u16 {
        unsafe { core::ptr::read_volatile(addr as *const u16) }
    }

    #[inline]
    fn write_u16(&self, addr: u32, value: u16) {
        unsafe { core::ptr::write_volatile(addr as *mut u16, value) }
    }

    #[inline]
    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }

    #[inline]
    fn wait_for_event(&self) {
        cortex_m::asm::wfe();
    }

    #[inline]
    fn send_event(&self) {
        cortex_m::asm::sev();
    }

    #[inline]
    fn barrier(&self) {
        cortex_m::asm::dsb();
    }
}
