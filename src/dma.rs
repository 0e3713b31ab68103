//! Direct memory access (DMA) controller
//!
//! DMA1 has seven channels. Each one moves data between a peripheral data
//! register and memory, or between two memory areas, on requests from the
//! peripherals mapped to it.

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;

const ISR: u32 = map::DMA1;
const IFCR: u32 = map::DMA1 + 0x04;

const CCR_EN: u32 = 1 << 0;
const CCR_TCIE: u32 = 1 << 1;
const CCR_HTIE: u32 = 1 << 2;
const CCR_TEIE: u32 = 1 << 3;
const CCR_DIR: u32 = 1 << 4;
const CCR_CIRC: u32 = 1 << 5;
const CCR_PINC: u32 = 1 << 6;
const CCR_MINC: u32 = 1 << 7;
const CCR_PSIZE: u32 = 0b11 << 8;
const CCR_MSIZE: u32 = 0b11 << 10;
const CCR_PL: u32 = 0b11 << 12;
const CCR_MEM2MEM: u32 = 1 << 14;
const CCR_IE: u32 = CCR_TCIE | CCR_HTIE | CCR_TEIE;

const CNDTR_NDT: u32 = 0xFFFF;
/// The four flags of one channel in ISR/IFCR.
const CHANNEL_FLAGS: u32 = 0b1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
    Ch4 = 4,
    Ch5 = 5,
    Ch6 = 6,
    Ch7 = 7,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Ch1,
        Channel::Ch2,
        Channel::Ch3,
        Channel::Ch4,
        Channel::Ch5,
        Channel::Ch6,
        Channel::Ch7,
    ];

    #[inline]
    const fn index(self) -> u32 {
        self as u32 - 1
    }

    #[inline]
    const fn ccr(self) -> u32 {
        map::DMA1 + 0x08 + 20 * self.index()
    }

    #[inline]
    const fn cndtr(self) -> u32 {
        self.ccr() + 0x04
    }

    #[inline]
    const fn cpar(self) -> u32 {
        self.ccr() + 0x08
    }

    #[inline]
    const fn cmar(self) -> u32 {
        self.ccr() + 0x0C
    }

    #[inline]
    const fn flag_shift(self) -> u32 {
        4 * self.index()
    }

    /// The NVIC line of the channel, shared with the channels of its group.
    pub const fn interrupt(self) -> Interrupt {
        match self {
            Channel::Ch1 => Interrupt::Dma1Ch1,
            Channel::Ch2 | Channel::Ch3 => Interrupt::Dma1Ch2_3,
            _ => Interrupt::Dma1Ch4_7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    PeripheralToMemory = 0,
    MemoryToPeripheral = CCR_DIR as isize,
    MemoryToMemory = CCR_MEM2MEM as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Normal = 0,
    Circular = CCR_CIRC as isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    Byte = 0b00,
    HalfWord = 0b01,
    Word = 0b10,
}

impl DataSize {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => DataSize::Byte,
            0b01 => DataSize::HalfWord,
            _ => DataSize::Word,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    Low = 0b00 << 12,
    Medium = 0b01 << 12,
    High = 0b10 << 12,
    VeryHigh = 0b11 << 12,
}

/// Channel status flags, relative to the channel position in ISR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// Any of the other three.
    Global = 1 << 0,
    TransferComplete = 1 << 1,
    HalfTransfer = 1 << 2,
    TransferError = 1 << 3,
}

/// Channel interrupt sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    TransferComplete = CCR_TCIE as isize,
    HalfTransfer = CCR_HTIE as isize,
    TransferError = CCR_TEIE as isize,
}

/// Channel transfer settings.
///
/// In memory to memory mode the peripheral side is the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub peripheral_address: u32,
    pub memory_address: u32,
    pub direction: Direction,
    pub mode: Mode,
    pub peripheral_increment: bool,
    pub memory_increment: bool,
    pub peripheral_size: DataSize,
    pub memory_size: DataSize,
    /// Number of data items, up to 65535.
    pub count: u16,
    pub priority: Priority,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            peripheral_address: 0,
            memory_address: 0,
            direction: Direction::PeripheralToMemory,
            mode: Mode::Normal,
            peripheral_increment: false,
            memory_increment: false,
            peripheral_size: DataSize::Byte,
            memory_size: DataSize::Byte,
            count: 0,
            priority: Priority::Low,
        }
    }
}

/// The DMA1 controller.
#[derive(Debug)]
pub struct Dma<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Dma<'a, B> {
    pub fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    /// Configure a disabled channel. Fails with [`Error::Enabled`] and
    /// writes nothing if the channel is enabled.
    pub fn init(&self, ch: Channel, config: &ChannelConfig) -> Result<(), Error> {
        if self.is_enabled(ch) {
            return Err(Error::Enabled);
        }

        let inc = |on, bit| if on { bit } else { 0 };
        self.bus.modify_bits(
            ch.ccr(),
            CCR_DIR | CCR_MEM2MEM | CCR_CIRC | CCR_PINC | CCR_MINC | CCR_PSIZE | CCR_MSIZE | CCR_PL,
            config.direction as u32
                | config.mode as u32
                | inc(config.peripheral_increment, CCR_PINC)
                | inc(config.memory_increment, CCR_MINC)
                | (config.peripheral_size as u32) << 8
                | (config.memory_size as u32) << 10
                | config.priority as u32,
        );
        self.set_peripheral_address(ch, config.peripheral_address);
        self.set_memory_address(ch, config.memory_address);
        self.set_count(ch, config.count);
        Ok(())
    }

    /// Disable the channel, reset its registers and clear its flags.
    pub fn deinit_channel(&self, ch: Channel) {
        self.disable(ch);
        self.bus.write(ch.ccr(), 0);
        self.bus.write(ch.cndtr(), 0);
        self.bus.write(ch.cpar(), 0);
        self.bus.write(ch.cmar(), 0);
        self.bus.write(IFCR, (Flag::Global as u32) << ch.flag_shift());
    }

    /// De-initialise every channel. DMA1 has no reset line in the RCC.
    pub fn deinit(&self) {
        for ch in Channel::ALL {
            self.deinit_channel(ch);
        }
    }

    pub fn enable(&self, ch: Channel) {
        self.bus.set_bits(ch.ccr(), CCR_EN);
    }

    pub fn disable(&self, ch: Channel) {
        self.bus.clear_bits(ch.ccr(), CCR_EN);
    }

    pub fn is_enabled(&self, ch: Channel) -> bool {
        self.bus.is_set(ch.ccr(), CCR_EN)
    }

    pub fn set_direction(&self, ch: Channel, direction: Direction) {
        self.bus
            .modify_bits(ch.ccr(), CCR_DIR | CCR_MEM2MEM, direction as u32);
    }

    pub fn direction(&self, ch: Channel) -> Direction {
        let ccr = self.bus.read(ch.ccr());
        if ccr & CCR_MEM2MEM != 0 {
            Direction::MemoryToMemory
        } else if ccr & CCR_DIR != 0 {
            Direction::MemoryToPeripheral
        } else {
            Direction::PeripheralToMemory
        }
    }

    pub fn set_mode(&self, ch: Channel, mode: Mode) {
        self.bus.modify_bits(ch.ccr(), CCR_CIRC, mode as u32);
    }

    pub fn set_peripheral_increment(&self, ch: Channel, on: bool) {
        let set = if on { CCR_PINC } else { 0 };
        self.bus.modify_bits(ch.ccr(), CCR_PINC, set);
    }

    pub fn set_memory_increment(&self, ch: Channel, on: bool) {
        let set = if on { CCR_MINC } else { 0 };
        self.bus.modify_bits(ch.ccr(), CCR_MINC, set);
    }

    pub fn set_peripheral_size(&self, ch: Channel, size: DataSize) {
        self.bus
            .modify_bits(ch.ccr(), CCR_PSIZE, (size as u32) << 8);
    }

    pub fn peripheral_size(&self, ch: Channel) -> DataSize {
        DataSize::from_bits(self.bus.field(ch.ccr(), CCR_PSIZE) >> 8)
    }

    pub fn set_memory_size(&self, ch: Channel, size: DataSize) {
        self.bus
            .modify_bits(ch.ccr(), CCR_MSIZE, (size as u32) << 10);
    }

    pub fn memory_size(&self, ch: Channel) -> DataSize {
        DataSize::from_bits(self.bus.field(ch.ccr(), CCR_MSIZE) >> 10)
    }

    pub fn set_priority(&self, ch: Channel, priority: Priority) {
        self.bus.modify_bits(ch.ccr(), CCR_PL, priority as u32);
    }

    /// Number of items left to transfer. Only writable while disabled.
    pub fn set_count(&self, ch: Channel, count: u16) {
        self.bus
            .modify_bits(ch.cndtr(), CNDTR_NDT, count as u32);
    }

    pub fn count(&self, ch: Channel) -> u16 {
        self.bus.field(ch.cndtr(), CNDTR_NDT) as u16
    }

    pub fn set_peripheral_address(&self, ch: Channel, addr: u32) {
        self.bus.write(ch.cpar(), addr);
    }

    pub fn peripheral_address(&self, ch: Channel) -> u32 {
        self.bus.read(ch.cpar())
    }

    pub fn set_memory_address(&self, ch: Channel, addr: u32) {
        self.bus.write(ch.cmar(), addr);
    }

    pub fn memory_address(&self, ch: Channel) -> u32 {
        self.bus.read(ch.cmar())
    }

    // Flags.

    pub fn is_flag_set(&self, ch: Channel, flag: Flag) -> bool {
        self.bus.read(ISR) & ((flag as u32) << ch.flag_shift()) != 0
    }

    /// Write the flag bit to IFCR. Clearing [`Flag::Global`] clears all four.
    pub fn clear_flag(&self, ch: Channel, flag: Flag) {
        self.bus.write(IFCR, (flag as u32) << ch.flag_shift());
    }

    /// Read the flag, clearing it if it was set.
    pub fn take_flag(&self, ch: Channel, flag: Flag) -> bool {
        if self.is_flag_set(ch, flag) {
            self.clear_flag(ch, flag);
            true
        } else {
            false
        }
    }

    // Interrupts.

    pub fn is_interrupt_enabled(&self, ch: Channel, event: Event) -> bool {
        self.bus.is_set(ch.ccr(), event as u32)
    }

    /// Clear the flags of the channel, enable or disable the `events`, then
    /// route the NVIC line according to the enables of every channel sharing
    /// it.
    pub fn configure_interrupts(&self, ch: Channel, events: &[Event], enable: bool, priority: u8) {
        self.bus
            .write(IFCR, CHANNEL_FLAGS << ch.flag_shift());

        let mask = events.iter().fold(0, |m, e| m | *e as u32);
        if enable {
            self.bus.set_bits(ch.ccr(), mask);
        } else {
            self.bus.clear_bits(ch.ccr(), mask);
        }

        let irq = ch.interrupt();
        let active = Channel::ALL
            .iter()
            .filter(|other| other.interrupt() == irq)
            .any(|other| self.bus.read(other.ccr()) & CCR_IE != 0);
        Nvic::new(self.bus).route(irq, active, priority);
    }
}
