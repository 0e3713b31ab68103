//! Inter-integrated circuit (I2C) interface
//!
//! A transfer is programmed in CR2 (address, direction, byte count and end
//! mode) and then paced by the TXIS/RXNE flags. Transfers longer than 255
//! bytes are split with the reload mechanism.

use embedded_hal::i2c::{ErrorType, I2c as I2cBus, Operation, SevenBitAddress};

use crate::bus::Bus;
use crate::cortex::{Interrupt, Nvic};
use crate::error::Error;
use crate::map;
use crate::poll::{poll_until, Spin};
use crate::rcc::{Apb1Mask, Rcc};

const CR1: u32 = 0x00;
const CR2: u32 = 0x04;
const OAR1: u32 = 0x08;
const OAR2: u32 = 0x0C;
const TIMINGR: u32 = 0x10;
const TIMEOUTR: u32 = 0x14;
const ISR: u32 = 0x18;
const ICR: u32 = 0x1C;
const PECR: u32 = 0x20;
const RXDR: u32 = 0x24;
const TXDR: u32 = 0x28;

const CR1_PE: u32 = 1 << 0;
const CR1_TXIE: u32 = 1 << 1;
const CR1_RXIE: u32 = 1 << 2;
const CR1_ADDRIE: u32 = 1 << 3;
const CR1_NACKIE: u32 = 1 << 4;
const CR1_STOPIE: u32 = 1 << 5;
const CR1_TCIE: u32 = 1 << 6;
const CR1_ERRIE: u32 = 1 << 7;
const CR1_DNF: u32 = 0xF << 8;
const CR1_ANFOFF: u32 = 1 << 12;
const CR1_TXDMAEN: u32 = 1 << 14;
const CR1_RXDMAEN: u32 = 1 << 15;
const CR1_SBC: u32 = 1 << 16;
const CR1_NOSTRETCH: u32 = 1 << 17;
const CR1_WUPEN: u32 = 1 << 18;
const CR1_GCEN: u32 = 1 << 19;
const CR1_SMBHEN: u32 = 1 << 20;
const CR1_SMBDEN: u32 = 1 << 21;
const CR1_ALERTEN: u32 = 1 << 22;
const CR1_PECEN: u32 = 1 << 23;
const CR1_IE: u32 =
    CR1_TXIE | CR1_RXIE | CR1_ADDRIE | CR1_NACKIE | CR1_STOPIE | CR1_TCIE | CR1_ERRIE;

const CR2_SADD: u32 = 0x3FF;
const CR2_RD_WRN: u32 = 1 << 10;
const CR2_ADD10: u32 = 1 << 11;
const CR2_HEAD10R: u32 = 1 << 12;
const CR2_START: u32 = 1 << 13;
const CR2_STOP: u32 = 1 << 14;
const CR2_NACK: u32 = 1 << 15;
const CR2_NBYTES: u32 = 0xFF << 16;
const CR2_RELOAD: u32 = 1 << 24;
const CR2_AUTOEND: u32 = 1 << 25;
const CR2_PECBYTE: u32 = 1 << 26;

const OAR1_OA1: u32 = 0x3FF;
const OAR1_OA1MODE: u32 = 1 << 10;
const OAR1_OA1EN: u32 = 1 << 15;
const OAR2_OA2: u32 = 0x7F << 1;
const OAR2_OA2MSK: u32 = 0b111 << 8;
const OAR2_OA2EN: u32 = 1 << 15;

const TIMEOUTR_TIMEOUTA: u32 = 0xFFF;
const TIMEOUTR_TIDLE: u32 = 1 << 12;
const TIMEOUTR_TIMOUTEN: u32 = 1 << 15;
const TIMEOUTR_TIMEOUTB: u32 = 0xFFF << 16;
const TIMEOUTR_TEXTEN: u32 = 1 << 31;

const ISR_TXIS: u32 = 1 << 1;
const ISR_RXNE: u32 = 1 << 2;
const ISR_NACKF: u32 = 1 << 4;
const ISR_STOPF: u32 = 1 << 5;
const ISR_TC: u32 = 1 << 6;
const ISR_TCR: u32 = 1 << 7;
const ISR_BERR: u32 = 1 << 8;
const ISR_ARLO: u32 = 1 << 9;
const ISR_OVR: u32 = 1 << 10;
const ISR_DIR: u32 = 1 << 16;
const ISR_ADDCODE: u32 = 0x7F << 17;

/// Every flag with a clear bit in ICR.
const ICR_ALL: u32 = 0x3F38;

/// Largest NBYTES value.
const MAX_CHUNK: usize = 255;

/// Polls granted to each step of a blocking transfer.
pub const TRANSFER_TIMEOUT_POLLS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Instance {
    I2c1,
    I2c2,
}

impl Instance {
    const fn base(self) -> u32 {
        match self {
            Instance::I2c1 => map::I2C1,
            Instance::I2c2 => map::I2C2,
        }
    }

    pub const fn interrupt(self) -> Interrupt {
        match self {
            Instance::I2c1 => Interrupt::I2c1,
            Instance::I2c2 => Interrupt::I2c2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralMode {
    I2c,
    SmbusHost,
    SmbusDevice,
    /// SMBus device with the default address enabled.
    SmbusDeviceArp,
}

impl PeripheralMode {
    const fn bits(self) -> u32 {
        match self {
            PeripheralMode::I2c | PeripheralMode::SmbusDevice => 0,
            PeripheralMode::SmbusHost => CR1_SMBHEN,
            PeripheralMode::SmbusDeviceArp => CR1_SMBDEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressSize {
    Bits7 = 0,
    Bits10 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Acknowledge {
    Ack = 0,
    Nack = CR2_NACK as isize,
}

/// How a transfer ends once NBYTES bytes were moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndMode {
    /// More bytes follow: TCR is set and a new NBYTES must be written.
    Reload = CR2_RELOAD as isize,
    /// STOP is sent automatically.
    AutoEnd = CR2_AUTOEND as isize,
    /// TC is set and software sends a RESTART or STOP.
    SoftEnd = 0,
    /// SMBus: STOP after the PEC byte.
    SmbusAutoEndWithPec = (CR2_AUTOEND | CR2_PECBYTE) as isize,
    SmbusSoftEndWithPec = CR2_PECBYTE as isize,
}

/// Condition generated when programming a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Continue the current transfer, keep the direction.
    NoStartStop,
    Stop,
    StartRead,
    StartWrite,
    /// Repeated start after a 10-bit write, sending only the header.
    Restart10BitRead,
}

impl Request {
    const fn bits(self) -> u32 {
        match self {
            Request::NoStartStop => 0,
            Request::Stop => CR2_STOP,
            Request::StartRead => CR2_START | CR2_RD_WRN,
            Request::StartWrite => CR2_START,
            Request::Restart10BitRead => CR2_START | CR2_RD_WRN | CR2_HEAD10R,
        }
    }
}

/// Status flags in ISR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    Txe = 1 << 0,
    Txis = 1 << 1,
    Rxne = 1 << 2,
    Addr = 1 << 3,
    Nack = 1 << 4,
    Stop = 1 << 5,
    Tc = 1 << 6,
    Tcr = 1 << 7,
    Berr = 1 << 8,
    Arlo = 1 << 9,
    Ovr = 1 << 10,
    PecErr = 1 << 11,
    Timeout = 1 << 12,
    Alert = 1 << 13,
    Busy = 1 << 15,
}

/// Flags cleared through ICR, at the same position as in ISR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClearableFlag {
    Addr = 1 << 3,
    Nack = 1 << 4,
    Stop = 1 << 5,
    Berr = 1 << 8,
    Arlo = 1 << 9,
    Ovr = 1 << 10,
    PecErr = 1 << 11,
    Timeout = 1 << 12,
    Alert = 1 << 13,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Tx = CR1_TXIE as isize,
    Rx = CR1_RXIE as isize,
    Addr = CR1_ADDRIE as isize,
    Nack = CR1_NACKIE as isize,
    Stop = CR1_STOPIE as isize,
    TransferComplete = CR1_TCIE as isize,
    /// Bus error, arbitration loss, overrun, PEC error, timeout and alert.
    Error = CR1_ERRIE as isize,
}

/// Value of TIMINGR from its fields, see the reference manual tables for
/// the usual bus speeds.
pub const fn timing(prescaler: u8, scl_delay: u8, sda_delay: u8, scl_high: u8, scl_low: u8) -> u32 {
    ((prescaler as u32 & 0xF) << 28)
        | ((scl_delay as u32 & 0xF) << 20)
        | ((sda_delay as u32 & 0xF) << 16)
        | ((scl_high as u32) << 8)
        | scl_low as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub peripheral_mode: PeripheralMode,
    /// Raw TIMINGR value, see [`timing`].
    pub timing: u32,
    pub analog_filter: bool,
    /// Digital filter length in I2C kernel clocks, 0 to 15.
    pub digital_filter: u8,
    /// Own address 1, disabled when 0.
    pub own_address1: u16,
    pub acknowledge: Acknowledge,
    pub own_address_size: AddressSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peripheral_mode: PeripheralMode::I2c,
            timing: 0,
            analog_filter: true,
            digital_filter: 0,
            own_address1: 0,
            acknowledge: Acknowledge::Ack,
            own_address_size: AddressSize::Bits7,
        }
    }
}

/// Progress of a blocking transfer.
struct Transfer {
    address: u16,
    read: bool,
    remaining: usize,
    in_chunk: usize,
    last: bool,
}

impl Transfer {
    fn end_mode(&self) -> EndMode {
        if self.remaining > MAX_CHUNK {
            EndMode::Reload
        } else if self.last {
            EndMode::AutoEnd
        } else {
            EndMode::SoftEnd
        }
    }
}

#[derive(Debug)]
pub struct I2c<'a, B: Bus> {
    bus: &'a B,
    instance: Instance,
}

impl<'a, B: Bus> I2c<'a, B> {
    pub fn new(bus: &'a B, instance: Instance) -> Self {
        Self { bus, instance }
    }

    #[inline]
    fn reg(&self, offset: u32) -> u32 {
        self.instance.base() + offset
    }

    /// Configure and enable the interface. PE is cleared first so that the
    /// filters and timings can be written.
    pub fn init(&self, config: &Config) {
        self.disable();
        self.configure_filters(config.analog_filter, config.digital_filter);
        self.set_timing(config.timing);
        self.enable();

        self.disable_own_address1();
        self.set_own_address1(config.own_address1, config.own_address_size);
        if config.own_address1 != 0 {
            self.enable_own_address1();
        }
        self.bus.modify_bits(
            self.reg(CR1),
            CR1_SMBHEN | CR1_SMBDEN,
            config.peripheral_mode.bits(),
        );
        self.acknowledge_next_data(config.acknowledge);
    }

    /// Reset the instance through the RCC.
    pub fn deinit<R: Bus>(&self, rcc: &Rcc<'_, R>) {
        match self.instance {
            Instance::I2c1 => rcc.reset_pulse(Apb1Mask::I2C1),
            Instance::I2c2 => rcc.reset_pulse(Apb1Mask::I2C2),
        }
    }

    pub fn enable(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_PE);
    }

    /// Clearing PE also resets the transfer state and the flags.
    pub fn disable(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_PE);
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_set(self.reg(CR1), CR1_PE)
    }

    /// Only while disabled.
    pub fn configure_filters(&self, analog: bool, digital: u8) {
        let anfoff = if analog { 0 } else { CR1_ANFOFF };
        self.bus.modify_bits(
            self.reg(CR1),
            CR1_ANFOFF | CR1_DNF,
            anfoff | (((digital as u32) << 8) & CR1_DNF),
        );
    }

    /// Only while disabled.
    pub fn set_timing(&self, timing: u32) {
        self.bus.write(self.reg(TIMINGR), timing);
    }

    pub fn timing(&self) -> u32 {
        self.bus.read(self.reg(TIMINGR))
    }

    // Addressing.

    pub fn set_own_address1(&self, address: u16, size: AddressSize) {
        let mode = if size == AddressSize::Bits10 { OAR1_OA1MODE } else { 0 };
        self.bus.modify_bits(
            self.reg(OAR1),
            OAR1_OA1 | OAR1_OA1MODE,
            (address as u32 & OAR1_OA1) | mode,
        );
    }

    pub fn enable_own_address1(&self) {
        self.bus.set_bits(self.reg(OAR1), OAR1_OA1EN);
    }

    pub fn disable_own_address1(&self) {
        self.bus.clear_bits(self.reg(OAR1), OAR1_OA1EN);
    }

    /// 7-bit own address 2 in bits 7:1, with the `mask` low bits ignored.
    pub fn set_own_address2(&self, address: u8, mask: u8) {
        self.bus.modify_bits(
            self.reg(OAR2),
            OAR2_OA2 | OAR2_OA2MSK,
            (address as u32 & OAR2_OA2) | (((mask as u32) << 8) & OAR2_OA2MSK),
        );
    }

    pub fn enable_own_address2(&self) {
        self.bus.set_bits(self.reg(OAR2), OAR2_OA2EN);
    }

    pub fn disable_own_address2(&self) {
        self.bus.clear_bits(self.reg(OAR2), OAR2_OA2EN);
    }

    pub fn enable_general_call(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_GCEN);
    }

    pub fn disable_general_call(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_GCEN);
    }

    pub fn enable_clock_stretching(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_NOSTRETCH);
    }

    pub fn disable_clock_stretching(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_NOSTRETCH);
    }

    pub fn enable_slave_byte_control(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_SBC);
    }

    pub fn disable_slave_byte_control(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_SBC);
    }

    pub fn enable_wakeup_from_stop(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_WUPEN);
    }

    pub fn disable_wakeup_from_stop(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_WUPEN);
    }

    pub fn enable_dma_tx(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_TXDMAEN);
    }

    pub fn enable_dma_rx(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_RXDMAEN);
    }

    pub fn disable_dma(&self) {
        self.bus
            .clear_bits(self.reg(CR1), CR1_TXDMAEN | CR1_RXDMAEN);
    }

    // SMBus.

    pub fn enable_smbus_alert(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_ALERTEN);
    }

    pub fn disable_smbus_alert(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_ALERTEN);
    }

    pub fn enable_smbus_pec(&self) {
        self.bus.set_bits(self.reg(CR1), CR1_PECEN);
    }

    pub fn disable_smbus_pec(&self) {
        self.bus.clear_bits(self.reg(CR1), CR1_PECEN);
    }

    pub fn smbus_pec(&self) -> u8 {
        self.bus.read(self.reg(PECR)) as u8
    }

    /// Clock low timeout A, or bus idle timeout when `idle` is set.
    pub fn configure_smbus_timeout(&self, timeout_a: u16, idle: bool, timeout_b: u16) {
        let tidle = if idle { TIMEOUTR_TIDLE } else { 0 };
        self.bus.modify_bits(
            self.reg(TIMEOUTR),
            TIMEOUTR_TIMEOUTA | TIMEOUTR_TIDLE | TIMEOUTR_TIMEOUTB,
            (timeout_a as u32 & TIMEOUTR_TIMEOUTA)
                | tidle
                | (((timeout_b as u32) << 16) & TIMEOUTR_TIMEOUTB),
        );
    }

    pub fn enable_smbus_timeout(&self) {
        self.bus
            .set_bits(self.reg(TIMEOUTR), TIMEOUTR_TIMOUTEN | TIMEOUTR_TEXTEN);
    }

    pub fn disable_smbus_timeout(&self) {
        self.bus
            .clear_bits(self.reg(TIMEOUTR), TIMEOUTR_TIMOUTEN | TIMEOUTR_TEXTEN);
    }

    // Transfers.

    /// Program a transfer in CR2.
    ///
    /// `address` is the 7-bit address shifted left by one, or the 10-bit
    /// address. [`Request::NoStartStop`] keeps the current direction.
    pub fn handle_transfer(
        &self,
        address: u16,
        size: AddressSize,
        nbytes: u8,
        end: EndMode,
        request: Request,
    ) {
        let add10 = if size == AddressSize::Bits10 { CR2_ADD10 } else { 0 };
        let mut clear = CR2_SADD
            | CR2_ADD10
            | CR2_HEAD10R
            | CR2_START
            | CR2_STOP
            | CR2_RELOAD
            | CR2_NBYTES
            | CR2_AUTOEND
            | CR2_PECBYTE;
        if request != Request::NoStartStop {
            clear |= CR2_RD_WRN;
        }
        self.bus.modify_bits(
            self.reg(CR2),
            clear,
            (address as u32 & CR2_SADD)
                | add10
                | ((nbytes as u32) << 16)
                | end as u32
                | request.bits(),
        );
    }

    pub fn generate_start(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_START);
    }

    pub fn generate_stop(&self) {
        self.bus.set_bits(self.reg(CR2), CR2_STOP);
    }

    pub fn acknowledge_next_data(&self, ack: Acknowledge) {
        self.bus.modify_bits(self.reg(CR2), CR2_NACK, ack as u32);
    }

    pub fn set_transfer_size(&self, nbytes: u8) {
        self.bus
            .modify_bits(self.reg(CR2), CR2_NBYTES, (nbytes as u32) << 16);
    }

    pub fn transfer_size(&self) -> u8 {
        (self.bus.field(self.reg(CR2), CR2_NBYTES) >> 16) as u8
    }

    pub fn transmit_data8(&self, data: u8) {
        self.bus.write(self.reg(TXDR), data as u32);
    }

    pub fn receive_data8(&self) -> u8 {
        self.bus.read(self.reg(RXDR)) as u8
    }

    /// True if the master addressed us for a read.
    pub fn is_slave_transmitting(&self) -> bool {
        self.bus.is_set(self.reg(ISR), ISR_DIR)
    }

    /// The 7 upper bits of the address we matched as a slave.
    pub fn address_match_code(&self) -> u8 {
        (self.bus.field(self.reg(ISR), ISR_ADDCODE) >> 17) as u8
    }

    // Flags.

    pub fn is_flag_set(&self, flag: Flag) -> bool {
        self.bus.read(self.reg(ISR)) & flag as u32 != 0
    }

    /// Write the flag bit to ICR.
    pub fn clear_flag(&self, flag: ClearableFlag) {
        self.bus.write(self.reg(ICR), flag as u32);
    }

    /// Read the flag, clearing it if it was set.
    pub fn take_flag(&self, flag: ClearableFlag) -> bool {
        if self.bus.read(self.reg(ISR)) & flag as u32 != 0 {
            self.clear_flag(flag);
            true
        } else {
            false
        }
    }

    /// Empty TXDR by setting TXE.
    pub fn flush_txdr(&self) {
        self.bus.set_bits(self.reg(ISR), Flag::Txe as u32);
    }

    // Interrupts.

    pub fn is_interrupt_enabled(&self, event: Event) -> bool {
        self.bus.is_set(self.reg(CR1), event as u32)
    }

    /// Clear every flag that has a clear bit, enable or disable the
    /// `events`, then route the instance line in the NVIC according to the
    /// remaining enables.
    pub fn configure_interrupts(&self, events: &[Event], enable: bool, priority: u8) {
        self.bus.write(self.reg(ICR), ICR_ALL);

        let mask = events.iter().fold(0, |m, e| m | *e as u32);
        if enable {
            self.bus.set_bits(self.reg(CR1), mask);
        } else {
            self.bus.clear_bits(self.reg(CR1), mask);
        }

        let active = self.bus.read(self.reg(CR1)) & CR1_IE != 0;
        Nvic::new(self.bus).route(self.instance.interrupt(), active, priority);
    }

    // Blocking master transfers.

    /// Error flags of `isr` turned into an error, after clearing them. A
    /// NACK ends the transfer with a STOP.
    fn check_errors(&self, isr: u32) -> Result<(), Error> {
        if isr & ISR_ARLO != 0 {
            self.clear_flag(ClearableFlag::Arlo);
            Err(Error::Arbitration)
        } else if isr & ISR_BERR != 0 {
            self.clear_flag(ClearableFlag::Berr);
            Err(Error::Bus)
        } else if isr & ISR_OVR != 0 {
            self.clear_flag(ClearableFlag::Ovr);
            Err(Error::Overrun)
        } else if isr & ISR_NACKF != 0 {
            if !self.bus.is_set(self.reg(CR2), CR2_AUTOEND) {
                self.generate_stop();
            }
            if poll_until(Spin, TRANSFER_TIMEOUT_POLLS, || {
                self.bus.is_set(self.reg(ISR), ISR_STOPF)
            })
            .is_err()
            {
                warn!("i2c: stop after NACK did not complete");
            }
            self.bus.write(
                self.reg(ICR),
                ClearableFlag::Nack as u32 | ClearableFlag::Stop as u32,
            );
            Err(Error::Nack)
        } else {
            Ok(())
        }
    }

    /// Wait for one of the `mask` flags, failing on a bus error.
    fn wait_for(&self, mask: u32) -> Result<(), Error> {
        let mut failure = Ok(());
        poll_until(Spin, TRANSFER_TIMEOUT_POLLS, || {
            let isr = self.bus.read(self.reg(ISR));
            failure = self.check_errors(isr);
            failure.is_err() || isr & mask != 0
        })?;
        failure
    }

    fn start(&self, address: u8, read: bool, total: usize, last: bool) -> Result<Transfer, Error> {
        let mut t = Transfer {
            address: (address as u16) << 1,
            read,
            remaining: total,
            in_chunk: total.min(MAX_CHUNK),
            last,
        };
        let request = if read {
            Request::StartRead
        } else {
            Request::StartWrite
        };
        self.handle_transfer(
            t.address,
            AddressSize::Bits7,
            t.in_chunk as u8,
            t.end_mode(),
            request,
        );
        t.remaining -= t.in_chunk;
        Ok(t)
    }

    /// Wait until the next byte can be moved, reloading NBYTES between
    /// chunks.
    fn next_slot(&self, t: &mut Transfer) -> Result<(), Error> {
        if t.in_chunk == 0 {
            self.wait_for(ISR_TCR)?;
            t.in_chunk = t.remaining.min(MAX_CHUNK);
            self.handle_transfer(
                t.address,
                AddressSize::Bits7,
                t.in_chunk as u8,
                t.end_mode(),
                Request::NoStartStop,
            );
            t.remaining -= t.in_chunk;
        }
        self.wait_for(if t.read { ISR_RXNE } else { ISR_TXIS })?;
        t.in_chunk -= 1;
        Ok(())
    }

    /// Wait for the automatic STOP of the last group, or for TC before a
    /// repeated start.
    fn finish(&self, t: Transfer) -> Result<(), Error> {
        if t.last {
            self.wait_for(ISR_STOPF)?;
            self.clear_flag(ClearableFlag::Stop);
        } else {
            self.wait_for(ISR_TC)?;
        }
        Ok(())
    }

    /// Write `bytes` to the 7-bit `address`, ending with a STOP.
    pub fn master_write(&self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        let mut t = self.start(address, false, bytes.len(), true)?;
        for &byte in bytes {
            self.next_slot(&mut t)?;
            self.transmit_data8(byte);
        }
        self.finish(t)
    }

    /// Read `buffer.len()` bytes from the 7-bit `address`, ending with a STOP.
    pub fn master_read(&self, address: u8, buffer: &mut [u8]) -> Result<(), Error> {
        let mut t = self.start(address, true, buffer.len(), true)?;
        for byte in buffer.iter_mut() {
            self.next_slot(&mut t)?;
            *byte = self.receive_data8();
        }
        self.finish(t)
    }

    /// Write `bytes`, then read into `buffer` after a repeated start.
    pub fn master_write_read(&self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Error> {
        let mut t = self.start(address, false, bytes.len(), false)?;
        for &byte in bytes {
            self.next_slot(&mut t)?;
            self.transmit_data8(byte);
        }
        self.finish(t)?;
        self.master_read(address, buffer)
    }
}

impl<B: Bus> ErrorType for I2c<'_, B> {
    type Error = Error;
}

impl<B: Bus> I2cBus<SevenBitAddress> for I2c<'_, B> {
    /// Adjacent operations of the same kind are merged into one transfer;
    /// a change of direction is a repeated start.
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Error> {
        let len = |op: &Operation<'_>| match op {
            Operation::Read(buf) => buf.len(),
            Operation::Write(buf) => buf.len(),
        };

        let mut i = 0;
        while i < operations.len() {
            let read = matches!(operations[i], Operation::Read(_));
            let mut j = i;
            let mut total = 0;
            while j < operations.len() && matches!(operations[j], Operation::Read(_)) == read {
                total += len(&operations[j]);
                j += 1;
            }

            let mut t = self.start(address, read, total, j == operations.len())?;
            for op in operations[i..j].iter_mut() {
                match op {
                    Operation::Read(buf) => {
                        for byte in buf.iter_mut() {
                            self.next_slot(&mut t)?;
                            *byte = self.receive_data8();
                        }
                    }
                    Operation::Write(buf) => {
                        for &byte in buf.iter() {
                            self.next_slot(&mut t)?;
                            self.transmit_data8(byte);
                        }
                    }
                }
            }
            self.finish(t)?;
            i = j;
        }
        Ok(())
    }
}
