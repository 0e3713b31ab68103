#![no_main]
#![no_std]

use cortex_m_rt as rt;
use rt::entry;

use panic_rtt_target as _;

use rtt_target::{rprintln, rtt_init_print};

use stm32f0_ll_hal::delay::Delay;
use stm32f0_ll_hal::pwr::Pwr;
use stm32f0_ll_hal::rcc::{Apb1Mask, Rcc, RtcClockSource};
use stm32f0_ll_hal::rtc::{self, Date, Format, HourFormat, Rtc, Time, TimeFormat, Weekday};
use stm32f0_ll_hal::{Error, Mmio};

// LSI runs at about 40 kHz: 40000 / (128 * 312) is close to 1 Hz.
const LSI_ASYNCH_PRESCALER: u8 = 127;
const LSI_SYNCH_PRESCALER: u16 = 311;

#[entry]
fn main() -> ! {
    rtt_init_print!();

    match inner_main() {
        Ok(()) => cortex_m::peripheral::SCB::sys_reset(),
        Err(e) => panic!("{}", e),
    }
}

fn inner_main() -> Result<(), Error> {
    let bus = unsafe { Mmio::new() };

    // The RTC drivers time out on SysTick wraps.
    let rcc = Rcc::new(&bus);
    let mut delay = Delay::new(&bus, rcc.clocks().hclk)?;

    rcc.enable_clock(Apb1Mask::PWR);
    Pwr::new(&bus).enable_backup_access();

    rcc.start_lsi()?;
    if rcc.rtc_clock_source() != RtcClockSource::Lsi {
        rcc.reset_backup_domain();
        rcc.set_rtc_clock_source(RtcClockSource::Lsi);
    }
    rcc.enable_rtc();

    let mut rtc = Rtc::new(&bus);
    if !rtc.is_calendar_initialized() {
        rtc.init(&rtc::Config {
            hour_format: HourFormat::H24,
            asynch_prescaler: LSI_ASYNCH_PRESCALER,
            synch_prescaler: LSI_SYNCH_PRESCALER,
        })?;
        rtc.init_time(
            Format::Bin,
            &Time {
                time_format: TimeFormat::Am,
                hours: 23,
                minutes: 59,
                seconds: 50,
            },
        )?;
        rtc.init_date(
            Format::Bin,
            &Date {
                weekday: Weekday::Friday,
                day: 31,
                month: 12,
                year: 21,
            },
        )?;
        rprintln!("calendar set");
    }

    loop {
        let (date, time) = rtc.datetime(Format::Bin);
        rprintln!(
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            date.year,
            date.month,
            date.day,
            time.hours,
            time.minutes,
            time.seconds
        );
        delay.wait_ms(1_000);
    }
}
