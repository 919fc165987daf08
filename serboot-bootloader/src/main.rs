// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! serboot serial bootloader for RP2040.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod uart_link;

use defmt_rtt as _;
use embedded_hal::digital::InputPin;
use panic_probe as _;
use rp2040_hal::fugit::ExtU32;
use serboot_common::{DeviceConfig, Session};

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

const DEVICE: DeviceConfig = DeviceConfig::RP2040;

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");
    defmt::unwrap!(DEVICE.validate());

    let mut p = peripherals::init();
    flash::init();

    let gp2_low = p.gp2.is_low().unwrap_or(false);
    let probe = boot::RequestProbe::capture(gp2_low);

    p.watchdog.start(2_000_000.micros());
    let mut session = Session::new(
        DEVICE,
        unsafe { flash::Rp2040Flash::new() },
        uart_link::UartLink::new(p.uart),
        boot::SystemEntryTimer::new(p.timer),
        boot::SystemWatchdog(p.watchdog),
    );

    let end = session.run(&probe);
    defmt::println!("Session ended: {}", end);

    // The application starts without a running watchdog.
    session.engine_mut().watchdog_mut().0.disable();
    boot::hand_off(end, &DEVICE)
}
