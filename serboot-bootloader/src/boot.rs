// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Reset cause, entry timer and the jump into the application.

use crate::flash::{FLASH_BASE, FLASH_SIZE};
use rp2040_hal as hal;
use serboot_common::{DeviceConfig, EntryTimer, ResetProbe, SessionEnd, Watchdog};

/// Applications request a bootloader session by writing this magic to
/// `RAM_REQUEST_FLAG_ADDR` and resetting.
pub const RAM_REQUEST_FLAG_ADDR: u32 = 0x2003_BFF0;
pub const RAM_REQUEST_MAGIC: u32 = 0x0FDA_7E00;

const RAM_START: u32 = 0x2000_0000;
const RAM_END: u32 = 0x2004_2000;

/// Reset cause sampled once at power-up.
///
/// The RAM flag survives a software reset; holding GP2 low counts as a
/// request too so a board with a broken application can still be updated.
pub struct RequestProbe {
    requested: bool,
}

impl RequestProbe {
    /// Read and clear the RAM flag.
    pub fn capture(gp2_is_low: bool) -> Self {
        let ram_flag = unsafe { (RAM_REQUEST_FLAG_ADDR as *const u32).read_volatile() };
        unsafe {
            (RAM_REQUEST_FLAG_ADDR as *mut u32).write_volatile(0);
        }
        Self {
            requested: gp2_is_low || ram_flag == RAM_REQUEST_MAGIC,
        }
    }
}

impl ResetProbe for RequestProbe {
    fn hardware_reset(&self) -> bool {
        !self.requested
    }
}

/// Entry delay on the 1 MHz system timer.
pub struct SystemEntryTimer {
    timer: hal::Timer,
    deadline: Option<u64>,
}

impl SystemEntryTimer {
    pub fn new(timer: hal::Timer) -> Self {
        Self {
            timer,
            deadline: None,
        }
    }

    fn now(&self) -> u64 {
        self.timer.get_counter().ticks()
    }
}

impl EntryTimer for SystemEntryTimer {
    fn arm(&mut self, seconds: u8) {
        self.deadline = Some(self.now() + u64::from(seconds) * 1_000_000);
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }

    fn expired(&mut self) -> bool {
        self.deadline.is_some_and(|deadline| self.now() >= deadline)
    }
}

/// Hardware watchdog, fed from the byte loops and per flash row or page.
/// Stopped before hand-off.
pub struct SystemWatchdog(pub hal::Watchdog);

impl Watchdog for SystemWatchdog {
    fn feed(&mut self) {
        self.0.feed();
    }
}

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    fn is_valid(&self) -> bool {
        (RAM_START..=RAM_END).contains(&self.initial_sp)
            && (FLASH_BASE..FLASH_BASE + FLASH_SIZE).contains(&(self.reset_vector & !1))
    }
}

/// Leave the bootloader for the address carried by `end`.
///
/// The entry is a program memory unit address; the application's vector
/// table lives at flash offset `2 * entry`. The bootloader's own entry, or a
/// table that does not look runnable, restarts the chip instead.
pub fn hand_off(end: SessionEnd, cfg: &DeviceConfig) -> ! {
    let entry = end.entry();
    let table = FLASH_BASE + (entry & !(cfg.row_span() - 1)) * 2;
    let vt = unsafe { VectorTable::read_from(table) };

    if entry == cfg.boot_addr_low || !vt.is_valid() {
        defmt::println!("No application at {=u32:#x}, restarting", entry);
        cortex_m::peripheral::SCB::sys_reset();
    }

    defmt::println!("Jumping to application at 0x{:08x}", table);
    unsafe {
        prepare_for_application_handoff();
        relocate_vector_table(table);
        jump_to_application(vt.initial_sp, vt.reset_vector)
    }
}

/// Mask and clear every NVIC interrupt so the application starts clean.
unsafe fn prepare_for_application_handoff() {
    cortex_m::interrupt::disable();

    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(table: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(table);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_application(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
