// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash controller over the RP2040 ROM routines.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! We use `#[link_section = ".data"]` to place critical functions in RAM,
//! and pre-resolve all ROM function pointers at init time.
//!
//! Program memory unit address `a` maps to flash offset `2 * a`: one unit is
//! four bytes, as on the wire.

use serboot_common::protocol::{addr_join, UNIT_BYTES};
use serboot_common::FlashController;

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024;
pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: usize = 256;

const ERASED: u32 = 0xFFFF_FFFF;

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// ROM function pointers, resolved once at init from the ROM table.
/// Stored in static RAM so RAM-resident functions can call them without
/// accessing flash-based code.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// Look up a ROM function by its two-character tag.
/// ROM table pointer at 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Initialize ROM flash function pointers. Must be called once before any flash operations.
/// This performs ROM table lookups which require XIP to be active.
pub fn init() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE =
            core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
}

/// Erase one sector at the given flash-relative offset with SPI command `cmd`.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_erase(offset: u32, size: u32, cmd: u8) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, FLASH_SECTOR_SIZE, cmd);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Program flash at the given flash-relative offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_program(offset: u32, data: *const u8, len: usize) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Flash offset of a unit address, `None` past the end of the chip.
fn unit_offset(page: u16, offset: u16) -> Option<u32> {
    let byte = addr_join(page, offset) * 2;
    (byte + UNIT_BYTES as u32 <= FLASH_SIZE).then_some(byte)
}

/// Staged-row flash controller.
///
/// `stage_write` fills a 256-byte page buffer (pre-set to erased); `commit`
/// programs it in one ROM call. Staging into a different page drops what was
/// staged before, which the engine never does between commits.
pub struct Rp2040Flash {
    row: [u8; FLASH_PAGE_SIZE],
    row_base: Option<u32>,
}

impl Rp2040Flash {
    /// # Safety
    /// `flash::init()` must have been called first.
    pub unsafe fn new() -> Self {
        Self {
            row: [0xFF; FLASH_PAGE_SIZE],
            row_base: None,
        }
    }
}

impl FlashController for Rp2040Flash {
    fn read_word(&self, page: u16, offset: u16) -> u32 {
        match unit_offset(page, offset) {
            Some(byte) => unsafe { ((FLASH_BASE + byte) as *const u32).read_volatile() },
            None => ERASED,
        }
    }

    fn stage_write(&mut self, page: u16, offset: u16, hi: u16, lo: u16) {
        let Some(byte) = unit_offset(page, offset) else {
            return;
        };
        let base = byte & !(FLASH_PAGE_SIZE as u32 - 1);
        if self.row_base != Some(base) {
            self.row = [0xFF; FLASH_PAGE_SIZE];
            self.row_base = Some(base);
        }
        let i = (byte - base) as usize;
        let unit = u32::from(hi) << 16 | u32::from(lo);
        self.row[i..i + UNIT_BYTES].copy_from_slice(&unit.to_le_bytes());
    }

    fn commit(&mut self, opcode: u16) {
        let Some(base) = self.row_base.take() else {
            return;
        };
        defmt::debug!("program {=u32:#x} (op {=u16:#x})", base, opcode);
        unsafe { flash_program(base, self.row.as_ptr(), FLASH_PAGE_SIZE) };
        self.row = [0xFF; FLASH_PAGE_SIZE];
    }

    fn erase_page(&mut self, page: u16, offset: u16, opcode: u16) {
        let Some(byte) = unit_offset(page, offset) else {
            return;
        };
        let base = byte & !(FLASH_SECTOR_SIZE - 1);
        defmt::debug!("erase {=u32:#x}", base);
        unsafe { flash_erase(base, FLASH_SECTOR_SIZE, opcode as u8) };
    }
}
