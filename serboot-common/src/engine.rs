// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Protected flash-programming engine.
//!
//! Streams host data into program memory row by row while keeping the
//! bootloader, its reset vector and the reserved slots intact. Every commit
//! goes through [`FlowGuard::attempt`] with test keys recomputed from the
//! operation's own arguments.
//!
//! The dispatcher applies the per-command key perturbation before calling in
//! here; the expected-key formulas below assume it.

use crate::config::DeviceConfig;
use crate::guard::{FlowGuard, ERASE_COMMIT, ITEM, UNIT, WRITE_COMMIT};
use crate::link::Watchdog;
use crate::nvm::FlashController;
use crate::protocol::{
    addr_offset, addr_page, next_unit, unit_from_le, unit_halves, Command, ADDR_MASK,
    UNIT_BYTES, UNIT_STEP,
};

/// Bit 15 of the last flash configuration word must be programmed as 0.
const CONFIG_WORD_MASK: u32 = 0x0000_7FFF;

/// Flash programming state. `watchdog` is fed once per row, page or item.
pub struct Engine<F, W = ()> {
    cfg: DeviceConfig,
    flash: F,
    guard: FlowGuard,
    watchdog: W,
    user_reset: u32,
    user_reset_captured: bool,
    user_timeout: u32,
}

impl<F: FlashController> Engine<F> {
    pub fn new(cfg: DeviceConfig, flash: F) -> Self {
        Self::with_watchdog(cfg, flash, ())
    }
}

impl<F: FlashController, W: Watchdog> Engine<F, W> {
    pub fn with_watchdog(cfg: DeviceConfig, flash: F, watchdog: W) -> Self {
        Self {
            guard: FlowGuard::new(cfg.features.runaway_protect),
            user_reset: cfg.boot_addr_low,
            user_reset_captured: false,
            // Committing an erased value leaves the delay slot untouched.
            user_timeout: cfg.erased_word,
            cfg,
            flash,
            watchdog,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.cfg
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn guard(&self) -> &FlowGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut FlowGuard {
        &mut self.guard
    }

    pub fn watchdog_mut(&mut self) -> &mut W {
        &mut self.watchdog
    }

    /// Where the bootloader hands off to.
    pub fn user_reset(&self) -> u32 {
        self.user_reset
    }

    pub fn set_user_reset(&mut self, entry: u32) {
        self.user_reset = entry;
    }

    pub fn user_reset_captured(&self) -> bool {
        self.user_reset_captured
    }

    /// Entry delay captured from the last write to the delay slot.
    pub fn user_timeout(&self) -> u32 {
        self.user_timeout
    }

    pub fn read_unit(&self, addr: u32) -> u32 {
        self.flash.read_word(addr_page(addr), addr_offset(addr))
    }

    /// Read `length` units starting at `address` into `out`, four bytes per
    /// unit. Stops early when `out` is full; returns the bytes produced.
    pub fn read(&self, length: u8, address: u32, out: &mut [u8]) -> usize {
        let units = usize::from(length).min(out.len() / UNIT_BYTES);
        let mut addr = address & ADDR_MASK;
        for chunk in out.chunks_exact_mut(UNIT_BYTES).take(units) {
            chunk.copy_from_slice(&self.read_unit(addr).to_le_bytes());
            addr = next_unit(addr);
        }
        units * UNIT_BYTES
    }

    /// Program `length` rows from `data` starting at `address`.
    ///
    /// Rows overlapping a protected region are neither staged nor committed.
    /// Only whole rows present in `data` are written.
    pub fn write(&mut self, length: u8, address: u32, data: &[u8]) {
        let row_bytes = self.cfg.row_bytes;
        let total = (usize::from(length) * row_bytes).min(data.len() / row_bytes * row_bytes);
        let (origin1, origin2) = FlowGuard::origin(address);
        let mut addr = address & ADDR_MASK;
        let mut row_ok = false;

        for (n, chunk) in data[..total].chunks_exact(UNIT_BYTES).enumerate() {
            if (n * UNIT_BYTES) % row_bytes == 0 {
                self.watchdog.feed();
                let row_end = addr.saturating_add(self.cfg.row_span() - UNIT_STEP);
                row_ok = self.cfg.permits_range(addr, row_end);
            }
            let unit = self.intercept(addr, unit_from_le(chunk));
            if row_ok {
                self.stage(addr, unit);
            }
            self.guard.step(UNIT);

            let written = (n + 1) * UNIT_BYTES;
            if written % row_bytes == 0 {
                self.guard.expect(
                    origin1
                        .wrapping_sub(u16::from(length))
                        .wrapping_add(written as u16)
                        .wrapping_sub(5),
                    origin2
                        .wrapping_add(u16::from(Command::WriteFlash.code()))
                        .wrapping_sub(written as u16)
                        .wrapping_add(6),
                );
                if row_ok {
                    self.commit_guarded(self.cfg.opcodes.row_write);
                } else {
                    debug!("protected row skipped at {=u32:#x}", addr);
                }
            }
            addr = next_unit(addr);
        }
    }

    /// Erase `length` pages starting at `address`, skipping any page that
    /// overlaps a protected region.
    pub fn erase(&mut self, length: u8, address: u32) {
        let page_span = self.cfg.page_span();
        let (origin1, origin2) = FlowGuard::origin(address);
        let len = u16::from(length);
        let cmd = u16::from(Command::EraseFlash.code());
        let mut addr = address & ADDR_MASK;

        for i in 1..=len {
            self.watchdog.feed();
            self.guard.step(ITEM);
            if !self.cfg.permits_range(addr, addr.saturating_add(page_span - UNIT_STEP)) {
                debug!("protected page skipped at {=u32:#x}", addr);
                addr = (addr + page_span) & ADDR_MASK;
                continue;
            }

            let base1 = origin1.wrapping_add(len).wrapping_add(i);
            let base2 = origin2.wrapping_sub(cmd).wrapping_sub(i);
            self.guard.expect(base1.wrapping_add(7), base2.wrapping_add(3));
            let (page, offset) = (addr_page(addr), addr_offset(addr));
            let opcode = self.cfg.opcodes.page_erase;
            let flash = &mut self.flash;
            self.guard.attempt(ERASE_COMMIT, || flash.erase_page(page, offset, opcode));
            self.guard.step(ERASE_COMMIT.undo());

            if self.cfg.resynthesizes_reset_vector() && addr < page_span {
                self.guard.expect(base1, base2);
                self.restore_boot_vector();
            }
            addr = (addr + page_span) & ADDR_MASK;
        }
    }

    /// Write the captured entry delay to its reserved slot.
    ///
    /// `address` is the request address the dispatcher folded into the keys.
    pub fn commit_timeout(&mut self, address: u32) {
        let (origin1, origin2) = FlowGuard::origin(address);
        let delay_addr = self.cfg.delay_time_addr;
        let opcode = match self.cfg.opcodes.word_write {
            Some(op) => {
                self.stage(delay_addr, self.user_timeout);
                op
            }
            None => {
                // Row-only devices rewrite the whole row; all-ones padding
                // leaves the neighbours as they are.
                let mut addr = delay_addr & !(self.cfg.row_span() - 1) & ADDR_MASK;
                for _ in 0..self.cfg.row_units() {
                    let unit = if addr == delay_addr {
                        self.user_timeout
                    } else {
                        self.cfg.erased_word
                    };
                    self.stage(addr, unit);
                    addr = next_unit(addr);
                }
                self.cfg.opcodes.row_write
            }
        };
        self.guard.expect(
            origin1.wrapping_sub(1).wrapping_sub(5),
            origin2
                .wrapping_add(u16::from(Command::VerifyOk.code()))
                .wrapping_add(6),
        );
        self.commit_guarded(opcode);
    }

    /// Read `length` EEPROM words, two bytes each.
    pub fn read_eeprom(&self, length: u8, address: u32, out: &mut [u8]) -> usize {
        let words = usize::from(length).min(out.len() / 2);
        let mut addr = address & ADDR_MASK;
        for chunk in out.chunks_exact_mut(2).take(words) {
            let word = self.read_unit(addr) as u16;
            chunk.copy_from_slice(&word.to_le_bytes());
            addr = next_unit(addr);
        }
        words * 2
    }

    pub fn write_eeprom(&mut self, length: u8, address: u32, data: &[u8]) {
        let (origin1, origin2) = FlowGuard::origin(address);
        let cmd = u16::from(Command::WriteEeprom.code());
        let mut addr = address & ADDR_MASK;
        for (n, chunk) in data.chunks_exact(2).take(usize::from(length)).enumerate() {
            let n = n as u16 + 1;
            self.watchdog.feed();
            let word = u16::from_le_bytes([chunk[0], chunk[1]]);
            self.flash.stage_write(addr_page(addr), addr_offset(addr), 0, word);
            self.guard.step(ITEM);
            self.guard.expect(
                origin1
                    .wrapping_sub(u16::from(length))
                    .wrapping_add(n)
                    .wrapping_sub(5),
                origin2.wrapping_add(cmd).wrapping_sub(n).wrapping_add(6),
            );
            self.commit_guarded(self.cfg.opcodes.ee_word_write);
            addr = next_unit(addr);
        }
    }

    /// Read `length` configuration bytes (low byte of each unit).
    pub fn read_config(&self, length: u8, address: u32, out: &mut [u8]) -> usize {
        let count = usize::from(length).min(out.len());
        let mut addr = address & ADDR_MASK;
        for byte in out.iter_mut().take(count) {
            *byte = self.read_unit(addr) as u8;
            addr = next_unit(addr);
        }
        count
    }

    /// Write configuration bytes; addresses outside the implemented
    /// configuration range are passed over.
    pub fn write_config(&mut self, length: u8, address: u32, data: &[u8]) {
        let Some((start, end)) = self.cfg.config_words else {
            return;
        };
        let (origin1, origin2) = FlowGuard::origin(address);
        let cmd = u16::from(Command::WriteConfig.code());
        let mut addr = address & ADDR_MASK;
        for (n, &byte) in data.iter().take(usize::from(length)).enumerate() {
            let n = n as u16 + 1;
            self.watchdog.feed();
            self.guard.step(ITEM);
            if (start..=end).contains(&addr) {
                self.flash.stage_write(addr_page(addr), addr_offset(addr), 0, u16::from(byte));
                self.guard.expect(
                    origin1
                        .wrapping_sub(u16::from(length))
                        .wrapping_add(n)
                        .wrapping_sub(5),
                    origin2.wrapping_add(cmd).wrapping_sub(n).wrapping_add(6),
                );
                self.commit_guarded(self.cfg.opcodes.config_write);
            } else {
                warn!("config write outside range at {=u32:#x}", addr);
            }
            addr = next_unit(addr);
        }
    }

    /// Apply the reserved-location intercepts to one streamed unit.
    fn intercept(&mut self, addr: u32, mut unit: u32) -> u32 {
        if self.cfg.features.flash_config_words {
            if let Some((_, config_end)) = self.cfg.config_words {
                if addr == config_end {
                    unit &= CONFIG_WORD_MASK;
                }
            }
        }

        let boot_protected = self.cfg.boot_protected();
        if addr == 0 {
            self.user_reset = unit & 0xFFFF;
            self.user_reset_captured = true;
            if boot_protected {
                unit = self.cfg.boot_vector[0];
            }
        }
        if addr == UNIT_STEP {
            self.user_reset = (self.user_reset & 0xFFFF) | (unit & 0xFF) << 16;
            self.user_reset_captured = true;
            if boot_protected {
                unit = self.cfg.boot_vector[1];
            }
        }

        if addr == self.cfg.user_prog_reset {
            if self.user_reset_captured {
                unit = self.user_reset;
            } else {
                self.user_reset = unit;
            }
        }
        if addr == self.cfg.delay_time_addr {
            self.user_timeout = unit;
            unit = self.cfg.erased_word;
        }
        unit
    }

    /// Put the bootloader's own vector back at addresses 0 and 2 after the
    /// first page was erased. The caller has loaded the expected keys.
    fn restore_boot_vector(&mut self) {
        let expected = self.guard.expected();
        let [low, high] = self.cfg.boot_vector;

        self.stage(0, low);
        if let Some(op) = self.cfg.opcodes.word_write {
            self.commit_primed(op);
        }

        self.stage(UNIT_STEP, high);
        self.guard.expect(expected.0, expected.1);
        match self.cfg.opcodes.word_write {
            Some(op) => {
                self.commit_primed(op);
            }
            None => {
                let mut addr = 2 * UNIT_STEP;
                while addr < self.cfg.row_span() {
                    self.stage(addr, self.cfg.erased_word);
                    addr += UNIT_STEP;
                }
                self.commit_primed(self.cfg.opcodes.row_write);
            }
        }
    }

    fn stage(&mut self, addr: u32, unit: u32) {
        let (hi, lo) = unit_halves(unit);
        self.flash.stage_write(addr_page(addr), addr_offset(addr), hi, lo);
    }

    /// Commit through the guard, then undo the primitive's key step.
    fn commit_guarded(&mut self, opcode: u16) -> bool {
        let flash = &mut self.flash;
        let done = self.guard.attempt(WRITE_COMMIT, || flash.commit(opcode));
        self.guard.step(WRITE_COMMIT.undo());
        done
    }

    /// Pre-compensate the primitive's key step, then commit through the guard.
    fn commit_primed(&mut self, opcode: u16) -> bool {
        self.guard.step(WRITE_COMMIT.undo());
        let flash = &mut self.flash;
        self.guard.attempt(WRITE_COMMIT, || flash.commit(opcode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvm::RamFlash;

    fn engine(cfg: DeviceConfig) -> Engine<RamFlash<0x1000>> {
        let cfg = DeviceConfig {
            features: crate::config::Features {
                runaway_protect: false,
                ..cfg.features
            },
            ..cfg
        };
        Engine::new(cfg, RamFlash::new(&cfg))
    }

    #[test]
    fn test_read_clamps_to_output() {
        let mut eng = engine(DeviceConfig::PIC24FJ64GB004);
        eng.flash_mut().load(0x1000, &[0x0012_3456, 0x0000_0001]);
        let mut out = [0u8; 6];
        assert_eq!(eng.read(2, 0x1000, &mut out), 4);
        assert_eq!(&out[..4], &[0x56, 0x34, 0x12, 0x00]);
    }

    #[test]
    fn test_partial_row_is_not_written() {
        let mut eng = engine(DeviceConfig::PIC24FJ64GB004);
        eng.write(1, 0x1000, &[0u8; 128]);
        assert!(eng.flash().commits().is_empty());
        assert_eq!(eng.flash().pending(), 0);
    }

    #[test]
    fn test_delay_slot_is_captured_and_left_erased() {
        let cfg = DeviceConfig::PIC24FJ64GB004;
        let mut eng = engine(cfg);
        let mut row = [0xFFu8; 256];
        // 0x102 is the second unit of the row at 0x100.
        row[4..8].copy_from_slice(&0x0000_0005u32.to_le_bytes());
        eng.write(1, 0x100, &row);
        assert_eq!(eng.user_timeout(), 5);
        assert_eq!(eng.flash().word(0x102), cfg.erased_word);
    }

    #[test]
    fn test_config_end_bit15_forced_low() {
        let cfg = DeviceConfig::PIC24FJ64GB004;
        let mut eng = engine(cfg);
        // Last row of flash, 0xAB80..=0xABFE, ends with the config words.
        eng.write(1, 0xAB80, &[0xFFu8; 256]);
        assert_eq!(eng.flash().word(0xABFC), cfg.erased_word);
        assert_eq!(eng.flash().word(0xABFE), 0x0000_7FFF);
    }
}
