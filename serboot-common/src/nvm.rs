// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash controller interface and an in-memory model of it.

use heapless::Vec;

use crate::config::DeviceConfig;
use crate::protocol::{addr_join, UNIT_STEP};

/// Primitive access to program memory, addressed by `(page, offset)` where
/// `page` is bits 16..23 of the unit address and `offset` bits 0..15.
///
/// Implementations perform the hardware sequence only; the engine decides
/// what may be committed and when.
pub trait FlashController {
    fn read_word(&self, page: u16, offset: u16) -> u32;

    /// Load one storage unit into the write latches.
    fn stage_write(&mut self, page: u16, offset: u16, hi: u16, lo: u16);

    /// Program every staged unit. Blocks until the controller is idle.
    fn commit(&mut self, opcode: u16);

    /// Erase the page containing `(page, offset)`.
    fn erase_page(&mut self, page: u16, offset: u16, opcode: u16);
}

/// One `commit` call seen by [`RamFlash`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub opcode: u16,
    /// Lowest and highest staged address, `None` if nothing was staged.
    pub span: Option<(u32, u32)>,
    pub units: usize,
}

/// One `erase_page` call seen by [`RamFlash`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EraseRecord {
    pub opcode: u16,
    /// Page-aligned start address.
    pub start: u32,
}

const LATCHES: usize = 128;
const SPILL: usize = 64;
const LOG: usize = 128;

/// RAM-backed flash for host tests.
///
/// Units `0..WORDS` are backed by an array and model real flash: erase sets
/// them to the erased value and programming can only clear bits. Units
/// outside the array (EEPROM, configuration space) are kept in a small
/// overwrite-in-place map.
pub struct RamFlash<const WORDS: usize> {
    words: [u32; WORDS],
    spill: Vec<(u32, u32), SPILL>,
    latches: Vec<(u32, u32), LATCHES>,
    commits: Vec<CommitRecord, LOG>,
    erases: Vec<EraseRecord, LOG>,
    erased_word: u32,
    page_span: u32,
}

impl<const WORDS: usize> RamFlash<WORDS> {
    pub fn new(cfg: &DeviceConfig) -> Self {
        Self {
            words: [cfg.erased_word; WORDS],
            spill: Vec::new(),
            latches: Vec::new(),
            commits: Vec::new(),
            erases: Vec::new(),
            erased_word: cfg.erased_word,
            page_span: cfg.page_span(),
        }
    }

    /// Place `units` at `addr` directly, bypassing latches and logs.
    pub fn load(&mut self, addr: u32, units: &[u32]) {
        let mut a = addr;
        for &unit in units {
            self.store(a, unit & self.erased_word);
            a += UNIT_STEP;
        }
    }

    pub fn word(&self, addr: u32) -> u32 {
        match self.index(addr) {
            Some(i) => self.words[i],
            None => self
                .spill
                .iter()
                .find(|(a, _)| *a == addr)
                .map(|&(_, w)| w)
                .unwrap_or(self.erased_word),
        }
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    pub fn erases(&self) -> &[EraseRecord] {
        &self.erases
    }

    /// Units staged but not yet committed.
    pub fn pending(&self) -> usize {
        self.latches.len()
    }

    pub fn clear_log(&mut self) {
        self.commits.clear();
        self.erases.clear();
    }

    fn index(&self, addr: u32) -> Option<usize> {
        let i = (addr / UNIT_STEP) as usize;
        (i < WORDS).then_some(i)
    }

    fn store(&mut self, addr: u32, unit: u32) {
        match self.index(addr) {
            Some(i) => self.words[i] = unit,
            None => match self.spill.iter_mut().find(|(a, _)| *a == addr) {
                Some(slot) => slot.1 = unit,
                None => {
                    let _ = self.spill.push((addr, unit));
                }
            },
        }
    }
}

impl<const WORDS: usize> FlashController for RamFlash<WORDS> {
    fn read_word(&self, page: u16, offset: u16) -> u32 {
        self.word(addr_join(page, offset))
    }

    fn stage_write(&mut self, page: u16, offset: u16, hi: u16, lo: u16) {
        let addr = addr_join(page, offset);
        let unit = (u32::from(hi) << 16 | u32::from(lo)) & self.erased_word;
        match self.latches.iter_mut().find(|(a, _)| *a == addr) {
            Some(slot) => slot.1 = unit,
            None => {
                let _ = self.latches.push((addr, unit));
            }
        }
    }

    fn commit(&mut self, opcode: u16) {
        let latches = core::mem::take(&mut self.latches);
        let span = latches
            .iter()
            .map(|&(a, _)| a)
            .fold(None, |span: Option<(u32, u32)>, a| match span {
                Some((lo, hi)) => Some((lo.min(a), hi.max(a))),
                None => Some((a, a)),
            });
        for &(addr, unit) in latches.iter() {
            match self.index(addr) {
                Some(i) => self.words[i] &= unit,
                None => self.store(addr, unit),
            }
        }
        let _ = self.commits.push(CommitRecord {
            opcode,
            span,
            units: latches.len(),
        });
    }

    fn erase_page(&mut self, page: u16, offset: u16, opcode: u16) {
        let start = addr_join(page, offset) & !(self.page_span - 1);
        let mut addr = start;
        while addr < start + self.page_span {
            if let Some(i) = self.index(addr) {
                self.words[i] = self.erased_word;
            }
            addr += UNIT_STEP;
        }
        let _ = self.erases.push(EraseRecord { opcode, start });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: DeviceConfig = DeviceConfig::PIC24FJ64GB004;

    #[test]
    fn test_programming_only_clears_bits() {
        let mut flash = RamFlash::<0x800>::new(&CFG);
        flash.stage_write(0, 0x10, 0x00F0, 0xF00F);
        flash.commit(CFG.opcodes.row_write);
        flash.stage_write(0, 0x10, 0x00FF, 0x0FFF);
        flash.commit(CFG.opcodes.row_write);
        assert_eq!(flash.word(0x10), 0x00F0_000F);
        assert_eq!(flash.commits().len(), 2);
        assert_eq!(flash.commits()[0].span, Some((0x10, 0x10)));
    }

    #[test]
    fn test_phantom_byte_reads_zero() {
        let mut flash = RamFlash::<0x800>::new(&CFG);
        flash.stage_write(0, 0x20, 0xFF12, 0x3456);
        flash.commit(CFG.opcodes.row_write);
        assert_eq!(flash.word(0x20), 0x0012_3456);
    }

    #[test]
    fn test_erase_clears_whole_page() {
        let mut flash = RamFlash::<0x800>::new(&CFG);
        flash.load(0x400, &[0, 0]);
        flash.load(0x7FE, &[0]);
        flash.load(0x800, &[0]);
        flash.erase_page(0, 0x402, CFG.opcodes.page_erase);
        assert_eq!(flash.word(0x400), CFG.erased_word);
        assert_eq!(flash.word(0x7FE), CFG.erased_word);
        assert_eq!(flash.word(0x800), 0);
        assert_eq!(flash.erases()[0].start, 0x400);
    }

    #[test]
    fn test_unbacked_units_overwrite() {
        let mut flash = RamFlash::<0x800>::new(&CFG);
        assert_eq!(flash.word(0x7F_FE00), CFG.erased_word);
        flash.stage_write(0x7F, 0xFE00, 0, 0x1234);
        flash.commit(CFG.opcodes.ee_word_write);
        flash.stage_write(0x7F, 0xFE00, 0, 0xABCD);
        flash.commit(CFG.opcodes.ee_word_write);
        assert_eq!(flash.word(0x7F_FE00), 0xABCD);
    }
}
