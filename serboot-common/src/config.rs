// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device geometry, reserved slots and protection policy.
//!
//! A `DeviceConfig` replaces per-device build switches: it is a plain value
//! handed to the engine at construction. All addresses are program-memory
//! unit addresses (two address steps per storage unit).

use crate::protocol::{MAX_PAYLOAD, UNIT_BYTES, UNIT_STEP};

/// Protection scheme a region belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protection {
    None,
    BootloaderCode,
    ResetVector,
    ConfigWord,
    InterruptVectorTable,
}

/// Closed address range `[start, end]` with its protection tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryRegion {
    pub start: u32,
    pub end: u32,
    pub tag: Protection,
}

impl MemoryRegion {
    pub const fn new(start: u32, end: u32, tag: Protection) -> Self {
        Self { start, end, tag }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.end
    }

    /// True if any address of `[start, end]` falls inside this region.
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        start <= self.end && end >= self.start
    }

    fn guards(&self) -> bool {
        self.tag != Protection::None
    }
}

/// NVM controller operation codes passed through to `FlashController`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NvmOpcodes {
    pub page_erase: u16,
    pub row_write: u16,
    /// Single-unit program; `None` on devices that only commit whole rows.
    pub word_write: Option<u16>,
    pub ee_word_write: u16,
    pub config_write: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Features {
    /// Gate every commit behind the control-flow key pair.
    pub runaway_protect: bool,
    /// Rewrite the bootloader reset vector after erasing the first page even
    /// without a bootloader-code region.
    pub reset_save: bool,
    pub autobaud: bool,
    pub has_eeprom: bool,
    pub has_config_bits: bool,
    /// Configuration words live in the last flash units (`config_words.1`
    /// gets bit 15 forced low on write).
    pub flash_config_words: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("row size {row} does not divide page size {page}")]
    RowNotInPage { row: usize, page: usize },
    #[error("page size {0} is not a power of two")]
    PageSpanNotPowerOfTwo(usize),
    #[error("row of {0} bytes does not fit in one packet")]
    RowTooLarge(usize),
    #[error("reset vector slot lies outside the first page")]
    ResetVectorOutsideFirstPage,
    #[error("reserved slot {0:#08x} lies inside a protected region")]
    ReservedSlotProtected(u32),
    #[error("device has config bits but no config range")]
    ConfigWordsMissing,
}

/// Geometry and policy for one device family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: &'static str,
    /// Transport bytes committed by one row write.
    pub row_bytes: usize,
    /// Transport bytes removed by one page erase.
    pub page_bytes: usize,
    /// Value an erased storage unit reads back as.
    pub erased_word: u32,
    /// Reserved slot holding the user application's reset vector (2 units).
    pub user_prog_reset: u32,
    /// Reserved slot holding the entry delay (low byte meaningful).
    pub delay_time_addr: u32,
    /// Bootloader entry point, also the fallback when no user vector exists.
    pub boot_addr_low: u32,
    /// Units written at addresses 0 and 2 so reset lands in the bootloader.
    pub boot_vector: [u32; 2],
    /// Implemented configuration range `(config_start, config_end)`.
    pub config_words: Option<(u32, u32)>,
    pub protected: &'static [MemoryRegion],
    pub opcodes: NvmOpcodes,
    pub features: Features,
    pub version: FirmwareVersion,
}

/// The two-instruction `GOTO boot_addr` sequence placed at address 0.
pub const fn goto_vector(boot_addr: u32) -> [u32; 2] {
    [0x0004_0000 | (boot_addr & 0xFFFF), (boot_addr & 0x00FF_0000) >> 16]
}

const VERSION: FirmwareVersion = FirmwareVersion { major: 1, minor: 2 };

const PIC24_REGIONS: &[MemoryRegion] =
    &[MemoryRegion::new(0x400, 0x9FF, Protection::BootloaderCode)];

/// Last-page lock for flash-config devices. Config words share the last page.
pub const PIC24FJ64GB004_CONFIG_PAGE: MemoryRegion =
    MemoryRegion::new(0xABF8 & 0xFF_FC00, 0xABFE, Protection::ConfigWord);

// Unit address `a` maps to flash byte offset `2 * a`: the bootloader owns the
// first 64K of XIP flash.
const RP2040_REGIONS: &[MemoryRegion] =
    &[MemoryRegion::new(0x0000, 0x7FFF, Protection::BootloaderCode)];

impl DeviceConfig {
    pub const PIC24FJ64GB004: DeviceConfig = DeviceConfig {
        name: "PIC24FJ64GB004",
        row_bytes: 256,
        page_bytes: 2048,
        erased_word: 0x00FF_FFFF,
        user_prog_reset: 0x100,
        delay_time_addr: 0x102,
        boot_addr_low: 0x400,
        boot_vector: goto_vector(0x400),
        config_words: Some((0xABF8, 0xABFE)),
        protected: PIC24_REGIONS,
        opcodes: NvmOpcodes {
            page_erase: 0x4042,
            row_write: 0x4001,
            word_write: Some(0x4003),
            ee_word_write: 0x4004,
            config_write: 0x4004,
        },
        features: Features {
            runaway_protect: true,
            reset_save: false,
            autobaud: true,
            has_eeprom: false,
            has_config_bits: false,
            flash_config_words: true,
        },
        version: VERSION,
    };

    pub const PIC24F16KA102: DeviceConfig = DeviceConfig {
        name: "PIC24F16KA102",
        row_bytes: 128,
        page_bytes: 128,
        erased_word: 0x00FF_FFFF,
        user_prog_reset: 0x100,
        delay_time_addr: 0x102,
        boot_addr_low: 0x400,
        boot_vector: goto_vector(0x400),
        config_words: Some((0xF8_0000, 0xF8_0010)),
        protected: PIC24_REGIONS,
        opcodes: NvmOpcodes {
            page_erase: 0x4058,
            row_write: 0x4004,
            word_write: None,
            ee_word_write: 0x4004,
            config_write: 0x4004,
        },
        features: Features {
            runaway_protect: true,
            reset_save: false,
            autobaud: false,
            has_eeprom: true,
            has_config_bits: true,
            flash_config_words: false,
        },
        version: VERSION,
    };

    /// RP2040 over XIP flash: 256-byte program rows, 4K erase sectors.
    pub const RP2040: DeviceConfig = DeviceConfig {
        name: "RP2040",
        row_bytes: 256,
        page_bytes: 4096,
        erased_word: 0xFFFF_FFFF,
        user_prog_reset: 0x8000,
        delay_time_addr: 0x8002,
        boot_addr_low: 0x0000,
        // Boot2 and the bootloader vector table sit inside the protected
        // region, so these are never staged.
        boot_vector: [0xFFFF_FFFF, 0xFFFF_FFFF],
        config_words: None,
        protected: RP2040_REGIONS,
        opcodes: NvmOpcodes {
            page_erase: 0x20,
            row_write: 0x02,
            word_write: None,
            ee_word_write: 0x02,
            config_write: 0x02,
        },
        features: Features {
            runaway_protect: true,
            reset_save: false,
            autobaud: false,
            has_eeprom: false,
            has_config_bits: false,
            flash_config_words: false,
        },
        version: VERSION,
    };

    /// Address span of one row.
    pub fn row_span(&self) -> u32 {
        (self.row_bytes / UNIT_BYTES) as u32 * UNIT_STEP
    }

    /// Address span of one erase page.
    pub fn page_span(&self) -> u32 {
        (self.page_bytes / UNIT_BYTES) as u32 * UNIT_STEP
    }

    pub fn row_units(&self) -> usize {
        self.row_bytes / UNIT_BYTES
    }

    /// True if no enabled protection covers `addr`.
    pub fn permits(&self, addr: u32) -> bool {
        !self.protected.iter().any(|r| r.guards() && r.contains(addr))
    }

    /// True if no enabled protection overlaps `[start, end]`.
    pub fn permits_range(&self, start: u32, end: u32) -> bool {
        !self.protected.iter().any(|r| r.guards() && r.overlaps(start, end))
    }

    fn has_scheme(&self, tag: Protection) -> bool {
        self.protected.iter().any(|r| r.tag == tag)
    }

    pub fn boot_protected(&self) -> bool {
        self.has_scheme(Protection::BootloaderCode)
    }

    pub fn vector_protected(&self) -> bool {
        self.has_scheme(Protection::InterruptVectorTable)
    }

    /// Whether erasing the first page must rewrite the bootloader vector.
    pub fn resynthesizes_reset_vector(&self) -> bool {
        !self.vector_protected() && (self.boot_protected() || self.features.reset_save)
    }

    /// Check the geometry relations the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_bytes.is_power_of_two() {
            return Err(ConfigError::PageSpanNotPowerOfTwo(self.page_bytes));
        }
        if self.row_bytes == 0 || self.page_bytes % self.row_bytes != 0 {
            return Err(ConfigError::RowNotInPage {
                row: self.row_bytes,
                page: self.page_bytes,
            });
        }
        if self.row_bytes > MAX_PAYLOAD {
            return Err(ConfigError::RowTooLarge(self.row_bytes));
        }
        // Resynthesis rewrites units 0 and 2 after erasing the first page
        // only; both must belong to it.
        if self.resynthesizes_reset_vector() && self.page_span() <= UNIT_STEP {
            return Err(ConfigError::ResetVectorOutsideFirstPage);
        }
        for slot in [self.user_prog_reset, self.delay_time_addr] {
            if !self.permits(slot) {
                return Err(ConfigError::ReservedSlotProtected(slot));
            }
        }
        if self.features.has_config_bits && self.config_words.is_none() {
            return Err(ConfigError::ConfigWordsMissing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert_eq!(DeviceConfig::PIC24FJ64GB004.validate(), Ok(()));
        assert_eq!(DeviceConfig::PIC24F16KA102.validate(), Ok(()));
        assert_eq!(DeviceConfig::RP2040.validate(), Ok(()));
    }

    #[test]
    fn test_spans() {
        let cfg = DeviceConfig::PIC24FJ64GB004;
        assert_eq!(cfg.row_span(), 0x80);
        assert_eq!(cfg.page_span(), 0x400);
        assert_eq!(cfg.row_units(), 64);
    }

    #[test]
    fn test_goto_vector() {
        assert_eq!(goto_vector(0x400), [0x0004_0400, 0x0000_0000]);
        assert_eq!(goto_vector(0x01_2345), [0x0004_2345, 0x0000_0001]);
    }

    #[test]
    fn test_region_policy() {
        let cfg = DeviceConfig::PIC24FJ64GB004;
        assert!(cfg.permits(0x3FE));
        assert!(!cfg.permits(0x400));
        assert!(!cfg.permits(0x9FF));
        assert!(cfg.permits(0xA00));
        assert!(cfg.permits(0xABFE));
        assert!(cfg.permits_range(0x0, 0x3FF));
        assert!(!cfg.permits_range(0x0, 0x400));
        assert!(cfg.resynthesizes_reset_vector());
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let cfg = DeviceConfig {
            page_bytes: 2000,
            ..DeviceConfig::PIC24FJ64GB004
        };
        assert_eq!(cfg.validate(), Err(ConfigError::PageSpanNotPowerOfTwo(2000)));

        let cfg = DeviceConfig {
            row_bytes: 384,
            ..DeviceConfig::PIC24FJ64GB004
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::RowNotInPage { .. })));

        let cfg = DeviceConfig {
            row_bytes: 512,
            page_bytes: 512,
            ..DeviceConfig::PIC24FJ64GB004
        };
        assert_eq!(cfg.validate(), Err(ConfigError::RowTooLarge(512)));

        let cfg = DeviceConfig {
            row_bytes: 4,
            page_bytes: 4,
            ..DeviceConfig::PIC24FJ64GB004
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ResetVectorOutsideFirstPage));
    }

    #[test]
    fn test_validate_rejects_protected_slot() {
        let cfg = DeviceConfig {
            user_prog_reset: 0x500,
            ..DeviceConfig::PIC24FJ64GB004
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ReservedSlotProtected(0x500)));
    }
}
