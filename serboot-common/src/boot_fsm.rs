// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Entry decision FSM - pure logic without hardware dependencies.
//!
//! Runs once per power-up on the values read from the reserved slots and the
//! reset cause, before any peripheral is touched.

/// Delay value meaning "stay in the bootloader until told otherwise".
pub const DELAY_FOREVER: u8 = 0xFF;

/// What to do right after power-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryDecision {
    /// Bootloader disabled and this was a genuine reset: run the application.
    HandOff,
    /// Serve commands with no timeout.
    EnterForever,
    /// Serve commands, hand off after `seconds` without a host.
    Timed { seconds: u8 },
}

/// How a session ended, with the address to continue at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEnd {
    /// Entry was skipped entirely.
    Bypassed { entry: u32 },
    /// No host showed up before the entry delay ran out.
    TimedOut { entry: u32 },
    /// The host sent RESET.
    Reset { entry: u32 },
}

impl SessionEnd {
    pub fn entry(&self) -> u32 {
        match *self {
            SessionEnd::Bypassed { entry }
            | SessionEnd::TimedOut { entry }
            | SessionEnd::Reset { entry } => entry,
        }
    }
}

/// The meaningful byte of the stored delay unit.
pub fn delay_from_word(word: u32) -> u8 {
    word as u8
}

/// Decide entry from the stored delay and the reset cause.
///
/// A zero delay disables the bootloader on a hardware reset; an application
/// that wants an update resets by software and gets an untimed session.
pub fn decide_entry(delay: u8, hardware_reset: bool) -> EntryDecision {
    match delay {
        0 if hardware_reset => EntryDecision::HandOff,
        0 | DELAY_FOREVER => EntryDecision::EnterForever,
        seconds => EntryDecision::Timed { seconds },
    }
}

/// Application entry from the stored user vector, or `fallback` when the
/// slot is erased so the device cannot lock itself out.
pub fn resolve_user_reset(stored: u32, fallback: u32) -> u32 {
    if stored & 0x00FF_FFFF == 0x00FF_FFFF {
        fallback
    } else {
        stored
    }
}
