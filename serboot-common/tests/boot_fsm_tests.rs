// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for the entry decision FSM.

use serboot_common::boot_fsm::{
    decide_entry, delay_from_word, resolve_user_reset, EntryDecision, SessionEnd, DELAY_FOREVER,
};

// =============================================================================
// decide_entry tests
// =============================================================================

#[test]
fn test_zero_delay_after_hardware_reset_hands_off() {
    assert_eq!(decide_entry(0, true), EntryDecision::HandOff);
}

#[test]
fn test_zero_delay_after_software_reset_enters_forever() {
    assert_eq!(decide_entry(0, false), EntryDecision::EnterForever);
}

#[test]
fn test_forever_delay_ignores_reset_cause() {
    assert_eq!(decide_entry(DELAY_FOREVER, true), EntryDecision::EnterForever);
    assert_eq!(decide_entry(DELAY_FOREVER, false), EntryDecision::EnterForever);
}

#[test]
fn test_other_delays_arm_timer() {
    for seconds in [1u8, 2, 10, 0xFE] {
        assert_eq!(decide_entry(seconds, true), EntryDecision::Timed { seconds });
        assert_eq!(decide_entry(seconds, false), EntryDecision::Timed { seconds });
    }
}

// =============================================================================
// Reserved slot decoding
// =============================================================================

#[test]
fn test_delay_uses_low_byte_only() {
    assert_eq!(delay_from_word(0x00FF_FF05), 5);
    assert_eq!(delay_from_word(0x00FF_FFFF), DELAY_FOREVER);
}

#[test]
fn test_erased_user_reset_falls_back_to_bootloader() {
    assert_eq!(resolve_user_reset(0x00FF_FFFF, 0x400), 0x400);
    assert_eq!(resolve_user_reset(0xFFFF_FFFF, 0x400), 0x400);
}

#[test]
fn test_programmed_user_reset_is_kept() {
    assert_eq!(resolve_user_reset(0x0000_0C00, 0x400), 0xC00);
    assert_eq!(resolve_user_reset(0x0001_0200, 0x400), 0x1_0200);
}

#[test]
fn test_session_end_entry() {
    assert_eq!(SessionEnd::Bypassed { entry: 1 }.entry(), 1);
    assert_eq!(SessionEnd::TimedOut { entry: 2 }.entry(), 2);
    assert_eq!(SessionEnd::Reset { entry: 3 }.entry(), 3);
}
