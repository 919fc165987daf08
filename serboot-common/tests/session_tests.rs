// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end session tests over a scripted serial link.

use std::collections::VecDeque;

use serboot_common::framing::{encode_with, FrameDecoder};
use serboot_common::protocol::u24_to_le;
use serboot_common::{
    DeviceConfig, EntryTimer, RamFlash, ResetProbe, SerialLink, Session, SessionEnd, STX,
};

const FJ: DeviceConfig = DeviceConfig::PIC24FJ64GB004;
const KA: DeviceConfig = DeviceConfig::PIC24F16KA102;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct ScriptedLink {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    enabled: Option<bool>,
    disabled: bool,
    autobaud_runs: usize,
}

impl ScriptedLink {
    fn with_rx(frames: &[Vec<u8>]) -> Self {
        Self {
            rx: frames.iter().flatten().copied().collect(),
            ..Self::default()
        }
    }

    /// Decode every response frame sent so far.
    fn responses(&self) -> Vec<Vec<u8>> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for &b in &self.tx {
            if let Ok(Some(_)) = decoder.feed(b) {
                out.push(decoder.frame().to_vec());
            }
        }
        out
    }
}

impl SerialLink for ScriptedLink {
    fn enable(&mut self, autobaud: bool) {
        self.enabled = Some(autobaud);
    }

    fn start_autobaud(&mut self) {
        self.autobaud_runs += 1;
    }

    // The training byte is consumed whatever it is; only STX trains.
    fn autobaud_complete(&mut self) -> bool {
        matches!(self.rx.pop_front(), Some(STX))
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.tx.push(byte);
    }

    fn flush(&mut self) {}

    fn disable(&mut self) {
        self.disabled = true;
    }
}

/// Expires as soon as it is polled while armed. Unarmed, it panics after a
/// poll budget so a stuck session fails instead of hanging.
#[derive(Default)]
struct FakeTimer {
    armed: Option<u8>,
    disarmed: bool,
    idle_polls: u32,
}

impl EntryTimer for FakeTimer {
    fn arm(&mut self, seconds: u8) {
        self.armed = Some(seconds);
    }

    fn disarm(&mut self) {
        if self.armed.is_some() {
            self.disarmed = true;
        }
        self.armed = None;
    }

    fn expired(&mut self) -> bool {
        if self.armed.is_some() {
            return true;
        }
        self.idle_polls += 1;
        assert!(self.idle_polls < 10_000, "session stalled with no input");
        false
    }
}

struct Probe(bool);

impl ResetProbe for Probe {
    fn hardware_reset(&self) -> bool {
        self.0
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn frame(cmd: u8, len: u8, addr: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![cmd, len];
    body.extend_from_slice(&u24_to_le(addr));
    body.extend_from_slice(payload);
    let mut wire = Vec::new();
    encode_with(&body, |b| wire.push(b));
    wire
}

fn reset_frame() -> Vec<u8> {
    frame(0x00, 0x00, 0, &[])
}

type TestSession = Session<RamFlash<0x800>, ScriptedLink, FakeTimer, ()>;

fn session(cfg: DeviceConfig, delay: u32, user_reset: u32, frames: &[Vec<u8>]) -> TestSession {
    let mut flash = RamFlash::new(&cfg);
    flash.load(cfg.user_prog_reset, &[user_reset]);
    flash.load(cfg.delay_time_addr, &[delay]);
    Session::new(
        cfg,
        flash,
        ScriptedLink::with_rx(frames),
        FakeTimer::default(),
        (),
    )
}

// =============================================================================
// Entry decisions
// =============================================================================

#[test]
fn test_disabled_bootloader_bypasses_on_hardware_reset() {
    let mut s = session(KA, 0x00, 0xC00, &[]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Bypassed { entry: 0xC00 });
    assert_eq!(s.transport().link().enabled, None);
}

#[test]
fn test_disabled_bootloader_serves_after_software_reset() {
    let mut s = session(KA, 0x00, 0xC00, &[reset_frame()]);
    assert_eq!(s.run(&Probe(false)), SessionEnd::Reset { entry: 0xC00 });
    assert_eq!(s.transport().timer().armed, None);
}

#[test]
fn test_no_host_times_out_to_user_code() {
    let mut s = session(KA, 0x03, 0xC00, &[]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::TimedOut { entry: 0xC00 });
    assert_eq!(s.transport().timer().armed, Some(3));
    assert!(s.transport().link().tx.is_empty());
}

#[test]
fn test_erased_user_vector_falls_back_to_bootloader() {
    let mut s = session(KA, 0x02, KA.erased_word, &[]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::TimedOut { entry: KA.boot_addr_low });
}

// =============================================================================
// Command loop
// =============================================================================

#[test]
fn test_version_then_reset() {
    let mut s = session(KA, 0xFF, 0xC00, &[frame(0x00, 0x01, 0, &[]), reset_frame()]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0xC00 });

    let link = s.transport().link();
    assert_eq!(link.responses(), vec![vec![0x00, 0x01, 0x02, 0x01]]);
    assert!(link.disabled);
    assert_eq!(link.enabled, Some(false));
}

#[test]
fn test_host_activity_disarms_timer() {
    let mut s = session(KA, 0x02, 0xC00, &[frame(0x00, 0x01, 0, &[]), reset_frame()]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0xC00 });
    assert!(s.transport().timer().disarmed);
    assert_eq!(s.transport().link().responses().len(), 1);
}

#[test]
fn test_corrupted_frame_gets_no_response() {
    let mut bad = frame(0x00, 0x01, 0, &[]);
    let n = bad.len();
    bad[n - 2] = bad[n - 2].wrapping_add(1);
    let frames = [bad, frame(0x00, 0x01, 0, &[]), reset_frame()];

    let mut s = session(KA, 0xFF, 0xC00, &frames);
    s.run(&Probe(true));
    assert_eq!(s.transport().link().responses().len(), 1);
}

#[test]
fn test_short_frame_gets_no_response() {
    let mut short = Vec::new();
    encode_with(&[0x00, 0x01, 0x00], |b| short.push(b));
    let mut s = session(KA, 0xFF, 0xC00, &[short, reset_frame()]);
    s.run(&Probe(true));
    assert!(s.transport().link().responses().is_empty());
}

#[test]
fn test_two_byte_reset_is_ignored() {
    // RESET needs a full header; `[0x00, 0x00]` alone is dropped.
    let mut bare = Vec::new();
    encode_with(&[0x00, 0x00], |b| bare.push(b));
    let version = frame(0x00, 0x01, 0, &[]);
    let mut s = session(KA, 0xFF, 0xC00, &[bare, version, reset_frame()]);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0xC00 });
    assert_eq!(s.transport().link().responses(), vec![vec![0x00, 0x01, 0x02, 0x01]]);
}

#[test]
fn test_reset_jumps_to_captured_vector() {
    let mut row = vec![0u8; KA.row_bytes];
    row[..4].copy_from_slice(&0x0004_1234u32.to_le_bytes());
    row[4..8].copy_from_slice(&0x0000_0000u32.to_le_bytes());
    for unit in row[8..].chunks_exact_mut(4) {
        unit.copy_from_slice(&KA.erased_word.to_le_bytes());
    }
    let frames = [frame(0x02, 0x01, 0x0, &row), reset_frame()];

    let mut s = session(KA, 0xFF, 0xC00, &frames);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0x1234 });
    assert_eq!(s.transport().link().responses(), vec![vec![0x02]]);
    // The bootloader's own GOTO stays at address 0.
    assert_eq!(s.engine().flash().word(0x0), 0x0004_0400);
}

#[test]
fn test_autobaud_consumes_first_stx_of_every_frame() {
    let frames = [frame(0x00, 0x01, 0, &[]), frame(0x00, 0x01, 0, &[]), reset_frame()];
    let mut s = session(FJ, 0xFF, 0xC00, &frames);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0xC00 });

    let link = s.transport().link();
    assert_eq!(link.enabled, Some(true));
    assert_eq!(link.autobaud_runs, 3);
    assert_eq!(link.responses().len(), 2);
}

#[test]
fn test_full_programming_flow() {
    let cfg = KA;
    let mut reserved = vec![0u8; cfg.row_bytes];
    for unit in reserved.chunks_exact_mut(4) {
        unit.copy_from_slice(&cfg.erased_word.to_le_bytes());
    }
    reserved[..4].copy_from_slice(&0x0000_0C00u32.to_le_bytes());
    reserved[4..8].copy_from_slice(&0x0000_0005u32.to_le_bytes());

    let frames = [
        frame(0x03, 0x01, 0x100, &[]),
        frame(0x02, 0x01, 0x100, &reserved),
        frame(0x08, 0x01, 0x0, &[]),
        reset_frame(),
    ];
    let mut s = session(cfg, 0xFF, cfg.erased_word, &frames);
    assert_eq!(s.run(&Probe(true)), SessionEnd::Reset { entry: 0xC00 });

    let flash = s.engine().flash();
    assert_eq!(flash.word(cfg.user_prog_reset), 0xC00);
    assert_eq!(flash.word(cfg.delay_time_addr), 5);
    assert_eq!(s.transport().link().responses().len(), 3);
}
