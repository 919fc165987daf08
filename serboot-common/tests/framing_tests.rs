// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for STX/ETX/DLE framing.

use serboot_common::framing::{checksum, encode_with, is_control, FrameDecoder, FrameError};
use serboot_common::{BUFFER_SIZE, DLE, ETX, MAX_PACKET_SIZE, STX};

fn encode(body: &[u8]) -> Vec<u8> {
    let mut wire = Vec::new();
    encode_with(body, |b| wire.push(b));
    wire
}

/// Feed `wire` and collect every completed frame and every error.
fn decode_all(wire: &[u8]) -> (Vec<Vec<u8>>, Vec<FrameError>) {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    for &b in wire {
        match decoder.feed(b) {
            Ok(Some(_)) => frames.push(decoder.frame().to_vec()),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (frames, errors)
}

// =============================================================================
// Encoding
// =============================================================================

#[test]
fn test_encode_plain_body() {
    let wire = encode(&[0x01, 0x02]);
    assert_eq!(wire, vec![STX, STX, 0x01, 0x02, 0xFD, ETX]);
}

#[test]
fn test_encode_escapes_exactly_control_bytes() {
    let body = [0x00, STX, 0x10, ETX, 0x20, DLE, 0xFF];
    let wire = encode(&body);
    let inner = &wire[2..wire.len() - 1];

    let escapes = inner.iter().filter(|&&b| b == DLE).count();
    let control_in_body = body.iter().filter(|&&b| is_control(b)).count();
    let control_checksum = usize::from(is_control(checksum(&body)));
    // Each escaped DLE shows up twice (escape + literal).
    assert_eq!(escapes, control_in_body + control_checksum + 1);
    assert_eq!(inner.len(), body.len() + 1 + control_in_body + control_checksum);
}

#[test]
fn test_checksum_byte_is_escaped_when_control() {
    // 0xAB + checksum 0x55 == 0 mod 256.
    let wire = encode(&[0xAB]);
    assert_eq!(wire, vec![STX, STX, 0xAB, DLE, STX, ETX]);
}

#[test]
fn test_checksum_property() {
    let body: Vec<u8> = (0..=255u8).collect();
    let total = body
        .iter()
        .fold(checksum(&body), |acc, &b| acc.wrapping_add(b));
    assert_eq!(total, 0);
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_roundtrip_with_control_bytes() {
    let body = [0x02, 0x01, STX, ETX, DLE, 0x00, 0x55, 0x05, 0x04];
    let (frames, errors) = decode_all(&encode(&body));
    assert!(errors.is_empty());
    assert_eq!(frames, vec![body.to_vec()]);
}

#[test]
fn test_roundtrip_largest_packet() {
    let body: Vec<u8> = (0..MAX_PACKET_SIZE).map(|i| i as u8).collect();
    let (frames, errors) = decode_all(&encode(&body));
    assert!(errors.is_empty());
    assert_eq!(frames, vec![body]);
}

#[test]
fn test_corrupted_checksum_is_dropped_then_resyncs() {
    let mut wire = encode(&[0x00, 0x01, 0x00, 0x00, 0x00]);
    let n = wire.len();
    wire[n - 2] = wire[n - 2].wrapping_add(1);
    wire.extend(encode(&[0x00, 0x02, 0x00, 0x00, 0x00]));

    let (frames, errors) = decode_all(&wire);
    assert_eq!(errors, vec![FrameError::Checksum]);
    assert_eq!(frames, vec![vec![0x00, 0x02, 0x00, 0x00, 0x00]]);
}

#[test]
fn test_noise_before_start_is_skipped() {
    let mut wire = vec![0x00, 0x13, ETX, DLE, 0x99];
    wire.extend(encode(&[0x08, 0x01, 0x00, 0x00, 0x00]));
    let (frames, _) = decode_all(&wire);
    assert_eq!(frames.len(), 1);
}

#[test]
fn test_empty_frame_is_discarded() {
    let (frames, errors) = decode_all(&[STX, STX, ETX]);
    assert!(frames.is_empty());
    assert_eq!(errors, vec![FrameError::Empty]);
}

#[test]
fn test_overlong_frame_is_dropped() {
    let mut wire = vec![STX, STX];
    wire.extend(std::iter::repeat(0x11).take(BUFFER_SIZE + 10));
    wire.push(ETX);
    let (frames, errors) = decode_all(&wire);
    assert!(frames.is_empty());
    assert_eq!(errors, vec![FrameError::Overflow]);
}

#[test]
fn test_escaped_byte_counts_toward_checksum() {
    // Body [DLE] escaped on the wire; checksum is over the logical byte.
    let wire = encode(&[DLE]);
    assert_eq!(wire, vec![STX, STX, DLE, DLE, 0xFB, ETX]);
    let (frames, _) = decode_all(&wire);
    assert_eq!(frames, vec![vec![DLE]]);
}
