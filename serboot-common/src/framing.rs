// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! STX/ETX/DLE packet framing.
//!
//! Wire form: `STX STX <escaped body> <escaped checksum> ETX`. Any body or
//! checksum byte equal to STX, ETX or DLE is preceded by DLE. The checksum is
//! the two's complement of the 8-bit sum of the logical body bytes, so a good
//! frame sums to zero including its checksum.

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;

use crate::protocol::{BUFFER_SIZE, DLE, ETX, STX};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    #[error("no start sequence found")]
    NoStart,
    #[error("checksum mismatch")]
    Checksum,
    #[error("frame exceeds the receive buffer")]
    Overflow,
    #[error("empty frame")]
    Empty,
    #[error("input ended inside a frame")]
    Incomplete,
}

/// True for bytes that must be escaped inside a frame.
pub fn is_control(byte: u8) -> bool {
    byte == STX || byte == ETX || byte == DLE
}

/// Two's complement of the mod-256 sum of `body`.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// Stream the framed form of `body` into `emit`, one wire byte at a time.
pub fn encode_with<F: FnMut(u8)>(body: &[u8], mut emit: F) {
    emit(STX);
    emit(STX);
    for &byte in body.iter().chain(core::iter::once(&checksum(body))) {
        if is_control(byte) {
            emit(DLE);
        }
        emit(byte);
    }
    emit(ETX);
}

#[cfg(feature = "std")]
/// Frame `body` into a Vec (for std).
pub fn encode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() * 2 + 4);
    encode_with(body, |b| out.push(b));
    out
}

#[cfg(feature = "std")]
/// Strictly decode the first frame in `wire` (for std).
///
/// Unlike the firmware receive loop this reports why a frame was rejected.
/// `decode(&encode(body))` gives `body` back for non-empty bodies only: an
/// empty body frames as `STX STX 00 ETX` and decodes as [`FrameError::Empty`].
pub fn decode(wire: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut decoder = FrameDecoder::new();
    let mut started = false;
    let mut done = false;
    for &byte in wire {
        if decoder.feed(byte)?.is_some() {
            done = true;
            break;
        }
        started |= !decoder.is_hunting();
    }
    match (done, started) {
        (true, _) => Ok(decoder.frame().to_vec()),
        (false, true) => Err(FrameError::Incomplete),
        (false, false) => Err(FrameError::NoStart),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the first STX.
    Hunting,
    /// One STX seen; the next byte must be STX too.
    Started,
    Receiving,
    /// DLE seen; the next byte is literal.
    Escaped,
}

/// Incremental receive-side decoder.
///
/// Every error drops the partial frame and returns to hunting for a new
/// start sequence, so a caller that ignores errors gets silent resync.
pub struct FrameDecoder {
    buf: HeaplessVec<u8, BUFFER_SIZE>,
    sum: u8,
    state: DecodeState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buf: HeaplessVec::new(),
            sum: 0,
            state: DecodeState::Hunting,
        }
    }

    pub fn is_hunting(&self) -> bool {
        self.state == DecodeState::Hunting
    }

    /// Treat the first STX as already received (it was eaten by autobaud).
    pub fn assume_start(&mut self) {
        self.state = DecodeState::Started;
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.sum = 0;
        self.state = DecodeState::Hunting;
    }

    /// Feed one wire byte.
    ///
    /// Returns `Ok(Some(len))` when a good frame completed; its `len` logical
    /// bytes (checksum stripped) are then available from [`frame`].
    ///
    /// [`frame`]: FrameDecoder::frame
    pub fn feed(&mut self, byte: u8) -> Result<Option<usize>, FrameError> {
        match self.state {
            DecodeState::Hunting => {
                if byte == STX {
                    self.state = DecodeState::Started;
                }
                Ok(None)
            }
            DecodeState::Started => {
                if byte == STX {
                    self.restart();
                    self.state = DecodeState::Receiving;
                } else {
                    self.state = DecodeState::Hunting;
                }
                Ok(None)
            }
            DecodeState::Receiving => match byte {
                STX => {
                    self.restart();
                    Ok(None)
                }
                ETX => self.finish(),
                DLE => {
                    self.state = DecodeState::Escaped;
                    Ok(None)
                }
                _ => self.accumulate(byte),
            },
            DecodeState::Escaped => {
                self.state = DecodeState::Receiving;
                self.accumulate(byte)
            }
        }
    }

    /// Logical bytes of the last completed frame, checksum excluded.
    pub fn frame(&self) -> &[u8] {
        let len = self.buf.len().saturating_sub(1);
        &self.buf[..len]
    }

    fn restart(&mut self) {
        self.buf.clear();
        self.sum = 0;
    }

    fn accumulate(&mut self, byte: u8) -> Result<Option<usize>, FrameError> {
        if self.buf.push(byte).is_err() {
            self.reset();
            return Err(FrameError::Overflow);
        }
        self.sum = self.sum.wrapping_add(byte);
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<usize>, FrameError> {
        self.state = DecodeState::Hunting;
        if self.buf.len() <= 1 {
            self.buf.clear();
            return Err(FrameError::Empty);
        }
        if self.sum != 0 {
            self.buf.clear();
            return Err(FrameError::Checksum);
        }
        Ok(Some(self.buf.len() - 1))
    }
}
