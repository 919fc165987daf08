// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol types for bootloader <-> host communication.
//!
//! A request is `<CMD> <LEN> <ADDR_LO> <ADDR_MID> <ADDR_HI> [payload]`. The
//! response reuses the same buffer: the header is echoed and read commands
//! overwrite the payload area. Addresses are 24-bit program-memory word
//! addresses; one storage unit (instruction) spans two address steps and four
//! transport bytes.

// --- Communication control bytes ---

pub const STX: u8 = 0x55;
pub const ETX: u8 = 0x04;
pub const DLE: u8 = 0x05;

// --- Packet geometry ---

/// Largest logical packet (header + payload), excluding the checksum byte.
pub const MAX_PACKET_SIZE: usize = 261;
/// Shared receive/response buffer size.
pub const BUFFER_SIZE: usize = MAX_PACKET_SIZE + 1;
/// `cmd`, `len` and the three address bytes.
pub const HEADER_LEN: usize = 5;
/// Largest payload a request can carry.
pub const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - HEADER_LEN;

/// Transport bytes per program-memory storage unit (low, mid, high, phantom).
pub const UNIT_BYTES: usize = 4;
/// Address increment between consecutive storage units.
pub const UNIT_STEP: u32 = 2;
/// Program-memory addresses are 24 bits wide.
pub const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Most flash units a single read response can carry.
pub const MAX_READ_UNITS: usize = (BUFFER_SIZE - HEADER_LEN) / UNIT_BYTES;

// --- Commands ---

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    ReadVersion = 0x00,
    ReadFlash = 0x01,
    WriteFlash = 0x02,
    EraseFlash = 0x03,
    ReadEeprom = 0x04,
    WriteEeprom = 0x05,
    ReadConfig = 0x06,
    WriteConfig = 0x07,
    VerifyOk = 0x08,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0x00 => Command::ReadVersion,
            0x01 => Command::ReadFlash,
            0x02 => Command::WriteFlash,
            0x03 => Command::EraseFlash,
            0x04 => Command::ReadEeprom,
            0x05 => Command::WriteEeprom,
            0x06 => Command::ReadConfig,
            0x07 => Command::WriteConfig,
            0x08 => Command::VerifyOk,
            other => return Err(other),
        })
    }
}

// --- Packet ---

/// A decoded request. `length == 0` is the RESET pseudo-command whatever
/// the command byte says.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet<'a> {
    pub command: u8,
    pub length: u8,
    pub address: u32,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Split a decoded frame into header fields and payload.
    /// Returns `None` if the frame is shorter than the header.
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            command: frame[0],
            length: frame[1],
            address: u24_from_le(&frame[2..HEADER_LEN]),
            payload: &frame[HEADER_LEN..],
        })
    }

    pub fn is_reset(&self) -> bool {
        self.length == 0
    }

    /// Write the header into `out[..HEADER_LEN]`.
    pub fn write_header(&self, out: &mut [u8]) {
        out[0] = self.command;
        out[1] = self.length;
        out[2..HEADER_LEN].copy_from_slice(&u24_to_le(self.address));
    }

    #[cfg(feature = "std")]
    pub fn to_vec(&self) -> alloc::vec::Vec<u8> {
        let mut out = alloc::vec![0u8; HEADER_LEN];
        self.write_header(&mut out);
        out.extend_from_slice(self.payload);
        out
    }
}

// --- Byte/word accessors ---

/// Assemble a 24-bit little-endian address from three bytes.
pub fn u24_from_le(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

pub fn u24_to_le(addr: u32) -> [u8; 3] {
    let [lo, mid, hi, _] = addr.to_le_bytes();
    [lo, mid, hi]
}

/// Page selector (bits 16..23) of a program-memory address.
pub fn addr_page(addr: u32) -> u16 {
    ((addr & ADDR_MASK) >> 16) as u16
}

/// 16-bit offset within the selected page.
pub fn addr_offset(addr: u32) -> u16 {
    (addr & 0xFFFF) as u16
}

pub fn addr_join(page: u16, offset: u16) -> u32 {
    (u32::from(page) << 16 | u32::from(offset)) & ADDR_MASK
}

/// Next storage unit address, wrapping inside the 24-bit space.
pub fn next_unit(addr: u32) -> u32 {
    addr.wrapping_add(UNIT_STEP) & ADDR_MASK
}

/// Storage unit value from its four transport bytes.
pub fn unit_from_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Split a storage unit into the (high, low) halves the write latches take.
pub fn unit_halves(word: u32) -> (u16, u16) {
    ((word >> 16) as u16, word as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_accessors() {
        assert_eq!(addr_page(0x12_3456), 0x12);
        assert_eq!(addr_offset(0x12_3456), 0x3456);
        assert_eq!(addr_join(0x12, 0x3456), 0x12_3456);
        assert_eq!(u24_from_le(&[0x56, 0x34, 0x12]), 0x12_3456);
        assert_eq!(u24_to_le(0x12_3456), [0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_next_unit_wraps_24_bits() {
        assert_eq!(next_unit(0x100), 0x102);
        assert_eq!(next_unit(0xFF_FFFE), 0);
    }

    #[test]
    fn test_unit_halves() {
        assert_eq!(unit_halves(0x0012_3456), (0x0012, 0x3456));
        assert_eq!(unit_from_le(&[0x56, 0x34, 0x12, 0x00]), 0x0012_3456);
    }

    #[test]
    fn test_command_codes() {
        for code in 0u8..=8 {
            assert_eq!(Command::try_from(code).map(Command::code), Ok(code));
        }
        assert_eq!(Command::try_from(0x09), Err(0x09));
    }

    #[test]
    fn test_packet_parse_and_header() {
        let frame = [0x02, 0x01, 0x00, 0x0A, 0x00, 0xAA, 0xBB];
        let packet = Packet::parse(&frame).unwrap();
        assert_eq!(packet.command, 0x02);
        assert_eq!(packet.length, 1);
        assert_eq!(packet.address, 0x0A00);
        assert_eq!(packet.payload, &[0xAA, 0xBB]);
        assert!(!packet.is_reset());

        let mut out = [0u8; HEADER_LEN];
        packet.write_header(&mut out);
        assert_eq!(out, frame[..HEADER_LEN]);
    }

    #[test]
    fn test_packet_too_short() {
        assert!(Packet::parse(&[0x00, 0x00, 0x00]).is_none());
    }
}
