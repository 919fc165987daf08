// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use serboot_common::protocol::{
    unit_from_le, Command, Packet, MAX_PAYLOAD, MAX_READ_UNITS, UNIT_BYTES, UNIT_STEP,
};
use serboot_common::DeviceConfig;

use crate::transport::{read_response_len, Transport};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Most pages a single erase request can name.
const MAX_ERASE_PAGES: usize = u8::MAX as usize;

fn packet(command: Command, length: u8, address: u32, payload: &[u8]) -> Packet<'_> {
    Packet {
        command: command.code(),
        length,
        address,
        payload,
    }
}

/// Read and display the bootloader version.
pub fn version(transport: &mut Transport) -> Result<()> {
    let response = transport.request(&packet(Command::ReadVersion, 2, 0, &[]))?;
    if response.len() < 4 {
        bail!("Short version response ({} bytes)", response.len());
    }
    println!("serboot v{}.{}", response[3], response[2]);
    Ok(())
}

/// Read `count` units from `addr` into a byte vector, four bytes per unit.
fn read_units(transport: &mut Transport, addr: u32, count: usize) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(count * UNIT_BYTES);
    let mut address = addr;
    let mut remaining = count;

    while remaining > 0 {
        let n = remaining.min(MAX_READ_UNITS);
        let response = transport.request(&packet(Command::ReadFlash, n as u8, address, &[]))?;
        let expected = read_response_len(n * UNIT_BYTES);
        if response.len() != expected {
            bail!(
                "Read at {:#08x}: expected {} bytes, got {}",
                address,
                expected,
                response.len()
            );
        }
        data.extend_from_slice(&response[expected - n * UNIT_BYTES..]);
        address += n as u32 * UNIT_STEP;
        remaining -= n;
    }

    Ok(data)
}

/// Read program memory and print it or save it.
pub fn read(
    transport: &mut Transport,
    cfg: &DeviceConfig,
    addr: u32,
    count: usize,
    out: Option<&Path>,
) -> Result<()> {
    let data = read_units(transport, addr, count)?;

    if let Some(path) = out {
        fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Read {} units from {:#08x} into {}", count, addr, path.display());
        return Ok(());
    }

    let width = if cfg.erased_word > 0x00FF_FFFF { 8 } else { 6 };
    for (line, units) in data.chunks(UNIT_BYTES * 4).enumerate() {
        let line_addr = addr + (line * 4) as u32 * UNIT_STEP;
        print!("{:06x}:", line_addr);
        for unit in units.chunks_exact(UNIT_BYTES) {
            print!(" {:0width$x}", unit_from_le(unit), width = width);
        }
        println!();
    }
    Ok(())
}

/// Erase `pages` pages starting at `addr`.
pub fn erase(transport: &mut Transport, cfg: &DeviceConfig, addr: u32, pages: usize) -> Result<()> {
    print!("Erasing {} page(s) from {:#08x}... ", pages, addr);
    std::io::stdout().flush()?;
    erase_pages(transport, cfg, addr, pages)?;
    println!("OK");
    Ok(())
}

fn erase_pages(
    transport: &mut Transport,
    cfg: &DeviceConfig,
    addr: u32,
    pages: usize,
) -> Result<()> {
    let mut address = addr;
    let mut remaining = pages;

    while remaining > 0 {
        let n = remaining.min(MAX_ERASE_PAGES);
        transport.request_timeout(
            &packet(Command::EraseFlash, n as u8, address, &[]),
            60_000, // large erases take a while
        )?;
        address += n as u32 * cfg.page_span();
        remaining -= n;
    }
    Ok(())
}

/// Pad `image` with erased units up to a whole number of rows.
pub fn pad_to_rows(mut image: Vec<u8>, cfg: &DeviceConfig) -> Vec<u8> {
    let erased = cfg.erased_word.to_le_bytes();
    while image.is_empty() || image.len() % cfg.row_bytes != 0 {
        image.push(erased[image.len() % UNIT_BYTES]);
    }
    image
}

/// Rows that fit in one write request.
pub fn rows_per_packet(cfg: &DeviceConfig) -> usize {
    (MAX_PAYLOAD / cfg.row_bytes).max(1)
}

fn check_row_aligned(cfg: &DeviceConfig, addr: u32) -> Result<()> {
    if addr % cfg.row_span() != 0 {
        bail!(
            "Address {:#08x} is not aligned to a row ({:#x} addresses)",
            addr,
            cfg.row_span()
        );
    }
    Ok(())
}

/// The device acknowledges writes into protected regions but drops them, so
/// refuse such an image up front. `end` is exclusive.
fn check_writable(cfg: &DeviceConfig, start: u32, end: u32) -> Result<()> {
    if end > start && !cfg.permits_range(start, end - UNIT_STEP) {
        bail!(
            "Image [{:#08x}, {:#08x}) reaches a protected region of {}; place it with --addr",
            start,
            end,
            cfg.name
        );
    }
    Ok(())
}

/// Write a row-padded image, showing progress.
fn write_rows(
    transport: &mut Transport,
    cfg: &DeviceConfig,
    addr: u32,
    image: &[u8],
) -> Result<()> {
    let pb = ProgressBar::new(image.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let chunk_bytes = rows_per_packet(cfg) * cfg.row_bytes;
    let mut address = addr;
    let mut written = 0usize;
    for chunk in image.chunks(chunk_bytes) {
        let rows = chunk.len() / cfg.row_bytes;
        if let Err(e) = transport.request(&packet(Command::WriteFlash, rows as u8, address, chunk))
        {
            pb.abandon();
            return Err(e.context(format!("Write failed at {:#08x}", address)));
        }
        address += (chunk.len() / UNIT_BYTES) as u32 * UNIT_STEP;
        written += chunk.len();
        pb.set_position(written as u64);
    }

    pb.finish_with_message("Write complete");
    Ok(())
}

/// Write a raw image at `addr`.
pub fn write(
    transport: &mut Transport,
    cfg: &DeviceConfig,
    file: &Path,
    addr: u32,
) -> Result<()> {
    check_row_aligned(cfg, addr)?;
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = pad_to_rows(image, cfg);
    println!(
        "Writing {} ({} bytes) at {:#08x}",
        file.display(),
        image.len(),
        addr
    );
    write_rows(transport, cfg, addr, &image)
}

/// Commit the entry delay captured by the last write.
pub fn verify_ok(transport: &mut Transport) -> Result<()> {
    transport.request(&packet(Command::VerifyOk, 1, 0, &[]))?;
    println!("Entry delay committed.");
    Ok(())
}

/// Send RESET. The device leaves the bootloader without answering.
pub fn reset(transport: &mut Transport) -> Result<()> {
    transport.send(&packet(Command::ReadVersion, 0, 0, &[]))?;
    println!("Reset sent to {}.", transport.port_name());
    Ok(())
}

pub struct ProgramOptions {
    pub addr: Option<u32>,
    pub entry: Option<u32>,
    pub delay: u8,
    pub reset: bool,
}

/// Address of the row holding the user vector and delay slots.
pub fn reserved_row_addr(cfg: &DeviceConfig) -> u32 {
    cfg.user_prog_reset & !(cfg.row_span() - 1)
}

/// The reserved row: user entry and entry delay, everything else erased.
pub fn reserved_row(cfg: &DeviceConfig, entry: u32, delay: u8) -> Vec<u8> {
    let base = reserved_row_addr(cfg);
    let mut row = pad_to_rows(Vec::new(), cfg);
    for (slot, value) in [
        (cfg.user_prog_reset, entry),
        (cfg.delay_time_addr, u32::from(delay)),
    ] {
        let i = ((slot - base) / UNIT_STEP) as usize * UNIT_BYTES;
        row[i..i + UNIT_BYTES].copy_from_slice(&value.to_le_bytes());
    }
    row
}

/// Clear the bits a unit cannot hold (the phantom byte on 24-bit devices) so
/// images compare equal to what reads back.
pub fn normalize(data: &[u8], erased_word: u32) -> Vec<u8> {
    data.chunks_exact(UNIT_BYTES)
        .flat_map(|unit| (unit_from_le(unit) & erased_word).to_le_bytes())
        .collect()
}

/// First page address and page count covering `[start, end)`.
pub fn page_range(cfg: &DeviceConfig, start: u32, end: u32) -> (u32, usize) {
    let span = cfg.page_span();
    let first = start & !(span - 1);
    let pages = (end - first).div_ceil(span);
    (first, pages as usize)
}

/// Full update: erase, write the reserved row and the image, check it back
/// and commit the entry delay.
pub fn program(
    transport: &mut Transport,
    cfg: &DeviceConfig,
    file: &Path,
    opts: ProgramOptions,
) -> Result<()> {
    let row_addr = reserved_row_addr(cfg);
    let row_end = row_addr + cfg.row_span();
    let image_addr = opts.addr.unwrap_or(row_end);
    let entry = opts.entry.unwrap_or(image_addr);
    check_row_aligned(cfg, image_addr)?;

    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = pad_to_rows(image, cfg);
    let units = image.len() / UNIT_BYTES;
    let image_end = image_addr + units as u32 * UNIT_STEP;
    if image_addr < row_end && image_end > row_addr {
        bail!(
            "Image [{:#08x}, {:#08x}) overlaps the reserved row at {:#08x}",
            image_addr,
            image_end,
            row_addr
        );
    }
    check_writable(cfg, image_addr, image_end)?;
    let crc32 = CRC32.checksum(&normalize(&image, cfg.erased_word));

    println!(
        "Image:  {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        image.len(),
        crc32
    );
    println!("Target: {} at {:#08x}, entry {:#08x}", cfg.name, image_addr, entry);
    println!("Delay:  {} s", opts.delay);
    println!();

    let (first_page, pages) = page_range(cfg, row_addr.min(image_addr), row_end.max(image_end));
    erase(transport, cfg, first_page, pages)?;

    print!("Writing reserved row... ");
    std::io::stdout().flush()?;
    write_rows(transport, cfg, row_addr, &reserved_row(cfg, entry, opts.delay))?;
    println!("OK");

    write_rows(transport, cfg, image_addr, &image)?;

    print!("Verifying... ");
    std::io::stdout().flush()?;
    let readback = read_units(transport, image_addr, units)?;
    let actual = CRC32.checksum(&normalize(&readback, cfg.erased_word));
    if actual != crc32 {
        bail!(
            "CRC verification failed: expected 0x{:08x}, got 0x{:08x}",
            crc32,
            actual
        );
    }
    println!("OK");

    verify_ok(transport)?;

    println!();
    println!("Application programmed successfully!");
    if opts.reset {
        reset(transport)?;
    } else {
        println!(
            "Use 'serboot-upload --port {} reset' to start it.",
            transport.port_name()
        );
    }
    Ok(())
}
