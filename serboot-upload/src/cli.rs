// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serboot_common::DeviceConfig;

use crate::commands;
use crate::transport::{Transport, DEFAULT_BAUD};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "serboot-upload")]
#[command(about = "Host tool for the serboot serial bootloader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    pub port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// Target device family
    #[arg(short, long, value_enum, default_value_t = Device::Rp2040)]
    pub device: Device,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Device {
    #[value(name = "rp2040")]
    Rp2040,
    #[value(name = "pic24fj64gb004")]
    Pic24fj64gb004,
    #[value(name = "pic24f16ka102")]
    Pic24f16ka102,
}

impl Device {
    pub fn config(self) -> DeviceConfig {
        match self {
            Device::Rp2040 => DeviceConfig::RP2040,
            Device::Pic24fj64gb004 => DeviceConfig::PIC24FJ64GB004,
            Device::Pic24f16ka102 => DeviceConfig::PIC24F16KA102,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Read the bootloader version
    Version,

    /// Read program memory
    Read {
        /// Start address (program memory units, hex with 0x prefix)
        #[arg(value_parser = parse_addr)]
        addr: u32,

        /// Number of units to read
        count: usize,

        /// Write raw bytes to a file instead of printing a dump
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Erase pages (protected pages are skipped by the device)
    Erase {
        #[arg(value_parser = parse_addr)]
        addr: u32,

        /// Number of pages
        pages: usize,
    },

    /// Write a raw image, padded to whole rows
    Write {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_parser = parse_addr)]
        addr: u32,
    },

    /// Commit the entry delay captured by the last write
    VerifyOk,

    /// Leave the bootloader
    Reset,

    /// Erase, write the reserved row and the image, check it and commit
    Program {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Image address; defaults to the row after the reserved slots
        #[arg(short, long, value_parser = parse_addr)]
        addr: Option<u32>,

        /// Application entry; defaults to the image address
        #[arg(short, long, value_parser = parse_addr)]
        entry: Option<u32>,

        /// Seconds to wait for a host after reset (0 = never, 255 = forever)
        #[arg(long, default_value_t = 3)]
        delay: u8,

        /// Send RESET once done
        #[arg(long)]
        reset: bool,
    },
}

/// Parse a decimal or `0x`-prefixed hexadecimal address.
pub fn parse_addr(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    let addr = parsed.map_err(|e| format!("invalid address '{s}': {e}"))?;
    if addr > 0x00FF_FFFF {
        return Err(format!("address {addr:#x} exceeds 24 bits"));
    }
    Ok(addr)
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let cfg = cli.device.config();
    let mut transport = Transport::new(&cli.port, cli.baud)?;

    match cli.command {
        Commands::Version => commands::version(&mut transport),
        Commands::Read { addr, count, out } => {
            commands::read(&mut transport, &cfg, addr, count, out.as_deref())
        }
        Commands::Erase { addr, pages } => commands::erase(&mut transport, &cfg, addr, pages),
        Commands::Write { file, addr } => commands::write(&mut transport, &cfg, &file, addr),
        Commands::VerifyOk => commands::verify_ok(&mut transport),
        Commands::Reset => commands::reset(&mut transport),
        Commands::Program {
            file,
            addr,
            entry,
            delay,
            reset,
        } => commands::program(
            &mut transport,
            &cfg,
            &file,
            commands::ProgramOptions {
                addr,
                entry,
                delay,
                reset,
            },
        ),
    }
}
