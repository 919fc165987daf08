// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host tool for the serboot serial bootloader.
//!
//! Usage:
//!   serboot-upload --port /dev/ttyUSB0 version
//!   serboot-upload --port /dev/ttyUSB0 program app.bin --delay 3
//!   serboot-upload --port /dev/ttyUSB0 --device pic24fj64gb004 read 0x0 64
//!   serboot-upload --port /dev/ttyUSB0 reset

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
