// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and logic for the serboot serial bootloader.
//!
//! Everything the bootloader does that is not register glue lives here, so it
//! can be exercised on the host:
//! - `framing`: STX/ETX/DLE packet framing with a two's-complement checksum
//! - `guard`: the control-flow key pair that gates every flash commit
//! - `engine`: protected read/write/erase of program memory
//! - `dispatch`: command routing and response sizing
//! - `boot_fsm` / `session`: entry decision, timeout and the command loop
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: `Vec`-based helpers for host tools
//! - `defmt` feature: `defmt::Format` derives and engine/session logging

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

mod fmt;

pub mod boot_fsm;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod framing;
pub mod guard;
pub mod link;
pub mod nvm;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use boot_fsm::{EntryDecision, SessionEnd};
pub use config::{ConfigError, DeviceConfig, MemoryRegion, Protection};
pub use dispatch::{Dispatch, Dispatcher};
pub use engine::Engine;
pub use framing::{FrameDecoder, FrameError};
pub use guard::FlowGuard;
pub use link::{EntryTimer, ResetProbe, SerialLink, Watchdog};
pub use nvm::{FlashController, RamFlash};
pub use protocol::{Command, Packet, BUFFER_SIZE, DLE, ETX, HEADER_LEN, MAX_PACKET_SIZE, STX};
pub use session::Session;
pub use transport::{Expired, Transport};
