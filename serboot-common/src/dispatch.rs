// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command routing.
//!
//! The request and its response share one buffer: the header stays in place
//! and read commands overwrite the payload area.

use crate::engine::Engine;
use crate::guard::Step;
use crate::link::Watchdog;
use crate::nvm::FlashController;
use crate::protocol::{Command, Packet, BUFFER_SIZE, HEADER_LEN};

/// What the session loop does after a request was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Send the leading `n` bytes of the buffer back.
    Respond(usize),
    /// RESET pseudo-command: stop serving and hand off.
    Reset,
}

pub struct Dispatcher<F, W = ()> {
    engine: Engine<F, W>,
    response_len: usize,
}

/// Key perturbation applied before a command that moves data toward flash.
fn entry_step(length: u8, command: Command, sign: i16) -> Step {
    let len = i16::from(length);
    let cmd = i16::from(command.code());
    Step::new(-sign * len, sign * cmd)
}

impl<F: FlashController, W: Watchdog> Dispatcher<F, W> {
    pub fn new(engine: Engine<F, W>) -> Self {
        Self {
            engine,
            response_len: 0,
        }
    }

    pub fn engine(&self) -> &Engine<F, W> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<F, W> {
        &mut self.engine
    }

    /// Length of the last response; reused for commands that set none.
    pub fn response_len(&self) -> usize {
        self.response_len
    }

    /// Handle the `len`-byte request in `buf` and leave the response there.
    pub fn dispatch(&mut self, buf: &mut [u8; BUFFER_SIZE], len: usize) -> Dispatch {
        let len = len.min(BUFFER_SIZE);
        let Some(packet) = Packet::parse(&buf[..len]) else {
            return Dispatch::Respond(self.response_len);
        };
        if packet.is_reset() {
            return Dispatch::Reset;
        }
        let (code, length, address) = (packet.command, packet.length, packet.address);
        debug!(
            "cmd {=u8:#x} len {=u8} addr {=u32:#x}",
            code,
            length,
            address
        );

        self.engine.guard_mut().fold_address(address);
        let features = self.engine.config().features;
        let payload = HEADER_LEN..len;

        let response = match Command::try_from(code) {
            Ok(Command::ReadVersion) => {
                let version = self.engine.config().version;
                buf[2] = version.minor;
                buf[3] = version.major;
                Some(4)
            }
            Ok(Command::ReadFlash) => {
                Some(HEADER_LEN + self.engine.read(length, address, &mut buf[HEADER_LEN..]))
            }
            Ok(Command::WriteFlash) => {
                self.engine
                    .guard_mut()
                    .step(entry_step(length, Command::WriteFlash, 1));
                self.engine.write(length, address, &buf[payload]);
                Some(1)
            }
            Ok(Command::EraseFlash) => {
                self.engine
                    .guard_mut()
                    .step(entry_step(length, Command::EraseFlash, -1));
                self.engine.erase(length, address);
                Some(1)
            }
            Ok(Command::ReadEeprom) if features.has_eeprom => Some(
                HEADER_LEN + self.engine.read_eeprom(length, address, &mut buf[HEADER_LEN..]),
            ),
            Ok(Command::WriteEeprom) if features.has_eeprom => {
                self.engine
                    .guard_mut()
                    .step(entry_step(length, Command::WriteEeprom, 1));
                self.engine.write_eeprom(length, address, &buf[payload]);
                Some(1)
            }
            Ok(Command::ReadConfig) if features.has_config_bits => Some(
                HEADER_LEN + self.engine.read_config(length, address, &mut buf[HEADER_LEN..]),
            ),
            Ok(Command::WriteConfig) if features.has_config_bits => {
                self.engine
                    .guard_mut()
                    .step(entry_step(length, Command::WriteConfig, 1));
                self.engine.write_config(length, address, &buf[payload]);
                Some(1)
            }
            Ok(Command::VerifyOk) => {
                self.engine
                    .guard_mut()
                    .step(entry_step(1, Command::VerifyOk, 1));
                self.engine.commit_timeout(address);
                Some(1)
            }
            _ => {
                warn!("unsupported command {=u8:#x}", code);
                None
            }
        };

        if let Some(n) = response {
            self.response_len = n;
        }
        Dispatch::Respond(self.response_len)
    }
}
