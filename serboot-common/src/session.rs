// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The bootloader session: entry decision, then the command loop until the
//! host resets or the entry delay runs out.

use crate::boot_fsm::{decide_entry, delay_from_word, resolve_user_reset, EntryDecision, SessionEnd};
use crate::config::DeviceConfig;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::engine::Engine;
use crate::guard::RECEIVED;
use crate::link::{EntryTimer, ResetProbe, SerialLink, Watchdog};
use crate::nvm::FlashController;
use crate::protocol::BUFFER_SIZE;
use crate::transport::Transport;

/// All state of one power-up, owned by `main`.
pub struct Session<F, L, T, W> {
    dispatcher: Dispatcher<F, W>,
    transport: Transport<L, T>,
    buf: [u8; BUFFER_SIZE],
}

impl<F, L, T, W> Session<F, L, T, W>
where
    F: FlashController,
    L: SerialLink,
    T: EntryTimer,
    W: Watchdog,
{
    pub fn new(cfg: DeviceConfig, flash: F, link: L, timer: T, watchdog: W) -> Self {
        Self {
            dispatcher: Dispatcher::new(Engine::with_watchdog(cfg, flash, watchdog)),
            transport: Transport::new(link, timer),
            buf: [0; BUFFER_SIZE],
        }
    }

    pub fn engine(&self) -> &Engine<F, W> {
        self.dispatcher.engine()
    }

    pub fn engine_mut(&mut self) -> &mut Engine<F, W> {
        self.dispatcher.engine_mut()
    }

    pub fn transport(&self) -> &Transport<L, T> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<L, T> {
        &mut self.transport
    }

    /// Run until control must leave the bootloader. The caller performs the
    /// actual jump to `SessionEnd::entry()`.
    pub fn run<P: ResetProbe>(&mut self, probe: &P) -> SessionEnd {
        let cfg = *self.engine().config();
        let engine = self.dispatcher.engine_mut();
        let delay = delay_from_word(engine.read_unit(cfg.delay_time_addr));
        let entry = resolve_user_reset(engine.read_unit(cfg.user_prog_reset), cfg.boot_addr_low);
        engine.set_user_reset(entry);

        match decide_entry(delay, probe.hardware_reset()) {
            EntryDecision::HandOff => {
                info!("bootloader disabled, entry {=u32:#x}", entry);
                return SessionEnd::Bypassed { entry };
            }
            EntryDecision::EnterForever => info!("waiting for host"),
            EntryDecision::Timed { seconds } => {
                info!("waiting {=u8}s for host", seconds);
                self.transport.timer_mut().arm(seconds);
            }
        }
        self.transport.configure(cfg.features.autobaud);

        loop {
            self.dispatcher.engine_mut().guard_mut().arm();
            let watchdog = self.dispatcher.engine_mut().watchdog_mut();
            let Ok(len) = self.transport.receive(&mut self.buf, watchdog) else {
                let entry = self.engine().user_reset();
                info!("entry delay expired, entry {=u32:#x}", entry);
                return SessionEnd::TimedOut { entry };
            };
            self.dispatcher.engine_mut().guard_mut().step(RECEIVED);

            match self.dispatcher.dispatch(&mut self.buf, len) {
                Dispatch::Respond(n) => {
                    let watchdog = self.dispatcher.engine_mut().watchdog_mut();
                    self.transport.send(&self.buf[..n], watchdog);
                }
                Dispatch::Reset => {
                    self.transport.shutdown();
                    let entry = self.engine().user_reset();
                    info!("reset requested, entry {=u32:#x}", entry);
                    return SessionEnd::Reset { entry };
                }
            }
        }
    }
}
