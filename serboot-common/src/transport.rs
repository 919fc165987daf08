// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Blocking packet transport over a [`SerialLink`].

use crate::framing::{encode_with, FrameDecoder};
use crate::link::{EntryTimer, SerialLink, Watchdog};
use crate::protocol::{BUFFER_SIZE, HEADER_LEN};

/// The entry timer ran out while waiting for a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Expired;

/// Waits are spent feeding the watchdog handed in by the caller.
pub struct Transport<L, T> {
    link: L,
    timer: T,
    decoder: FrameDecoder,
    autobaud: bool,
}

impl<L: SerialLink, T: EntryTimer> Transport<L, T> {
    pub fn new(link: L, timer: T) -> Self {
        Self {
            link,
            timer,
            decoder: FrameDecoder::new(),
            autobaud: false,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn configure(&mut self, autobaud: bool) {
        self.autobaud = autobaud;
        self.link.enable(autobaud);
    }

    pub fn shutdown(&mut self) {
        self.link.disable();
    }

    /// Block until a well-formed request of at least a header arrives and
    /// copy it to `out`. Bad frames are dropped silently. The entry timer is
    /// disarmed as soon as a frame starts.
    pub fn receive(
        &mut self,
        out: &mut [u8; BUFFER_SIZE],
        watchdog: &mut impl Watchdog,
    ) -> Result<usize, Expired> {
        loop {
            if self.autobaud && self.decoder.is_hunting() {
                self.train(watchdog)?;
            }
            let byte = self.next_byte(watchdog)?;
            let was_hunting = self.decoder.is_hunting();
            match self.decoder.feed(byte) {
                Ok(Some(n)) if n >= HEADER_LEN => {
                    out[..n].copy_from_slice(self.decoder.frame());
                    return Ok(n);
                }
                // Shorter than a header, which includes a bare two-byte
                // RESET: no command runs and nothing is sent back.
                Ok(Some(n)) => debug!("short frame dropped ({=usize} bytes)", n),
                Ok(None) => {}
                Err(e) => debug!("frame dropped: {}", e),
            }
            if was_hunting && !self.decoder.is_hunting() {
                self.timer.disarm();
            }
        }
    }

    /// Frame and send `body`, then wait for the transmitter to drain.
    pub fn send(&mut self, body: &[u8], watchdog: &mut impl Watchdog) {
        self.link.begin_transmit();
        let link = &mut self.link;
        encode_with(body, |b| {
            watchdog.feed();
            link.write_byte(b);
        });
        self.link.flush();
    }

    /// Let the autobaud hardware eat the first STX.
    fn train(&mut self, watchdog: &mut impl Watchdog) -> Result<(), Expired> {
        self.link.start_autobaud();
        while !self.link.autobaud_complete() {
            watchdog.feed();
            if self.timer.expired() {
                return Err(Expired);
            }
        }
        self.timer.disarm();
        self.decoder.assume_start();
        Ok(())
    }

    fn next_byte(&mut self, watchdog: &mut impl Watchdog) -> Result<u8, Expired> {
        loop {
            watchdog.feed();
            if let Some(byte) = self.link.read_byte() {
                return Ok(byte);
            }
            if self.timer.expired() {
                return Err(Expired);
            }
        }
    }
}
