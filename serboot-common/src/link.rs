// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Hardware seams the session loop drives.
//!
//! The bootloader binary implements these over its UART, timer and watchdog;
//! tests implement them over scripted byte queues.

/// Polled serial port.
pub trait SerialLink {
    /// Bring the port up. With `autobaud` the rate is trained from the first
    /// STX of the next frame.
    fn enable(&mut self, autobaud: bool);

    /// Arm baud-rate detection on the next received byte.
    fn start_autobaud(&mut self) {}

    /// True once the training byte was consumed.
    fn autobaud_complete(&mut self) -> bool {
        true
    }

    /// Next received byte, if any. Clears receive errors on the way.
    fn read_byte(&mut self) -> Option<u8>;

    /// Make sure the transmitter is enabled before a response.
    fn begin_transmit(&mut self) {}

    /// Queue one byte, waiting for FIFO space.
    fn write_byte(&mut self, byte: u8);

    /// Wait until the last byte has left the shift register.
    fn flush(&mut self);

    fn disable(&mut self);
}

/// One-shot entry timeout.
pub trait EntryTimer {
    fn arm(&mut self, seconds: u8);
    fn disarm(&mut self);
    fn expired(&mut self) -> bool;
}

pub trait Watchdog {
    fn feed(&mut self);
}

/// No watchdog.
impl Watchdog for () {
    fn feed(&mut self) {}
}

/// Source of the last reset cause.
pub trait ResetProbe {
    /// True for power-on, brown-out or pin resets; false when the
    /// application deliberately restarted into the bootloader.
    fn hardware_reset(&self) -> bool;
}
