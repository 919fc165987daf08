// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Polled UART0 link for the session loop.

use crate::peripherals::Uart;
use serboot_common::SerialLink;

pub struct UartLink {
    uart: Uart,
}

impl UartLink {
    pub fn new(uart: Uart) -> Self {
        Self { uart }
    }

    fn drain(&mut self) {
        let mut byte = [0u8; 1];
        while self.uart.uart_is_readable() {
            let _ = self.uart.read_full_blocking(&mut byte);
        }
    }
}

impl SerialLink for UartLink {
    // The PL011 has no baud detection; the rate is fixed at init.
    fn enable(&mut self, _autobaud: bool) {
        self.drain();
    }

    fn read_byte(&mut self) -> Option<u8> {
        if !self.uart.uart_is_readable() {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.uart.read_full_blocking(&mut byte) {
            Ok(()) => Some(byte[0]),
            Err(_) => {
                // Overrun, break, parity or framing: the read cleared it.
                None
            }
        }
    }

    fn write_byte(&mut self, byte: u8) {
        self.uart.write_full_blocking(&[byte]);
    }

    fn flush(&mut self) {
        while self.uart.uart_is_busy() {
            core::hint::spin_loop();
        }
    }

    fn disable(&mut self) {
        self.flush();
        self.drain();
    }
}
