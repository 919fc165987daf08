// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport layer for bootloader communication.

use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

use serboot_common::framing::{encode, FrameDecoder};
use serboot_common::protocol::{Command, Packet, HEADER_LEN};

pub const DEFAULT_BAUD: u32 = 115_200;

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// STX/ETX/DLE framed transport to the bootloader.
pub struct Transport {
    port: Box<dyn SerialPort>,
    decoder: FrameDecoder,
}

impl Transport {
    /// Open `port_name` at `baud`, 8N1.
    pub fn new(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            decoder: FrameDecoder::new(),
        })
    }

    /// Get the port name.
    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    /// Frame and send one request.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let wire = encode(&packet.to_vec());
        self.port
            .write_all(&wire)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    /// Wait for the next well-formed frame. Corrupted frames are skipped the
    /// same way the device skips them.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        self.decoder.reset();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => match self.decoder.feed(byte[0]) {
                    Ok(Some(_)) => return Ok(self.decoder.frame().to_vec()),
                    Ok(None) => {}
                    Err(e) => eprintln!("Dropped response frame: {}", e),
                },
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    bail!("Timeout waiting for response");
                }
                Err(e) => bail!("Serial read error: {}", e),
            }
        }
    }

    fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(10));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
    }

    /// Send a request and wait for its response, checking the echoed command.
    pub fn request(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        self.drain_rx();
        self.send(packet)?;
        let response = self.receive()?;
        check_echo(packet.command, &response)?;
        Ok(response)
    }

    /// Send a request and wait for the response with a custom timeout.
    pub fn request_timeout(&mut self, packet: &Packet, timeout_ms: u64) -> Result<Vec<u8>> {
        let old_timeout = self.port.timeout();
        self.port
            .set_timeout(Duration::from_millis(timeout_ms))
            .context("Failed to set timeout")?;

        let result = self.request(packet);

        let _ = self.port.set_timeout(old_timeout);
        result
    }
}

/// Responses start with the request's command byte.
pub fn check_echo(command: u8, response: &[u8]) -> Result<()> {
    match response.first() {
        Some(&echo) if echo == command => Ok(()),
        Some(&echo) => bail!(
            "Response to {} echoes command {:#04x}",
            describe(command),
            echo
        ),
        None => bail!(
            "Empty response to {}: command not supported by this device",
            describe(command)
        ),
    }
}

fn describe(command: u8) -> String {
    match Command::try_from(command) {
        Ok(cmd) => format!("{:?}", cmd),
        Err(code) => format!("command {:#04x}", code),
    }
}

/// Length of a read response carrying `bytes` of data.
pub fn read_response_len(bytes: usize) -> usize {
    HEADER_LEN + bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_echo() {
        assert!(check_echo(0x01, &[0x01, 0x02]).is_ok());
        assert!(check_echo(0x01, &[0x02]).is_err());
        let err = check_echo(0x04, &[]).unwrap_err();
        assert!(err.to_string().contains("ReadEeprom"));
    }
}
