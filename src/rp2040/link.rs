use super::{serial::SerialDevice, types::FlashInfo, utils::u32_from_le, Error};
use std::{io::Write, time::Duration};
use tracing::{debug, trace};

/// Primitive operations of the RP2040 serial bootloader.
pub trait Bootloader {
    fn bind(&mut self) -> Result<(), Error>;
    fn release(&mut self);
    fn sync(&mut self) -> Result<(), Error>;
    fn info(&mut self) -> Result<FlashInfo, Error>;
    fn crc(&mut self, address: u32, length: u32) -> Result<u32, Error>;
    fn erase(&mut self, address: u32, length: u32) -> Result<(), Error>;
    /// Returns the CRC the device computed over the received bytes.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<u32, Error>;
    fn go(&mut self, address: u32) -> Result<(), Error>;
}

#[derive(Clone, Copy)]
enum Opcode {
    Sync,
    Info,
    Crc,
    Erase,
    Write,
    Go,
}

impl Opcode {
    fn token(&self) -> &'static [u8; 4] {
        match self {
            Opcode::Sync => b"SYNC",
            Opcode::Info => b"INFO",
            Opcode::Crc => b"CRCC",
            Opcode::Erase => b"ERAS",
            Opcode::Write => b"WRIT",
            Opcode::Go => b"GOGO",
        }
    }
}

const RESPONSE_OK: &[u8; 4] = b"OKOK";
const RESPONSE_ERROR: &[u8; 4] = b"ERR!";
const RESPONSE_SYNC: &[u8; 4] = b"PICO";

pub const SYNC_ATTEMPTS: u32 = 50;
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const ERASE_TIMEOUT: Duration = Duration::from_secs(30);

struct Command<'a> {
    opcode: Opcode,
    args: &'a [u32],
    data: &'a [u8],
}

pub struct SerialBootloader {
    port: String,
    baud: u32,
    sync_attempts: u32,
    serial: Option<SerialDevice>,
}

impl SerialBootloader {
    pub fn new(port: &str, baud: u32) -> Self {
        SerialBootloader {
            port: port.to_string(),
            baud,
            sync_attempts: SYNC_ATTEMPTS,
            serial: None,
        }
    }

    fn serial(&mut self) -> Result<&mut SerialDevice, Error> {
        self.serial
            .as_mut()
            .ok_or_else(|| Error::transport("Bootloader transport is not bound"))
    }

    fn send_command(&mut self, command: &Command) -> Result<(), Error> {
        trace!(
            opcode = %String::from_utf8_lossy(command.opcode.token()),
            args = ?command.args,
            length = command.data.len(),
            "bootloader command"
        );
        let serial = self.serial()?;
        serial.write_all(command.opcode.token())?;
        for arg in command.args {
            serial.write_all(&arg.to_le_bytes())?;
        }
        serial.write_all(command.data)?;
        serial.flush()?;
        Ok(())
    }

    fn execute_command(
        &mut self,
        command: &Command,
        response_length: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        self.send_command(command)?;

        let serial = self.serial()?;
        serial.set_read_timeout(timeout);

        let mut status = [0u8; 4];
        serial.read_exact_timeout(&mut status).map_err(|error| {
            Error::transport(
                format!(
                    "No response to [{}] command: {error}",
                    String::from_utf8_lossy(command.opcode.token())
                )
                .as_str(),
            )
        })?;

        match &status {
            RESPONSE_OK => {}
            RESPONSE_ERROR => {
                return Err(Error::transport(
                    format!(
                        "Bootloader rejected [{}] command",
                        String::from_utf8_lossy(command.opcode.token())
                    )
                    .as_str(),
                ))
            }
            _ => return Err(Error::transport("Unknown bootloader response token")),
        }

        let mut data = vec![0u8; response_length];
        serial.read_exact_timeout(&mut data)?;
        Ok(data)
    }
}

impl Bootloader for SerialBootloader {
    fn bind(&mut self) -> Result<(), Error> {
        debug!(port = %self.port, baud = self.baud, "binding bootloader transport");
        self.serial = None;
        let serial = SerialDevice::new(&self.port, self.baud, None, None).map_err(|error| {
            Error::transport(format!("Couldn't open serial port [{}]: {error}", self.port).as_str())
        })?;
        self.serial = Some(serial);
        Ok(())
    }

    fn release(&mut self) {
        if self.serial.take().is_some() {
            debug!(port = %self.port, "released bootloader transport");
        }
    }

    fn sync(&mut self) -> Result<(), Error> {
        for attempt in 1..=self.sync_attempts {
            let serial = self.serial()?;
            serial.set_read_timeout(SYNC_TIMEOUT);
            if let Err(error) = serial.discard_input() {
                trace!(attempt, %error, "couldn't discard stale input");
            }

            serial.write_all(Opcode::Sync.token())?;
            serial.flush()?;

            let mut response = [0u8; 4];
            match serial.read_exact_timeout(&mut response) {
                Ok(()) if &response == RESPONSE_SYNC => {
                    debug!(attempt, "bootloader synchronized");
                    return Ok(());
                }
                Ok(()) => trace!(attempt, ?response, "unexpected sync response"),
                Err(error) => trace!(attempt, %error, "sync attempt timed out"),
            }
        }
        Err(Error::transport(
            format!(
                "Bootloader did not answer sync after {} attempts",
                self.sync_attempts
            )
            .as_str(),
        ))
    }

    fn info(&mut self) -> Result<FlashInfo, Error> {
        let data = self.execute_command(
            &Command {
                opcode: Opcode::Info,
                args: &[],
                data: &[],
            },
            20,
            COMMAND_TIMEOUT,
        )?;
        let mut words = [0u32; 5];
        for (word, bytes) in words.iter_mut().zip(data.chunks_exact(4)) {
            *word = u32_from_le(bytes)?;
        }
        Ok(FlashInfo::from_words(words))
    }

    fn crc(&mut self, address: u32, length: u32) -> Result<u32, Error> {
        let data = self.execute_command(
            &Command {
                opcode: Opcode::Crc,
                args: &[address, length],
                data: &[],
            },
            4,
            COMMAND_TIMEOUT,
        )?;
        u32_from_le(&data)
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), Error> {
        self.execute_command(
            &Command {
                opcode: Opcode::Erase,
                args: &[address, length],
                data: &[],
            },
            0,
            ERASE_TIMEOUT,
        )?;
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<u32, Error> {
        let length = u32::try_from(data.len())
            .map_err(|_| Error::transport("Write block length exceeds 32 bits"))?;
        let response = self.execute_command(
            &Command {
                opcode: Opcode::Write,
                args: &[address, length],
                data,
            },
            4,
            COMMAND_TIMEOUT,
        )?;
        u32_from_le(&response)
    }

    fn go(&mut self, address: u32) -> Result<(), Error> {
        self.send_command(&Command {
            opcode: Opcode::Go,
            args: &[address],
            data: &[],
        })
    }
}
