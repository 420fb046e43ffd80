use super::Error;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    os::fd::AsRawFd,
    path::PathBuf,
};
use tracing::debug;

/// Side channel to the coprocessor that works regardless of the firmware it runs.
pub trait Control {
    fn enter_bootloader(&mut self) -> Result<(), Error>;
    fn read_firmware_version(&mut self) -> Result<u8, Error>;
    fn read_bootloader_version(&mut self) -> Result<u8, Error>;
}

pub const DEFAULT_I2C_ADDRESS: u16 = 0x17;

const REGISTER_FIRMWARE_VERSION: u8 = 0x00;
const REGISTER_BOOTLOADER_VERSION: u8 = 0x01;
const REGISTER_BOOTLOADER_TRIGGER: u8 = 0x7F;
const BOOTLOADER_TRIGGER_MAGIC: u8 = 0xBE;

const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(i2c_set_slave_address, I2C_SLAVE);

pub struct I2cControl {
    path: PathBuf,
    address: u16,
    device: Option<File>,
}

impl I2cControl {
    pub fn new(path: PathBuf, address: u16) -> Self {
        I2cControl {
            path,
            address,
            device: None,
        }
    }

    fn device(&mut self) -> Result<&mut File, Error> {
        if self.device.is_none() {
            let device = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|error| {
                    Error::transport(
                        format!("Couldn't open [{}]: {error}", self.path.display()).as_str(),
                    )
                })?;
            // SAFETY: the descriptor stays open for the duration of the call.
            unsafe { i2c_set_slave_address(device.as_raw_fd(), self.address.into()) }?;
            debug!(path = %self.path.display(), address = self.address, "opened I2C control channel");
            self.device = Some(device);
        }
        self.device
            .as_mut()
            .ok_or_else(|| Error::transport("I2C control channel unavailable"))
    }

    fn read_register(&mut self, register: u8) -> Result<u8, Error> {
        let device = self.device()?;
        device.write_all(&[register])?;
        let mut value = [0u8; 1];
        device.read_exact(&mut value)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error> {
        let device = self.device()?;
        device.write_all(&[register, value])?;
        Ok(())
    }
}

impl Control for I2cControl {
    fn enter_bootloader(&mut self) -> Result<(), Error> {
        let result = self.write_register(REGISTER_BOOTLOADER_TRIGGER, BOOTLOADER_TRIGGER_MAGIC);
        // The coprocessor resets and the bus address may briefly vanish, reopen on next access.
        self.device = None;
        result
    }

    fn read_firmware_version(&mut self) -> Result<u8, Error> {
        self.read_register(REGISTER_FIRMWARE_VERSION)
    }

    fn read_bootloader_version(&mut self) -> Result<u8, Error> {
        self.read_register(REGISTER_BOOTLOADER_VERSION)
    }
}
