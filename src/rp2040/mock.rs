use super::{
    control::Control,
    link::Bootloader,
    status::Status,
    types::{FlashInfo, BOOTLOADER_ACTIVE_FIRMWARE_VERSION, XIP_BASE},
    Error,
};
use std::{cell::RefCell, rc::Rc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    EnterBootloader,
    ReadFirmwareVersion,
    ReadBootloaderVersion,
    Bind,
    Release,
    Sync,
    Info,
    Crc(u32, u32),
    Erase(u32, u32),
    Write { address: u32, length: usize, crc: u32 },
    Go(u32),
}

#[derive(Default)]
pub struct Faults {
    pub firmware_version_read: bool,
    pub bootloader_version_read: bool,
    pub ignored_bootloader_entries: u32,
    pub sync_failures: u32,
    pub sync_error_at: Option<usize>,
    pub info: bool,
    pub crc: bool,
    pub erase: bool,
    pub write_error_at: Option<usize>,
    pub write_corrupt_at: Option<usize>,
    pub go_error_at: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Application,
    Bootloader,
    Running(u32),
}

pub struct Device {
    pub mode: Mode,
    pub application_version: u8,
    pub bootloader_version: u8,
    pub flash_info: FlashInfo,
    pub flash: Vec<u8>,
    pub bound: bool,
    pub ops: Vec<Op>,
    pub faults: Faults,
    syncs: usize,
    writes: usize,
}

impl Device {
    fn region(&mut self, address: u32, length: u32) -> Result<&mut [u8], Error> {
        let start = address
            .checked_sub(XIP_BASE)
            .ok_or_else(|| Error::transport("Address below flash"))? as usize;
        let end = start + length as usize;
        if end > self.flash.len() {
            return Err(Error::transport("Address past end of flash"));
        }
        Ok(&mut self.flash[start..end])
    }

    fn require_bootloader(&self) -> Result<(), Error> {
        if !self.bound {
            return Err(Error::transport("Transport not bound"));
        }
        if self.mode != Mode::Bootloader {
            return Err(Error::transport("Device not in bootloader"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeDevice(Rc<RefCell<Device>>);

impl FakeDevice {
    pub fn new(flash_info: FlashInfo) -> Self {
        FakeDevice(Rc::new(RefCell::new(Device {
            mode: Mode::Application,
            application_version: 0x0A,
            bootloader_version: 0x02,
            flash_info,
            flash: vec![0xFF; flash_info.size as usize],
            bound: false,
            ops: vec![],
            faults: Faults::default(),
            syncs: 0,
            writes: 0,
        })))
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Device) -> T) -> T {
        f(&mut self.0.borrow_mut())
    }

    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.0.borrow_mut().ops.clear();
    }

    pub fn mode(&self) -> Mode {
        self.0.borrow().mode
    }

    pub fn flash_at(&self, address: u32, length: usize) -> Vec<u8> {
        let start = (address - XIP_BASE) as usize;
        self.0.borrow().flash[start..start + length].to_vec()
    }
}

impl Control for FakeDevice {
    fn enter_bootloader(&mut self) -> Result<(), Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::EnterBootloader);
        if device.faults.ignored_bootloader_entries > 0 {
            device.faults.ignored_bootloader_entries -= 1;
            return Ok(());
        }
        device.mode = Mode::Bootloader;
        Ok(())
    }

    fn read_firmware_version(&mut self) -> Result<u8, Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::ReadFirmwareVersion);
        if device.faults.firmware_version_read {
            return Err(Error::transport("I2C read failed"));
        }
        Ok(match device.mode {
            Mode::Bootloader => BOOTLOADER_ACTIVE_FIRMWARE_VERSION,
            _ => device.application_version,
        })
    }

    fn read_bootloader_version(&mut self) -> Result<u8, Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::ReadBootloaderVersion);
        if device.faults.bootloader_version_read {
            return Err(Error::transport("I2C read failed"));
        }
        Ok(device.bootloader_version)
    }
}

impl Bootloader for FakeDevice {
    fn bind(&mut self) -> Result<(), Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Bind);
        device.bound = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Release);
        device.bound = false;
    }

    fn sync(&mut self) -> Result<(), Error> {
        let mut device = self.0.borrow_mut();
        let index = device.syncs;
        device.syncs += 1;
        device.ops.push(Op::Sync);
        if device.faults.sync_error_at == Some(index) {
            return Err(Error::transport("Bootloader stopped answering sync"));
        }
        if device.faults.sync_failures > 0 {
            device.faults.sync_failures -= 1;
            return Err(Error::transport("Bootloader did not answer sync"));
        }
        device.require_bootloader()
    }

    fn info(&mut self) -> Result<FlashInfo, Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Info);
        device.require_bootloader()?;
        if device.faults.info {
            return Err(Error::transport("Bootloader rejected [INFO] command"));
        }
        Ok(device.flash_info)
    }

    fn crc(&mut self, address: u32, length: u32) -> Result<u32, Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Crc(address, length));
        device.require_bootloader()?;
        if device.faults.crc {
            return Err(Error::transport("Bootloader rejected [CRCC] command"));
        }
        Ok(crc32fast::hash(device.region(address, length)?))
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Erase(address, length));
        device.require_bootloader()?;
        if device.faults.erase {
            return Err(Error::transport("Bootloader rejected [ERAS] command"));
        }
        if length % device.flash_info.erase_size != 0 {
            return Err(Error::transport("Unaligned erase"));
        }
        device.region(address, length)?.fill(0xFF);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<u32, Error> {
        let mut device = self.0.borrow_mut();
        let index = device.writes;
        device.writes += 1;
        device.ops.push(Op::Write {
            address,
            length: data.len(),
            crc: crc32fast::hash(data),
        });
        device.require_bootloader()?;
        if device.faults.write_error_at == Some(index) {
            return Err(Error::transport("Bootloader rejected [WRIT] command"));
        }
        if data.len() as u32 != device.flash_info.write_size {
            return Err(Error::transport("Write length is not one write block"));
        }
        let corrupt = device.faults.write_corrupt_at == Some(index);
        let region = device.region(address, data.len() as u32)?;
        region.copy_from_slice(data);
        if corrupt {
            region[0] ^= 0x01;
        }
        Ok(crc32fast::hash(region))
    }

    fn go(&mut self, address: u32) -> Result<(), Error> {
        let mut device = self.0.borrow_mut();
        device.ops.push(Op::Go(address));
        device.require_bootloader()?;
        if device.faults.go_error_at == Some(address) {
            return Err(Error::transport("Bootloader rejected [GOGO] command"));
        }
        device.mode = Mode::Running(address);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Status(String, String),
    Error(String, String),
}

#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Line>>>);

impl Recorder {
    pub fn lines(&self) -> Vec<Line> {
        self.0.borrow().clone()
    }

    /// Percentages shown while flashing, in display order.
    pub fn percentages(&self) -> Vec<u8> {
        self.0
            .borrow()
            .iter()
            .filter_map(|line| match line {
                Line::Status(_, subtitle) => subtitle.strip_suffix('%')?.parse().ok(),
                Line::Error(..) => None,
            })
            .collect()
    }
}

impl Status for Recorder {
    fn show_status(&mut self, title: &str, subtitle: &str) {
        self.0
            .borrow_mut()
            .push(Line::Status(title.to_string(), subtitle.to_string()));
    }

    fn show_error(&mut self, title: &str, subtitle: &str) {
        self.0
            .borrow_mut()
            .push(Line::Error(title.to_string(), subtitle.to_string()));
    }
}
