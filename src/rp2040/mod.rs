mod control;
mod error;
pub mod firmware;
mod link;
#[cfg(test)]
mod mock;
mod serial;
mod status;
mod types;
mod utils;

pub use self::{
    control::{Control, I2cControl, DEFAULT_I2C_ADDRESS},
    error::{Error, ErrorKind},
    firmware::Firmware,
    link::{Bootloader, SerialBootloader},
    serial::{PortInfo, SerialDevice},
    status::{ConsoleStatus, Status},
    types::{FlashInfo, Outcome, Timings, CUSTOM_FIRMWARE_ADDRESS, STOCK_FIRMWARE_ADDRESS},
};

use self::types::{
    Progress, Session, BOOTLOADER_ACTIVE_FIRMWARE_VERSION, SUPPORTED_BOOTLOADER_VERSION,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

const TITLE_INITIALIZING: &str = "Initializing RP2040";
const TITLE_CHECKING: &str = "Checking Firmware";
const TITLE_FLASHING: &str = "Flashing Firmware";
const TITLE_LAUNCHING: &str = "Launching Firmware";
const TITLE_STOCK: &str = "Returning to Stock Firmware";

/// Update sequence states, strictly in this order. Every failing state moves to `Abort`.
#[derive(Debug)]
enum Step {
    RebootToBootloader,
    CheckFirmwareVersion,
    CheckBootloaderVersion,
    EstablishTransport,
    QueryFlashInfo,
    CapacityCheck(FlashInfo),
    IntegrityCheck(FlashInfo),
    EraseAndWrite(FlashInfo),
    Launch,
    Launched,
    Abort(Error),
}

pub struct DeviceReport {
    pub firmware_version: u8,
    pub bootloader_version: u8,
    pub flash: FlashInfo,
    pub custom_capacity: u32,
    pub installed_matches: Option<bool>,
}

pub struct Rp2040 {
    control: Box<dyn Control>,
    bootloader: Box<dyn Bootloader>,
    status: Box<dyn Status>,
    timings: Timings,
    cancel: Option<Arc<AtomicBool>>,
}

impl Rp2040 {
    pub fn new(
        control: Box<dyn Control>,
        bootloader: Box<dyn Bootloader>,
        status: Box<dyn Status>,
    ) -> Self {
        Rp2040 {
            control,
            bootloader,
            status,
            timings: Timings::default(),
            cancel: None,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Flag checked between written blocks; when set the update aborts to stock firmware.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Installs `firmware` if needed and starts it, or returns the device to stock firmware.
    pub fn run_custom(&mut self, firmware: &Firmware) -> Outcome {
        let mut session = Session::default();
        let mut step = Step::RebootToBootloader;
        loop {
            step = match step {
                Step::Launched => return Outcome::Launched,
                Step::Abort(error) => return self.abort(error),
                current => {
                    debug!(step = ?current, "advancing update sequence");
                    self.advance(current, firmware, &mut session)
                        .unwrap_or_else(Step::Abort)
                }
            };
        }
    }

    fn advance(
        &mut self,
        step: Step,
        firmware: &Firmware,
        session: &mut Session,
    ) -> Result<Step, Error> {
        Ok(match step {
            Step::RebootToBootloader => {
                self.status
                    .show_status(TITLE_INITIALIZING, "Rebooting to Bootloader");
                self.reboot_to_bootloader();
                Step::CheckFirmwareVersion
            }
            Step::CheckFirmwareVersion => {
                self.check_firmware_version(session)?;
                Step::CheckBootloaderVersion
            }
            Step::CheckBootloaderVersion => {
                self.check_bootloader_version(session)?;
                Step::EstablishTransport
            }
            Step::EstablishTransport => {
                self.establish_transport()?;
                Step::QueryFlashInfo
            }
            Step::QueryFlashInfo => {
                Step::CapacityCheck(self.query_flash_info()?)
            }
            Step::CapacityCheck(flash) => {
                check_capacity(firmware, &flash)?;
                Step::IntegrityCheck(flash)
            }
            Step::IntegrityCheck(flash) => {
                if self.installed_matches(firmware)? {
                    self.status.show_status(TITLE_CHECKING, "Checksum OK");
                    delay(self.timings.checksum_ok);
                    Step::Launch
                } else {
                    Step::EraseAndWrite(flash)
                }
            }
            Step::EraseAndWrite(flash) => {
                self.erase_and_write(firmware, &flash)?;
                Step::Launch
            }
            Step::Launch => {
                self.launch()?;
                Step::Launched
            }
            terminal @ (Step::Launched | Step::Abort(_)) => terminal,
        })
    }

    fn reboot_to_bootloader(&mut self) {
        if let Err(error) = self.control.enter_bootloader() {
            warn!(%error, "bootloader entry request failed, continuing");
        }
        delay(self.timings.settle);
    }

    fn check_firmware_version(&mut self, session: &mut Session) -> Result<(), Error> {
        self.status
            .show_status(TITLE_INITIALIZING, "Reading Firmware Version");
        let version = self
            .control
            .read_firmware_version()
            .map_err(|error| error.context("Failed to read firmware version"))?;
        session.firmware_version = Some(version);
        if version != BOOTLOADER_ACTIVE_FIRMWARE_VERSION {
            return Err(Error::new(
                ErrorKind::VersionMismatch,
                format!("RP2040 not in bootloader mode (firmware version 0x{version:02X})").as_str(),
            ));
        }
        Ok(())
    }

    fn check_bootloader_version(&mut self, session: &mut Session) -> Result<(), Error> {
        self.status
            .show_status(TITLE_INITIALIZING, "Reading Bootloader Version");
        let version = self
            .control
            .read_bootloader_version()
            .map_err(|error| error.context("Failed to read bootloader version"))?;
        session.bootloader_version = Some(version);
        if version != SUPPORTED_BOOTLOADER_VERSION {
            return Err(Error::new(
                ErrorKind::VersionMismatch,
                format!(
                    "Incorrect bootloader version 0x{version:02X}, expected 0x{SUPPORTED_BOOTLOADER_VERSION:02X}"
                )
                .as_str(),
            ));
        }
        Ok(())
    }

    fn establish_transport(&mut self) -> Result<(), Error> {
        self.bootloader.bind()?;
        self.bootloader
            .sync()
            .map_err(|error| error.context("Failed to synchronize with bootloader"))
    }

    fn query_flash_info(&mut self) -> Result<FlashInfo, Error> {
        let flash = self
            .bootloader
            .info()
            .map_err(|error| error.context("Failed to read flash info"))?;
        flash.validate()?;
        info!(%flash, "flash geometry");
        Ok(flash)
    }

    fn installed_matches(&mut self, firmware: &Firmware) -> Result<bool, Error> {
        self.status.show_status(TITLE_CHECKING, "Calculating CRC");
        let expected = firmware.crc();
        let actual = self
            .bootloader
            .crc(CUSTOM_FIRMWARE_ADDRESS, firmware.len() as u32)
            .map_err(|error| error.context("Failed to calculate CRC"))?;
        debug!(expected, actual, "custom region checksum");
        Ok(expected == actual)
    }

    fn erase_and_write(&mut self, firmware: &Firmware, flash: &FlashInfo) -> Result<(), Error> {
        self.status.show_status(TITLE_FLASHING, "Erasing...");
        delay(self.timings.before_erase);

        let erase_length = flash.erase_length(firmware.len() as u32);
        self.bootloader
            .erase(CUSTOM_FIRMWARE_ADDRESS, erase_length)
            .map_err(|error| error.context("Failed to erase flash"))?;

        let mut progress = Progress::new(firmware.len());
        let mut blocks = firmware.blocks(flash.write_size as usize);
        while let Some((offset, block)) = blocks.next_block() {
            if self.cancel_requested() {
                return Err(Error::new(
                    ErrorKind::Cancelled,
                    format!("Stopped before block at offset 0x{offset:X}").as_str(),
                ));
            }
            if let Some(percent) = progress.update(offset) {
                self.status
                    .show_status(TITLE_FLASHING, format!("{percent}%").as_str());
            }

            let address = u32::try_from(offset)
                .ok()
                .and_then(|offset| CUSTOM_FIRMWARE_ADDRESS.checked_add(offset))
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::Capacity,
                        format!("Block offset 0x{offset:X} is past the end of the address space")
                            .as_str(),
                    )
                })?;
            let expected = crc32fast::hash(block);
            let actual = self
                .bootloader
                .write(address, block)
                .map_err(|error| error.context("Failed to flash firmware"))?;
            if actual != expected {
                return Err(Error::new(
                    ErrorKind::ChecksumMismatch,
                    format!(
                        "Block CRC check failed at 0x{address:08X} (expected 0x{expected:08X}, got 0x{actual:08X})"
                    )
                    .as_str(),
                ));
            }
        }

        Ok(())
    }

    fn launch(&mut self) -> Result<(), Error> {
        self.status.show_status(TITLE_LAUNCHING, "Have fun :)");
        self.bootloader
            .sync()
            .map_err(|error| error.context("Failed to resynchronize with bootloader"))?;
        self.bootloader.go(CUSTOM_FIRMWARE_ADDRESS)?;
        self.bootloader.release();
        info!(address = CUSTOM_FIRMWARE_ADDRESS, "custom firmware launched");
        Ok(())
    }

    fn abort(&mut self, error: Error) -> Outcome {
        warn!(%error, "update aborted");
        self.status
            .show_error(error.kind().to_string().as_str(), error.description());
        delay(self.timings.failure);
        match self.reboot_to_stock() {
            Ok(()) => Outcome::FellBackToStock(error),
            Err(stranded) => Outcome::Stranded(stranded),
        }
    }

    /// Returns the coprocessor to its factory firmware.
    pub fn reboot_to_stock(&mut self) -> Result<(), Error> {
        self.status.show_status(TITLE_STOCK, "Rebooting to Bootloader");
        self.reboot_to_bootloader();

        let result = self.establish_transport().and_then(|_| {
            self.bootloader
                .go(STOCK_FIRMWARE_ADDRESS)
                .map_err(|error| error.context("Failed to start stock firmware"))
        });
        self.bootloader.release();

        match &result {
            Ok(()) => info!(address = STOCK_FIRMWARE_ADDRESS, "stock firmware started"),
            Err(error) => {
                warn!(%error, "device left without running firmware");
                self.status.show_error("RP2040 unreachable", error.description());
            }
        }
        result
    }

    /// Reads versions and flash geometry, then returns the device to stock firmware.
    pub fn inspect(&mut self, firmware: Option<&Firmware>) -> Result<DeviceReport, Error> {
        let report = self.inspect_bootloader(firmware);
        self.bootloader.release();
        let stock = self.reboot_to_stock();
        let report = report?;
        stock?;
        Ok(report)
    }

    fn inspect_bootloader(&mut self, firmware: Option<&Firmware>) -> Result<DeviceReport, Error> {
        let mut session = Session::default();
        self.status
            .show_status(TITLE_INITIALIZING, "Rebooting to Bootloader");
        self.reboot_to_bootloader();
        self.check_firmware_version(&mut session)?;
        self.check_bootloader_version(&mut session)?;
        self.establish_transport()?;
        let flash = self.query_flash_info()?;

        let installed_matches = match firmware {
            Some(firmware) => {
                check_capacity(firmware, &flash)?;
                Some(self.installed_matches(firmware)?)
            }
            None => None,
        };

        Ok(DeviceReport {
            firmware_version: session.firmware_version.unwrap_or_default(),
            bootloader_version: session.bootloader_version.unwrap_or_default(),
            flash,
            custom_capacity: flash.custom_capacity(),
            installed_matches,
        })
    }

    fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }
}

fn check_capacity(firmware: &Firmware, flash: &FlashInfo) -> Result<(), Error> {
    let capacity = flash.custom_capacity();
    if firmware.len() as u64 > capacity as u64 {
        return Err(Error::new(
            ErrorKind::Capacity,
            format!(
                "Image is 0x{:X} bytes, custom region holds 0x{capacity:X}",
                firmware.len()
            )
            .as_str(),
        ));
    }
    Ok(())
}

fn delay(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

pub fn new(port: &str, baud: u32, i2c: std::path::PathBuf, address: u16) -> Rp2040 {
    Rp2040::new(
        Box::new(I2cControl::new(i2c, address)),
        Box::new(SerialBootloader::new(port, baud)),
        Box::new(ConsoleStatus::default()),
    )
}

pub fn list_serial_ports() -> Result<Vec<PortInfo>, Error> {
    let ports = SerialDevice::list()?;
    if ports.is_empty() {
        return Err(Error::transport("No serial ports found"));
    }
    Ok(ports)
}
