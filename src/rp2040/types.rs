use super::Error;
use std::{fmt::Display, time::Duration};

pub const XIP_BASE: u32 = 0x1000_0000;

pub const BOOTLOADER_SIZE: u32 = 64 * 1024;
pub const STOCK_FIRMWARE_SIZE: u32 = 64 * 1024;

pub const STOCK_FIRMWARE_OFFSET: u32 = BOOTLOADER_SIZE;
pub const CUSTOM_FIRMWARE_OFFSET: u32 = BOOTLOADER_SIZE + STOCK_FIRMWARE_SIZE;

pub const STOCK_FIRMWARE_ADDRESS: u32 = XIP_BASE + STOCK_FIRMWARE_OFFSET;
pub const CUSTOM_FIRMWARE_ADDRESS: u32 = XIP_BASE + CUSTOM_FIRMWARE_OFFSET;

/// Firmware version reported by the coprocessor while its bootloader is running.
pub const BOOTLOADER_ACTIVE_FIRMWARE_VERSION: u8 = 0xFF;

pub const SUPPORTED_BOOTLOADER_VERSION: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashInfo {
    pub start: u32,
    pub size: u32,
    pub erase_size: u32,
    pub write_size: u32,
    pub max_data_len: u32,
}

impl FlashInfo {
    pub fn from_words(words: [u32; 5]) -> Self {
        let [start, size, erase_size, write_size, max_data_len] = words;
        FlashInfo {
            start,
            size,
            erase_size,
            write_size,
            max_data_len,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.erase_size == 0 || self.write_size == 0 {
            return Err(Error::transport("Bootloader reported zero flash granularity"));
        }
        if self.write_size > self.max_data_len {
            return Err(Error::transport(
                format!(
                    "Write block size 0x{:X} exceeds maximum transfer length 0x{:X}",
                    self.write_size, self.max_data_len
                )
                .as_str(),
            ));
        }
        Ok(())
    }

    /// Bytes available for the custom firmware past the bootloader and stock firmware,
    /// limited to what stays addressable from `CUSTOM_FIRMWARE_ADDRESS`.
    pub fn custom_capacity(&self) -> u32 {
        self.size
            .saturating_sub(CUSTOM_FIRMWARE_OFFSET)
            .min(u32::MAX - CUSTOM_FIRMWARE_ADDRESS)
    }

    /// Image length rounded up to whole erase blocks.
    pub fn erase_length(&self, length: u32) -> u32 {
        length.div_ceil(self.erase_size).saturating_mul(self.erase_size)
    }
}

impl Display for FlashInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "start: 0x{:08X}, size: 0x{:X}, erase: 0x{:X}, write: 0x{:X}, max transfer: 0x{:X}",
            self.start, self.size, self.erase_size, self.write_size, self.max_data_len
        ))
    }
}

/// Versions observed during one attempt; flash geometry travels with the update steps.
#[derive(Default)]
pub struct Session {
    pub firmware_version: Option<u8>,
    pub bootloader_version: Option<u8>,
}

#[derive(Debug)]
pub enum Outcome {
    Launched,
    FellBackToStock(Error),
    Stranded(Error),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Launched => f.write_str("Custom firmware launched"),
            Outcome::FellBackToStock(error) => {
                f.write_fmt(format_args!("Returned to stock firmware ({error})"))
            }
            Outcome::Stranded(error) => {
                f.write_fmt(format_args!("Device unreachable, not running any firmware ({error})"))
            }
        }
    }
}

pub struct Progress {
    length: u64,
    displayed: Option<u8>,
}

impl Progress {
    pub fn new(length: usize) -> Self {
        Progress {
            length: length as u64,
            displayed: Some(0),
        }
    }

    /// Returns the new percentage when it differs from the last displayed one.
    pub fn update(&mut self, offset: usize) -> Option<u8> {
        if self.length == 0 {
            return None;
        }
        let percent = ((offset as u64 * 100) / self.length).min(100) as u8;
        if self.displayed == Some(percent) {
            return None;
        }
        self.displayed = Some(percent);
        Some(percent)
    }
}

#[derive(Clone, Copy)]
pub struct Timings {
    pub settle: Duration,
    pub checksum_ok: Duration,
    pub before_erase: Duration,
    pub failure: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            settle: Duration::from_millis(500),
            checksum_ok: Duration::from_millis(500),
            before_erase: Duration::from_millis(500),
            failure: Duration::from_millis(1000),
        }
    }
}

impl Timings {
    pub fn none() -> Self {
        Timings {
            settle: Duration::ZERO,
            checksum_ok: Duration::ZERO,
            before_erase: Duration::ZERO,
            failure: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashInfo {
        FlashInfo::from_words([XIP_BASE, 2 * 1024 * 1024, 4096, 4096, 4096])
    }

    #[test]
    fn custom_region_sits_past_stock_firmware() {
        assert_eq!(STOCK_FIRMWARE_ADDRESS, 0x1001_0000);
        assert_eq!(CUSTOM_FIRMWARE_ADDRESS, 0x1002_0000);
        assert_eq!(geometry().custom_capacity(), 2 * 1024 * 1024 - 128 * 1024);
    }

    #[test]
    fn capacity_saturates_on_tiny_flash() {
        let mut flash = geometry();
        flash.size = 64 * 1024;
        assert_eq!(flash.custom_capacity(), 0);
    }

    #[test]
    fn capacity_stays_addressable_on_oversized_flash() {
        let mut flash = geometry();
        flash.size = u32::MAX;
        assert_eq!(flash.custom_capacity(), u32::MAX - CUSTOM_FIRMWARE_ADDRESS);
        assert!(CUSTOM_FIRMWARE_ADDRESS
            .checked_add(flash.custom_capacity())
            .is_some());
    }

    #[test]
    fn erase_length_rounds_up_to_whole_blocks() {
        let flash = geometry();
        assert_eq!(flash.erase_length(70000), 18 * 4096);
        assert_eq!(flash.erase_length(8192), 8192);
        assert_eq!(flash.erase_length(1), 4096);
    }

    #[test]
    fn geometry_validation_rejects_unusable_values() {
        let mut flash = geometry();
        assert!(flash.validate().is_ok());
        flash.write_size = 0;
        assert!(flash.validate().is_err());
        flash.write_size = 8192;
        assert!(flash.validate().is_err());
    }

    #[test]
    fn progress_only_reports_changes() {
        let mut progress = Progress::new(1000);
        assert_eq!(progress.update(0), None);
        assert_eq!(progress.update(5), None);
        assert_eq!(progress.update(10), Some(1));
        assert_eq!(progress.update(19), None);
        assert_eq!(progress.update(999), Some(99));
    }
}
