use super::{error::ErrorKind, Error};
use std::{borrow::Cow, fmt::Display, io::Read, path::Path};

include!(concat!(env!("OUT_DIR"), "/custom_firmware.rs"));

pub struct Firmware {
    data: Cow<'static, [u8]>,
}

impl Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Length: 0x{:X} ({} bytes)\nCRC32: 0x{:08X}",
            self.len(),
            self.len(),
            self.crc()
        ))
    }
}

impl Firmware {
    pub fn embedded() -> Option<Self> {
        EMBEDDED_FIRMWARE.map(|data| Firmware {
            data: Cow::Borrowed(data),
        })
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::new(ErrorKind::Image, "Firmware image is empty"));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::new(
                ErrorKind::Image,
                "Firmware image does not fit the 32-bit address space",
            ));
        }
        Ok(Firmware {
            data: Cow::Owned(data),
        })
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut file = std::fs::File::open(path).map_err(|error| {
            Error::new(
                ErrorKind::Image,
                format!("Couldn't open [{}]: {error}", path.display()).as_str(),
            )
        })?;
        let mut data = vec![];
        file.read_to_end(&mut data)?;
        Self::from_vec(data)
    }

    /// Command line image first, then the one embedded at build time.
    pub fn resolve(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::load(path),
            None => Self::embedded().ok_or_else(|| {
                Error::new(
                    ErrorKind::Image,
                    "No firmware file provided and none embedded at build time (RP2040_CUSTOM_BIN)",
                )
            }),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn crc(&self) -> u32 {
        crc32fast::hash(&self.data)
    }

    /// Splits the image into `block_size` writes, the last one zero padded.
    pub fn blocks(&self, block_size: usize) -> Blocks<'_> {
        Blocks {
            data: &self.data,
            offset: 0,
            buffer: vec![0u8; block_size],
        }
    }
}

pub struct Blocks<'a> {
    data: &'a [u8],
    offset: usize,
    buffer: Vec<u8>,
}

impl Blocks<'_> {
    /// Next `(offset, padded block)`; the block always spans the full block size.
    pub fn next_block(&mut self) -> Option<(usize, &[u8])> {
        if self.offset >= self.data.len() || self.buffer.is_empty() {
            return None;
        }
        let offset = self.offset;
        let length = (self.data.len() - offset).min(self.buffer.len());
        self.buffer.fill(0);
        self.buffer[..length].copy_from_slice(&self.data[offset..offset + length]);
        self.offset += length;
        Some((offset, &self.buffer))
    }
}
