use std::fmt::{Display, Formatter, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    VersionMismatch,
    Capacity,
    ChecksumMismatch,
    Cancelled,
    Image,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.write_str(match self {
            ErrorKind::Transport => "Communication error",
            ErrorKind::VersionMismatch => "Incompatible device",
            ErrorKind::Capacity => "Custom firmware too large",
            ErrorKind::ChecksumMismatch => "Checksum mismatch",
            ErrorKind::Cancelled => "Update cancelled",
            ErrorKind::Image => "Invalid firmware image",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: String,
}

impl Error {
    pub fn new(kind: ErrorKind, description: &str) -> Self {
        Error {
            kind,
            description: description.to_string(),
        }
    }

    pub fn transport(description: &str) -> Self {
        Error::new(ErrorKind::Transport, description)
    }

    /// Prefixes the description, keeping the kind.
    pub fn context(self, what: &str) -> Self {
        Error::new(
            self.kind,
            format!("{what}: {}", self.description).as_str(),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        self.description.as_str()
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}: {}", self.kind, self.description.as_str())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::transport(format!("IO error: {}", value).as_str())
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(value: nix::errno::Errno) -> Self {
        Error::transport(format!("I2C error: {}", value).as_str())
    }
}
