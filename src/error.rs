//! Error results that can occur working with disk images
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::{
    fmt::{Debug, Display, Formatter, Result},
    io,
};

/// An error that can occur when reading, writing, creating or mutating a
/// disk image.
pub struct Error {
    kind: ErrorKind,
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.kind)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a new Error with a given ErrorKind variant
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    /// The kind of error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(e: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::new(ErrorKind::InvalidImage(e.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io(e))
    }
}

/// The kinds of errors that can occur when reading, writing, creating or
/// mutating a disk image. Each variant corresponds to one of the failure
/// modes a caller needs to distinguish and handle.
#[derive(Debug)]
pub enum ErrorKind {
    /// Signature mismatch, truncated buffer, unknown device byte, or an
    /// otherwise unparseable geometry.
    InvalidImage(String),

    /// A requested (track, sector) pair falls outside the addressable
    /// range of the image's geometry.
    GeometryError {
        /// Track requested.
        track: u16,
        /// Sector requested.
        sector: u16,
    },

    /// `alloc_dir_entry` was asked to create a file whose name already
    /// names an active directory entry.
    NameExists(String),

    /// The directory has no free slot and cannot be grown.
    NoFreeDirEntry,

    /// The BAM cannot satisfy the requested block allocation.
    NoFreeBlocks,

    /// `mark_blocks` was asked to mark used a block that is already used.
    DoubleAlloc {
        /// Track of the offending block.
        track: u16,
        /// Sector of the offending block.
        sector: u16,
    },

    /// A filename or directory index lookup found nothing.
    NotFound(String),

    /// The underlying file read or write failed.
    Io(io::Error),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            ErrorKind::InvalidImage(message) => write!(f, "invalid disk image: {}", message),
            ErrorKind::GeometryError { track, sector } => {
                write!(f, "block ({},{}) is outside the disk's geometry", track, sector)
            }
            ErrorKind::NameExists(name) => write!(f, "a file named \"{}\" already exists", name),
            ErrorKind::NoFreeDirEntry => write!(f, "directory is full"),
            ErrorKind::NoFreeBlocks => write!(f, "not enough free blocks on disk"),
            ErrorKind::DoubleAlloc { track, sector } => {
                write!(f, "block ({},{}) is already allocated", track, sector)
            }
            ErrorKind::NotFound(what) => write!(f, "not found: {}", what),
            ErrorKind::Io(e) => write!(f, "{}", e),
        }
    }
}
