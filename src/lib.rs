#![warn(missing_docs)]
#![warn(unsafe_code)]
//! cbm-disk-image is a library crate to read, write, create and mutate
//! Commodore (CBM) floppy disk images: D64/D71/D81 and the IEEE-488 drive
//! family (2040/8050/8250/9030-90), plus the X64 container format.
//!
//! The primary entry point is [`disk_format::commodore::image::Image`],
//! which owns a geometry, a byte buffer, and parsed header/BAM/directory
//! caches. Everything else in [`disk_format::commodore`] is a leaf module
//! that `Image` composes: geometry parameters, the (track,sector) address
//! model, block I/O, the T/S-link chain walker, the BAM allocator, the
//! header and the directory.
use log::error;

pub mod disk_format;
pub mod error;
pub mod petscii;
pub mod serialize;

/// Initialize the module. This should be called before any parsing is
/// performed. Panics on failure or on incompatibility.
pub fn init() {
    // This crate reads an entire image into one in-memory byte buffer and
    // indexes it with usize offsets; on a platform where usize is smaller
    // than 32 bits a single-sided 9000-series image (up to ~1MB) would not
    // address correctly.
    if usize::BITS < 32 {
        error!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
        panic!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
    }
}
