//! Read, write, create and mutate Commodore (CBM) floppy disk images.
//!
//! The module is layered leaf-first, matching the dependency order a
//! drive itself respects: [`geometry`] describes a layout, [`address`]
//! maps (track,sector) coordinates into linear offsets, [`block`] performs
//! raw sector I/O, [`chain`] walks T/S-link chains, and [`bam`],
//! [`header`], [`directory`] parse/serialize the three on-disk
//! structures that [`image::Image`] keeps as authoritative caches.
//! [`x64`] is the optional container format that wraps a whole image.
#![warn(missing_docs)]
#![warn(unsafe_code)]

/// Parametric geometry for the supported drive families.
pub mod geometry;

/// (track,sector) <-> linear sector index <-> byte offset, including the
/// 9000-series zone-stealing link adjustment.
pub mod address;

/// Raw 256-byte block read/write and T/S-link byte access.
pub mod block;

/// T/S-link chain walker: following existing chains and building new ones.
pub mod chain;

/// The Block Availability Map: parsing, serialization, initialization and
/// allocation.
pub mod bam;

/// The header sector: disk label, ID and DOS type.
pub mod header;

/// The directory: 32-byte entries, lookup, allocation, rename, mkdir.
pub mod directory;

/// The X64 container format.
pub mod x64;

/// The high-level `Image` type composing all of the above.
pub mod image;
