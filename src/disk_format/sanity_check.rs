//! A small trait for post-parse structural sanity checks.
#![warn(missing_docs)]
#![warn(unsafe_code)]

/// Implemented by parsed structures that carry fields whose value is
/// expected to be constant or internally consistent (for example, a BAM's
/// free-sector count against its bitmap's popcount). `check` never mutates;
/// it only reports whether the structure looks sane.
pub trait SanityCheck {
    /// Returns `true` if the structure passes its sanity check.
    fn check(&self) -> bool;
}
