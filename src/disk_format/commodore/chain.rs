//! The T/S-link chain walker.
//!
//! Files, and the directory itself, are linked lists of sectors. This
//! module only knows how to follow and build those lists; allocation
//! (choosing *which* sectors to use) lives in [`super::bam`].
#![warn(missing_docs)]
#![warn(unsafe_code)]
use super::block::read_ts_link;
use super::geometry::{Geometry, Ts};
use crate::error::Error;

/// Follow T/S-links starting at `(start_t, start_s)`, returning an ordered
/// list of blocks. The walk stops when a block's own next-track byte is 0
/// (that final block is included) or after `max` blocks, whichever comes
/// first.
pub fn build_chain(
    geometry: &Geometry,
    buffer: &[u8],
    start_t: u16,
    start_s: u8,
    max: Option<usize>,
) -> Result<Vec<Ts>, Error> {
    let mut chain = Vec::new();
    let mut current = Ts::new(start_t, start_s);
    loop {
        chain.push(current);
        if let Some(limit) = max {
            if chain.len() >= limit {
                break;
            }
        }
        let next = read_ts_link(geometry, buffer, current.track, current.sector)?;
        if next.is_end_of_chain() {
            break;
        }
        current = next;
    }
    Ok(chain)
}

/// Like [`build_chain`], but also returns the payload length (in bytes) of
/// the final block, read from its own T/S-link sector byte
/// (`next_sector + 1`, since the on-disk sentinel `(0, L)` records the last
/// *valid byte offset* inside that block).
pub fn read_file_chain(
    geometry: &Geometry,
    buffer: &[u8],
    start_t: u16,
    start_s: u8,
    max: Option<usize>,
) -> Result<(Vec<Ts>, usize), Error> {
    let chain = build_chain(geometry, buffer, start_t, start_s, max)?;
    let last = *chain.last().expect("build_chain always returns >= 1 block");
    let last_link = read_ts_link(geometry, buffer, last.track, last.sector)?;
    let payload_len = if last_link.is_end_of_chain() {
        (last_link.sector as usize).saturating_sub(1)
    } else {
        254
    };
    Ok((chain, payload_len))
}

/// Split a byte payload into 254-byte chunks, one per file-data block. The
/// last chunk may be shorter. Empty input still yields exactly one (empty)
/// chunk, since a file needs at least one allocated block.
pub fn create_file_chain(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return vec![&bytes[0..0]];
    }
    bytes.chunks(254).collect()
}
