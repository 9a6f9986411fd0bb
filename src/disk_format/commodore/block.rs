//! Raw 256-byte block I/O against an image's linear byte buffer.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use super::address::{byte_offset, raw_to_ts, ts_to_raw};
use super::geometry::{Geometry, Ts};
use crate::error::{Error, ErrorKind};

const BLOCK_SIZE: usize = 256;

/// Read the 256-byte block at (t, s).
pub fn read_block<'a>(geometry: &Geometry, buffer: &'a [u8], t: u16, s: u8) -> Result<&'a [u8], Error> {
    let offset = checked_offset(geometry, buffer, t, s)?;
    Ok(&buffer[offset..offset + BLOCK_SIZE])
}

/// Overwrite the 256-byte block at (t, s).
pub fn write_block(geometry: &Geometry, buffer: &mut [u8], t: u16, s: u8, data: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
    let offset = checked_offset(geometry, buffer, t, s)?;
    buffer[offset..offset + BLOCK_SIZE].copy_from_slice(data);
    Ok(())
}

/// Splice `bytes` into the buffer starting at `offset`, preserving the
/// buffer's overall length.
pub fn write_bytes(buffer: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), Error> {
    if offset + bytes.len() > buffer.len() {
        return Err(Error::new(ErrorKind::GeometryError {
            track: 0,
            sector: 0,
        }));
    }
    buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Read the two T/S-link bytes at the start of block (t, s) and decode them
/// (applying the 9000-series adjustment when relevant).
pub fn read_ts_link(geometry: &Geometry, buffer: &[u8], t: u16, s: u8) -> Result<Ts, Error> {
    let block = read_block(geometry, buffer, t, s)?;
    Ok(raw_to_ts(geometry, block[0], block[1]))
}

/// Write a T/S link `(next_t, next_s)` at the start of block (t, s),
/// applying the reverse adjustment when the geometry calls for it.
pub fn write_ts_link(geometry: &Geometry, buffer: &mut [u8], t: u16, s: u8, next: Ts) -> Result<(), Error> {
    let offset = checked_offset(geometry, buffer, t, s)?;
    let (raw_t, raw_s) = ts_to_raw(geometry, next);
    buffer[offset] = raw_t;
    buffer[offset + 1] = raw_s;
    Ok(())
}

fn checked_offset(geometry: &Geometry, buffer: &[u8], t: u16, s: u8) -> Result<usize, Error> {
    if t == 0 || t > geometry.track_count() || s as u16 >= geometry.sectors_per_track(t) {
        return Err(Error::new(ErrorKind::GeometryError {
            track: t,
            sector: s as u16,
        }));
    }
    let offset = byte_offset(geometry, t, s);
    if offset + BLOCK_SIZE > buffer.len() {
        return Err(Error::new(ErrorKind::GeometryError {
            track: t,
            sector: s as u16,
        }));
    }
    Ok(offset)
}
