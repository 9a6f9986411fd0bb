//! Byte offsets and the 9000-series "zone-stealing" link adjustment.
//!
//! Every other component reaches a byte inside the image through
//! [`byte_offset`], and every T/S link it reads or writes goes through
//! [`raw_to_ts`] / [`ts_to_raw`] first. No code path may address a block
//! using an unadjusted 9000-series link (§4.2 invariant).
#![warn(missing_docs)]
#![warn(unsafe_code)]
use super::geometry::{BamLocation, Geometry, Ts};

/// Byte offset of block (t, s) within the image's linear buffer.
pub fn byte_offset(geometry: &Geometry, t: u16, s: u8) -> usize {
    256 * geometry.get_sector_offset(t, s)
}

/// Decode a raw T/S link byte pair as read from the image into a logical
/// `Ts`, applying the 9000-series zone-stealing adjustment when the
/// geometry calls for it: `(T, S) -> (T >> 2, S & 0x1F)`.
pub fn raw_to_ts(geometry: &Geometry, raw_track: u8, raw_sector: u8) -> Ts {
    if geometry.bam_location == BamLocation::StealsFromZones {
        Ts::new((raw_track >> 2) as u16, raw_sector & 0x1F)
    } else {
        Ts::new(raw_track as u16, raw_sector)
    }
}

/// Inverse of [`raw_to_ts`]: pack a logical `Ts` back into the raw byte pair
/// that belongs on disk, promoting the top two bits of a 10-bit track back
/// into the sector byte for zone-stealing geometries.
pub fn ts_to_raw(geometry: &Geometry, ts: Ts) -> (u8, u8) {
    if geometry.bam_location == BamLocation::StealsFromZones {
        let track_lo = ((ts.track << 2) & 0xFF) as u8;
        let sector = (ts.sector & 0x1F) | (((ts.track >> 8) as u8) << 6);
        (track_lo, sector)
    } else {
        (ts.track as u8, ts.sector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_format::commodore::geometry::Geometry;

    fn zone_stealing_geometry() -> Geometry {
        Geometry::cbm_9030()
    }

    #[test]
    fn nine_thousand_series_link_decodes_top_bits_from_sector_byte() {
        let g = zone_stealing_geometry();
        // raw (0x83, 0xC1) -> track = 0x83 >> 2 = 32, sector = 0xC1 & 0x1F = 1
        let ts = raw_to_ts(&g, 0x83, 0xC1);
        assert_eq!(ts, Ts::new(32, 1));
    }

    #[test]
    fn nine_thousand_series_link_round_trips_within_six_bit_track_range() {
        // The (T >> 2, S & 0x1F) decode only recovers 6 bits of track from
        // the raw track byte, so only tracks < 64 round-trip losslessly;
        // see DESIGN.md's note on this being a flagged/uncertain area of
        // the format.
        let g = zone_stealing_geometry();
        let ts = Ts::new(32, 1);
        let (raw_t, raw_s) = ts_to_raw(&g, ts);
        assert_eq!((raw_t, raw_s), (0x80, 0x01));
        assert_eq!(raw_to_ts(&g, raw_t, raw_s), ts);
    }

    #[test]
    fn d64_link_is_unadjusted() {
        let g = Geometry::cbm_1541();
        assert_eq!(raw_to_ts(&g, 18, 1), Ts::new(18, 1));
        assert_eq!(ts_to_raw(&g, Ts::new(18, 1)), (18, 1));
    }
}
