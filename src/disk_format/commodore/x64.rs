//! The X64 container: a fixed 64-byte header wrapping a raw disk image,
//! letting a custom geometry travel with the data instead of being
//! inferred from a file extension.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use log::warn;
use nom::bytes::complete::{tag, take};
use nom::number::complete::le_u8;
use nom::sequence::tuple;
use nom::IResult;

use super::geometry::{BamLocation, Geometry, Zone};
use crate::error::Error;

/// The four-byte magic every X64 container starts with.
pub const SIGNATURE: [u8; 4] = [0x43, 0x15, 0x41, 0x64];

/// Size in bytes of the fixed header, before the wrapped image's own data
/// begins.
pub const HEADER_SIZE: usize = 64;

/// Device byte marking a custom (in-header) geometry rather than one of
/// the canonical drive families.
pub const DEVICE_CUSTOM: u8 = 0xFF;

const GEOMETRY_BLOCK_OFFSET: usize = 10;
const GEOMETRY_BLOCK_SIZE: usize = 22;

/// Canonical device byte for each drive family; `DEVICE_CUSTOM` for a
/// geometry with no native file extension.
pub fn device_byte(format_tag: &str) -> u8 {
    match format_tag {
        "D64" => 0x00,
        "D71" => 0x05,
        "D81" => 0x08,
        "D40" => 0x11,
        "D80" => 0x20,
        "D82" => 0x31,
        "D93" => 0x40,
        "D96" => 0x41,
        "D99" => 0x42,
        _ => DEVICE_CUSTOM,
    }
}

fn geometry_from_device_byte(device: u8) -> Option<Geometry> {
    match device {
        0x00 | 0x01 => Some(Geometry::cbm_1541()),
        0x05 => Some(Geometry::cbm_1571()),
        0x08 => Some(Geometry::cbm_1581()),
        0x11 => Some(Geometry::cbm_2040()),
        0x20 => Some(Geometry::cbm_8050()),
        0x31 => Some(Geometry::cbm_8250()),
        0x40 => Some(Geometry::cbm_9030()),
        0x41 => Some(Geometry::cbm_9060()),
        0x42 => Some(Geometry::cbm_9090()),
        _ => None,
    }
}

/// Pack a two-character DOS-type string (always hex-digit-shaped, e.g.
/// `"2A"`, `"3D"`) into the single byte the X64 header devotes to it.
fn dos_type_to_byte(dos_type: [u8; 2]) -> u8 {
    let hi = (dos_type[0] as char).to_digit(16).unwrap_or(0);
    let lo = (dos_type[1] as char).to_digit(16).unwrap_or(0);
    ((hi << 4) | lo) as u8
}

fn dos_type_from_byte(b: u8) -> [u8; 2] {
    fn hex_char(nibble: u8) -> u8 {
        match nibble {
            0..=9 => b'0' + nibble,
            _ => b'A' + (nibble - 10),
        }
    }
    [hex_char(b >> 4), hex_char(b & 0x0F)]
}

/// The fixed fields of an X64 header, independent of the custom geometry
/// block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X64Header {
    /// Container format major version.
    pub version_major: u8,
    /// Container format minor version.
    pub version_minor: u8,
    /// Canonical device byte, or [`DEVICE_CUSTOM`]; see [`device_byte`].
    pub device: u8,
    /// Track count of the wrapped image, as recorded by the writer.
    pub max_tracks: u8,
    /// Number of recordable sides, 1 or 2.
    pub sides: u8,
    /// Whether a per-sector error-info table follows the data area. Read
    /// but not acted on (see the crate's non-goals).
    pub error_data_present: bool,
}

/// Check whether `buffer` begins with the X64 signature.
pub fn is_x64(buffer: &[u8]) -> bool {
    buffer.len() >= HEADER_SIZE && buffer[0..4] == SIGNATURE
}

/// Parse the six fixed single-byte fields that follow the signature
/// (`version_major version_minor device max_tracks sides error_data_present`)
/// as a `nom` combinator pipeline, the same style the teacher uses for
/// every other on-disk field group it parses.
fn fixed_header_fields(input: &[u8]) -> IResult<&[u8], X64Header> {
    let (input, _) = tag(&SIGNATURE[..])(input)?;
    let (input, (version_major, version_minor, device, max_tracks, sides, error_byte)) =
        tuple((le_u8, le_u8, le_u8, le_u8, le_u8, le_u8))(input)?;
    Ok((
        input,
        X64Header {
            version_major,
            version_minor,
            device,
            max_tracks,
            sides,
            error_data_present: error_byte != 0,
        },
    ))
}

/// Parse the fixed header. For a canonical `device` byte this looks the
/// drive family's geometry up directly (taking only the DOS-type byte out
/// of the geometry block); for `DEVICE_CUSTOM` the full 22-byte custom
/// geometry parameter block (§6) is decoded.
pub fn parse(buffer: &[u8]) -> Result<(X64Header, Geometry, &[u8]), Error> {
    let (rest, header) = fixed_header_fields(buffer)?;
    let (rest, block): (&[u8], &[u8]) = take(GEOMETRY_BLOCK_SIZE)(rest)?;
    let mut geometry = match geometry_from_device_byte(header.device) {
        Some(g) => g,
        None => {
            if header.device != DEVICE_CUSTOM {
                warn!("unknown X64 device byte 0x{:02X}, decoding as custom", header.device);
            }
            custom_geometry_from_block(block)
        }
    };
    geometry.dos_type = dos_type_from_byte(block[0]);
    geometry.format_tag = if header.device == DEVICE_CUSTOM {
        "X64".to_string()
    } else {
        geometry.format_tag
    };
    let reserved_len = HEADER_SIZE - 4 - 6 - GEOMETRY_BLOCK_SIZE;
    let (rest, _reserved): (&[u8], &[u8]) = take(reserved_len)(rest)?;
    Ok((header, geometry, rest))
}

fn raw_zone(block: &[u8], offset: usize, bam_location: BamLocation) -> Zone {
    let mut high_track = block[offset] as u16;
    let mut spt = block[offset + 1] as u16;
    if bam_location == BamLocation::StealsFromZones {
        high_track += ((spt >> 6) as u16) << 8;
        spt &= 0x3F;
    }
    Zone { high_track, sectors_per_track: spt }
}

fn custom_geometry_from_block(block: &[u8]) -> Geometry {
    let hdr_track = block[1] as u16;
    let bam_location = BamLocation::from_byte(block[15]);
    Geometry {
        format_tag: "X64".to_string(),
        double_sided: false,
        dos_type: dos_type_from_byte(block[0]),
        hdr_track,
        hdr_label_offset: block[2] as usize,
        dir_interleave: block[3] as u16,
        file_interleave: block[4] as u16,
        bam_label_offset: block[5] as usize,
        zones: [
            raw_zone(block, 6, bam_location),
            raw_zone(block, 8, bam_location),
            raw_zone(block, 10, bam_location),
            raw_zone(block, 12, bam_location),
        ],
        bam_interleave: block[14] as u16,
        bam_location,
        bam_sectors: block[16] as u16,
        tracks_per_bam_sector: block[17] as u16,
        boot_track: block[21] as u16,
        track_count_override: None,
    }
}

/// Serialize `geometry` and `data` into a complete X64 container. Canonical
/// geometries (those with a native extension) are written with their
/// proper device byte and a geometry block carrying only the DOS-type
/// byte; custom geometries use `DEVICE_CUSTOM` and the full 22-byte block.
pub fn build(geometry: &Geometry, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&SIGNATURE);
    out[4] = 1;
    out[5] = 1;
    let device = device_byte(&geometry.format_tag);
    out[6] = device;
    out[7] = geometry.track_count().min(255) as u8;
    out[8] = if geometry.double_sided { 2 } else { 1 };
    out[9] = 0;
    let block_start = GEOMETRY_BLOCK_OFFSET;
    out[block_start] = dos_type_to_byte(geometry.dos_type);
    if device == DEVICE_CUSTOM {
        out[block_start + 1] = geometry.hdr_track as u8;
        out[block_start + 2] = geometry.hdr_label_offset as u8;
        out[block_start + 3] = geometry.dir_interleave as u8;
        out[block_start + 4] = geometry.file_interleave as u8;
        out[block_start + 5] = geometry.bam_label_offset as u8;
        for (i, zone) in geometry.zones.iter().enumerate() {
            let (high_track, spt) = if geometry.bam_location == BamLocation::StealsFromZones {
                (
                    (zone.high_track & 0xFF) as u8,
                    (zone.sectors_per_track & 0x3F) as u8 | (((zone.high_track >> 8) as u8) << 6),
                )
            } else {
                (zone.high_track as u8, zone.sectors_per_track as u8)
            };
            out[block_start + 6 + i * 2] = high_track;
            out[block_start + 7 + i * 2] = spt;
        }
        out[block_start + 14] = geometry.bam_interleave as u8;
        out[block_start + 15] = geometry.bam_location.to_byte();
        out[block_start + 16] = geometry.bam_sectors as u8;
        out[block_start + 17] = geometry.tracks_per_bam_sector as u8;
        out[block_start + 21] = geometry.boot_track as u8;
    }
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_x64_buffer_is_rejected() {
        let buffer = vec![0u8; 64];
        assert!(parse(&buffer).is_err());
    }

    #[test]
    fn canonical_geometry_round_trips_by_device_byte() {
        let g = Geometry::cbm_1541();
        let data = vec![0xEE; g.sector_count() * 256];
        let container = build(&g, &data);
        assert!(is_x64(&container));
        let (header, parsed, payload) = parse(&container).unwrap();
        assert_eq!(header.device, 0x00);
        assert_eq!(parsed.hdr_track, g.hdr_track);
        assert_eq!(parsed.dos_type, g.dos_type);
        assert_eq!(payload.len(), data.len());
    }

    fn weird_custom_geometry() -> Geometry {
        // A layout matching none of the canonical drive families, so
        // `device_byte` has no choice but to fall back to `DEVICE_CUSTOM`
        // and carry every parameter in the 22-byte block (spec.md S5).
        Geometry {
            format_tag: "X64".to_string(),
            double_sided: false,
            dos_type: *b"3A",
            hdr_track: 1,
            hdr_label_offset: 0,
            dir_interleave: 1,
            file_interleave: 11,
            bam_label_offset: 4,
            zones: [
                Zone { high_track: 35, sectors_per_track: 17 },
                Zone { high_track: 0, sectors_per_track: 0 },
                Zone { high_track: 0, sectors_per_track: 0 },
                Zone { high_track: 0, sectors_per_track: 0 },
            ],
            bam_interleave: 0,
            bam_location: BamLocation::OnHeader,
            bam_sectors: 0,
            tracks_per_bam_sector: 0,
            boot_track: 0,
            track_count_override: None,
        }
    }

    #[test]
    fn custom_geometry_round_trips_through_the_22_byte_block() {
        let g = weird_custom_geometry();
        assert_eq!(device_byte(&g.format_tag), DEVICE_CUSTOM);
        let data = vec![0x11u8; 100];
        let container = build(&g, &data);
        let (header, parsed, payload) = parse(&container).unwrap();
        assert_eq!(header.device, DEVICE_CUSTOM);
        assert_eq!(parsed.hdr_track, 1);
        assert_eq!(parsed.dos_type, *b"3A");
        assert_eq!(parsed.dir_interleave, 1);
        assert_eq!(parsed.file_interleave, 11);
        assert_eq!(parsed.zones[0], g.zones[0]);
        assert_eq!(parsed.bam_location, g.bam_location);
        assert_eq!(payload, data.as_slice());
    }

    #[test]
    fn dos_type_hex_pair_round_trips() {
        assert_eq!(dos_type_from_byte(dos_type_to_byte(*b"2A")), *b"2A");
        assert_eq!(dos_type_from_byte(dos_type_to_byte(*b"3D")), *b"3D");
    }
}
