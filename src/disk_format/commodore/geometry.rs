//! Parametric description of a CBM disk layout.
//!
//! Most of the numbers here come from the Commodore 1541 Disk Drive User's
//! Guide (September 1982) and from Inside Commodore DOS; the 8050/8250 and
//! 9000-series numbers are reconstructed from public track/sector tables
//! and should be treated as approximate (see `DESIGN.md`).
#![warn(missing_docs)]
#![warn(unsafe_code)]
use log::warn;

/// A contiguous run of tracks sharing the same sector count. `high_track ==
/// 0` marks an absent (unused) zone slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Zone {
    /// Last track (inclusive) in this zone.
    pub high_track: u16,
    /// Sectors per track in this zone. `0` means 256 unless the geometry
    /// is a zone-stealing (9000-series) layout, where it is literal.
    pub sectors_per_track: u16,
}

impl Zone {
    const ABSENT: Zone = Zone {
        high_track: 0,
        sectors_per_track: 0,
    };

    fn is_present(&self) -> bool {
        self.high_track != 0
    }
}

/// Where the Block Availability Map lives relative to the header track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BamLocation {
    /// BAM co-located on the header sector (1541-style).
    OnHeader = 0x00,
    /// BAM occupies the sectors immediately following the header sector on
    /// the same track (1581-style).
    FollowsHeader = 0x01,
    /// BAM occupies sector 0 of the track preceding the header track.
    TrackBeforeHeader = 0x02,
    /// BAM extends into the reverse side (1571-style).
    SpillsOver = 0x47,
    /// 9000-series: track is 10 bits, sector is 6 bits, with the top two
    /// bits of the sector byte promoted into the track byte of every
    /// T/S link.
    StealsFromZones = 0x5A,
}

impl BamLocation {
    /// Decode a raw location byte as read from an X64 custom geometry
    /// block. Unknown bytes fall back to `OnHeader` with a warning, since a
    /// disk must always have *some* location to look the BAM up at.
    pub fn from_byte(b: u8) -> BamLocation {
        match b {
            0x00 => BamLocation::OnHeader,
            0x01 => BamLocation::FollowsHeader,
            0x02 => BamLocation::TrackBeforeHeader,
            0x47 => BamLocation::SpillsOver,
            0x5A => BamLocation::StealsFromZones,
            other => {
                warn!("unknown BAM location byte 0x{:02X}, assuming on_hdr", other);
                BamLocation::OnHeader
            }
        }
    }

    /// The raw byte representation, used by the X64 custom geometry block.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A single (track, sector) coordinate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Ts {
    /// Track number, 1-based. 10 bits wide on zone-stealing geometries.
    pub track: u16,
    /// Sector number, 0-based.
    pub sector: u8,
}

impl Ts {
    /// Construct a coordinate.
    pub fn new(track: u16, sector: u8) -> Ts {
        Ts { track, sector }
    }

    /// The end-of-chain sentinel: track 0. The sector byte at that point
    /// holds the last valid offset in the final block, not a sector number.
    pub fn is_end_of_chain(self) -> bool {
        self.track == 0
    }
}

/// Immutable, parametric description of a CBM disk layout. One `Geometry`
/// value is shared (read-only) between an `Image` and every operation
/// acting on it; there is no global "current geometry" state (see
/// `DESIGN.md`'s note on the source's package-level geometry variable).
#[derive(Clone, Debug)]
pub struct Geometry {
    /// Format tag used for diagnostics and the X64 custom block, e.g. "D64".
    pub format_tag: String,
    /// Whether the media has two recordable sides (1571).
    pub double_sided: bool,
    /// Two-character DOS-type string, e.g. "2A".
    pub dos_type: [u8; 2],
    /// Track holding the header sector (and, for several layouts, the DIR
    /// and/or BAM).
    pub hdr_track: u16,
    /// Byte offset of the disk label within the header sector.
    pub hdr_label_offset: usize,
    /// Sector increment used when laying out directory blocks.
    pub dir_interleave: u16,
    /// Sector increment used when laying out file data blocks.
    pub file_interleave: u16,
    /// Byte offset of the BAM label/prefix within a BAM sector.
    pub bam_label_offset: usize,
    /// Up to four track zones, in ascending track order.
    pub zones: [Zone; 4],
    /// Sector increment used to chain multiple BAM sectors together.
    pub bam_interleave: u16,
    /// Where the BAM sector(s) live relative to `hdr_track`.
    pub bam_location: BamLocation,
    /// Number of BAM sectors.
    pub bam_sectors: u16,
    /// How many track rows one BAM sector covers.
    pub tracks_per_bam_sector: u16,
    /// Track containing the (optional) boot sector; 0 if none.
    pub boot_track: u16,
    /// Total track count. For single-sided media this equals the last
    /// zone's `high_track`; double-sided media (1571) mirror the same
    /// zone table onto a second pass of tracks, so this is recorded
    /// explicitly rather than inferred. See `DESIGN.md` for why the zone
    /// table is capped at four entries instead of one set per side.
    pub track_count_override: Option<u16>,
}

impl Geometry {
    /// Total track count.
    pub fn track_count(&self) -> u16 {
        self.track_count_override
            .unwrap_or_else(|| self.zones.iter().map(|z| z.high_track).max().unwrap_or(0))
    }

    /// The track count one physical side spans; double-sided layouts wrap
    /// `sectors_per_track` lookups onto this modulus.
    pub(crate) fn single_side_track_count(&self) -> u16 {
        self.zones.iter().map(|z| z.high_track).max().unwrap_or(1)
    }

    /// Sectors per track `t`, per the first zone whose `high_track >= t`
    /// (wrapping onto the first side for double-sided media). A
    /// `sectors_per_track == 0` in a non-zone-stealing zone means 256.
    pub fn sectors_per_track(&self, t: u16) -> u16 {
        let side_len = self.single_side_track_count();
        let t_eff = if self.double_sided && t > side_len {
            ((t - 1) % side_len) + 1
        } else {
            t
        };
        for zone in self.zones.iter() {
            if zone.is_present() && t_eff <= zone.high_track {
                return if zone.sectors_per_track == 0
                    && self.bam_location != BamLocation::StealsFromZones
                {
                    256
                } else {
                    zone.sectors_per_track
                };
            }
        }
        0
    }

    /// The largest `sectors_per_track` value across all zones.
    pub fn max_sectors_in_track(&self) -> u16 {
        self.zones
            .iter()
            .filter(|z| z.is_present())
            .map(|z| {
                if z.sectors_per_track == 0 && self.bam_location != BamLocation::StealsFromZones {
                    256
                } else {
                    z.sectors_per_track
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Total sector count across all allocatable tracks.
    pub fn sector_count(&self) -> usize {
        let mut total = 0usize;
        let side_len = self.single_side_track_count();
        let sides = if self.double_sided { 2 } else { 1 };
        let mut prev = 0u16;
        for zone in self.zones.iter() {
            if !zone.is_present() {
                continue;
            }
            let spt = if zone.sectors_per_track == 0 && self.bam_location != BamLocation::StealsFromZones
            {
                256
            } else {
                zone.sectors_per_track
            };
            total += (zone.high_track - prev) as usize * spt as usize;
            prev = zone.high_track;
        }
        debug_assert_eq!(prev, side_len);
        total * sides as usize
    }

    /// Bytes (excluding the FSC byte) one BAM sector devotes to a single
    /// track's bitmap: `ceil(max_sectors_in_track / 8)`.
    pub fn bam_sector_bytes(&self) -> usize {
        (self.max_sectors_in_track() as usize).div_ceil(8)
    }

    /// Total size in bytes of the serialized BAM bitmap area (all tracks).
    pub fn bam_size(&self) -> usize {
        self.track_count() as usize * (self.bam_sector_bytes() + 1)
    }

    /// The (track, sector) of the first BAM sector, computed from the BAM
    /// location policy.
    pub fn bam_position(&self) -> Ts {
        match self.bam_location {
            BamLocation::OnHeader => Ts::new(self.hdr_track, 0),
            BamLocation::FollowsHeader => Ts::new(self.hdr_track, 1),
            BamLocation::TrackBeforeHeader => Ts::new(self.hdr_track - 1, 0),
            BamLocation::SpillsOver => Ts::new(self.hdr_track, 0),
            BamLocation::StealsFromZones => Ts::new(self.hdr_track - 1, 0),
        }
    }

    /// First directory sector offset (sector number) on the header track.
    pub fn dir_sector_offset(&self) -> u16 {
        if self.bam_location == BamLocation::FollowsHeader {
            1 + self.bam_sectors
        } else {
            1
        }
    }

    /// Linear sector index of (t, s): the cumulative sum of zone extents
    /// up to (but not including) track `t`, plus `s`.
    pub fn get_sector_offset(&self, t: u16, s: u8) -> usize {
        let side_len = self.single_side_track_count();
        let (side, t_in_side) = if self.double_sided && t > side_len {
            (1usize, ((t - 1) % side_len) + 1)
        } else {
            (0usize, t)
        };
        let mut offset = side * self.sector_count() / if self.double_sided { 2 } else { 1 };
        let mut track = 1u16;
        for zone in self.zones.iter() {
            if !zone.is_present() {
                continue;
            }
            let spt = if zone.sectors_per_track == 0 && self.bam_location != BamLocation::StealsFromZones
            {
                256
            } else {
                zone.sectors_per_track
            };
            if t_in_side <= zone.high_track {
                offset += (t_in_side - track) as usize * spt as usize;
                return offset + s as usize;
            }
            offset += (zone.high_track - track + 1) as usize * spt as usize;
            track = zone.high_track + 1;
        }
        offset + s as usize
    }

    /// Pick a geometry from a filename extension, per the standard
    /// extension-to-drive-family mapping. Returns `None` for `.x64`
    /// (handled separately by the container module) and unknown
    /// extensions.
    pub fn from_extension(ext: &str) -> Option<Geometry> {
        match ext.to_ascii_lowercase().as_str() {
            "d64" => Some(Geometry::cbm_1541()),
            "d71" => Some(Geometry::cbm_1571()),
            "d81" => Some(Geometry::cbm_1581()),
            "d67" | "d40" => Some(Geometry::cbm_2040()),
            "d80" => Some(Geometry::cbm_8050()),
            "d82" => Some(Geometry::cbm_8250()),
            "d93" => Some(Geometry::cbm_9030()),
            "d96" => Some(Geometry::cbm_9060()),
            "d99" => Some(Geometry::cbm_9090()),
            _ => None,
        }
    }

    /// The native file extension for this geometry, or `None` for a custom
    /// (X64-only) layout.
    pub fn extension(&self) -> Option<&'static str> {
        match self.format_tag.as_str() {
            "D64" => Some("d64"),
            "D71" => Some("d71"),
            "D81" => Some("d81"),
            "D40" => Some("d40"),
            "D80" => Some("d80"),
            "D82" => Some("d82"),
            "D93" => Some("d93"),
            "D96" => Some("d96"),
            "D99" => Some("d99"),
            _ => None,
        }
    }

    fn zones4(list: &[(u16, u16)]) -> [Zone; 4] {
        let mut z = [Zone::ABSENT; 4];
        for (i, &(high_track, spt)) in list.iter().take(4).enumerate() {
            z[i] = Zone {
                high_track,
                sectors_per_track: spt,
            };
        }
        z
    }

    /// 1541 (VIC-1540/1541 Single Drive Floppy Disk), 35 tracks, 683 blocks.
    pub fn cbm_1541() -> Geometry {
        Geometry {
            format_tag: "D64".to_string(),
            double_sided: false,
            dos_type: *b"2A",
            hdr_track: 18,
            hdr_label_offset: 0x90,
            dir_interleave: 3,
            file_interleave: 10,
            bam_label_offset: 4,
            zones: Self::zones4(&[(17, 21), (24, 19), (30, 18), (35, 17)]),
            bam_interleave: 0,
            bam_location: BamLocation::OnHeader,
            bam_sectors: 1,
            tracks_per_bam_sector: 35,
            boot_track: 0,
            track_count_override: None,
        }
    }

    /// 1571, double-sided 1541. The reverse side's BAM is reconstructed by
    /// wrapping the single-side zone table (see `track_count_override`);
    /// `DESIGN.md` records this as a known simplification, matching the
    /// format's own flagged "BAM may not save correctly" warning.
    pub fn cbm_1571() -> Geometry {
        Geometry {
            format_tag: "D71".to_string(),
            double_sided: true,
            dos_type: *b"2A",
            hdr_track: 18,
            hdr_label_offset: 0x90,
            dir_interleave: 3,
            file_interleave: 10,
            bam_label_offset: 4,
            zones: Self::zones4(&[(17, 21), (24, 19), (30, 18), (35, 17)]),
            bam_interleave: 0,
            bam_location: BamLocation::SpillsOver,
            bam_sectors: 2,
            tracks_per_bam_sector: 35,
            boot_track: 0,
            track_count_override: Some(70),
        }
    }

    /// 1581, 80 tracks, uniform 40 sectors/track.
    pub fn cbm_1581() -> Geometry {
        Geometry {
            format_tag: "D81".to_string(),
            double_sided: false,
            dos_type: *b"3D",
            hdr_track: 40,
            hdr_label_offset: 0x04,
            dir_interleave: 1,
            file_interleave: 1,
            bam_label_offset: 0,
            zones: Self::zones4(&[(80, 40), (0, 0), (0, 0), (0, 0)]),
            bam_interleave: 1,
            bam_location: BamLocation::FollowsHeader,
            bam_sectors: 2,
            tracks_per_bam_sector: 40,
            boot_track: 40,
            track_count_override: None,
        }
    }

    /// 2040/3040/4040 IEEE-488 dual drive; 35-track layout matching 1541.
    pub fn cbm_2040() -> Geometry {
        Geometry {
            format_tag: "D40".to_string(),
            double_sided: false,
            dos_type: *b"2C",
            hdr_track: 18,
            hdr_label_offset: 0x90,
            dir_interleave: 3,
            file_interleave: 10,
            bam_label_offset: 4,
            zones: Self::zones4(&[(17, 21), (24, 19), (30, 18), (35, 17)]),
            bam_interleave: 0,
            bam_location: BamLocation::OnHeader,
            bam_sectors: 1,
            tracks_per_bam_sector: 35,
            boot_track: 0,
            track_count_override: None,
        }
    }

    /// 8050, 77 tracks.
    pub fn cbm_8050() -> Geometry {
        Geometry {
            format_tag: "D80".to_string(),
            double_sided: false,
            dos_type: *b"2C",
            hdr_track: 39,
            hdr_label_offset: 0x06,
            dir_interleave: 1,
            file_interleave: 1,
            bam_label_offset: 6,
            zones: Self::zones4(&[(39, 29), (53, 27), (64, 25), (77, 23)]),
            bam_interleave: 1,
            bam_location: BamLocation::TrackBeforeHeader,
            bam_sectors: 2,
            tracks_per_bam_sector: 50,
            boot_track: 0,
            track_count_override: None,
        }
    }

    /// 8250/SFD-1001, double-sided 8050 (two 77-track sides).
    pub fn cbm_8250() -> Geometry {
        let mut g = Geometry::cbm_8050();
        g.format_tag = "D82".to_string();
        g.double_sided = true;
        g.track_count_override = Some(154);
        g
    }

    /// 9000-series (SFD-9000/8x/9060/9090), zone-stealing 10-bit track
    /// encoding. Parameters are an approximate reconstruction; see
    /// `DESIGN.md`.
    fn cbm_9000_series(format_tag: &str, tracks: u16) -> Geometry {
        Geometry {
            format_tag: format_tag.to_string(),
            double_sided: false,
            dos_type: *b"4A",
            hdr_track: 77,
            hdr_label_offset: 0x06,
            dir_interleave: 1,
            file_interleave: 1,
            bam_label_offset: 6,
            zones: Self::zones4(&[(tracks, 32), (0, 0), (0, 0), (0, 0)]),
            bam_interleave: 1,
            bam_location: BamLocation::StealsFromZones,
            bam_sectors: 4,
            tracks_per_bam_sector: tracks / 4 + 1,
            boot_track: 0,
            track_count_override: Some(tracks),
        }
    }

    /// 9030, smallest of the 9000-series.
    pub fn cbm_9030() -> Geometry {
        Geometry::cbm_9000_series("D93", 154)
    }

    /// 9060.
    pub fn cbm_9060() -> Geometry {
        Geometry::cbm_9000_series("D96", 154)
    }

    /// 9090, the largest 9000-series unit.
    pub fn cbm_9090() -> Geometry {
        Geometry::cbm_9000_series("D99", 154)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn d64_sector_count_matches_683_blocks() {
        let g = Geometry::cbm_1541();
        assert_eq!(g.sector_count(), 683);
        assert_eq!(g.track_count(), 35);
    }

    #[test]
    fn d64_get_sector_offset_is_in_range_everywhere() {
        let g = Geometry::cbm_1541();
        for t in 1..=g.track_count() {
            for s in 0..g.sectors_per_track(t) as u8 {
                assert!(g.get_sector_offset(t, s) < g.sector_count());
            }
        }
    }

    #[test]
    fn d64_bam_position_is_track18_sector0() {
        let g = Geometry::cbm_1541();
        assert_eq!(g.bam_position(), Ts::new(18, 0));
        assert_eq!(g.dir_sector_offset(), 1);
    }

    #[test]
    fn extension_selection_matches_device_family() {
        assert_eq!(Geometry::from_extension("D64").unwrap().format_tag, "D64");
        assert_eq!(Geometry::from_extension("d71").unwrap().format_tag, "D71");
        assert!(Geometry::from_extension("x64").is_none());
    }

    #[test]
    fn d71_wraps_zone_table_onto_second_side() {
        let g = Geometry::cbm_1571();
        assert_eq!(g.sectors_per_track(1), g.sectors_per_track(36));
        assert_eq!(g.sectors_per_track(35), g.sectors_per_track(70));
        assert_eq!(g.track_count(), 70);
    }
}
