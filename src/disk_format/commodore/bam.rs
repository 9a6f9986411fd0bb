//! The Block Availability Map: free-space bitmap, per-track free-sector
//! counts, and the write-preferred allocator.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::collections::BTreeSet;

use super::address::ts_to_raw;
use super::block::{read_block, write_block};
use super::geometry::{BamLocation, Geometry, Ts};
use crate::disk_format::sanity_check::SanityCheck;
use crate::error::{Error, ErrorKind};

/// The free-space record for one track: a free-sector count mirrored by a
/// bitmap where `map[i] == true` means sector `i` is free.
#[derive(Clone, Debug)]
pub struct BamEntry {
    /// Track number this entry describes.
    pub track: u16,
    /// Free-sector count; must equal `map`'s popcount.
    pub fsc: u8,
    /// Per-sector free bitmap, index == sector number.
    pub map: Vec<bool>,
}

impl SanityCheck for BamEntry {
    fn check(&self) -> bool {
        self.fsc as usize == self.map.iter().filter(|b| **b).count()
    }
}

/// The parsed Block Availability Map: one [`BamEntry`] per track.
#[derive(Clone, Debug)]
pub struct Bam {
    entries: Vec<BamEntry>,
}

impl Bam {
    fn entry(&self, track: u16) -> &BamEntry {
        &self.entries[(track - 1) as usize]
    }

    fn entry_mut(&mut self, track: u16) -> &mut BamEntry {
        &mut self.entries[(track - 1) as usize]
    }

    /// Iterate all per-track entries, in track order.
    pub fn entries(&self) -> &[BamEntry] {
        &self.entries
    }

    /// Is the sector at (t, s) marked free?
    pub fn block_available(&self, t: u16, s: u8) -> bool {
        self.entry(t).map[s as usize]
    }

    /// Total addressable block count (every sector on every track).
    pub fn blocks_total(&self) -> usize {
        self.entries.iter().map(|e| e.map.len()).sum()
    }

    /// Count of sectors currently marked free.
    pub fn blocks_free(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.map.iter().filter(|b| **b).count())
            .sum()
    }

    /// Mark every block in `blocks` used (`mark_used = true`) or free
    /// (`mark_used = false`). When marking used, the whole call is
    /// rejected without mutating anything if any target block is already
    /// used (double-allocation guard); freeing an already-free block is a
    /// harmless no-op for that block.
    pub fn mark_blocks(&mut self, blocks: &[Ts], mark_used: bool) -> Result<(), Error> {
        if mark_used {
            for ts in blocks {
                if !self.block_available(ts.track, ts.sector) {
                    return Err(Error::new(ErrorKind::DoubleAlloc {
                        track: ts.track,
                        sector: ts.sector as u16,
                    }));
                }
            }
        }
        for ts in blocks {
            let entry = self.entry_mut(ts.track);
            let idx = ts.sector as usize;
            let was_free = entry.map[idx];
            if mark_used {
                entry.map[idx] = false;
                if was_free {
                    entry.fsc -= 1;
                }
            } else {
                entry.map[idx] = true;
                if !was_free {
                    entry.fsc += 1;
                }
            }
        }
        Ok(())
    }

    /// Allocate `n` blocks using the write-preferred candidate order
    /// (§4.5): zones ordered to minimize head travel, header track
    /// excluded, sectors taken in index order within a track. Fails with
    /// `NoFreeBlocks` without mutating the map if fewer than `n` blocks
    /// are free.
    pub fn allocate(&mut self, geometry: &Geometry, n: usize) -> Result<Vec<Ts>, Error> {
        let mut chosen = Vec::with_capacity(n);
        'outer: for track in candidate_track_order(geometry) {
            for (sector, free) in self.entry(track).map.iter().enumerate() {
                if *free {
                    chosen.push(Ts::new(track, sector as u8));
                    if chosen.len() == n {
                        break 'outer;
                    }
                }
            }
        }
        if chosen.len() < n {
            return Err(Error::new(ErrorKind::NoFreeBlocks));
        }
        self.mark_blocks(&chosen, true)?;
        Ok(chosen)
    }

    /// Build a freshly initialized BAM: the entire header/directory track
    /// is reserved (real CBM DOS excludes it from free space wholesale,
    /// not just the one or two sectors the header and BAM actually
    /// occupy), plus any BAM sector that lives on a different track.
    pub fn initialize(geometry: &Geometry) -> Bam {
        let entries = (1..=geometry.track_count())
            .map(|t| {
                let spt = geometry.sectors_per_track(t) as usize;
                BamEntry {
                    track: t,
                    fsc: spt as u8,
                    map: vec![true; spt],
                }
            })
            .collect();
        let mut bam = Bam { entries };

        let mut reserved: BTreeSet<Ts> = BTreeSet::new();
        let hdr_spt = geometry.sectors_per_track(geometry.hdr_track);
        for s in 0..hdr_spt {
            reserved.insert(Ts::new(geometry.hdr_track, s as u8));
        }
        if geometry.bam_location != BamLocation::OnHeader {
            for pos in bam_chain_positions(geometry) {
                reserved.insert(pos);
            }
        }
        let reserved: Vec<Ts> = reserved.into_iter().collect();
        bam.mark_blocks(&reserved, true)
            .expect("a freshly-initialized BAM always has its reserved sectors free");
        bam
    }

    /// Parse the BAM out of `buffer` per `geometry`.
    pub fn parse(geometry: &Geometry, buffer: &[u8]) -> Result<Bam, Error> {
        let bam_sector_bytes = geometry.bam_sector_bytes();
        let mut entries: Vec<Option<BamEntry>> = vec![None; geometry.track_count() as usize];
        let mut track_cursor = 1u16;
        for pos in bam_chain_positions(geometry) {
            let block = read_block(geometry, buffer, pos.track, pos.sector)?;
            let mut offset = geometry.bam_label_offset;
            for _ in 0..geometry.tracks_per_bam_sector {
                if track_cursor > geometry.track_count() {
                    break;
                }
                if offset + 1 + bam_sector_bytes > block.len() {
                    break;
                }
                let fsc = block[offset];
                let spt = geometry.sectors_per_track(track_cursor);
                let map = (0..spt)
                    .map(|bit| {
                        let byte = block[offset + 1 + (bit as usize) / 8];
                        (byte >> (bit % 8)) & 1 == 1
                    })
                    .collect();
                entries[(track_cursor - 1) as usize] = Some(BamEntry {
                    track: track_cursor,
                    fsc,
                    map,
                });
                offset += 1 + bam_sector_bytes;
                track_cursor += 1;
            }
        }
        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                e.unwrap_or_else(|| {
                    let t = (i + 1) as u16;
                    let spt = geometry.sectors_per_track(t) as usize;
                    BamEntry {
                        track: t,
                        fsc: 0,
                        map: vec![false; spt],
                    }
                })
            })
            .collect();
        Ok(Bam { entries })
    }

    /// Serialize the BAM back into `buffer`. When `bam_interleave > 0`
    /// this also (re)writes the T/S-link bytes chaining each BAM sector to
    /// the next, clearing the final link to `(0, 0)`.
    pub fn sync(&self, geometry: &Geometry, buffer: &mut [u8]) -> Result<(), Error> {
        let bam_sector_bytes = geometry.bam_sector_bytes();
        let positions = bam_chain_positions(geometry);
        let mut track_cursor = 1u16;
        for (i, pos) in positions.iter().enumerate() {
            let mut block: [u8; 256] = read_block(geometry, buffer, pos.track, pos.sector)?
                .try_into()
                .expect("blocks are always 256 bytes");
            let mut offset = geometry.bam_label_offset;
            for _ in 0..geometry.tracks_per_bam_sector {
                if track_cursor > geometry.track_count() {
                    break;
                }
                let entry = self.entry(track_cursor);
                block[offset] = entry.fsc;
                for (bit, free) in entry.map.iter().enumerate() {
                    let byte_idx = offset + 1 + bit / 8;
                    if *free {
                        block[byte_idx] |= 1 << (bit % 8);
                    } else {
                        block[byte_idx] &= !(1 << (bit % 8));
                    }
                }
                offset += 1 + bam_sector_bytes;
                track_cursor += 1;
            }
            if geometry.bam_interleave > 0 {
                let next = positions.get(i + 1).copied().unwrap_or(Ts::new(0, 0));
                let (raw_t, raw_s) = ts_to_raw(geometry, next);
                block[0] = raw_t;
                block[1] = raw_s;
            }
            write_block(geometry, buffer, pos.track, pos.sector, &block)?;
        }
        Ok(())
    }
}

/// The (track, sector) of each of `geometry.bam_sectors` BAM sectors, in
/// order. Spread across a single track by `bam_interleave` for most
/// layouts; the 1571 `spills_over` layout jumps to the mirrored track on
/// the reverse side for its second sector.
fn bam_chain_positions(geometry: &Geometry) -> Vec<Ts> {
    let start = geometry.bam_position();
    let mut positions = Vec::with_capacity(geometry.bam_sectors as usize);
    match geometry.bam_location {
        BamLocation::SpillsOver => {
            let side_len = geometry.single_side_track_count();
            for k in 0..geometry.bam_sectors {
                if k == 0 {
                    positions.push(start);
                } else {
                    positions.push(Ts::new(start.track + side_len, 0));
                }
            }
        }
        _ => {
            let spt = geometry.sectors_per_track(start.track).max(1);
            for k in 0..geometry.bam_sectors {
                let sector = if geometry.bam_interleave > 0 {
                    (start.sector as u16 + k * geometry.bam_interleave) % spt
                } else {
                    start.sector as u16
                };
                positions.push(Ts::new(start.track, sector as u8));
            }
        }
    }
    positions
}

/// The write-preferred track visiting order from §4.5: zones arranged to
/// minimize head travel, with the header track always excluded.
fn candidate_track_order(geometry: &Geometry) -> Vec<u16> {
    let n = geometry.track_count();
    let mid = n / 2 + 1;
    let q1 = mid / 2;
    let q3 = 3 * q1;
    let ranges = [
        (q1, mid.saturating_sub(1)),
        (mid, q3.saturating_sub(1)),
        (1, q1.saturating_sub(1)),
        (q3, n),
    ];
    let mut order = Vec::with_capacity(n as usize);
    for (lo, hi) in ranges {
        if lo == 0 || hi == 0 || lo > hi {
            continue;
        }
        for t in lo..=hi.min(n) {
            if t >= 1 && t != geometry.hdr_track {
                order.push(t);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_format::commodore::geometry::Geometry;

    #[test]
    fn initialize_reserves_the_entire_header_track() {
        let g = Geometry::cbm_1541();
        let bam = Bam::initialize(&g);
        assert_eq!(bam.blocks_total(), 683);
        // Track 18 holds 19 sectors; all of them are excluded from free
        // space at format time, leaving the well-known 664 free blocks.
        assert_eq!(bam.blocks_free(), 664);
        for s in 0..19 {
            assert!(!bam.block_available(18, s));
        }
    }

    #[test]
    fn every_entry_passes_its_sanity_check() {
        let g = Geometry::cbm_1541();
        let bam = Bam::initialize(&g);
        for entry in bam.entries() {
            assert!(entry.check());
        }
    }

    #[test]
    fn allocate_then_mark_free_restores_bam_exactly() {
        let g = Geometry::cbm_1541();
        let mut bam = Bam::initialize(&g);
        let before = bam.blocks_free();
        let allocated = bam.allocate(&g, 10).unwrap();
        assert_eq!(allocated.len(), 10);
        assert_eq!(bam.blocks_free(), before - 10);
        bam.mark_blocks(&allocated, false).unwrap();
        assert_eq!(bam.blocks_free(), before);
    }

    #[test]
    fn allocation_excludes_the_header_track() {
        let g = Geometry::cbm_1541();
        let mut bam = Bam::initialize(&g);
        // 664 is the well-known free-block count for a freshly created
        // D64; every one of those blocks lives off track 18.
        let allocated = bam.allocate(&g, 664).unwrap();
        assert!(allocated.iter().all(|ts| ts.track != 18));
        assert!(bam.allocate(&g, 1).is_err());
    }

    #[test]
    fn allocating_more_than_available_fails_without_mutating() {
        let g = Geometry::cbm_1541();
        let mut bam = Bam::initialize(&g);
        let before = bam.blocks_free();
        assert!(bam.allocate(&g, before + 1).is_err());
        assert_eq!(bam.blocks_free(), before);
    }

    #[test]
    fn double_allocation_is_rejected_without_mutation() {
        let g = Geometry::cbm_1541();
        let mut bam = Bam::initialize(&g);
        let before = bam.blocks_free();
        assert!(bam.mark_blocks(&[Ts::new(18, 0)], true).is_err());
        assert_eq!(bam.blocks_free(), before);
    }

    #[test]
    fn parse_after_sync_round_trips() {
        let g = Geometry::cbm_1541();
        let mut buffer = vec![0u8; g.sector_count() * 256];
        let bam = Bam::initialize(&g);
        bam.sync(&g, &mut buffer).unwrap();
        let reparsed = Bam::parse(&g, &buffer).unwrap();
        assert_eq!(reparsed.blocks_free(), bam.blocks_free());
        for (a, b) in bam.entries().iter().zip(reparsed.entries().iter()) {
            assert_eq!(a.fsc, b.fsc);
            assert_eq!(a.map, b.map);
        }
    }
}
