//! The directory: 32-byte entries, linked across blocks on the header
//! track, parsed, allocated, renamed and resynced.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use super::bam::Bam;
use super::block::{read_block, write_block, write_ts_link};
use super::chain::build_chain;
use super::geometry::{BamLocation, Geometry, Ts};
use crate::error::{Error, ErrorKind};
use crate::petscii;
use crate::serialize::{bytes_to_little_endian_word, little_endian_word_to_bytes, Serializer};

/// File type byte: entry is a scratched/deleted slot.
pub const FILE_TYPE_DEL: u8 = 0x80;
/// File type byte: sequential file.
pub const FILE_TYPE_SEQ: u8 = 0x81;
/// File type byte: program file.
pub const FILE_TYPE_PRG: u8 = 0x82;
/// File type byte: user file.
pub const FILE_TYPE_USR: u8 = 0x83;
/// File type byte: relative file.
pub const FILE_TYPE_REL: u8 = 0x84;
/// File type byte: CBM native partition.
pub const FILE_TYPE_CBM: u8 = 0x85;
/// File type byte: subdirectory.
pub const FILE_TYPE_DIR: u8 = 0x86;

/// One 32-byte directory slot, parsed or about to be written.
#[derive(Clone, Debug, Default)]
pub struct DirEntry {
    /// 0 for a free/unused slot; one of the `FILE_TYPE_*` constants for an
    /// active entry.
    pub file_type: u8,
    /// Track of the file's first data block.
    pub first_track: u16,
    /// Sector of the file's first data block.
    pub first_sector: u8,
    /// Raw PETSCII filename bytes, 16 bytes, 0xA0-padded.
    pub filename_raw: [u8; 16],
    /// ASCII projection of the filename.
    pub filename: String,
    /// REL side-sector track, else 0.
    pub rel_side_track: u8,
    /// REL side-sector sector, else 0.
    pub rel_side_sector: u8,
    /// Non-REL: bytes used in the file's final block. REL: record length.
    pub lsu: u8,
    /// Full year (1900-2155); reduced mod-1900 only at serialization time.
    pub year: u16,
    /// Month, 1-12.
    pub month: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Hour, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
    /// Block count.
    pub blocks: u16,
}

impl DirEntry {
    fn is_free_slot(&self) -> bool {
        self.file_type == 0 && self.blocks == 0
    }

    fn parse(bytes: &[u8]) -> DirEntry {
        let mut filename_raw = [0xA0u8; 16];
        filename_raw.copy_from_slice(&bytes[5..21]);
        DirEntry {
            file_type: bytes[2],
            first_track: bytes[3] as u16,
            first_sector: bytes[4],
            filename: petscii::a0_to_32(&filename_raw),
            filename_raw,
            rel_side_track: bytes[21],
            rel_side_sector: bytes[22],
            lsu: bytes[23],
            year: bytes[25] as u16 + 1900,
            month: bytes[26],
            day: bytes[27],
            hour: bytes[28],
            minute: bytes[29],
            blocks: bytes_to_little_endian_word(bytes[30], bytes[31]),
        }
    }

    /// Pack this entry's 30-byte payload (everything but the leading T/S
    /// link) per §4.7: `type t s name(16) side_t side_s lsu 00 year month
    /// day hour minute size_lo size_hi`.
    fn pack_into(&self, slot: &mut [u8]) {
        slot[2] = self.file_type;
        slot[3] = self.first_track as u8;
        slot[4] = self.first_sector;
        slot[5..21].copy_from_slice(&self.filename_raw);
        slot[21] = self.rel_side_track;
        slot[22] = self.rel_side_sector;
        slot[23] = self.lsu;
        slot[24] = 0x00;
        let year_byte = if self.year >= 1900 {
            ((self.year - 1900) % 256) as u8
        } else {
            (self.year % 256) as u8
        };
        slot[25] = year_byte;
        slot[26] = self.month;
        slot[27] = self.day;
        slot[28] = self.hour;
        slot[29] = self.minute;
        let size = little_endian_word_to_bytes(self.blocks);
        slot[30] = size[0];
        slot[31] = size[1];
    }
}

impl<'a> Serializer<'a> for DirEntry {
    /// The entry's 32-byte on-disk representation, leading T/S-link bytes
    /// zeroed (those two bytes only carry meaning for slot 0 of a block,
    /// where [`Directory::sync`] overwrites them with the real chain link).
    fn as_vec(&'a self) -> Result<Vec<u8>, Error> {
        let mut slot = [0u8; 32];
        self.pack_into(&mut slot);
        Ok(slot.to_vec())
    }
}

/// The parsed directory: a flat, 8-entries-per-block array. Slot `i`'s
/// physical location is computed deterministically (see
/// [`entry_location`]) rather than tracked per-entry.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    /// Every slot, free or active, in on-disk order.
    pub entries: Vec<DirEntry>,
}

impl Directory {
    /// Parse the directory chain starting at the header track's first
    /// directory sector.
    pub fn parse(geometry: &Geometry, buffer: &[u8]) -> Result<Directory, Error> {
        let chain = build_chain(
            geometry,
            buffer,
            geometry.hdr_track,
            geometry.dir_sector_offset() as u8,
            None,
        )?;
        let mut entries = Vec::with_capacity(chain.len() * 8);
        for ts in &chain {
            let block = read_block(geometry, buffer, ts.track, ts.sector)?;
            for slot in 0..8 {
                let off = slot * 32;
                entries.push(DirEntry::parse(&block[off..off + 32]));
            }
        }
        Ok(Directory { entries })
    }

    /// Blocks currently in use (highest occupied block index + 1), i.e.
    /// how many physical directory sectors are needed to hold every entry
    /// that isn't a genuinely free slot.
    fn blocks_in_use(&self) -> usize {
        match self
            .entries
            .iter()
            .rposition(|e| !e.is_free_slot())
        {
            Some(last) => last / 8 + 1,
            None => 1,
        }
    }

    /// Find the first active entry (`file_type > low_type`) whose filename
    /// matches `name`, returning its 1-based index. `low_type` is normally
    /// `FILE_TYPE_DEL` so that scratched entries never match.
    pub fn find_dir_entry(&self, name: &str, low_type: u8) -> Option<usize> {
        let target = name.to_ascii_uppercase();
        self.entries
            .iter()
            .position(|e| e.file_type > low_type && e.filename == target)
            .map(|i| i + 1)
    }

    /// Reserve a directory slot for a new file named `name`: rejects a
    /// name collision against any active entry, otherwise returns the
    /// 0-based index of the first free (`type == 0, blocks == 0`) slot,
    /// growing the directory by one 8-slot block (and reserving that
    /// block in `bam`) if none is free.
    pub fn alloc_dir_entry(&mut self, geometry: &Geometry, bam: &mut Bam, name: &str) -> Result<usize, Error> {
        if self.find_dir_entry(name, FILE_TYPE_DEL).is_some() {
            return Err(Error::new(ErrorKind::NameExists(name.to_string())));
        }
        if let Some(idx) = self.entries.iter().position(DirEntry::is_free_slot) {
            return Ok(idx);
        }
        let new_block_index = self.blocks_in_use();
        if new_block_index as u16 >= geometry.sectors_per_track(geometry.hdr_track) {
            return Err(Error::new(ErrorKind::NoFreeDirEntry));
        }
        let ts = entry_location(geometry, new_block_index * 8);
        // The header track is reserved in full at format time, so this
        // sector is already marked used; only a not-yet-reserved layout
        // needs the explicit mark here.
        if bam.block_available(ts.track, ts.sector) {
            bam.mark_blocks(&[ts], true)?;
        }
        let new_index = self.entries.len();
        for _ in 0..8 {
            self.entries.push(DirEntry::default());
        }
        Ok(new_index)
    }

    /// Write a complete entry into slot `idx`, transitioning it from free
    /// or reserved to active.
    #[allow(clippy::too_many_arguments)]
    pub fn write_dir_entry(
        &mut self,
        idx: usize,
        name: &str,
        file_type: u8,
        first_track: u16,
        first_sector: u8,
        lsu: u8,
        (year, month, day, hour, minute): (u16, u8, u8, u8, u8),
        blocks: u16,
    ) {
        let filename_raw: [u8; 16] = petscii::to_a0(name, 16).try_into().unwrap();
        let entry = &mut self.entries[idx];
        entry.file_type = file_type;
        entry.first_track = first_track;
        entry.first_sector = first_sector;
        entry.filename = petscii::a0_to_32(&filename_raw);
        entry.filename_raw = filename_raw;
        entry.lsu = lsu;
        entry.year = year;
        entry.month = month;
        entry.day = day;
        entry.hour = hour;
        entry.minute = minute;
        entry.blocks = blocks;
    }

    /// Locate `old_name` and overwrite its filename field in place. The
    /// caller must still call [`Directory::sync`] to commit the change.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<(), Error> {
        let idx = self
            .find_dir_entry(old_name, FILE_TYPE_DEL)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(old_name.to_string())))?
            - 1;
        let filename_raw: [u8; 16] = petscii::to_a0(new_name, 16).try_into().unwrap();
        self.entries[idx].filename_raw = filename_raw;
        self.entries[idx].filename = petscii::a0_to_32(&filename_raw);
        Ok(())
    }

    /// Create a subdirectory named `name`: allocates one data block,
    /// reserves a `FILE_TYPE_DIR` slot pointing at it, and formats that
    /// block as a one-entry directory holding a `..` back-reference to
    /// the parent directory's first block.
    pub fn mkdir(&mut self, geometry: &Geometry, bam: &mut Bam, buffer: &mut [u8], name: &str) -> Result<(), Error> {
        let ts = bam.allocate(geometry, 1)?[0];
        let idx = match self.alloc_dir_entry(geometry, bam, name) {
            Ok(idx) => idx,
            Err(e) => {
                bam.mark_blocks(&[ts], false)?;
                return Err(e);
            }
        };
        self.write_dir_entry(idx, name, FILE_TYPE_DIR, ts.track, ts.sector, 2, (1900, 1, 1, 0, 0), 1);

        let mut block = [0u8; 256];
        let mut back_ref = DirEntry {
            file_type: FILE_TYPE_DIR,
            first_track: geometry.hdr_track,
            first_sector: geometry.dir_sector_offset() as u8,
            ..Default::default()
        };
        let filename_raw: [u8; 16] = petscii::to_a0("..", 16).try_into().unwrap();
        back_ref.filename = petscii::a0_to_32(&filename_raw);
        back_ref.filename_raw = filename_raw;
        back_ref.blocks = 1;
        back_ref.pack_into(&mut block[0..32]);
        // The block's own T/S link (bytes 0-1, shared with entry 0's
        // leading two bytes) terminates immediately: this is a one-entry
        // directory.
        block[0] = 0;
        block[1] = 1;
        write_block(geometry, buffer, ts.track, ts.sector, &block)
    }

    /// Mark an entry deleted in place (`file_type = 0`); its blocks remain
    /// allocated in BAM as a tombstone until a BAM revalidation pass or a
    /// future allocation reclaims the slot.
    pub fn delete(&mut self, idx: usize) {
        self.entries[idx].file_type = 0;
    }

    /// Write every occupied directory block back into `buffer`, chaining
    /// consecutive blocks' T/S links and reserving freshly-needed blocks
    /// in `bam`.
    pub fn sync(&self, geometry: &Geometry, buffer: &mut [u8], bam: &mut Bam) -> Result<(), Error> {
        let blocks = self.blocks_in_use();
        let positions: Vec<Ts> = (0..blocks)
            .map(|b| entry_location(geometry, b * 8))
            .collect();
        for ts in &positions {
            if bam.block_available(ts.track, ts.sector) {
                bam.mark_blocks(&[*ts], true)?;
            }
        }
        for (b, ts) in positions.iter().enumerate() {
            let mut block: [u8; 256] = read_block(geometry, buffer, ts.track, ts.sector)?
                .try_into()
                .expect("blocks are always 256 bytes");
            for slot in 0..8 {
                let entry_idx = b * 8 + slot;
                if entry_idx < self.entries.len() {
                    self.entries[entry_idx].pack_into(&mut block[slot * 32..slot * 32 + 32]);
                }
            }
            write_block(geometry, buffer, ts.track, ts.sector, &block)?;
            let next = positions.get(b + 1).copied().unwrap_or(Ts::new(0, 0));
            write_ts_link(geometry, buffer, ts.track, ts.sector, next)?;
        }
        Ok(())
    }
}

/// The deterministic (track, sector) for directory slot `entry_index`:
/// `sector = (1 + (entry_index / 8) * dir_interleave) mod
/// sectors_per_track(hdr_track)`, shifted past the BAM sectors when the
/// BAM immediately follows the header.
pub fn entry_location(geometry: &Geometry, entry_index: usize) -> Ts {
    let spt = geometry.sectors_per_track(geometry.hdr_track).max(1);
    let block_no = (entry_index / 8) as u16;
    let mut sector = 1 + block_no * geometry.dir_interleave;
    if geometry.bam_location == BamLocation::FollowsHeader {
        sector += geometry.bam_sectors;
    }
    Ts::new(geometry.hdr_track, (sector % spt) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_format::commodore::bam::Bam;
    use crate::disk_format::commodore::geometry::Geometry;
    use crate::disk_format::commodore::header::Header;

    fn fresh_image() -> (Geometry, Vec<u8>, Bam, Directory) {
        let g = Geometry::cbm_1541();
        let mut buffer = vec![0u8; g.sector_count() * 256];
        let mut bam = Bam::initialize(&g);
        let header = Header::new("TEST", "01", *b"2A");
        header.sync(&g, &mut buffer).unwrap();
        let dir = Directory::default();
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        (g, buffer, bam, Directory::parse(&g, &buffer).unwrap())
    }

    #[test]
    fn empty_directory_has_eight_free_slots() {
        let (_, _, _, dir) = fresh_image();
        assert_eq!(dir.entries.len(), 8);
        assert!(dir.entries.iter().all(DirEntry::is_free_slot));
    }

    #[test]
    fn alloc_write_and_find_round_trips() {
        let (g, mut buffer, mut bam, mut dir) = fresh_image();
        let idx = dir.alloc_dir_entry(&g, &mut bam, "HELLO").unwrap();
        dir.write_dir_entry(idx, "HELLO", FILE_TYPE_PRG, 1, 0, 41, (2024, 5, 1, 12, 0), 1);
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        let reparsed = Directory::parse(&g, &buffer).unwrap();
        let found = reparsed.find_dir_entry("HELLO", FILE_TYPE_DEL).unwrap();
        assert_eq!(reparsed.entries[found - 1].blocks, 1);
        assert_eq!(reparsed.entries[found - 1].file_type, FILE_TYPE_PRG);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (g, _buffer, mut bam, mut dir) = fresh_image();
        let idx = dir.alloc_dir_entry(&g, &mut bam, "HELLO").unwrap();
        dir.write_dir_entry(idx, "HELLO", FILE_TYPE_PRG, 1, 0, 41, (2024, 5, 1, 12, 0), 1);
        assert!(dir.alloc_dir_entry(&g, &mut bam, "HELLO").is_err());
    }

    #[test]
    fn growing_past_eight_entries_allocates_a_new_block_in_bam() {
        let (g, mut buffer, mut bam, mut dir) = fresh_image();
        for i in 0..9 {
            let name = format!("F{}", i);
            let idx = dir.alloc_dir_entry(&g, &mut bam, &name).unwrap();
            dir.write_dir_entry(idx, &name, FILE_TYPE_PRG, 1, 0, 1, (2024, 1, 1, 0, 0), 1);
        }
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        assert_eq!(dir.entries.len(), 16);
        let second_block = entry_location(&g, 8);
        assert!(!bam.block_available(second_block.track, second_block.sector));
    }

    #[test]
    fn mkdir_creates_a_dir_entry_and_a_back_reference_block() {
        let (g, mut buffer, mut bam, mut dir) = fresh_image();
        dir.mkdir(&g, &mut bam, &mut buffer, "SUBDIR").unwrap();
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        let reparsed = Directory::parse(&g, &buffer).unwrap();
        let idx = reparsed.find_dir_entry("SUBDIR", FILE_TYPE_DEL).unwrap() - 1;
        let entry = &reparsed.entries[idx];
        assert_eq!(entry.file_type, FILE_TYPE_DIR);
        let sub_block = read_block(&g, &buffer, entry.first_track, entry.first_sector).unwrap();
        let back_ref = DirEntry::parse(&sub_block[0..32]);
        assert_eq!(back_ref.filename, "..");
        assert_eq!(back_ref.first_track, g.hdr_track);
    }

    #[test]
    fn as_vec_matches_pack_into() {
        let (g, mut buffer, mut bam, mut dir) = fresh_image();
        let idx = dir.alloc_dir_entry(&g, &mut bam, "HELLO").unwrap();
        dir.write_dir_entry(idx, "HELLO", FILE_TYPE_PRG, 1, 0, 41, (2024, 5, 1, 12, 0), 1);
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        let reparsed = Directory::parse(&g, &buffer).unwrap();
        let bytes = reparsed.entries[idx].as_vec().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[2], FILE_TYPE_PRG);
        assert_eq!(bytes_to_little_endian_word(bytes[30], bytes[31]), 1);
    }

    #[test]
    fn rename_then_sync_then_reparse_sees_new_name() {
        let (g, mut buffer, mut bam, mut dir) = fresh_image();
        let idx = dir.alloc_dir_entry(&g, &mut bam, "HELLO").unwrap();
        dir.write_dir_entry(idx, "HELLO", FILE_TYPE_PRG, 1, 0, 41, (2024, 5, 1, 12, 0), 1);
        dir.rename("HELLO", "WORLD").unwrap();
        dir.sync(&g, &mut buffer, &mut bam).unwrap();
        let reparsed = Directory::parse(&g, &buffer).unwrap();
        assert!(reparsed.find_dir_entry("WORLD", FILE_TYPE_DEL).is_some());
        assert!(reparsed.find_dir_entry("HELLO", FILE_TYPE_DEL).is_none());
    }
}
