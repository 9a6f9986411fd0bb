//! The high-level image: ties geometry, header, BAM, directory and raw
//! block storage together behind a filesystem-shaped API.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, Timelike};
use log::{debug, info};

use super::bam::Bam;
use super::block::{read_block, write_block};
use super::chain::{create_file_chain, read_file_chain};
use super::directory::{
    DirEntry, Directory, FILE_TYPE_CBM, FILE_TYPE_DEL, FILE_TYPE_DIR, FILE_TYPE_PRG,
    FILE_TYPE_REL, FILE_TYPE_SEQ, FILE_TYPE_USR,
};
use super::geometry::{Geometry, Ts};
use super::header::Header;
use super::x64;
use crate::error::{Error, ErrorKind};

/// Three-letter type tag used by the extracted-file naming convention
/// (§6): the inverse of [`file_type_from_name`].
fn file_type_name(t: u8) -> &'static str {
    match t {
        FILE_TYPE_DEL => "DEL",
        FILE_TYPE_SEQ => "SEQ",
        FILE_TYPE_USR => "USR",
        FILE_TYPE_REL => "REL",
        FILE_TYPE_CBM => "CBM",
        FILE_TYPE_DIR => "DIR",
        _ => "PRG",
    }
}

/// Inverse of [`file_type_name`]; an unrecognized tag defaults to PRG.
fn file_type_from_name(s: &str) -> u8 {
    match s.to_ascii_uppercase().as_str() {
        "DEL" => FILE_TYPE_DEL,
        "SEQ" => FILE_TYPE_SEQ,
        "USR" => FILE_TYPE_USR,
        "REL" => FILE_TYPE_REL,
        "CBM" => FILE_TYPE_CBM,
        "DIR" => FILE_TYPE_DIR,
        _ => FILE_TYPE_PRG,
    }
}

/// Build the extracted-file name `<NAME>.<YYYY>-<MM>-<DD>-<HH>-<MM>.<TYPE>`
/// (§6), replacing slashes and spaces in the directory-entry name with
/// underscores.
fn extracted_filename(entry: &DirEntry) -> String {
    let safe_name = entry.filename.replace(['/', ' '], "_");
    format!(
        "{}.{:04}-{:02}-{:02}-{:02}-{:02}.{}",
        safe_name,
        entry.year,
        entry.month,
        entry.day,
        entry.hour,
        entry.minute,
        file_type_name(entry.file_type)
    )
}

/// Parse an extracted file's name back into `(name, date, file_type)`,
/// accepting the full stamped form or the bare `<name>.<TYPE>` fallback
/// (§4.9); the caller substitutes the current time when `date` is `None`.
fn parse_stamped_name(filename: &str) -> (String, Option<(u16, u8, u8, u8, u8)>, u8) {
    let parts: Vec<&str> = filename.split('.').collect();
    match parts.as_slice() {
        [name, date, ty] => (name.to_string(), parse_stamp(date), file_type_from_name(ty)),
        [name, ty] => (name.to_string(), None, file_type_from_name(ty)),
        _ => (filename.to_string(), None, FILE_TYPE_PRG),
    }
}

fn parse_stamp(s: &str) -> Option<(u16, u8, u8, u8, u8)> {
    let fields: Vec<&str> = s.split('-').collect();
    if let [y, mo, d, h, mi] = fields.as_slice() {
        Some((
            y.parse().ok()?,
            mo.parse().ok()?,
            d.parse().ok()?,
            h.parse().ok()?,
            mi.parse().ok()?,
        ))
    } else {
        None
    }
}

/// A disk image: its geometry, raw byte buffer, and the parsed structures
/// (header, BAM, directory) cached above it. Every mutating method updates
/// both the in-memory structures and, on [`Image::save`], the byte buffer.
pub struct Image {
    /// Path the image was loaded from or will be saved to.
    pub filename: String,
    /// The layout this image's buffer is interpreted under.
    pub geometry: Geometry,
    /// Whether this image is (or should be saved as) an X64 container.
    pub is_x64: bool,
    /// The raw, geometry-sized byte buffer.
    pub buffer: Vec<u8>,
    /// The parsed header sector.
    pub header: Header,
    /// The parsed Block Availability Map.
    pub bam: Bam,
    /// The parsed directory.
    pub directory: Directory,
}

impl Image {
    /// Create a freshly formatted image of the given geometry.
    pub fn create(geometry: Geometry, label: &str, id: &str) -> Image {
        let mut buffer = vec![0u8; geometry.sector_count() * 256];
        let header = Header::new(label, id, geometry.dos_type);
        let mut bam = Bam::initialize(&geometry);
        let directory = Directory::default();
        header.sync(&geometry, &mut buffer).expect("freshly sized buffer always fits its own header");
        directory
            .sync(&geometry, &mut buffer, &mut bam)
            .expect("an empty directory always fits its first block");
        bam.sync(&geometry, &mut buffer).expect("freshly sized buffer always fits its own BAM");
        info!("created {} image, label {:?}", geometry.format_tag, label);
        Image {
            filename: String::new(),
            geometry,
            is_x64: false,
            buffer,
            header,
            bam,
            directory,
        }
    }

    /// Create a freshly formatted image under a custom (X64-carried)
    /// geometry that has no native file extension of its own.
    pub fn create_custom(geometry: Geometry, label: &str, id: &str) -> Image {
        let mut image = Image::create(geometry, label, id);
        image.is_x64 = true;
        image
    }

    /// Load an image from `path`, detecting an X64 wrapper by signature
    /// and otherwise inferring geometry from the file extension.
    pub fn load(path: &Path) -> Result<Image, Error> {
        let raw = std::fs::read(path)?;
        let (geometry, buffer, is_x64) = if x64::is_x64(&raw) {
            let (_header, geometry, payload) = x64::parse(&raw)?;
            (geometry, payload.to_vec(), true)
        } else {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let geometry = Geometry::from_extension(ext).ok_or_else(|| {
                Error::new(ErrorKind::InvalidImage(format!(
                    "cannot infer geometry from extension {:?}",
                    ext
                )))
            })?;
            (geometry, raw, false)
        };
        let expected_len = geometry.sector_count() * 256;
        if buffer.len() < expected_len {
            return Err(Error::new(ErrorKind::InvalidImage(format!(
                "truncated image: expected at least {} bytes, got {}",
                expected_len,
                buffer.len()
            ))));
        }
        let header = Header::parse(&geometry, &buffer)?;
        let bam = Bam::parse(&geometry, &buffer)?;
        let directory = Directory::parse(&geometry, &buffer)?;
        debug!("loaded {:?}: {} directory slots", path, directory.entries.len());
        Ok(Image {
            filename: path.to_string_lossy().to_string(),
            geometry,
            is_x64,
            buffer,
            header,
            bam,
            directory,
        })
    }

    /// Resync the header, directory and BAM into the buffer (in that
    /// order, per the format's own write ordering) and write it to
    /// `path`, wrapping in an X64 container if `is_x64`.
    pub fn save(&mut self, path: &Path) -> Result<(), Error> {
        self.header.sync(&self.geometry, &mut self.buffer)?;
        self.directory.sync(&self.geometry, &mut self.buffer, &mut self.bam)?;
        self.bam.sync(&self.geometry, &mut self.buffer)?;
        let bytes = if self.is_x64 {
            x64::build(&self.geometry, &self.buffer)
        } else {
            self.buffer.clone()
        };
        std::fs::write(path, bytes)?;
        info!("saved {:?}", path);
        Ok(())
    }

    fn read_entry_data(&self, entry_idx: usize) -> Result<Vec<u8>, Error> {
        let entry = &self.directory.entries[entry_idx];
        let (chain, payload_len) = read_file_chain(
            &self.geometry,
            &self.buffer,
            entry.first_track,
            entry.first_sector,
            None,
        )?;
        let mut out = Vec::with_capacity(chain.len() * 254);
        for (i, ts) in chain.iter().enumerate() {
            let block = read_block(&self.geometry, &self.buffer, ts.track, ts.sector)?;
            let len = if i + 1 == chain.len() { payload_len } else { 254 };
            out.extend_from_slice(&block[2..2 + len]);
        }
        Ok(out)
    }

    /// Read a file's full contents by name.
    pub fn read_program_by_filename(&self, name: &str) -> Result<Vec<u8>, Error> {
        let idx = self
            .directory
            .find_dir_entry(name, FILE_TYPE_DEL)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(name.to_string())))?
            - 1;
        self.read_entry_data(idx)
    }

    /// Read a file's full contents by its 0-based directory slot index.
    pub fn read_program_by_index(&self, index: usize) -> Result<Vec<u8>, Error> {
        if index >= self.directory.entries.len() || self.directory.entries[index].file_type <= FILE_TYPE_DEL {
            return Err(Error::new(ErrorKind::NotFound(format!("entry {}", index))));
        }
        self.read_entry_data(index)
    }

    /// Read a file by index and write it into `dir`, named per the
    /// extracted-file convention (§6): `<NAME>.<YYYY>-<MM>-<DD>-<HH>-<MM>.<TYPE>`.
    /// Returns the full path written.
    pub fn read_store_program_by_index(&self, index: usize, dir: &Path) -> Result<PathBuf, Error> {
        let bytes = self.read_program_by_index(index)?;
        let entry = &self.directory.entries[index];
        let out_path = dir.join(extracted_filename(entry));
        std::fs::write(&out_path, bytes)?;
        Ok(out_path)
    }

    /// Inject `bytes` as a new file named `name`, allocating directory and
    /// data blocks and stamping `(year, month, day, hour, minute)` as its
    /// date.
    #[allow(clippy::too_many_arguments)]
    pub fn write_program_dated(
        &mut self,
        name: &str,
        bytes: &[u8],
        file_type: u8,
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
    ) -> Result<(), Error> {
        let chunks = create_file_chain(bytes);
        let ts_list = self.bam.allocate(&self.geometry, chunks.len())?;
        for (i, chunk) in chunks.iter().enumerate() {
            let ts = ts_list[i];
            let mut block = [0u8; 256];
            block[2..2 + chunk.len()].copy_from_slice(chunk);
            write_block(&self.geometry, &mut self.buffer, ts.track, ts.sector, &block)?;
            let next = if i + 1 < ts_list.len() {
                ts_list[i + 1]
            } else {
                Ts::new(0, (chunk.len() + 1) as u8)
            };
            super::block::write_ts_link(&self.geometry, &mut self.buffer, ts.track, ts.sector, next)?;
        }
        let idx = match self.directory.alloc_dir_entry(&self.geometry, &mut self.bam, name) {
            Ok(idx) => idx,
            Err(e) => {
                self.bam.mark_blocks(&ts_list, false)?;
                return Err(e);
            }
        };
        let lsu = chunks.last().map(|c| (c.len() + 1) as u8).unwrap_or(1);
        self.directory.write_dir_entry(
            idx,
            name,
            file_type,
            ts_list[0].track,
            ts_list[0].sector,
            lsu,
            (year, month, day, hour, minute),
            ts_list.len() as u16,
        );
        Ok(())
    }

    /// Inject `bytes` as a new file named `name`, stamping the current
    /// local time as its date.
    pub fn write_program(&mut self, name: &str, bytes: &[u8], file_type: u8) -> Result<(), Error> {
        let now = Local::now();
        self.write_program_dated(
            name,
            bytes,
            file_type,
            now.year() as u16,
            now.month() as u8,
            now.day() as u8,
            now.hour() as u8,
            now.minute() as u8,
        )
    }

    /// Read a local file and inject it, deriving the stored name, type and
    /// date from `path`'s name per the extracted-file convention. Accepts
    /// either the full stamped form or the bare `<name>.<TYPE>` fallback,
    /// in which case the current local time is used (§4.9).
    pub fn write_program_from_file(&mut self, path: &Path) -> Result<(), Error> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or_default();
        let (name, date, file_type) = parse_stamped_name(filename);
        match date {
            Some((y, mo, d, h, mi)) => self.write_program_dated(&name, &bytes, file_type, y, mo, d, h, mi),
            None => self.write_program(&name, &bytes, file_type),
        }
    }

    /// A human-readable directory listing (§4.7's "Dump"): disk label and
    /// ID on the first line, then one line per active entry with its
    /// filename and block count, followed by the free-block total. Block
    /// counts come from the BAM rather than each entry's own `blocks`
    /// field, which may be approximate for non-REL files.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "0 \"{:<16}\" {} {}\n",
            self.header.label,
            std::str::from_utf8(&self.header.id).unwrap_or("??"),
            std::str::from_utf8(&self.header.dos_type).unwrap_or("??"),
        ));
        for entry in &self.directory.entries {
            if entry.file_type <= FILE_TYPE_DEL {
                continue;
            }
            out.push_str(&format!(
                "{:<5}\"{:<16}\" {}\n",
                entry.blocks,
                entry.filename,
                file_type_name(entry.file_type),
            ));
        }
        out.push_str(&format!("{} blocks free.\n", self.bam.blocks_free()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_freshly_created_d64_has_664_free_blocks() {
        let image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        assert_eq!(image.bam.blocks_free(), 664);
        assert!(image.directory.entries.iter().all(|e| e.file_type == 0));
    }

    #[test]
    fn write_then_read_round_trips_a_program() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        let payload: Vec<u8> = (0..1000u32).map(|n| (n % 251) as u8).collect();
        image.write_program("HELLO", &payload, FILE_TYPE_PRG).unwrap();
        let read_back = image.read_program_by_filename("HELLO").unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn writing_a_duplicate_name_fails_without_losing_the_first_file() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        image.write_program("HELLO", b"one", FILE_TYPE_PRG).unwrap();
        let before = image.bam.blocks_free();
        assert!(image.write_program("HELLO", b"two", FILE_TYPE_PRG).is_err());
        assert_eq!(image.read_program_by_filename("HELLO").unwrap(), b"one");
        // The name collision must roll back the blocks tentatively
        // allocated for "two" before the directory write was attempted.
        assert_eq!(image.bam.blocks_free(), before);
    }

    #[test]
    fn save_then_load_round_trips_through_a_tempfile() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        image.write_program("HELLO", b"world", FILE_TYPE_PRG).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.d64");
        image.save(&path).unwrap();
        let reloaded = Image::load(&path).unwrap();
        assert_eq!(reloaded.read_program_by_filename("HELLO").unwrap(), b"world");
        assert_eq!(reloaded.header.label, "TEST");
    }

    #[test]
    fn custom_geometry_round_trips_through_an_x64_container() {
        // A layout matching no canonical drive family (spec.md S5): the
        // full 22-byte parameter block must travel with the file and
        // reconstruct an identical geometry on reload.
        use super::super::geometry::Zone;
        let custom = Geometry {
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
            bam_location: crate::disk_format::commodore::geometry::BamLocation::OnHeader,
            bam_sectors: 1,
            tracks_per_bam_sector: 35,
            boot_track: 0,
            track_count_override: None,
        };
        let mut image = Image::create_custom(custom, "WEIRD", "ID");
        image.write_program("A", b"123", FILE_TYPE_PRG).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.x64");
        image.save(&path).unwrap();
        let reloaded = Image::load(&path).unwrap();
        assert_eq!(reloaded.read_program_by_filename("A").unwrap(), b"123");
        assert_eq!(reloaded.geometry.bam_location, image.geometry.bam_location);
        assert_eq!(reloaded.geometry.hdr_track, image.geometry.hdr_track);
        assert_eq!(reloaded.geometry.zones[0], image.geometry.zones[0]);
    }

    #[test]
    fn allocating_past_capacity_leaves_the_disk_consistent() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        let big = vec![0xAAu8; 254 * 700];
        assert!(image.write_program("TOOBIG", &big, FILE_TYPE_PRG).is_err());
        assert_eq!(image.bam.blocks_free(), 664);
    }

    #[test]
    fn extracted_filename_follows_the_stamped_naming_convention() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        image
            .write_program_dated("HELLO", b"world", FILE_TYPE_PRG, 2024, 5, 1, 12, 0)
            .unwrap();
        let idx = image.directory.find_dir_entry("HELLO", FILE_TYPE_DEL).unwrap() - 1;
        let dir = tempfile::tempdir().unwrap();
        let written = image.read_store_program_by_index(idx, dir.path()).unwrap();
        assert_eq!(
            written.file_name().unwrap().to_str().unwrap(),
            "HELLO.2024-05-01-12-00.PRG"
        );
        assert_eq!(std::fs::read(&written).unwrap(), b"world");
    }

    #[test]
    fn write_program_from_file_parses_the_stamped_name_and_restores_the_date() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("WORLD.2024-05-01-12-00.PRG");
        std::fs::write(&src, b"hi").unwrap();
        image.write_program_from_file(&src).unwrap();
        let idx = image.directory.find_dir_entry("WORLD", FILE_TYPE_DEL).unwrap() - 1;
        let entry = &image.directory.entries[idx];
        assert_eq!(entry.file_type, FILE_TYPE_PRG);
        assert_eq!((entry.year, entry.month, entry.day, entry.hour, entry.minute), (2024, 5, 1, 12, 0));
        assert_eq!(image.read_program_by_filename("WORLD").unwrap(), b"hi");
    }

    #[test]
    fn dump_lists_active_entries_and_the_bam_free_count() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        image.write_program("HELLO", b"world", FILE_TYPE_PRG).unwrap();
        let listing = image.dump();
        assert!(listing.contains("TEST"));
        assert!(listing.contains("HELLO"));
        assert!(listing.contains("663 blocks free"));
    }

    #[test]
    fn write_program_from_file_falls_back_to_name_dot_type_with_current_time() {
        let mut image = Image::create(Geometry::cbm_1541(), "TEST", "01");
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("PLAIN.SEQ");
        std::fs::write(&src, b"bytes").unwrap();
        image.write_program_from_file(&src).unwrap();
        let idx = image.directory.find_dir_entry("PLAIN", FILE_TYPE_DEL).unwrap() - 1;
        assert_eq!(image.directory.entries[idx].file_type, super::super::directory::FILE_TYPE_SEQ);
    }
}
