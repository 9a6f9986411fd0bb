//! The header sector: disk label, ID and DOS type.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use super::block::{read_block, write_block};
use super::geometry::Geometry;
use crate::error::Error;
use crate::petscii;

/// The parsed disk header: PETSCII label/id/dos_type plus an ASCII
/// projection of the label kept for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Raw PETSCII label bytes, 16 bytes, 0xA0-padded.
    pub label_raw: [u8; 16],
    /// ASCII projection of the label (see [`petscii::a0_to_32`]).
    pub label: String,
    /// Two-character disk ID.
    pub id: [u8; 2],
    /// Two-character DOS-type string.
    pub dos_type: [u8; 2],
}

impl Header {
    /// Parse the header sector at `(hdr_track, 0)`.
    pub fn parse(geometry: &Geometry, buffer: &[u8]) -> Result<Header, Error> {
        let block = read_block(geometry, buffer, geometry.hdr_track, 0)?;
        let off = geometry.hdr_label_offset;
        let mut label_raw = [0xA0u8; 16];
        label_raw.copy_from_slice(&block[off..off + 16]);
        let id = [block[off + 18], block[off + 19]];
        let dos_type = [block[off + 21], block[off + 22]];
        Ok(Header {
            label_raw,
            label: petscii::a0_to_32(&label_raw),
            id,
            dos_type,
        })
    }

    /// Serialize the header back into `buffer`: `label(16) 0xA0 0xA0 id(2)
    /// 0xA0 dos_type(2)`.
    pub fn sync(&self, geometry: &Geometry, buffer: &mut [u8]) -> Result<(), Error> {
        let mut block: [u8; 256] = read_block(geometry, buffer, geometry.hdr_track, 0)?
            .try_into()
            .expect("blocks are always 256 bytes");
        let off = geometry.hdr_label_offset;
        block[off..off + 16].copy_from_slice(&self.label_raw);
        block[off + 16] = 0xA0;
        block[off + 17] = 0xA0;
        block[off + 18] = self.id[0];
        block[off + 19] = self.id[1];
        block[off + 20] = 0xA0;
        block[off + 21] = self.dos_type[0];
        block[off + 22] = self.dos_type[1];
        write_block(geometry, buffer, geometry.hdr_track, 0, &block)
    }

    /// Set the disk label, ID and (optionally) DOS type, normalizing the
    /// label to upper-case PETSCII padded to 16 bytes with shifted-space.
    pub fn set_header_label(&mut self, label: &str, id: &str, dos_type: Option<[u8; 2]>) {
        let field = petscii::to_a0(label, 16);
        self.label_raw.copy_from_slice(&field);
        self.label = petscii::a0_to_32(&field);
        let id_upper = id.to_ascii_uppercase();
        let id_bytes = id_upper.as_bytes();
        self.id = [
            id_bytes.first().copied().unwrap_or(b' '),
            id_bytes.get(1).copied().unwrap_or(b' '),
        ];
        if let Some(dt) = dos_type {
            self.dos_type = dt;
        }
    }

    /// Build a fresh header for a newly created disk.
    pub fn new(label: &str, id: &str, dos_type: [u8; 2]) -> Header {
        let mut header = Header {
            label_raw: [0xA0; 16],
            label: String::new(),
            id: *b"  ",
            dos_type,
        };
        header.set_header_label(label, id, Some(dos_type));
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_format::commodore::geometry::Geometry;

    #[test]
    fn parse_after_sync_is_identity() {
        let g = Geometry::cbm_1541();
        let mut buffer = vec![0u8; g.sector_count() * 256];
        let header = Header::new("TEST", "01", *b"2A");
        header.sync(&g, &mut buffer).unwrap();
        let reparsed = Header::parse(&g, &buffer).unwrap();
        assert_eq!(reparsed, header);
        assert_eq!(reparsed.label, "TEST");
        assert_eq!(reparsed.dos_type, *b"2A");
    }

    #[test]
    fn disk_id_is_upper_cased() {
        let header = Header::new("TEST", "01", *b"2A");
        assert_eq!(header.id, *b"01");
    }
}
