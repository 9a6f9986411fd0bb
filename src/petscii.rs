//! PETSCII conversions for disk labels, IDs, and filenames.
//!
//! CBM DOS pads fixed-width text fields with "shifted space" (0xA0) rather
//! than nulls. Two views of that text are useful: a forgiving ASCII
//! projection used internally by the header and directory logic (§3 of the
//! format), and a full PETSCII rendering (via `forbidden-bands`) used for
//! human-facing display.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use forbidden_bands::petscii::PetsciiString;
use std::sync::OnceLock;

fn config() -> &'static forbidden_bands::Config {
    static CONFIG: OnceLock<forbidden_bands::Config> = OnceLock::new();
    CONFIG.get_or_init(|| forbidden_bands::Config::load().expect("forbidden-bands config"))
}

/// Project a fixed-width PETSCII field into its ASCII display form: both
/// 0xA0 (shifted space) and 0x00 render as an ordinary space, and trailing
/// whitespace is trimmed. This is the projection the header and directory
/// caches keep alongside the raw PETSCII bytes.
pub fn a0_to_32(bytes: &[u8]) -> String {
    let s: String = bytes
        .iter()
        .map(|&b| if b == 0xA0 || b == 0x00 { ' ' } else { b as char })
        .collect();
    s.trim_end().to_string()
}

/// Inverse of [`a0_to_32`]: upper-case `s`, truncate or pad it to `width`
/// bytes with shifted-space (0xA0). Round-trips any ASCII input of length
/// `<= width` through [`a0_to_32`] back to its trimmed form.
pub fn to_a0(s: &str, width: usize) -> Vec<u8> {
    let mut out = vec![0xA0u8; width];
    for (i, b) in s.as_bytes().iter().take(width).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    out
}

/// Render a fixed-width PETSCII field for human-facing display (directory
/// listings, diagnostics) using the full PETSCII-to-Unicode mapping rather
/// than the plain ASCII projection.
pub fn display<const N: usize>(bytes: &[u8]) -> String {
    let ps: PetsciiString<'_, N> =
        PetsciiString::from_byte_slice_strip_shifted_space_with_config(bytes, &config().petscii);
    ps.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii_through_shifted_space_padding() {
        let field = to_a0("TEST", 16);
        assert_eq!(a0_to_32(&field), "TEST");
    }

    #[test]
    fn null_bytes_also_project_to_space() {
        assert_eq!(a0_to_32(&[b'H', b'I', 0x00, 0x00]), "HI");
    }

    #[test]
    fn truncates_long_input_to_field_width() {
        let field = to_a0("THIS NAME IS WAY TOO LONG", 16);
        assert_eq!(field.len(), 16);
        assert_eq!(a0_to_32(&field), "THIS NAME IS WAY");
    }
}
