// src/header/mod.rs
//! Container headers and signature-based format detection
//!
//! Detection looks only at the first 8 bytes, before any key material is
//! touched.
pub mod legacy;
pub mod modern;
pub mod variant;

pub use legacy::Header1;
pub use modern::Header2;

use crate::consts::{SIGNATURE_1, SIGNATURE_2_LEGACY, SIGNATURE_2_MODERN, SIGNATURE_2_PRERELEASE};
use crate::enums::DatabaseFormat;
use crate::error::{FormatError, FormatResult};
use crate::util::ByteReader;

pub fn detect_format(data: &[u8]) -> FormatResult<DatabaseFormat> {
    let mut reader = ByteReader::new(data);
    let (sig1, sig2) = match (reader.read_u32(), reader.read_u32()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Err(FormatError::header("file is too short to be a database")),
    };
    if sig1 != SIGNATURE_1 {
        return Err(FormatError::header("not a password database"));
    }
    match sig2 {
        SIGNATURE_2_LEGACY => Ok(DatabaseFormat::Legacy),
        SIGNATURE_2_MODERN => Ok(DatabaseFormat::Modern),
        SIGNATURE_2_PRERELEASE => Err(FormatError::header(
            "pre-release 2.x databases are not supported",
        )),
        _ => Err(FormatError::header("unknown database signature")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_signature_only() {
        let mut legacy = SIGNATURE_1.to_le_bytes().to_vec();
        legacy.extend_from_slice(&SIGNATURE_2_LEGACY.to_le_bytes());
        assert_eq!(detect_format(&legacy).unwrap(), DatabaseFormat::Legacy);

        let mut modern = SIGNATURE_1.to_le_bytes().to_vec();
        modern.extend_from_slice(&SIGNATURE_2_MODERN.to_le_bytes());
        modern.extend_from_slice(b"garbage");
        assert_eq!(detect_format(&modern).unwrap(), DatabaseFormat::Modern);

        assert!(detect_format(b"AES\x03\x00").is_err());
    }
}
