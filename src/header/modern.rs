// src/header/modern.rs
//! Type-length-value header of the modern container (v3.1 and v4.x)

use tracing::debug;

use crate::consts::{
    MODERN_VERSION_3_1, MODERN_VERSION_4, MODERN_VERSION_4_1, MODERN_VERSION_CRITICAL_MASK,
    SIGNATURE_1, SIGNATURE_2_MODERN, STREAM_START_BYTES_LEN,
};
use crate::crypto::{random_bytes, sha256, KdfParams};
use crate::enums::{CipherKind, FormatVersion, InnerStreamKind};
use crate::error::{FormatError, FormatResult};
use crate::header::variant::VariantDictionary;
use crate::util::{le_u32, le_u64, ByteReader};

const FIELD_END: u8 = 0;
const FIELD_COMMENT: u8 = 1;
const FIELD_CIPHER_ID: u8 = 2;
const FIELD_COMPRESSION: u8 = 3;
const FIELD_MASTER_SEED: u8 = 4;
const FIELD_TRANSFORM_SEED: u8 = 5;
const FIELD_TRANSFORM_ROUNDS: u8 = 6;
const FIELD_IV: u8 = 7;
const FIELD_PROTECTED_STREAM_KEY: u8 = 8;
const FIELD_STREAM_START_BYTES: u8 = 9;
const FIELD_INNER_STREAM_ID: u8 = 10;
const FIELD_KDF_PARAMETERS: u8 = 11;
const FIELD_PUBLIC_CUSTOM_DATA: u8 = 12;

const END_OF_HEADER: &[u8] = b"\r\n\r\n";
const COMPRESSION_NONE: u32 = 0;
const COMPRESSION_GZIP: u32 = 1;

#[derive(Debug, Clone)]
pub struct Header2 {
    /// Raw version word, e.g. `0x00040000`
    pub version: u32,
    pub cipher: CipherKind,
    pub compressed: bool,
    pub master_seed: Vec<u8>,
    pub iv: Vec<u8>,
    pub kdf: KdfParams,
    /// v3 only; v4 carries the stream settings in the inner header
    pub inner_stream: InnerStreamKind,
    pub protected_stream_key: Vec<u8>,
    pub stream_start_bytes: Vec<u8>,
    pub comment: Option<Vec<u8>>,
    pub public_custom_data: Option<Vec<u8>>,
    raw: Vec<u8>,
}

impl Header2 {
    pub fn new(
        format: FormatVersion,
        cipher: CipherKind,
        kdf: KdfParams,
        compressed: bool,
    ) -> FormatResult<Self> {
        if format == FormatVersion::V3 && !matches!(kdf, KdfParams::Aes { .. }) {
            return Err(FormatError::header("v3 files only support AES-KDF"));
        }
        if format == FormatVersion::V3 && cipher == CipherKind::ChaCha20 {
            return Err(FormatError::header("v3 files do not support ChaCha20"));
        }
        let mut header = Header2 {
            version: match format {
                FormatVersion::V3 => MODERN_VERSION_3_1,
                FormatVersion::V4 => MODERN_VERSION_4,
            },
            cipher,
            compressed,
            master_seed: Vec::new(),
            iv: Vec::new(),
            kdf,
            inner_stream: match format {
                FormatVersion::V3 => InnerStreamKind::Salsa20,
                FormatVersion::V4 => InnerStreamKind::ChaCha20,
            },
            protected_stream_key: Vec::new(),
            stream_start_bytes: Vec::new(),
            comment: None,
            public_custom_data: None,
            raw: Vec::new(),
        };
        header.randomize_seeds();
        Ok(header)
    }

    pub fn format_version(&self) -> FormatVersion {
        if self.version & MODERN_VERSION_CRITICAL_MASK >= MODERN_VERSION_4 {
            FormatVersion::V4
        } else {
            FormatVersion::V3
        }
    }

    /// Serialized bytes as last read or written, used for hashing
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn hash(&self) -> [u8; 32] {
        sha256(&self.raw)
    }

    /// Fresh seeds, IV and stream keys for every save
    pub fn randomize_seeds(&mut self) {
        self.master_seed = random_bytes(32);
        self.iv = random_bytes(self.cipher.iv_len());
        self.kdf.randomize_seed();
        self.protected_stream_key = random_bytes(match self.format_version() {
            FormatVersion::V3 => 32,
            FormatVersion::V4 => 64,
        });
        self.stream_start_bytes = random_bytes(STREAM_START_BYTES_LEN);
    }

    /// Parses the header and returns it with the number of bytes consumed
    pub fn read(data: &[u8]) -> FormatResult<(Self, usize)> {
        let mut reader = ByteReader::new(data);
        let sig1 = reader.read_u32()?;
        let sig2 = reader.read_u32()?;
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2_MODERN {
            return Err(FormatError::header("wrong modern signature"));
        }
        let version = reader.read_u32()?;
        let major = version & MODERN_VERSION_CRITICAL_MASK;
        if major < (MODERN_VERSION_3_1 & MODERN_VERSION_CRITICAL_MASK)
            || major > (MODERN_VERSION_4_1 & MODERN_VERSION_CRITICAL_MASK)
        {
            return Err(FormatError::header(format!(
                "unsupported file version {version:#010x}"
            )));
        }
        let is_v4 = major >= MODERN_VERSION_4;

        let mut cipher = None;
        let mut compressed = false;
        let mut master_seed = None;
        let mut iv = None;
        let mut transform_seed = None;
        let mut transform_rounds = None;
        let mut kdf = None;
        let mut inner_stream = InnerStreamKind::None;
        let mut protected_stream_key = Vec::new();
        let mut stream_start_bytes = Vec::new();
        let mut comment = None;
        let mut public_custom_data = None;

        loop {
            let id = reader.read_u8()?;
            let len = if is_v4 {
                reader.read_u32()? as usize
            } else {
                reader.read_u16()? as usize
            };
            let value = reader.read_bytes(len)?;
            match id {
                FIELD_END => break,
                FIELD_COMMENT => comment = Some(value.to_vec()),
                FIELD_CIPHER_ID => {
                    cipher = Some(CipherKind::from_uuid(value).ok_or_else(|| {
                        FormatError::header(format!("unknown cipher {}", hex::encode(value)))
                    })?)
                }
                FIELD_COMPRESSION => {
                    compressed = match le_u32(value) {
                        Some(COMPRESSION_NONE) => false,
                        Some(COMPRESSION_GZIP) => true,
                        _ => return Err(FormatError::header("unknown compression algorithm")),
                    }
                }
                FIELD_MASTER_SEED => {
                    if value.len() != 32 {
                        return Err(FormatError::header("master seed must be 32 bytes"));
                    }
                    master_seed = Some(value.to_vec())
                }
                FIELD_TRANSFORM_SEED => transform_seed = Some(value.to_vec()),
                FIELD_TRANSFORM_ROUNDS => {
                    transform_rounds = Some(
                        le_u64(value)
                            .ok_or_else(|| FormatError::header("bad transform rounds field"))?,
                    )
                }
                FIELD_IV => iv = Some(value.to_vec()),
                FIELD_PROTECTED_STREAM_KEY => protected_stream_key = value.to_vec(),
                FIELD_STREAM_START_BYTES => stream_start_bytes = value.to_vec(),
                FIELD_INNER_STREAM_ID => {
                    inner_stream = le_u32(value)
                        .and_then(InnerStreamKind::from_id)
                        .ok_or_else(|| FormatError::header("unknown inner stream cipher"))?
                }
                FIELD_KDF_PARAMETERS => {
                    kdf = Some(KdfParams::from_variant_dict(&VariantDictionary::parse(
                        value,
                    )?)?)
                }
                FIELD_PUBLIC_CUSTOM_DATA => public_custom_data = Some(value.to_vec()),
                other => debug!(field = other, "skipping unknown header field"),
            }
        }

        let kdf = match (is_v4, kdf) {
            (true, Some(kdf)) => kdf,
            (true, None) => return Err(FormatError::header("missing KDF parameters")),
            (false, _) => KdfParams::Aes {
                rounds: transform_rounds
                    .ok_or_else(|| FormatError::header("missing transform rounds"))?,
                seed: transform_seed
                    .ok_or_else(|| FormatError::header("missing transform seed"))?,
            },
        };
        let cipher = cipher.ok_or_else(|| FormatError::header("missing cipher id"))?;
        let iv = iv.ok_or_else(|| FormatError::header("missing encryption IV"))?;
        if iv.len() != cipher.iv_len() {
            return Err(FormatError::header("IV length does not match the cipher"));
        }
        if !is_v4 && stream_start_bytes.is_empty() {
            return Err(FormatError::header("missing stream start bytes"));
        }

        let consumed = reader.position();
        let header = Header2 {
            version,
            cipher,
            compressed,
            master_seed: master_seed.ok_or_else(|| FormatError::header("missing master seed"))?,
            iv,
            kdf,
            inner_stream,
            protected_stream_key,
            stream_start_bytes,
            comment,
            public_custom_data,
            raw: data[..consumed].to_vec(),
        };
        Ok((header, consumed))
    }

    /// Serializes the header, remembering the bytes for hashing
    pub fn write(&mut self) -> FormatResult<Vec<u8>> {
        let is_v4 = self.format_version() == FormatVersion::V4;
        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2_MODERN.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());

        let mut field = |id: u8, value: &[u8]| {
            out.push(id);
            if is_v4 {
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            } else {
                out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            }
            out.extend_from_slice(value);
        };

        if let Some(comment) = &self.comment {
            field(FIELD_COMMENT, comment);
        }
        field(FIELD_CIPHER_ID, &self.cipher.uuid());
        let compression = if self.compressed {
            COMPRESSION_GZIP
        } else {
            COMPRESSION_NONE
        };
        field(FIELD_COMPRESSION, &compression.to_le_bytes());
        field(FIELD_MASTER_SEED, &self.master_seed);
        if is_v4 {
            field(FIELD_IV, &self.iv);
            field(FIELD_KDF_PARAMETERS, &self.kdf.to_variant_dict().serialize());
            if let Some(data) = &self.public_custom_data {
                field(FIELD_PUBLIC_CUSTOM_DATA, data);
            }
        } else {
            let KdfParams::Aes { rounds, seed } = &self.kdf else {
                return Err(FormatError::header("v3 files only support AES-KDF"));
            };
            field(FIELD_TRANSFORM_SEED, seed);
            field(FIELD_TRANSFORM_ROUNDS, &rounds.to_le_bytes());
            field(FIELD_IV, &self.iv);
            field(FIELD_PROTECTED_STREAM_KEY, &self.protected_stream_key);
            field(FIELD_STREAM_START_BYTES, &self.stream_start_bytes);
            field(FIELD_INNER_STREAM_ID, &self.inner_stream.id().to_le_bytes());
        }
        field(FIELD_END, END_OF_HEADER);

        self.raw = out.clone();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::KdfKind;

    #[test]
    fn v3_header_reads_back_with_aes_kdf() {
        let mut header =
            Header2::new(FormatVersion::V3, CipherKind::Aes, KdfParams::new_aes(10), true)
                .unwrap();
        let bytes = header.write().unwrap();
        let (back, consumed) = Header2::read(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(back.format_version(), FormatVersion::V3);
        assert_eq!(back.kdf, header.kdf);
        assert_eq!(back.stream_start_bytes, header.stream_start_bytes);
        assert_eq!(back.inner_stream, InnerStreamKind::Salsa20);
        assert_eq!(back.hash(), header.hash());
    }

    #[test]
    fn v4_header_keeps_kdf_dictionary() {
        let kdf = KdfParams::new_argon2(KdfKind::Argon2d, 64, 1, 1);
        let mut header =
            Header2::new(FormatVersion::V4, CipherKind::ChaCha20, kdf.clone(), false).unwrap();
        let mut bytes = header.write().unwrap();
        bytes.extend_from_slice(b"payload");
        let (back, consumed) = Header2::read(&bytes).unwrap();
        assert_eq!(&bytes[consumed..], b"payload");
        assert_eq!(back.kdf, header.kdf);
        assert_eq!(back.cipher, CipherKind::ChaCha20);
        assert_eq!(back.iv.len(), 12);
        assert!(!back.compressed);
    }

    #[test]
    fn v3_rejects_argon2() {
        let kdf = KdfParams::new_argon2(KdfKind::Argon2d, 64, 1, 1);
        assert!(Header2::new(FormatVersion::V3, CipherKind::Aes, kdf, true).is_err());
    }
}
