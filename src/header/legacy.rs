// src/header/legacy.rs
//! Fixed 124-byte header of the legacy container

use crate::consts::{
    LEGACY_HEADER_SIZE, LEGACY_VERSION, LEGACY_VERSION_MASK, LEGACY_VERSION_MIN, SIGNATURE_1,
    SIGNATURE_2_LEGACY,
};
use crate::crypto::random_array;
use crate::enums::CipherKind;
use crate::error::{FormatError, FormatResult};
use crate::util::ByteReader;

const FLAG_SHA2: u32 = 1;
const FLAG_RIJNDAEL: u32 = 2;
const FLAG_ARCFOUR: u32 = 4;
const FLAG_TWOFISH: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header1 {
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub iv: [u8; 16],
    pub group_count: u32,
    pub entry_count: u32,
    pub content_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub transform_rounds: u32,
}

impl Header1 {
    pub fn new(cipher: CipherKind, transform_rounds: u32) -> FormatResult<Self> {
        let cipher_flag = match cipher {
            CipherKind::Aes => FLAG_RIJNDAEL,
            CipherKind::Twofish => FLAG_TWOFISH,
            CipherKind::ChaCha20 => {
                return Err(FormatError::header("legacy format does not support ChaCha20"))
            }
        };
        let mut header = Header1 {
            flags: FLAG_SHA2 | cipher_flag,
            version: LEGACY_VERSION,
            master_seed: [0; 16],
            iv: [0; 16],
            group_count: 0,
            entry_count: 0,
            content_hash: [0; 32],
            transform_seed: [0; 32],
            transform_rounds,
        };
        header.randomize_seeds();
        Ok(header)
    }

    pub fn read(data: &[u8]) -> FormatResult<Self> {
        if data.len() < LEGACY_HEADER_SIZE {
            return Err(FormatError::header("file is too short for a legacy header"));
        }
        let mut reader = ByteReader::new(&data[..LEGACY_HEADER_SIZE]);
        let sig1 = reader.read_u32()?;
        let sig2 = reader.read_u32()?;
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2_LEGACY {
            return Err(FormatError::header("wrong legacy signature"));
        }
        let flags = reader.read_u32()?;
        let version = reader.read_u32()?;
        if version & LEGACY_VERSION_MASK != LEGACY_VERSION & LEGACY_VERSION_MASK
            || version < LEGACY_VERSION_MIN
        {
            return Err(FormatError::header(format!(
                "unsupported legacy version {version:#010x}"
            )));
        }
        let header = Header1 {
            flags,
            version,
            master_seed: reader.read_array()?,
            iv: reader.read_array()?,
            group_count: reader.read_u32()?,
            entry_count: reader.read_u32()?,
            content_hash: reader.read_array()?,
            transform_seed: reader.read_array()?,
            transform_rounds: reader.read_u32()?,
        };
        header.cipher()?;
        Ok(header)
    }

    pub fn cipher(&self) -> FormatResult<CipherKind> {
        if self.flags & FLAG_RIJNDAEL != 0 {
            Ok(CipherKind::Aes)
        } else if self.flags & FLAG_TWOFISH != 0 {
            Ok(CipherKind::Twofish)
        } else if self.flags & FLAG_ARCFOUR != 0 {
            Err(FormatError::header("ArcFour-encrypted files are not supported"))
        } else {
            Err(FormatError::header("no cipher flag set"))
        }
    }

    pub fn randomize_seeds(&mut self) {
        self.master_seed = random_array();
        self.iv = random_array();
        self.transform_seed = random_array();
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2_LEGACY.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.master_seed);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.group_count.to_le_bytes());
        out.extend_from_slice(&self.entry_count.to_le_bytes());
        out.extend_from_slice(&self.content_hash);
        out.extend_from_slice(&self.transform_seed);
        out.extend_from_slice(&self.transform_rounds.to_le_bytes());
    }
}
