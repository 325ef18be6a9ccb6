// src/enums.rs
//! Public enum types used throughout the crate
//!
//! Central location for the small closed sets the codec switches on:
//! container formats, ciphers, KDFs, inner streams, cancellation reasons.

use serde::{Deserialize, Serialize};

use crate::consts::{
    CIPHER_AES256, CIPHER_CHACHA20, CIPHER_TWOFISH, KDF_AES_KDBX3, KDF_AES_KDBX4, KDF_ARGON2D,
    KDF_ARGON2ID,
};

/// Container family, decided from signature bytes alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseFormat {
    /// Version 1 container wrapping a flat record stream
    Legacy,
    /// Version 2+ container wrapping an XML document
    Modern,
}

/// Major revision of the modern container
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V3,
    #[default]
    V4,
}

/// Symmetric cipher for the outer payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CipherKind {
    #[default]
    Aes,
    Twofish,
    ChaCha20,
}

impl CipherKind {
    pub fn from_uuid(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b if b == CIPHER_AES256 => Some(Self::Aes),
            b if b == CIPHER_TWOFISH => Some(Self::Twofish),
            b if b == CIPHER_CHACHA20 => Some(Self::ChaCha20),
            _ => None,
        }
    }

    pub fn uuid(self) -> [u8; 16] {
        match self {
            Self::Aes => CIPHER_AES256,
            Self::Twofish => CIPHER_TWOFISH,
            Self::ChaCha20 => CIPHER_CHACHA20,
        }
    }

    /// IV length the cipher expects in the header
    pub fn iv_len(self) -> usize {
        match self {
            Self::Aes | Self::Twofish => 16,
            Self::ChaCha20 => 12,
        }
    }
}

/// Key-derivation function family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KdfKind {
    Aes,
    #[default]
    Argon2d,
    Argon2id,
}

impl KdfKind {
    pub fn from_uuid(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b if b == KDF_AES_KDBX3 || b == KDF_AES_KDBX4 => Some(Self::Aes),
            b if b == KDF_ARGON2D => Some(Self::Argon2d),
            b if b == KDF_ARGON2ID => Some(Self::Argon2id),
            _ => None,
        }
    }

    pub fn uuid(self) -> [u8; 16] {
        match self {
            Self::Aes => KDF_AES_KDBX4,
            Self::Argon2d => KDF_ARGON2D,
            Self::Argon2id => KDF_ARGON2ID,
        }
    }
}

/// Stream cipher protecting in-document field values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerStreamKind {
    None,
    Salsa20,
    ChaCha20,
}

impl InnerStreamKind {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            2 => Some(Self::Salsa20),
            3 => Some(Self::ChaCha20),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Salsa20 => 2,
            Self::ChaCha20 => 3,
        }
    }
}

/// Why a long-running operation stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserRequest,
    LowMemory,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRequest => f.write_str("cancelled by user"),
            Self::LowMemory => f.write_str("not enough memory"),
        }
    }
}
