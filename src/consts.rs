// src/consts.rs
//! Shared constants: file signatures, algorithm identifiers and defaults

/// First signature word shared by every supported container
pub const SIGNATURE_1: u32 = 0x9AA2_D903;
/// Second signature word of the legacy (v1) container
pub const SIGNATURE_2_LEGACY: u32 = 0xB54B_FB65;
/// Second signature word of pre-release 2.x files (rejected)
pub const SIGNATURE_2_PRERELEASE: u32 = 0xB54B_FB66;
/// Second signature word of the modern (v2/v3/v4) container
pub const SIGNATURE_2_MODERN: u32 = 0xB54B_FB67;

/// Legacy container version written on save
pub const LEGACY_VERSION: u32 = 0x0003_0004;
/// Oldest legacy version we can read
pub const LEGACY_VERSION_MIN: u32 = 0x0003_0002;
pub const LEGACY_VERSION_MASK: u32 = 0xFFFF_FF00;
pub const LEGACY_HEADER_SIZE: usize = 124;

pub const MODERN_VERSION_3_1: u32 = 0x0003_0001;
pub const MODERN_VERSION_4: u32 = 0x0004_0000;
pub const MODERN_VERSION_4_1: u32 = 0x0004_0001;
pub const MODERN_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

// Data cipher UUIDs
pub const CIPHER_AES256: [u8; 16] = [
    0x31, 0xC1, 0xF2, 0xE6, 0xBF, 0x71, 0x43, 0x50, 0xBE, 0x58, 0x05, 0x21, 0x6A, 0xFC, 0x5A, 0xFF,
];
pub const CIPHER_TWOFISH: [u8; 16] = [
    0xAD, 0x68, 0xF2, 0x9F, 0x57, 0x6F, 0x4B, 0xB9, 0xA3, 0x6A, 0xD4, 0x7A, 0xF9, 0x65, 0x34, 0x6C,
];
pub const CIPHER_CHACHA20: [u8; 16] = [
    0xD6, 0x03, 0x8A, 0x2B, 0x8B, 0x6F, 0x4C, 0xB5, 0xA5, 0x24, 0x33, 0x9A, 0x31, 0xDB, 0xB5, 0x9A,
];

// KDF UUIDs
pub const KDF_AES_KDBX3: [u8; 16] = [
    0xC9, 0xD9, 0xF3, 0x9A, 0x62, 0x8A, 0x44, 0x60, 0xBF, 0x74, 0x0D, 0x08, 0xC1, 0x8A, 0x4F, 0xEA,
];
pub const KDF_AES_KDBX4: [u8; 16] = [
    0x7C, 0x02, 0xBB, 0x82, 0x79, 0xA7, 0x4A, 0xC0, 0x92, 0x7D, 0x11, 0x4A, 0x00, 0x64, 0x82, 0x38,
];
pub const KDF_ARGON2D: [u8; 16] = [
    0xEF, 0x63, 0x6D, 0xDF, 0x8C, 0x29, 0x44, 0x4B, 0x91, 0xF7, 0xA9, 0xA4, 0x03, 0xE3, 0x0A, 0x0C,
];
pub const KDF_ARGON2ID: [u8; 16] = [
    0x9E, 0x29, 0x8B, 0x19, 0x56, 0xDB, 0x47, 0x73, 0xB2, 0x3D, 0xFC, 0x3E, 0xC6, 0xF0, 0xA1, 0xE6,
];

/// Fixed Salsa20 nonce for protected in-document values
pub const SALSA20_INNER_IV: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Block size used when writing framed payloads (1 MiB)
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Length of the v3 stream start marker written on save
pub const STREAM_START_BYTES_LEN: usize = 32;

/// Default AES-KDF rounds for new modern databases
pub const DEFAULT_AES_KDF_ROUNDS: u64 = 100_000;

/// Default Argon2 parameters for new v4 databases
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 64 * 1024;
pub const DEFAULT_ARGON2_ITERATIONS: u32 = 10;
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 2;

/// Maximum number of reference hops followed while resolving a field
pub const DEFAULT_REFERENCE_MAX_DEPTH: u8 = 3;

/// Returned instead of a value when nested references go too deep
pub const REFERENCE_DEPTH_SENTINEL: &str = "(ref: too deep)";

/// Seconds to wait for a challenge-response handler before giving up
pub const DEFAULT_CHALLENGE_TIMEOUT_SECS: u64 = 120;

/// Generator name written into the modern document
pub const GENERATOR_NAME: &str = "encrypted-db-codec";

// Well-known field names
pub const FIELD_TITLE: &str = "Title";
pub const FIELD_USER_NAME: &str = "UserName";
pub const FIELD_PASSWORD: &str = "Password";
pub const FIELD_URL: &str = "URL";
pub const FIELD_NOTES: &str = "Notes";
pub const STANDARD_FIELDS: [&str; 5] = [
    FIELD_TITLE,
    FIELD_USER_NAME,
    FIELD_PASSWORD,
    FIELD_URL,
    FIELD_NOTES,
];

pub const LEGACY_BACKUP_GROUP_NAME: &str = "Backup";
pub const LEGACY_BACKUP_GROUP_ICON: u32 = 4;
pub const RECYCLE_BIN_GROUP_NAME: &str = "Recycle Bin";
pub const RECYCLE_BIN_GROUP_ICON: u32 = 43;

/// Substituted for attachments stored without a name
pub const EMPTY_ATTACHMENT_NAME_PLACEHOLDER: &str = "unnamed";
