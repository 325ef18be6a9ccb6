// src/config/defaults.rs
use crate::config::app::{ChallengeSettings, FormatSettings, KdfSettings, ReferenceSettings};
use crate::consts::{
    DEFAULT_AES_KDF_ROUNDS, DEFAULT_ARGON2_ITERATIONS, DEFAULT_ARGON2_MEMORY_KIB,
    DEFAULT_ARGON2_PARALLELISM, DEFAULT_BLOCK_SIZE, DEFAULT_CHALLENGE_TIMEOUT_SECS,
    DEFAULT_REFERENCE_MAX_DEPTH,
};
use crate::enums::{CipherKind, FormatVersion, KdfKind};

pub const CONFIG_ENV_VAR: &str = "EDC_CONFIG";
pub const CONFIG_DIR_NAME: &str = "encrypted-db-codec";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Legacy files have no KDF choice, only a round count
pub const DEFAULT_LEGACY_ROUNDS: u32 = 60_000;

pub fn default_kdf() -> KdfSettings {
    KdfSettings {
        kind: KdfKind::Argon2d,
        aes_rounds: DEFAULT_AES_KDF_ROUNDS,
        argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
        argon2_iterations: DEFAULT_ARGON2_ITERATIONS,
        argon2_parallelism: DEFAULT_ARGON2_PARALLELISM,
    }
}

pub fn default_format() -> FormatSettings {
    FormatSettings {
        version: FormatVersion::V4,
        cipher: CipherKind::Aes,
        compression: true,
        block_size: DEFAULT_BLOCK_SIZE,
        legacy_rounds: DEFAULT_LEGACY_ROUNDS,
    }
}

pub fn default_references() -> ReferenceSettings {
    ReferenceSettings {
        max_depth: DEFAULT_REFERENCE_MAX_DEPTH,
    }
}

pub fn default_challenge() -> ChallengeSettings {
    ChallengeSettings {
        timeout_secs: DEFAULT_CHALLENGE_TIMEOUT_SECS,
    }
}
