// tests/common.rs
//! Shared test utilities: logging setup and cheap-KDF databases
#![allow(dead_code)]

use encrypted_db_codec::crypto::KdfParams;
use encrypted_db_codec::{
    CipherKind, CompositeKey, Database, Database1, Database2, FormatVersion, KdfKind,
    LoadWarnings, Progress,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Offset of the u32 transform-round count in a legacy header
pub const LEGACY_ROUNDS_OFFSET: usize = 120;

/// Initialize test-friendly logging; safe to call from every test
pub fn setup() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// The three container flavours the codec writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Legacy,
    V3,
    V4,
}

pub const ALL_FLAVORS: [Flavor; 3] = [Flavor::Legacy, Flavor::V3, Flavor::V4];

pub fn key(password: &str) -> CompositeKey {
    CompositeKey::from_password(password)
}

/// Empty database with KDF parameters small enough for the test suite
pub fn cheap_db(flavor: Flavor, password: &str) -> Database {
    match flavor {
        Flavor::Legacy => Database::Legacy(
            Database1::new(key(password), CipherKind::Aes, 10).expect("legacy database"),
        ),
        Flavor::V3 => Database::Modern(
            Database2::new(
                key(password),
                FormatVersion::V3,
                CipherKind::Twofish,
                KdfParams::new_aes(10),
                true,
            )
            .expect("v3 database"),
        ),
        Flavor::V4 => Database::Modern(
            Database2::new(
                key(password),
                FormatVersion::V4,
                CipherKind::ChaCha20,
                KdfParams::new_argon2(KdfKind::Argon2d, 64, 1, 1),
                true,
            )
            .expect("v4 database"),
        ),
    }
}

pub fn reload(bytes: &[u8], password: &str) -> (Database, LoadWarnings) {
    Database::load("test.db", bytes, key(password), Progress::new()).expect("reload")
}
