// src/lib.rs
//! encrypted-db-codec: Encrypted password database codec
//!
//! Features:
//! - Legacy v1 container (AES / Twofish, AES-KDF, flat record stream)
//! - Modern v3 / v4 containers (AES / Twofish / ChaCha20, AES-KDF / Argon2, XML payload)
//! - Composite keys: password, key file and hardware challenge-response
//! - Field references resolved across the whole tree
//! - Single-session manager with progress events and cancellation

pub mod aliases;
pub mod config;
pub mod consts;
pub mod crypto;
pub mod database;
pub mod enums;
pub mod error;
pub mod header;
pub mod keys;
pub mod legacy;
pub mod model;
pub mod modern;
pub mod progress;
pub mod session;
pub mod util;
pub mod warnings;
pub mod xml;

// Re-export everything users need at the crate root
pub use config::load as load_config;
pub use database::Database;
pub use enums::{CancelReason, CipherKind, DatabaseFormat, FormatVersion, KdfKind};
pub use error::{DatabaseError, Result};
pub use keys::{ChallengeHandler, CompositeKey, KeyFileSource};
pub use legacy::Database1;
pub use model::{Attachment, Entry, EntryField, EntryId, Group, GroupId, SearchQuery, Tree};
pub use modern::Database2;
pub use progress::Progress;
pub use session::{DatabaseManager, ManagerEvent};
pub use warnings::{LoadWarning, LoadWarnings};
