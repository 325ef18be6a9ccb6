// src/database.rs
//! Format-agnostic database handle
//!
//! The variant is chosen from the signature bytes before any key material is
//! touched; every operation then dispatches to the format's own codec. All
//! format-internal errors are rewrapped into [`DatabaseError`] here.

use tracing::{info, warn};

use crate::config::{self, KdfSettings};
use crate::crypto::KdfParams;
use crate::enums::{CipherKind, DatabaseFormat, FormatVersion, KdfKind};
use crate::error::{DatabaseError, FormatError, Result};
use crate::header;
use crate::keys::CompositeKey;
use crate::legacy::Database1;
use crate::model::{reference, EntryId, GroupId, SearchQuery, Tree};
use crate::modern::Database2;
use crate::progress::{Progress, PROGRESS_TOTAL};
use crate::warnings::LoadWarnings;

#[derive(Debug)]
pub enum Database {
    Legacy(Database1),
    Modern(Database2),
}

/// KDF parameters for a new modern database; v3 only knows AES-KDF
fn kdf_for(settings: &KdfSettings, version: FormatVersion) -> KdfParams {
    match (version, settings.kind) {
        (FormatVersion::V3, _) | (_, KdfKind::Aes) => KdfParams::new_aes(settings.aes_rounds),
        (FormatVersion::V4, kind) => KdfParams::new_argon2(
            kind,
            settings.argon2_memory_kib,
            settings.argon2_iterations,
            settings.argon2_parallelism,
        ),
    }
}

impl Database {
    /// Container family from the first bytes of a file
    pub fn detect_format(data: &[u8]) -> Result<DatabaseFormat> {
        header::detect_format(data).map_err(FormatError::into_load_error)
    }

    /// Empty legacy database with the configured cipher and rounds
    pub fn new_legacy(key: CompositeKey) -> Result<Self> {
        let settings = &config::load().format;
        let cipher = match settings.cipher {
            CipherKind::ChaCha20 => {
                warn!("legacy databases cannot use ChaCha20, falling back to AES");
                CipherKind::Aes
            }
            other => other,
        };
        Database1::new(key, cipher, settings.legacy_rounds)
            .map(Database::Legacy)
            .map_err(FormatError::into_save_error)
    }

    /// Empty modern database of the given version, other settings from config
    pub fn new_modern(key: CompositeKey, version: FormatVersion) -> Result<Self> {
        let conf = config::load();
        let cipher = match (version, conf.format.cipher) {
            (FormatVersion::V3, CipherKind::ChaCha20) => CipherKind::Aes,
            (_, cipher) => cipher,
        };
        Database2::new(
            key,
            version,
            cipher,
            kdf_for(&conf.kdf, version),
            conf.format.compression,
        )
        .map(Database::Modern)
        .map_err(FormatError::into_save_error)
    }

    /// Decrypts and parses `data`; `file_name` is only used for logging.
    /// Non-fatal problems come back in the warnings.
    pub fn load(
        file_name: &str,
        data: &[u8],
        key: CompositeKey,
        progress: Progress,
    ) -> Result<(Self, LoadWarnings)> {
        let format = Self::detect_format(data)?;
        info!(file = file_name, ?format, bytes = data.len(), "loading database");
        let mut warnings = LoadWarnings::default();
        let db = match format {
            DatabaseFormat::Legacy => {
                Database1::load(data, key, progress.clone()).map(Database::Legacy)
            }
            DatabaseFormat::Modern => {
                Database2::load(data, key, progress.clone(), &mut warnings).map(Database::Modern)
            }
        }
        .map_err(|err| {
            warn!(file = file_name, %err, "load failed");
            err.into_load_error()
        })?;
        progress.advance_to(PROGRESS_TOTAL);
        Ok((db, warnings))
    }

    /// Serializes and encrypts with fresh seeds
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let result = match self {
            Database::Legacy(db) => db.save(),
            Database::Modern(db) => db.save(),
        };
        let out = result.map_err(|err| {
            warn!(%err, "save failed");
            err.into_save_error()
        })?;
        self.progress().advance_to(PROGRESS_TOTAL);
        Ok(out)
    }

    pub fn format(&self) -> DatabaseFormat {
        match self {
            Database::Legacy(_) => DatabaseFormat::Legacy,
            Database::Modern(_) => DatabaseFormat::Modern,
        }
    }

    pub fn tree(&self) -> &Tree {
        match self {
            Database::Legacy(db) => db.tree(),
            Database::Modern(db) => db.tree(),
        }
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        match self {
            Database::Legacy(db) => db.tree_mut(),
            Database::Modern(db) => db.tree_mut(),
        }
    }

    pub fn root(&self) -> GroupId {
        self.tree().root()
    }

    pub fn composite_key(&self) -> &CompositeKey {
        match self {
            Database::Legacy(db) => db.composite_key(),
            Database::Modern(db) => db.composite_key(),
        }
    }

    pub fn change_composite_key(&mut self, key: CompositeKey) {
        match self {
            Database::Legacy(db) => db.change_composite_key(key),
            Database::Modern(db) => db.change_composite_key(key),
        }
    }

    pub fn progress(&self) -> &Progress {
        match self {
            Database::Legacy(db) => db.progress(),
            Database::Modern(db) => db.progress(),
        }
    }

    /// Fresh progress handle for the next save
    pub fn set_progress(&mut self, progress: Progress) {
        match self {
            Database::Legacy(db) => db.set_progress(progress),
            Database::Modern(db) => db.set_progress(progress),
        }
    }

    pub fn create_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId> {
        match self {
            Database::Legacy(db) => db.create_group(parent, name),
            Database::Modern(db) => db.create_group(parent, name),
        }
        .map_err(FormatError::into_save_error)
    }

    pub fn create_entry(&mut self, parent: GroupId) -> Result<EntryId> {
        match self {
            Database::Legacy(db) => db.create_entry(parent),
            Database::Modern(db) => db.create_entry(parent),
        }
        .map_err(FormatError::into_save_error)
    }

    pub fn delete_group(&mut self, id: GroupId) -> Result<()> {
        match self {
            Database::Legacy(db) => db.delete_group(id),
            Database::Modern(db) => db.delete_group(id),
        }
        .map_err(FormatError::into_save_error)
    }

    pub fn delete_entry(&mut self, id: EntryId) -> Result<()> {
        match self {
            Database::Legacy(db) => db.delete_entry(id),
            Database::Modern(db) => db.delete_entry(id),
        }
        .map_err(FormatError::into_save_error)
    }

    /// Legacy backup group or modern recycle bin
    pub fn backup_group(&mut self, create: bool) -> Option<GroupId> {
        match self {
            Database::Legacy(db) => db.backup_group(create),
            Database::Modern(db) => db.recycle_bin(create),
        }
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<EntryId> {
        query.run(self.tree())
    }

    /// Recomputes every reference after edits elsewhere in the tree
    pub fn resolve_references(&mut self) {
        let max_depth = config::load().references.max_depth;
        reference::resolve_all(self.tree_mut(), max_depth);
    }

    pub fn unresolve_references(&mut self) {
        reference::unresolve_all(self.tree_mut());
    }

    /// Wipes the tree, the attachments and the key
    pub fn erase(&mut self) {
        match self {
            Database::Legacy(db) => db.erase(),
            Database::Modern(db) => db.erase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_a_load_error_before_any_key_work() {
        let result = Database::load(
            "junk.bin",
            b"definitely not a database",
            CompositeKey::from_password("pw"),
            Progress::new(),
        );
        assert!(matches!(result, Err(DatabaseError::LoadError { .. })));
    }

    #[test]
    fn v3_never_gets_argon2() {
        let settings = crate::config::Config::default().kdf;
        assert_eq!(kdf_for(&settings, FormatVersion::V3).kind(), KdfKind::Aes);
        assert_eq!(kdf_for(&settings, FormatVersion::V4).kind(), settings.kind);
    }
}
