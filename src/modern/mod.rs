// src/modern/mod.rs
//! Modern (v3/v4) database: TLV header, framed encrypted payload, XML tree
//!
//! v3: `header | E(start marker | hashed blocks(gzip?(xml)))`.
//! v4: `header | sha256 | hmac | hmac blocks(E(gzip?(inner header | xml)))`.
pub mod blocks;
pub mod document;
mod inner_header;
pub mod meta;
pub mod pool;

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::aliases::SecretBytes;
use crate::consts::{
    EMPTY_ATTACHMENT_NAME_PLACEHOLDER, RECYCLE_BIN_GROUP_ICON, RECYCLE_BIN_GROUP_NAME,
    STANDARD_FIELDS,
};
use crate::crypto::{sha256, sha512_parts, DataCipher, KdfParams, ProtectedStream};
use crate::enums::{CipherKind, FormatVersion, InnerStreamKind};
use crate::error::{FormatError, FormatResult, TreeError};
use crate::header::Header2;
use crate::keys::{CompositeKey, ModernKeyHelper};
use crate::model::times::now;
use crate::model::{reference, Entry, EntryId, Group, GroupId, Tree};
use crate::progress::Progress;
use crate::util::{gunzip, gzip, ByteReader};
use crate::warnings::{LoadWarning, LoadWarnings};
use blocks::Span;
use document::{Document, DocumentParts};
use inner_header::{InnerBinary, InnerHeader};
use meta::{DeletedObject, Meta};
use pool::{BinaryPool, PoolBinary};

// Progress milestones, out of `progress::PROGRESS_TOTAL`
const KDF_START: u64 = 50;
const KDF_END: u64 = 700;
const DECRYPTED: u64 = 750;
const BLOCKS_DONE: u64 = 850;
const PARSED: u64 = 950;

/// Derives the cipher and HMAC keys into `key`.
///
/// The challenge-response goes into different places per version: v3 asks
/// with the master seed and appends the response after the KDF, v4 asks
/// with the KDF seed and appends it to the combined key before hashing.
pub(crate) fn derive_keys(
    header: &Header2,
    key: &mut CompositeKey,
    progress: &Progress,
) -> FormatResult<()> {
    key.prepare(&ModernKeyHelper)?;
    let combined = key.require_combined()?;
    let mut joined = Zeroizing::new(header.master_seed.clone());
    match header.format_version() {
        FormatVersion::V3 => {
            let hashed = Zeroizing::new(sha256(combined.expose_secret()));
            let transformed = header
                .kdf
                .transform(hashed.as_slice(), progress, KDF_START, KDF_END)?;
            if let Some(response) = key.get_response(&header.master_seed, progress)? {
                joined.extend_from_slice(response.expose_secret());
            }
            joined.extend_from_slice(transformed.expose_secret());
        }
        FormatVersion::V4 => {
            let mut material = Zeroizing::new(combined.expose_secret().to_vec());
            if let Some(response) = key.get_response(header.kdf.challenge(), progress)? {
                material.extend_from_slice(response.expose_secret());
            }
            let hashed = Zeroizing::new(sha256(&material));
            let transformed = header
                .kdf
                .transform(hashed.as_slice(), progress, KDF_START, KDF_END)?;
            joined.extend_from_slice(transformed.expose_secret());
        }
    }
    let cipher_key = DataCipher::new(header.cipher).resize_key(&joined);
    let hmac_key = sha512_parts(&[joined.as_slice(), &[0x01]]);
    key.set_final_keys(cipher_key, Some(SecretBytes::new(hmac_key.to_vec())))?;
    Ok(())
}

fn block_size() -> usize {
    crate::config::load().format.block_size
}

pub struct Database2 {
    header: Header2,
    meta: Meta,
    tree: Tree,
    deleted_objects: Vec<DeletedObject>,
    binaries: BinaryPool,
    key: CompositeKey,
    progress: Progress,
}

impl std::fmt::Debug for Database2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database2")
            .field("format", &self.header.format_version())
            .field("groups", &self.tree.group_count())
            .field("entries", &self.tree.entry_count())
            .field("binaries", &self.binaries.len())
            .finish_non_exhaustive()
    }
}

impl Database2 {
    /// Empty database; keys are derived on the first save
    pub fn new(
        key: CompositeKey,
        format: FormatVersion,
        cipher: CipherKind,
        kdf: KdfParams,
        compressed: bool,
    ) -> FormatResult<Self> {
        Ok(Database2 {
            header: Header2::new(format, cipher, kdf, compressed)?,
            meta: Meta::default(),
            tree: Tree::new(Group::new("Root"), true),
            deleted_objects: Vec::new(),
            binaries: BinaryPool::new(),
            key,
            progress: Progress::new(),
        })
    }

    pub fn format_version(&self) -> FormatVersion {
        self.header.format_version()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    pub fn header(&self) -> &Header2 {
        &self.header
    }

    pub fn deleted_objects(&self) -> &[DeletedObject] {
        &self.deleted_objects
    }

    pub fn binaries(&self) -> &BinaryPool {
        &self.binaries
    }

    pub fn composite_key(&self) -> &CompositeKey {
        &self.key
    }

    /// Replaces the master key; takes effect on the next save
    pub fn change_composite_key(&mut self, key: CompositeKey) {
        self.key.erase();
        self.key = key;
        self.meta.master_key_changed = now();
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn set_progress(&mut self, progress: Progress) {
        self.progress = progress;
    }

    pub fn load(
        data: &[u8],
        key: CompositeKey,
        progress: Progress,
        warnings: &mut LoadWarnings,
    ) -> FormatResult<Self> {
        let (header, consumed) = Header2::read(data)?;
        let format = header.format_version();
        debug!(
            ?format,
            cipher = ?header.cipher,
            kdf = ?header.kdf.kind(),
            compressed = header.compressed,
            "modern header read"
        );
        let mut db = Database2 {
            header,
            meta: Meta::default(),
            tree: Tree::new(Group::new("Root"), true),
            deleted_objects: Vec::new(),
            binaries: BinaryPool::new(),
            key,
            progress,
        };
        derive_keys(&db.header, &mut db.key, &db.progress)?;

        let body = &data[consumed..];
        let document = match format {
            FormatVersion::V3 => db.read_v3(body)?,
            FormatVersion::V4 => db.read_v4(body)?,
        };
        db.progress.advance_to(PARSED);
        db.adopt(document, warnings);
        info!(
            ?format,
            groups = db.tree.group_count(),
            entries = db.tree.entry_count(),
            binaries = db.binaries.len(),
            warnings = warnings.issues.len(),
            "modern database loaded"
        );
        Ok(db)
    }

    fn cipher_key(&self) -> FormatResult<&SecretBytes> {
        self.key
            .cipher_key()
            .ok_or_else(|| FormatError::corrupted("no cipher key after derivation"))
    }

    fn hmac_key(&self) -> FormatResult<&SecretBytes> {
        self.key
            .hmac_key()
            .ok_or_else(|| FormatError::corrupted("no HMAC key after derivation"))
    }

    fn read_v3(&self, body: &[u8]) -> FormatResult<Document> {
        let plaintext = DataCipher::new(self.header.cipher)
            .decrypt(self.cipher_key()?.expose_secret(), &self.header.iv, body)
            .map(Zeroizing::new)
            .map_err(|_| FormatError::InvalidKey)?;
        let marker = &self.header.stream_start_bytes;
        if !plaintext.starts_with(marker) {
            return Err(FormatError::InvalidKey);
        }
        self.progress.advance_to(DECRYPTED);

        let span = Span {
            start: DECRYPTED,
            end: BLOCKS_DONE,
        };
        let mut payload = Zeroizing::new(blocks::read_hashed_blocks(
            &plaintext[marker.len()..],
            &self.progress,
            span,
        )?);
        if self.header.compressed {
            payload = Zeroizing::new(gunzip(&payload)?);
        }

        let stream = ProtectedStream::new(self.header.inner_stream, &self.header.protected_stream_key)?;
        let document = document::read(&payload, stream, &self.progress)?;
        if let Some(stored) = document.meta.header_hash {
            if stored != self.header.hash() {
                return Err(FormatError::corrupted(
                    "header hash in the document does not match the file header",
                ));
            }
        }
        Ok(document)
    }

    fn read_v4(&self, body: &[u8]) -> FormatResult<Document> {
        let mut reader = ByteReader::new(body);
        let stored_hash: [u8; 32] = reader.read_array()?;
        let stored_hmac: [u8; 32] = reader.read_array()?;
        if stored_hash != self.header.hash() {
            return Err(FormatError::corrupted("header checksum mismatch"));
        }
        let hmac_key = self.hmac_key()?;
        if blocks::header_hmac(self.header.raw(), hmac_key.expose_secret())? != stored_hmac {
            return Err(FormatError::InvalidKey);
        }

        let span = Span {
            start: KDF_END,
            end: DECRYPTED,
        };
        let ciphertext =
            blocks::read_hmac_blocks(reader.rest(), hmac_key.expose_secret(), &self.progress, span)?;
        let mut payload = Zeroizing::new(DataCipher::new(self.header.cipher).decrypt(
            self.cipher_key()?.expose_secret(),
            &self.header.iv,
            &ciphertext,
        )?);
        self.progress.advance_to(BLOCKS_DONE);
        if self.header.compressed {
            payload = Zeroizing::new(gunzip(&payload)?);
        }

        let (inner, consumed) = InnerHeader::read(&payload)?;
        debug!(
            stream = ?inner.stream,
            binaries = inner.binaries.len(),
            "inner header read"
        );
        let stream = ProtectedStream::new(inner.stream, &inner.stream_key)?;
        let mut document = document::read(&payload[consumed..], stream, &self.progress)?;
        document.binaries = BinaryPool::new();
        for (id, binary) in inner.binaries.into_iter().enumerate() {
            document.binaries.insert(
                id,
                PoolBinary {
                    data: binary.data,
                    is_compressed: true,
                    is_protected: binary.is_protected,
                },
            );
        }
        Ok(document)
    }

    /// Takes over a parsed document and runs the non-fatal integrity passes
    fn adopt(&mut self, document: Document, warnings: &mut LoadWarnings) {
        self.meta = document.meta;
        self.tree = document.tree;
        self.deleted_objects = document.deleted_objects;
        self.binaries = document.binaries;
        if !self.meta.generator.is_empty() {
            warnings.generator = Some(self.meta.generator.clone());
        }

        self.binaries.attach_to(&mut self.tree, warnings);

        let mut nameless_attachments = Vec::new();
        let mut nameless_fields = Vec::new();
        for entry in self.tree.entries_mut() {
            let title = entry.title().to_owned();
            let mut renamed = false;
            for attachment in entry.all_attachments_mut() {
                if attachment.name.is_empty() {
                    attachment.name = EMPTY_ATTACHMENT_NAME_PLACEHOLDER.to_owned();
                    renamed = true;
                }
            }
            if renamed {
                nameless_attachments.push(title.clone());
            }
            if entry.fields.iter().any(|f| f.name.is_empty()) {
                nameless_fields.push(title);
            }
        }
        if !nameless_attachments.is_empty() {
            warnings.push(LoadWarning::NamelessAttachments {
                entries: nameless_attachments,
            });
        }
        if !nameless_fields.is_empty() {
            warnings.push(LoadWarning::NamelessCustomFields {
                entries: nameless_fields,
            });
        }

        if let Some(bin) = self.recycle_bin(false) {
            self.tree.set_deleted_recursive(bin, true);
        }
        reference::resolve_all(&mut self.tree, crate::config::load().references.max_depth);
    }

    pub fn save(&mut self) -> FormatResult<Vec<u8>> {
        self.progress.check()?;
        let format = self.header.format_version();
        self.binaries = BinaryPool::rebuild(&self.binaries, &mut self.tree, format == FormatVersion::V4);
        self.header.randomize_seeds();
        if format == FormatVersion::V4 {
            self.header.inner_stream = InnerStreamKind::ChaCha20;
        }
        derive_keys(&self.header, &mut self.key, &self.progress)?;

        let out = match format {
            FormatVersion::V3 => self.write_v3()?,
            FormatVersion::V4 => self.write_v4()?,
        };
        info!(
            ?format,
            groups = self.tree.group_count(),
            entries = self.tree.entry_count(),
            binaries = self.binaries.len(),
            bytes = out.len(),
            "modern database saved"
        );
        Ok(out)
    }

    fn parts(&self, v3_header_hash: Option<[u8; 32]>) -> DocumentParts<'_> {
        DocumentParts {
            meta: &self.meta,
            tree: &self.tree,
            deleted_objects: &self.deleted_objects,
            binaries: v3_header_hash.map(|_| &self.binaries),
            header_hash: v3_header_hash,
        }
    }

    fn write_v3(&mut self) -> FormatResult<Vec<u8>> {
        let header_bytes = self.header.write()?;
        let stream = ProtectedStream::new(self.header.inner_stream, &self.header.protected_stream_key)?;
        let xml = Zeroizing::new(document::write(
            self.parts(Some(self.header.hash())),
            FormatVersion::V3,
            stream,
            &self.progress,
        )?);
        let payload = if self.header.compressed {
            Zeroizing::new(gzip(&xml)?)
        } else {
            xml
        };

        let span = Span {
            start: KDF_END,
            end: BLOCKS_DONE,
        };
        let mut plaintext = Zeroizing::new(self.header.stream_start_bytes.clone());
        plaintext.extend_from_slice(&blocks::write_hashed_blocks(
            &payload,
            block_size(),
            &self.progress,
            span,
        )?);
        let ciphertext = DataCipher::new(self.header.cipher).encrypt(
            self.cipher_key()?.expose_secret(),
            &self.header.iv,
            &plaintext,
        )?;

        let mut out = header_bytes;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn write_v4(&mut self) -> FormatResult<Vec<u8>> {
        let header_bytes = self.header.write()?;
        let inner = InnerHeader {
            stream: InnerStreamKind::ChaCha20,
            stream_key: Zeroizing::new(self.header.protected_stream_key.clone()),
            binaries: self
                .binaries
                .iter()
                .map(|(_, binary)| InnerBinary {
                    data: binary.data.clone(),
                    is_protected: binary.is_protected,
                })
                .collect(),
        };
        let stream = ProtectedStream::new(inner.stream, &inner.stream_key)?;
        let xml = Zeroizing::new(document::write(
            self.parts(None),
            FormatVersion::V4,
            stream,
            &self.progress,
        )?);

        let mut payload = Zeroizing::new(Vec::with_capacity(xml.len()));
        inner.write(&mut payload);
        payload.extend_from_slice(&xml);
        if self.header.compressed {
            payload = Zeroizing::new(gzip(&payload)?);
        }
        let ciphertext = DataCipher::new(self.header.cipher).encrypt(
            self.cipher_key()?.expose_secret(),
            &self.header.iv,
            &payload,
        )?;

        let hmac_key = self.hmac_key()?;
        let span = Span {
            start: KDF_END,
            end: BLOCKS_DONE,
        };
        let framed = blocks::write_hmac_blocks(
            &ciphertext,
            hmac_key.expose_secret(),
            block_size(),
            &self.progress,
            span,
        )?;

        let mut out = Vec::with_capacity(header_bytes.len() + 64 + framed.len());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&sha256(&header_bytes));
        out.extend_from_slice(&blocks::header_hmac(&header_bytes, hmac_key.expose_secret())?);
        out.extend_from_slice(&framed);
        Ok(out)
    }

    /// The recycle bin group; created on request when recycling is enabled
    pub fn recycle_bin(&mut self, create: bool) -> Option<GroupId> {
        if let Some(existing) = self.meta.recycle_bin_uuid.and_then(|u| self.tree.find_group(u)) {
            return Some(existing);
        }
        if !create || !self.meta.recycle_bin_enabled {
            return None;
        }
        let mut group = Group::new(RECYCLE_BIN_GROUP_NAME).with_icon(RECYCLE_BIN_GROUP_ICON);
        group.enable_auto_type = Some(false);
        group.enable_searching = Some(false);
        group.is_deleted = true;
        let uuid = group.uuid;
        let root = self.tree.root();
        let id = self.tree.add_group(root, group).ok()?;
        self.meta.set_recycle_bin(Some(uuid));
        debug!("recycle bin created");
        Some(id)
    }

    pub fn create_group(&mut self, parent: GroupId, name: &str) -> FormatResult<GroupId> {
        Ok(self.tree.add_group(parent, Group::new(name))?)
    }

    /// New entry with the standard fields, protected per the meta settings
    pub fn create_entry(&mut self, parent: GroupId) -> FormatResult<EntryId> {
        let mut entry = Entry::new();
        for field in &mut entry.fields {
            if STANDARD_FIELDS.contains(&field.name.as_str()) {
                field.is_protected = self.meta.memory_protection.is_protected(&field.name);
            }
        }
        Ok(self.tree.add_entry(parent, entry)?)
    }

    /// Moves the entry to the recycle bin, or removes it for good (with a
    /// tombstone) when recycling is off or it is already deleted
    pub fn delete_entry(&mut self, id: EntryId) -> FormatResult<()> {
        let entry = self.tree.entry(id).ok_or(TreeError::UnknownEntry)?;
        if !entry.is_deleted {
            if let Some(bin) = self.recycle_bin(true) {
                self.tree.move_entry(id, bin)?;
                return Ok(());
            }
        }
        let mut entry = self.tree.remove_entry(id)?;
        self.deleted_objects.push(DeletedObject::now(entry.uuid));
        entry.erase();
        Ok(())
    }

    pub fn delete_group(&mut self, id: GroupId) -> FormatResult<()> {
        if id == self.tree.root() {
            return Err(TreeError::RootGroup.into());
        }
        let group = self.tree.group(id).ok_or(TreeError::UnknownGroup)?;
        if !group.is_deleted {
            // A group holding the bin cannot move into it; it is removed for good
            let bin = self
                .recycle_bin(true)
                .filter(|bin| !self.tree.is_within(*bin, id));
            if let Some(bin) = bin {
                self.tree.move_group(id, bin)?;
                return Ok(());
            }
        }
        let removed = self.tree.remove_group(id)?;
        if self
            .meta
            .recycle_bin_uuid
            .is_some_and(|bin| removed.contains(&bin))
        {
            self.meta.set_recycle_bin(None);
        }
        self.deleted_objects
            .extend(removed.into_iter().map(DeletedObject::now));
        Ok(())
    }

    /// Snapshots the entry into its history before an edit
    pub fn backup_entry(&mut self, id: EntryId) -> FormatResult<()> {
        let max_items = self.meta.history_max_items;
        let entry = self.tree.entry_mut(id).ok_or(TreeError::UnknownEntry)?;
        entry.backup_state(max_items);
        Ok(())
    }

    pub fn erase(&mut self) {
        self.tree.erase();
        self.binaries.erase();
        self.deleted_objects.clear();
        self.meta.custom_icons.clear();
        self.key.erase();
    }
}

impl Drop for Database2 {
    fn drop(&mut self) {
        self.erase();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::enums::KdfKind;
    use crate::keys::{ChallengeHandler, ResponseSender};
    use crate::model::Attachment;

    fn cheap_kdf(format: FormatVersion) -> KdfParams {
        match format {
            FormatVersion::V3 => KdfParams::new_aes(10),
            FormatVersion::V4 => KdfParams::new_argon2(KdfKind::Argon2id, 64, 1, 1),
        }
    }

    fn new_db(format: FormatVersion, password: &str) -> Database2 {
        let cipher = match format {
            FormatVersion::V3 => CipherKind::Aes,
            FormatVersion::V4 => CipherKind::ChaCha20,
        };
        Database2::new(
            CompositeKey::from_password(password),
            format,
            cipher,
            cheap_kdf(format),
            true,
        )
        .unwrap()
    }

    fn populate(db: &mut Database2) -> EntryId {
        let root = db.tree().root();
        let group = db.create_group(root, "Email").unwrap();
        let id = db.create_entry(group).unwrap();
        let entry = db.tree_mut().entry_mut(id).unwrap();
        entry.set_value("Title", "Mailbox");
        entry.set_value("Password", "s3cret");
        entry.set_field("Recovery", "word list", true);
        entry
            .attachments
            .push(Attachment::new("key.pem", b"-----BEGIN-----".to_vec()));
        db.backup_entry(id).unwrap();
        db.tree_mut()
            .entry_mut(id)
            .unwrap()
            .set_value("Password", "n3wer");
        id
    }

    fn reload(bytes: &[u8], password: &str) -> (Database2, LoadWarnings) {
        let mut warnings = LoadWarnings::default();
        let db = Database2::load(
            bytes,
            CompositeKey::from_password(password),
            Progress::new(),
            &mut warnings,
        )
        .unwrap();
        (db, warnings)
    }

    #[test]
    fn round_trip_keeps_entries_history_and_attachments() {
        for format in [FormatVersion::V3, FormatVersion::V4] {
            let mut db = new_db(format, "pw");
            populate(&mut db);
            let bytes = db.save().unwrap();

            let (back, warnings) = reload(&bytes, "pw");
            assert!(warnings.is_empty(), "{format:?}: {warnings:?}");
            assert_eq!(back.format_version(), format);
            let tree = back.tree();
            let id = tree.all_entries()[0];
            let entry = tree.entry(id).unwrap();
            assert_eq!(entry.title(), "Mailbox");
            assert_eq!(entry.password(), "n3wer");
            assert_eq!(entry.value("Recovery"), "word list");
            assert!(entry.field("Recovery").unwrap().is_protected);
            assert_eq!(entry.attachments[0].data, b"-----BEGIN-----");
            assert_eq!(entry.history.len(), 1);
            assert_eq!(entry.history[0].password(), "s3cret");
            // Current and historical copies share one pooled binary
            assert_eq!(back.binaries().len(), 1);
        }
    }

    #[test]
    fn wrong_password_is_invalid_key() {
        for format in [FormatVersion::V3, FormatVersion::V4] {
            let mut db = new_db(format, "right");
            let bytes = db.save().unwrap();
            let result = Database2::load(
                &bytes,
                CompositeKey::from_password("wrong"),
                Progress::new(),
                &mut LoadWarnings::default(),
            );
            assert!(
                matches!(result, Err(FormatError::InvalidKey)),
                "{format:?}: {result:?}"
            );
        }
    }

    #[test]
    fn tampered_v4_block_is_corruption_not_invalid_key() {
        let mut db = new_db(FormatVersion::V4, "pw");
        populate(&mut db);
        let mut bytes = db.save().unwrap();
        let last = bytes.len() - 40;
        bytes[last] ^= 0xFF;
        let result = Database2::load(
            &bytes,
            CompositeKey::from_password("pw"),
            Progress::new(),
            &mut LoadWarnings::default(),
        );
        assert!(matches!(result, Err(FormatError::Corrupted(_))), "{result:?}");
    }

    /// Bumps the minor version word, which keeps the file readable but
    /// changes the raw header bytes
    fn with_bumped_minor_version(mut bytes: Vec<u8>) -> Vec<u8> {
        bytes[8] ^= 0x02;
        bytes
    }

    #[test]
    fn v3_header_hash_mismatch_is_corruption_not_invalid_key() {
        let mut db = new_db(FormatVersion::V3, "pw");
        populate(&mut db);
        let bytes = with_bumped_minor_version(db.save().unwrap());
        let result = Database2::load(
            &bytes,
            CompositeKey::from_password("pw"),
            Progress::new(),
            &mut LoadWarnings::default(),
        );
        assert!(matches!(result, Err(FormatError::Corrupted(_))), "{result:?}");
    }

    #[test]
    fn tampered_v4_header_is_corruption_not_invalid_key() {
        let mut db = new_db(FormatVersion::V4, "pw");
        populate(&mut db);
        let bytes = with_bumped_minor_version(db.save().unwrap());
        let result = Database2::load(
            &bytes,
            CompositeKey::from_password("pw"),
            Progress::new(),
            &mut LoadWarnings::default(),
        );
        assert!(matches!(result, Err(FormatError::Corrupted(_))), "{result:?}");
    }

    #[test]
    fn nameless_custom_field_is_reported() {
        for format in [FormatVersion::V3, FormatVersion::V4] {
            let mut db = new_db(format, "pw");
            let id = populate(&mut db);
            db.tree_mut()
                .entry_mut(id)
                .unwrap()
                .set_field("", "orphan value", false);
            let bytes = db.save().unwrap();

            let (back, warnings) = reload(&bytes, "pw");
            assert!(
                warnings.issues.iter().any(|issue| matches!(
                    issue,
                    LoadWarning::NamelessCustomFields { entries } if entries == &["Mailbox".to_owned()]
                )),
                "{format:?}: {warnings:?}"
            );
            let entry = back.tree().entry(back.tree().all_entries()[0]).unwrap();
            assert_eq!(entry.value(""), "orphan value");
        }
    }

    fn fixed_response(byte: u8) -> Arc<dyn ChallengeHandler> {
        Arc::new(move |_challenge: &[u8], responder: ResponseSender| {
            responder.send(Ok(SecretBytes::new(vec![byte; 20])));
        })
    }

    fn derived_cipher_key(format: FormatVersion, response: u8) -> Vec<u8> {
        let mut header =
            Header2::new(format, CipherKind::Aes, KdfParams::new_aes(5), false).unwrap();
        header.master_seed = vec![1u8; 32];
        header.kdf = KdfParams::Aes {
            rounds: 5,
            seed: vec![2u8; 32],
        };
        let mut key = CompositeKey::new("pw", None, Some(fixed_response(response)));
        derive_keys(&header, &mut key, &Progress::new()).unwrap();
        key.cipher_key().unwrap().expose_secret().to_vec()
    }

    #[test]
    fn challenge_response_placement_differs_per_version() {
        let progress = Progress::new();
        let combined = sha256(b"pw").to_vec();
        let response = vec![7u8; 20];
        let kdf = |input: &[u8]| {
            crate::crypto::aes_kdf(input, &[2u8; 32], 5, &progress, 0, 1)
                .unwrap()
                .to_vec()
        };

        // v3: seed | response | KDF(sha256(combined))
        let mut joined = vec![1u8; 32];
        joined.extend_from_slice(&response);
        joined.extend_from_slice(&kdf(&sha256(&combined)));
        let v3_expected = sha256(&joined).to_vec();

        // v4: seed | KDF(sha256(combined | response))
        let mut material = combined.clone();
        material.extend_from_slice(&response);
        let mut joined = vec![1u8; 32];
        joined.extend_from_slice(&kdf(&sha256(&material)));
        let v4_expected = sha256(&joined).to_vec();

        assert_eq!(derived_cipher_key(FormatVersion::V3, 7), v3_expected);
        assert_eq!(derived_cipher_key(FormatVersion::V4, 7), v4_expected);
        assert_ne!(v3_expected, v4_expected);
        assert_ne!(derived_cipher_key(FormatVersion::V4, 8), v4_expected);
    }

    #[test]
    fn delete_recycles_first_then_removes_with_tombstone() {
        let mut db = new_db(FormatVersion::V4, "pw");
        let id = populate(&mut db);
        let uuid = db.tree().entry(id).unwrap().uuid;

        db.delete_entry(id).unwrap();
        let bin = db.recycle_bin(false).unwrap();
        let entry = db.tree().entry(id).unwrap();
        assert_eq!(entry.parent(), Some(bin));
        assert!(entry.is_deleted);
        assert!(db.deleted_objects().is_empty());

        db.delete_entry(id).unwrap();
        assert!(db.tree().entry(id).is_none());
        assert_eq!(db.deleted_objects().len(), 1);
        assert_eq!(db.deleted_objects()[0].uuid, uuid);
    }

    #[test]
    fn without_recycling_groups_are_removed_with_every_uuid() {
        let mut db = new_db(FormatVersion::V3, "pw");
        db.meta_mut().recycle_bin_enabled = false;
        let root = db.tree().root();
        let group = db.create_group(root, "Old").unwrap();
        db.create_entry(group).unwrap();
        db.create_entry(group).unwrap();

        db.delete_group(group).unwrap();
        assert!(db.recycle_bin(false).is_none());
        assert_eq!(db.deleted_objects().len(), 3);
        assert_eq!(db.tree().group_count(), 1);
    }

    #[test]
    fn recycle_bin_contents_stay_deleted_after_reload() {
        let mut db = new_db(FormatVersion::V3, "pw");
        let root = db.tree().root();
        let group = db.create_group(root, "Trash me").unwrap();
        let entry = db.create_entry(group).unwrap();
        db.delete_group(group).unwrap();
        assert!(db.tree().entry(entry).unwrap().is_deleted);

        let bytes = db.save().unwrap();
        let (back, _) = reload(&bytes, "pw");
        let tree = back.tree();
        let entry = tree.entry(tree.all_entries()[0]).unwrap();
        assert!(entry.is_deleted);
    }

    #[test]
    fn nameless_attachments_are_renamed_on_load() {
        let mut db = new_db(FormatVersion::V4, "pw");
        let root = db.tree().root();
        let id = db.create_entry(root).unwrap();
        db.tree_mut()
            .entry_mut(id)
            .unwrap()
            .attachments
            .push(Attachment::new("", b"data".to_vec()));
        let bytes = db.save().unwrap();

        let (back, warnings) = reload(&bytes, "pw");
        let entry = back.tree().entry(back.tree().all_entries()[0]).unwrap();
        assert_eq!(entry.attachments[0].name, EMPTY_ATTACHMENT_NAME_PLACEHOLDER);
        assert!(matches!(
            warnings.issues.as_slice(),
            [LoadWarning::NamelessAttachments { .. }]
        ));
    }

    #[test]
    fn dropping_the_database_wipes_current_and_historical_fields() {
        use crate::model::field::WIPED_FIELDS;

        let mut db = new_db(FormatVersion::V4, "pw");
        let id = populate(&mut db);
        let entry = db.tree().entry(id).unwrap();
        let fields = entry.fields.len() + entry.history.iter().map(|old| old.fields.len()).sum::<usize>();

        let before = WIPED_FIELDS.with(|wiped| wiped.get());
        drop(db);
        assert!(WIPED_FIELDS.with(|wiped| wiped.get()) >= before + 2 * fields);
    }

    #[test]
    fn deleting_the_group_that_holds_the_bin_removes_it() {
        let mut db = new_db(FormatVersion::V4, "pw");
        let root = db.tree().root();
        let outer = db.create_group(root, "Outer").unwrap();
        let inner = db.create_entry(outer).unwrap();
        let bin = db.recycle_bin(true).unwrap();
        db.tree_mut().move_group(bin, outer).unwrap();

        db.delete_group(outer).unwrap();
        assert!(db.tree().group(outer).is_none());
        assert!(db.tree().group(bin).is_none());
        assert!(db.tree().entry(inner).is_none());
        assert_eq!(db.meta().recycle_bin_uuid, None);
        assert_eq!(db.deleted_objects().len(), 3);

        // the next deletion gets a fresh bin
        let other = db.create_group(root, "Other").unwrap();
        db.delete_group(other).unwrap();
        let fresh = db.recycle_bin(false).unwrap();
        assert_eq!(db.tree().group(other).unwrap().parent, Some(fresh));
    }
}
