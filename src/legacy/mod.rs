// src/legacy/mod.rs
//! Legacy (v1) database: fixed header plus one encrypted record stream
//!
//! The payload is a flat list of group records, each carrying its nesting
//! level, followed by entry records that point to a group id. The tree is
//! rebuilt from the levels on load and flattened again in pre-order on save.
pub mod records;

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::aliases::SecretBytes;
use crate::consts::{LEGACY_BACKUP_GROUP_ICON, LEGACY_BACKUP_GROUP_NAME, LEGACY_HEADER_SIZE};
use crate::crypto::{aes_kdf, sha256, sha256_parts, DataCipher};
use crate::enums::CipherKind;
use crate::error::{FormatError, FormatResult, TreeError};
use crate::header::Header1;
use crate::keys::{CompositeKey, LegacyKeyHelper};
use crate::model::{reference, Entry, EntryId, Group, GroupId, Tree};
use crate::progress::Progress;
use records::{EntryRecord, GroupRecord};

// Progress milestones, out of `progress::PROGRESS_TOTAL`
const KDF_START: u64 = 50;
const KDF_END: u64 = 700;
const DECRYPTED: u64 = 800;
const PARSED: u64 = 950;

/// Entry hidden from the tree but written back on save
#[derive(Debug, Clone)]
struct MetaStream {
    entry: Entry,
    group_id: u32,
}

pub struct Database1 {
    header: Header1,
    tree: Tree,
    meta_streams: Vec<MetaStream>,
    key: CompositeKey,
    progress: Progress,
}

impl std::fmt::Debug for Database1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database1")
            .field("groups", &self.tree.group_count())
            .field("entries", &self.tree.entry_count())
            .field("meta_streams", &self.meta_streams.len())
            .finish_non_exhaustive()
    }
}

fn root_group() -> Group {
    Group::new("Root")
}

impl Database1 {
    /// Empty database; nothing is derived until the first save
    pub fn new(key: CompositeKey, cipher: CipherKind, transform_rounds: u32) -> FormatResult<Self> {
        Ok(Database1 {
            header: Header1::new(cipher, transform_rounds)?,
            tree: Tree::new(root_group(), false),
            meta_streams: Vec::new(),
            key,
            progress: Progress::new(),
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn header(&self) -> &Header1 {
        &self.header
    }

    pub fn composite_key(&self) -> &CompositeKey {
        &self.key
    }

    /// Replaces the master key; takes effect on the next save
    pub fn change_composite_key(&mut self, key: CompositeKey) {
        self.key.erase();
        self.key = key;
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn set_progress(&mut self, progress: Progress) {
        self.progress = progress;
    }

    fn derive_final_key(&mut self) -> FormatResult<()> {
        if self.key.has_challenge_handler() {
            return Err(FormatError::Unsupported(
                "challenge-response keys in legacy databases".into(),
            ));
        }
        self.key.prepare(&LegacyKeyHelper)?;
        let combined = self.key.require_combined()?;
        let hashed = Zeroizing::new(sha256(combined.expose_secret()));
        let transformed = aes_kdf(
            hashed.as_slice(),
            &self.header.transform_seed,
            u64::from(self.header.transform_rounds),
            &self.progress,
            KDF_START,
            KDF_END,
        )?;
        let final_key = Zeroizing::new(sha256_parts(&[
            &self.header.master_seed[..],
            transformed.as_slice(),
        ]));
        self.key
            .set_final_keys(SecretBytes::new(final_key.to_vec()), None)?;
        Ok(())
    }

    pub fn load(
        data: &[u8],
        key: CompositeKey,
        progress: Progress,
    ) -> FormatResult<Self> {
        let header = Header1::read(data)?;
        let cipher = header.cipher()?;
        debug!(?cipher, rounds = header.transform_rounds, "legacy header read");
        let mut db = Database1 {
            header,
            tree: Tree::new(root_group(), false),
            meta_streams: Vec::new(),
            key,
            progress,
        };
        db.derive_final_key()?;

        let cipher_key = db.key.cipher_key().ok_or(FormatError::InvalidKey)?;
        let plaintext = DataCipher::new(cipher)
            .decrypt(
                cipher_key.expose_secret(),
                &db.header.iv,
                &data[LEGACY_HEADER_SIZE..],
            )
            .map(Zeroizing::new)
            .map_err(|_| FormatError::InvalidKey)?;
        if sha256(&plaintext) != db.header.content_hash {
            return Err(FormatError::InvalidKey);
        }
        db.progress.advance_to(DECRYPTED);

        let (groups, entries) = records::read_records(
            &plaintext,
            db.header.group_count,
            db.header.entry_count,
            &db.progress,
        )?;
        db.build_tree(groups, entries)?;
        db.progress.advance_to(PARSED);

        if let Some(backup) = db.backup_group(false) {
            db.tree.set_deleted_recursive(backup, true);
        }
        reference::resolve_all(&mut db.tree, crate::config::load().references.max_depth);
        info!(
            groups = db.tree.group_count() - 1,
            entries = db.tree.entry_count(),
            meta_streams = db.meta_streams.len(),
            "legacy database loaded"
        );
        Ok(db)
    }

    /// Rebuilds the hierarchy: the most recent group seen at level `n - 1`
    /// is the parent of the next group at level `n`
    fn build_tree(
        &mut self,
        groups: Vec<GroupRecord>,
        entries: Vec<EntryRecord>,
    ) -> FormatResult<()> {
        let root = self.tree.root();
        let mut by_id: HashMap<u32, GroupId> = HashMap::new();
        let mut level_parents: Vec<GroupId> = Vec::new();
        for GroupRecord { group, level } in groups {
            let level = usize::from(level);
            let parent = if level == 0 {
                root
            } else {
                *level_parents.get(level - 1).ok_or_else(|| {
                    FormatError::corrupted(format!("group \"{}\" has no parent level", group.name))
                })?
            };
            let legacy_id = group.legacy_id;
            let id = self.tree.add_group(parent, group)?;
            level_parents.truncate(level);
            level_parents.push(id);
            if by_id.contains_key(&legacy_id) {
                warn!(legacy_id, "duplicate legacy group id");
            } else {
                by_id.insert(legacy_id, id);
            }
        }

        for EntryRecord { entry, group_id } in entries {
            if records::is_meta_stream(&entry) {
                self.meta_streams.push(MetaStream { entry, group_id });
                continue;
            }
            let parent = by_id.get(&group_id).copied().ok_or_else(|| {
                FormatError::corrupted(format!("entry refers to unknown group id {group_id}"))
            })?;
            self.tree.add_entry(parent, entry)?;
        }
        Ok(())
    }

    fn next_group_id(&self) -> u32 {
        self.tree
            .all_groups()
            .into_iter()
            .filter_map(|id| self.tree.group(id))
            .map(|g| g.legacy_id)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Gives every group a unique non-zero legacy id
    fn normalize_group_ids(&mut self) {
        let mut seen = HashSet::new();
        let mut next = self.next_group_id();
        let root = self.tree.root();
        for id in self.tree.all_groups() {
            if id == root {
                continue;
            }
            let Some(group) = self.tree.group_mut(id) else {
                continue;
            };
            if group.legacy_id == 0 || !seen.insert(group.legacy_id) {
                group.legacy_id = next;
                seen.insert(next);
                next += 1;
            }
        }
    }

    pub fn save(&mut self) -> FormatResult<Vec<u8>> {
        self.progress.check()?;
        self.normalize_group_ids();
        let root = self.tree.root();
        let groups: Vec<GroupId> = self
            .tree
            .all_groups()
            .into_iter()
            .filter(|id| *id != root)
            .collect();

        let mut plaintext = Zeroizing::new(Vec::new());
        let mut group_ids = HashSet::new();
        for &id in &groups {
            if let Some(group) = self.tree.group(id) {
                let level = u16::try_from(self.tree.depth(id) - 1)
                    .map_err(|_| FormatError::corrupted("group nesting is too deep"))?;
                records::write_group(&mut plaintext, group, level);
                group_ids.insert(group.legacy_id);
            }
        }

        let mut entry_count = 0u32;
        for &id in &groups {
            let Some(group) = self.tree.group(id) else {
                continue;
            };
            for entry_id in group.entries() {
                if let Some(entry) = self.tree.entry(*entry_id) {
                    records::write_entry(&mut plaintext, entry, group.legacy_id);
                    entry_count += 1;
                }
            }
        }

        let fallback_group = groups
            .first()
            .and_then(|id| self.tree.group(*id))
            .map(|g| g.legacy_id);
        for meta in &self.meta_streams {
            let group_id = if group_ids.contains(&meta.group_id) {
                Some(meta.group_id)
            } else {
                fallback_group
            };
            match group_id {
                Some(group_id) => {
                    records::write_entry(&mut plaintext, &meta.entry, group_id);
                    entry_count += 1;
                }
                None => warn!("no group left to hold a meta-stream entry, dropping it"),
            }
        }

        self.header.group_count = groups.len() as u32;
        self.header.entry_count = entry_count;
        self.header.content_hash = sha256(&plaintext);
        self.header.randomize_seeds();
        self.derive_final_key()?;

        let cipher_key = self
            .key
            .cipher_key()
            .ok_or_else(|| FormatError::corrupted("no cipher key after derivation"))?;
        let ciphertext = DataCipher::new(self.header.cipher()?).encrypt(
            cipher_key.expose_secret(),
            &self.header.iv,
            &plaintext,
        )?;

        let mut out = Vec::with_capacity(LEGACY_HEADER_SIZE + ciphertext.len());
        self.header.write(&mut out);
        out.extend_from_slice(&ciphertext);
        info!(
            groups = self.header.group_count,
            entries = entry_count,
            bytes = out.len(),
            "legacy database saved"
        );
        Ok(out)
    }

    /// Top-level "Backup" group, created on request
    pub fn backup_group(&mut self, create: bool) -> Option<GroupId> {
        let root = self.tree.root();
        let existing = self.tree.group(root).and_then(|r| {
            r.groups().iter().copied().find(|id| {
                self.tree
                    .group(*id)
                    .is_some_and(|g| g.name == LEGACY_BACKUP_GROUP_NAME)
            })
        });
        if existing.is_some() || !create {
            return existing;
        }
        let mut group = Group::new(LEGACY_BACKUP_GROUP_NAME).with_icon(LEGACY_BACKUP_GROUP_ICON);
        group.legacy_id = self.next_group_id();
        group.is_deleted = true;
        self.tree.add_group(root, group).ok()
    }

    pub fn create_group(&mut self, parent: GroupId, name: &str) -> FormatResult<GroupId> {
        let mut group = Group::new(name);
        group.legacy_id = self.next_group_id();
        Ok(self.tree.add_group(parent, group)?)
    }

    /// Entries need a real group: the root cannot hold them in this format
    pub fn create_entry(&mut self, parent: GroupId) -> FormatResult<EntryId> {
        Ok(self.tree.add_entry(parent, Entry::new())?)
    }

    /// Moves the entry to the backup group, or removes it for good when it
    /// is already there
    pub fn delete_entry(&mut self, id: EntryId) -> FormatResult<()> {
        let entry = self.tree.entry(id).ok_or(TreeError::UnknownEntry)?;
        if entry.is_deleted {
            self.tree.remove_entry(id)?.erase();
            return Ok(());
        }
        let backup = self
            .backup_group(true)
            .ok_or_else(|| FormatError::corrupted("cannot create the backup group"))?;
        self.tree.move_entry(id, backup)?;
        Ok(())
    }

    /// Removes the group; its entries (from the whole subtree) are kept in
    /// the backup group unless the group was already deleted
    pub fn delete_group(&mut self, id: GroupId) -> FormatResult<()> {
        if id == self.tree.root() {
            return Err(TreeError::RootGroup.into());
        }
        let group = self.tree.group(id).ok_or(TreeError::UnknownGroup)?;
        if !group.is_deleted {
            let backup = self
                .backup_group(true)
                .ok_or_else(|| FormatError::corrupted("cannot create the backup group"))?;
            for entry in self.tree.subtree_entries(id) {
                self.tree.move_entry(entry, backup)?;
            }
        }
        self.tree.remove_group(id)?;
        Ok(())
    }

    pub fn erase(&mut self) {
        self.tree.erase();
        for meta in &mut self.meta_streams {
            meta.entry.erase();
        }
        self.meta_streams.clear();
        self.key.erase();
    }
}

impl Drop for Database1 {
    fn drop(&mut self) {
        self.erase();
    }
}
