// src/modern/pool.rs
//! Binary pool: attachment contents referenced from entries by id
//!
//! The pool is rebuilt on every save from the attachments currently in the
//! tree, history versions included. Content already present in the previous
//! pool keeps its id; new content gets fresh ids after the highest kept one.
//! Identical content (bytes and compression flag) is stored once.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::sha256;
use crate::model::{Attachment, Tree};
use crate::warnings::{LoadWarning, LoadWarnings};

#[derive(Clone, PartialEq, Eq)]
pub struct PoolBinary {
    pub data: Vec<u8>,
    pub is_compressed: bool,
    pub is_protected: bool,
}

impl std::fmt::Debug for PoolBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBinary")
            .field("size", &self.data.len())
            .field("is_compressed", &self.is_compressed)
            .finish()
    }
}

type ContentKey = ([u8; 32], bool);

fn content_key(data: &[u8], is_compressed: bool) -> ContentKey {
    (sha256(data), is_compressed)
}

impl Drop for PoolBinary {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl PoolBinary {
    fn from_attachment(attachment: &Attachment) -> Self {
        PoolBinary {
            data: attachment.data.clone(),
            is_compressed: attachment.is_compressed,
            is_protected: attachment.is_protected,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BinaryPool {
    binaries: BTreeMap<usize, PoolBinary>,
}

impl BinaryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: usize, binary: PoolBinary) {
        self.binaries.insert(id, binary);
    }

    pub fn get(&self, id: usize) -> Option<&PoolBinary> {
        self.binaries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    /// Binaries in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PoolBinary)> {
        self.binaries.iter().map(|(id, b)| (*id, b))
    }

    fn next_id(&self) -> usize {
        self.binaries.keys().next_back().map_or(0, |id| id + 1)
    }

    /// Builds the pool for the current tree and stamps every attachment
    /// with its id. With `dense`, ids are renumbered to `0..len` in order.
    pub fn rebuild(prior: &BinaryPool, tree: &mut Tree, dense: bool) -> BinaryPool {
        let mut prior_index: HashMap<ContentKey, Vec<usize>> = HashMap::new();
        for (id, binary) in prior.iter() {
            prior_index
                .entry(content_key(&binary.data, binary.is_compressed))
                .or_default()
                .push(id);
        }

        let mut pool = BinaryPool::new();
        let mut index: HashMap<ContentKey, usize> = HashMap::new();
        let mut reused = 0usize;

        // Known content first, so fresh ids never collide with kept ones
        for entry in tree.entries_mut() {
            for attachment in entry.all_attachments_mut() {
                let key = content_key(&attachment.data, attachment.is_compressed);
                if let Some(id) = index.get(&key) {
                    attachment.pool_id = Some(*id);
                    continue;
                }
                let kept = prior_index.get(&key).and_then(|ids| {
                    ids.iter().copied().find(|id| {
                        !pool.binaries.contains_key(id)
                            && prior.get(*id).is_some_and(|b| b.data == attachment.data)
                    })
                });
                attachment.pool_id = kept;
                if let Some(id) = kept {
                    pool.insert(id, PoolBinary::from_attachment(attachment));
                    index.insert(key, id);
                    reused += 1;
                }
            }
        }

        let mut next = pool.next_id();
        for entry in tree.entries_mut() {
            for attachment in entry.all_attachments_mut() {
                if attachment.pool_id.is_some() {
                    continue;
                }
                let key = content_key(&attachment.data, attachment.is_compressed);
                let id = *index.entry(key).or_insert_with(|| {
                    let id = next;
                    next += 1;
                    pool.insert(id, PoolBinary::from_attachment(attachment));
                    id
                });
                attachment.pool_id = Some(id);
            }
        }

        if dense {
            let remap: HashMap<usize, usize> = pool
                .binaries
                .keys()
                .enumerate()
                .map(|(new, old)| (*old, new))
                .collect();
            if remap.iter().any(|(old, new)| old != new) {
                pool.binaries = std::mem::take(&mut pool.binaries)
                    .into_iter()
                    .filter_map(|(old, b)| remap.get(&old).map(|new| (*new, b)))
                    .collect();
                for entry in tree.entries_mut() {
                    for attachment in entry.all_attachments_mut() {
                        attachment.pool_id = attachment.pool_id.and_then(|id| remap.get(&id).copied());
                    }
                }
            }
        }
        debug!(binaries = pool.len(), reused, "binary pool rebuilt");
        pool
    }

    /// Fills loaded attachments from the pool; dangling references are
    /// dropped and unused binaries reported
    pub fn attach_to(&self, tree: &mut Tree, warnings: &mut LoadWarnings) {
        let mut used = HashSet::new();
        let mut missing = Vec::new();
        for entry in tree.entries_mut() {
            let title = entry.title().to_owned();
            let mut attach = |attachments: &mut Vec<Attachment>| {
                attachments.retain_mut(|attachment| {
                    let Some(id) = attachment.pool_id else {
                        return true;
                    };
                    match self.get(id) {
                        Some(binary) => {
                            attachment.data = binary.data.clone();
                            attachment.is_compressed = binary.is_compressed;
                            attachment.is_protected = binary.is_protected;
                            used.insert(id);
                            true
                        }
                        None => {
                            missing.push((title.clone(), id));
                            false
                        }
                    }
                });
            };
            attach(&mut entry.attachments);
            for old in &mut entry.history {
                attach(&mut old.attachments);
            }
        }
        for (entry, id) in missing {
            warnings.push(LoadWarning::MissingAttachment { entry, id });
        }
        let unused: Vec<usize> = self
            .binaries
            .keys()
            .copied()
            .filter(|id| !used.contains(id))
            .collect();
        if !unused.is_empty() {
            warnings.push(LoadWarning::UnusedAttachments { ids: unused });
        }
    }

    pub fn erase(&mut self) {
        for binary in self.binaries.values_mut() {
            binary.data.zeroize();
        }
        self.binaries.clear();
    }
}
