// src/model/attachment.rs
//! File attached to an entry

use zeroize::Zeroize;

#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
    /// Stored gzip-compressed in the v3 binary pool
    pub is_compressed: bool,
    /// Memory-protection flag carried by the v4 inner header
    pub is_protected: bool,
    /// Binary pool id assigned on the last load or save
    pub(crate) pool_id: Option<usize>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .field("is_compressed", &self.is_compressed)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}

impl Attachment {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Attachment {
            name: name.to_owned(),
            data,
            is_compressed: true,
            is_protected: false,
            pool_id: None,
        }
    }

    pub fn pool_id(&self) -> Option<usize> {
        self.pool_id
    }

    /// Attachments are equal for pooling when bytes and compression match
    pub fn same_content(&self, other: &Attachment) -> bool {
        self.is_compressed == other.is_compressed && self.data == other.data
    }

    pub fn erase(&mut self) {
        self.data.zeroize();
        self.name.zeroize();
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.erase();
    }
}
