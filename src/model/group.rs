// src/model/group.rs
//! Group node
//!
//! `legacy_id` and `flags` only mean something to the legacy format; the
//! modern-only settings are ignored there.

use uuid::Uuid;

use super::entry::CustomDataItem;
use super::times::Times;
use super::tree::{EntryId, GroupId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub uuid: Uuid,
    pub legacy_id: u32,
    pub flags: u32,
    pub name: String,
    pub notes: String,
    pub icon_id: u32,
    pub custom_icon_uuid: Option<Uuid>,
    pub times: Times,
    pub is_expanded: bool,
    pub default_auto_type_sequence: String,
    pub enable_auto_type: Option<bool>,
    pub enable_searching: Option<bool>,
    pub last_top_visible_entry: Option<Uuid>,
    pub custom_data: Vec<CustomDataItem>,
    pub is_deleted: bool,
    pub(crate) parent: Option<GroupId>,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) entries: Vec<EntryId>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Group {
            uuid: Uuid::new_v4(),
            legacy_id: 0,
            flags: 0,
            name: name.to_owned(),
            notes: String::new(),
            icon_id: 0,
            custom_icon_uuid: None,
            times: Times::now(),
            is_expanded: true,
            default_auto_type_sequence: String::new(),
            enable_auto_type: None,
            enable_searching: None,
            last_top_visible_entry: None,
            custom_data: Vec::new(),
            is_deleted: false,
            parent: None,
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_icon(mut self, icon_id: u32) -> Self {
        self.icon_id = icon_id;
        self
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }
}
