// src/model/entry.rs
//! Password entry
//!
//! Field names are not unique; lookups return the first match. The legacy
//! format only ever produces the five standard fields and at most one
//! attachment, the modern format any number of both.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::Zeroize;

use super::attachment::Attachment;
use super::field::EntryField;
use super::times::Times;
use super::tree::GroupId;
use crate::consts::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USER_NAME};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoTypeAssociation {
    pub window: String,
    pub keystroke_sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    pub associations: Vec<AutoTypeAssociation>,
}

impl Default for AutoType {
    fn default() -> Self {
        AutoType {
            enabled: true,
            obfuscation: 0,
            default_sequence: String::new(),
            associations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDataItem {
    pub key: String,
    pub value: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon_id: u32,
    pub custom_icon_uuid: Option<Uuid>,
    pub foreground_color: String,
    pub background_color: String,
    pub override_url: String,
    pub tags: String,
    pub times: Times,
    pub fields: Vec<EntryField>,
    pub attachments: Vec<Attachment>,
    pub auto_type: AutoType,
    pub custom_data: Vec<CustomDataItem>,
    /// Previous versions, oldest first
    pub history: Vec<Entry>,
    pub is_deleted: bool,
    pub(crate) parent: Option<GroupId>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            uuid: Uuid::new_v4(),
            icon_id: 0,
            custom_icon_uuid: None,
            foreground_color: String::new(),
            background_color: String::new(),
            override_url: String::new(),
            tags: String::new(),
            times: Times::now(),
            fields: Vec::new(),
            attachments: Vec::new(),
            auto_type: AutoType::default(),
            custom_data: Vec::new(),
            history: Vec::new(),
            is_deleted: false,
            parent: None,
        }
    }
}

impl Entry {
    /// Entry with the five standard fields, all empty
    pub fn new() -> Self {
        let mut entry = Entry::default();
        for name in [FIELD_TITLE, FIELD_USER_NAME, FIELD_URL, FIELD_NOTES] {
            entry.fields.push(EntryField::new(name, "", false));
        }
        entry.fields.push(EntryField::new(FIELD_PASSWORD, "", true));
        entry
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn field(&self, name: &str) -> Option<&EntryField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut EntryField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Raw value of the first field called `name`, empty if there is none
    pub fn value(&self, name: &str) -> &str {
        self.field(name).map(EntryField::value).unwrap_or("")
    }

    /// Updates the first field called `name`, or appends a new one
    pub fn set_field(&mut self, name: &str, value: &str, is_protected: bool) {
        match self.field_mut(name) {
            Some(field) => {
                field.set_value(value);
                field.is_protected = is_protected;
            }
            None => self.fields.push(EntryField::new(name, value, is_protected)),
        }
    }

    /// Sets a value keeping the field's current protection flag
    pub fn set_value(&mut self, name: &str, value: &str) {
        let is_protected = self
            .field(name)
            .map(|f| f.is_protected)
            .unwrap_or(name == FIELD_PASSWORD);
        self.set_field(name, value, is_protected);
    }

    pub fn title(&self) -> &str {
        self.value(FIELD_TITLE)
    }

    pub fn user_name(&self) -> &str {
        self.value(FIELD_USER_NAME)
    }

    pub fn password(&self) -> &str {
        self.value(FIELD_PASSWORD)
    }

    pub fn url(&self) -> &str {
        self.value(FIELD_URL)
    }

    pub fn notes(&self) -> &str {
        self.value(FIELD_NOTES)
    }

    /// Attachments of this entry and of every historical version
    pub fn all_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .chain(self.history.iter().flat_map(|h| h.attachments.iter()))
    }

    pub(crate) fn all_attachments_mut(&mut self) -> impl Iterator<Item = &mut Attachment> {
        self.attachments
            .iter_mut()
            .chain(self.history.iter_mut().flat_map(|h| h.attachments.iter_mut()))
    }

    /// Pushes a snapshot of the current state into the history, keeping at
    /// most `max_items` versions (negative means unlimited)
    pub fn backup_state(&mut self, max_items: i32) {
        let mut snapshot = self.clone();
        snapshot.history.clear();
        snapshot.parent = None;
        self.history.push(snapshot);
        if max_items >= 0 {
            let max_items = max_items as usize;
            while self.history.len() > max_items {
                let mut dropped = self.history.remove(0);
                dropped.erase();
            }
        }
    }

    /// Copy with a fresh uuid and no history
    pub fn duplicate(&self) -> Entry {
        let mut copy = self.clone();
        copy.uuid = Uuid::new_v4();
        copy.history.clear();
        copy.parent = None;
        copy.times = Times::now();
        copy
    }

    pub fn erase(&mut self) {
        for field in &mut self.fields {
            field.erase();
        }
        for attachment in &mut self.attachments {
            attachment.erase();
        }
        for item in &mut self.custom_data {
            item.value.zeroize();
        }
        for old in &mut self.history {
            old.erase();
        }
        self.fields.clear();
        self.attachments.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_field_wins_on_lookup() {
        let mut entry = Entry::new();
        entry.fields.push(EntryField::new("Title", "second", false));
        entry.set_value("Title", "first");
        assert_eq!(entry.title(), "first");
        assert_eq!(entry.fields.iter().filter(|f| f.name == "Title").count(), 2);
        assert!(entry.field("Password").unwrap().is_protected);
    }

    #[test]
    fn backup_state_trims_oldest_versions() {
        let mut entry = Entry::new();
        for title in ["a", "b", "c"] {
            entry.set_value("Title", title);
            entry.backup_state(2);
        }
        let titles: Vec<_> = entry.history.iter().map(|h| h.title().to_owned()).collect();
        assert_eq!(titles, ["b", "c"]);
        assert!(entry.history.iter().all(|h| h.history.is_empty()));
    }
}
