// src/modern/meta.rs
//! Database-wide settings stored in the `Meta` element

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::consts::{
    FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USER_NAME, GENERATOR_NAME,
};
use crate::model::times::now;
use crate::model::CustomDataItem;

const DEFAULT_HISTORY_MAX_ITEMS: i32 = 10;
const DEFAULT_HISTORY_MAX_SIZE: i64 = 6 * 1024 * 1024;
const DEFAULT_MAINTENANCE_HISTORY_DAYS: u32 = 365;

/// Which standard fields are written through the protected stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub title: bool,
    pub user_name: bool,
    pub password: bool,
    pub url: bool,
    pub notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        MemoryProtection {
            title: false,
            user_name: false,
            password: true,
            url: false,
            notes: false,
        }
    }
}

impl MemoryProtection {
    /// Whether a standard field must be protected; custom fields carry
    /// their own flag
    pub fn is_protected(&self, field_name: &str) -> bool {
        match field_name {
            FIELD_TITLE => self.title,
            FIELD_USER_NAME => self.user_name,
            FIELD_PASSWORD => self.password,
            FIELD_URL => self.url,
            FIELD_NOTES => self.notes,
            _ => false,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct CustomIcon {
    pub uuid: Uuid,
    pub data: Vec<u8>,
    pub name: Option<String>,
}

impl std::fmt::Debug for CustomIcon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomIcon")
            .field("uuid", &self.uuid)
            .field("size", &self.data.len())
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for CustomIcon {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Tombstone of a permanently removed group or entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: DateTime<Utc>,
}

impl DeletedObject {
    pub fn now(uuid: Uuid) -> Self {
        DeletedObject {
            uuid,
            deletion_time: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub generator: String,
    /// v3 only: hash of the header the document was written with
    pub header_hash: Option<[u8; 32]>,
    pub database_name: String,
    pub database_name_changed: DateTime<Utc>,
    pub database_description: String,
    pub database_description_changed: DateTime<Utc>,
    pub default_user_name: String,
    pub default_user_name_changed: DateTime<Utc>,
    pub maintenance_history_days: u32,
    pub color: String,
    pub master_key_changed: DateTime<Utc>,
    pub master_key_change_rec: i64,
    pub master_key_change_force: i64,
    pub memory_protection: MemoryProtection,
    pub custom_icons: Vec<CustomIcon>,
    pub recycle_bin_enabled: bool,
    pub recycle_bin_uuid: Option<Uuid>,
    pub recycle_bin_changed: DateTime<Utc>,
    pub entry_templates_group: Option<Uuid>,
    pub entry_templates_group_changed: DateTime<Utc>,
    /// Negative means unlimited
    pub history_max_items: i32,
    /// Bytes; negative means unlimited
    pub history_max_size: i64,
    pub last_selected_group: Option<Uuid>,
    pub last_top_visible_group: Option<Uuid>,
    pub custom_data: Vec<CustomDataItem>,
}

impl Default for Meta {
    fn default() -> Self {
        let now = now();
        Meta {
            generator: GENERATOR_NAME.to_owned(),
            header_hash: None,
            database_name: String::new(),
            database_name_changed: now,
            database_description: String::new(),
            database_description_changed: now,
            default_user_name: String::new(),
            default_user_name_changed: now,
            maintenance_history_days: DEFAULT_MAINTENANCE_HISTORY_DAYS,
            color: String::new(),
            master_key_changed: now,
            master_key_change_rec: -1,
            master_key_change_force: -1,
            memory_protection: MemoryProtection::default(),
            custom_icons: Vec::new(),
            recycle_bin_enabled: true,
            recycle_bin_uuid: None,
            recycle_bin_changed: now,
            entry_templates_group: None,
            entry_templates_group_changed: now,
            history_max_items: DEFAULT_HISTORY_MAX_ITEMS,
            history_max_size: DEFAULT_HISTORY_MAX_SIZE,
            last_selected_group: None,
            last_top_visible_group: None,
            custom_data: Vec::new(),
        }
    }
}

impl Meta {
    pub fn set_recycle_bin(&mut self, uuid: Option<Uuid>) {
        self.recycle_bin_uuid = uuid;
        self.recycle_bin_changed = now();
    }
}
