// src/modern/document.rs
//! XML document of the modern format
//!
//! `KeePassFile/{Meta, Root{Group, DeletedObjects}}`. Protected values share
//! one keystream, so both directions walk the document strictly in order:
//! Meta before Root, and within a group every child in the order it appears.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::meta::{CustomIcon, DeletedObject, Meta};
use super::pool::{BinaryPool, PoolBinary};
use crate::crypto::ProtectedStream;
use crate::enums::FormatVersion;
use crate::error::{FormatError, FormatResult};
use crate::model::{
    Attachment, AutoType, AutoTypeAssociation, CustomDataItem, Entry, EntryField, Group, GroupId,
    Times, Tree,
};
use crate::progress::Progress;
use crate::util::{gunzip, gzip};
use crate::xml::{parse_bool, XmlElement, XmlWriter};

/// Seconds between 0001-01-01 and the Unix epoch
const YEAR_ONE_OFFSET: i64 = 62_135_596_800;
const ISO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const ITEMS_PER_POLL: usize = 256;

/// Everything the XML document carries
#[derive(Debug)]
pub(crate) struct Document {
    pub meta: Meta,
    pub tree: Tree,
    pub deleted_objects: Vec<DeletedObject>,
    /// `Meta/Binaries`, present in v3 documents only
    pub binaries: BinaryPool,
}

/// Borrowed view used when serializing
pub(crate) struct DocumentParts<'a> {
    pub meta: &'a Meta,
    pub tree: &'a Tree,
    pub deleted_objects: &'a [DeletedObject],
    /// Written into `Meta` for v3; v4 keeps binaries in the inner header
    pub binaries: Option<&'a BinaryPool>,
    pub header_hash: Option<[u8; 32]>,
}

// ──────────────────────────────────────────────────────────────
// Value encodings
// ──────────────────────────────────────────────────────────────

fn uuid_text(uuid: Option<Uuid>) -> String {
    BASE64.encode(uuid.unwrap_or_else(Uuid::nil).as_bytes())
}

/// Empty text and the nil uuid both mean "none"
fn parse_uuid(text: &str) -> FormatResult<Option<Uuid>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let bytes = BASE64
        .decode(text)
        .map_err(|e| FormatError::xml(format!("uuid: {e}")))?;
    let uuid = Uuid::from_slice(&bytes).map_err(|e| FormatError::xml(format!("uuid: {e}")))?;
    Ok((!uuid.is_nil()).then_some(uuid))
}

fn time_text(time: DateTime<Utc>, format: FormatVersion) -> String {
    match format {
        FormatVersion::V3 => time.format(ISO_TIME_FORMAT).to_string(),
        FormatVersion::V4 => BASE64.encode((time.timestamp() + YEAR_ONE_OFFSET).to_le_bytes()),
    }
}

/// Accepts both the ISO text of v3 and the base64 seconds of v4
fn parse_time(text: &str) -> FormatResult<DateTime<Utc>> {
    let text = text.trim();
    if text.contains('-') || text.contains(':') {
        if let Ok(time) = DateTime::parse_from_rfc3339(text) {
            return Ok(time.with_timezone(&Utc));
        }
        return NaiveDateTime::parse_from_str(text, ISO_TIME_FORMAT)
            .map(|t| t.and_utc())
            .map_err(|e| FormatError::xml(format!("time \"{text}\": {e}")));
    }
    let bytes = BASE64
        .decode(text)
        .map_err(|e| FormatError::xml(format!("time \"{text}\": {e}")))?;
    let raw: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| FormatError::xml(format!("time \"{text}\" is not 8 bytes")))?;
    let seconds = i64::from_le_bytes(raw) - YEAR_ONE_OFFSET;
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| FormatError::xml(format!("time \"{text}\" out of range")))
}

fn parse_number<T: std::str::FromStr + Default>(element: &XmlElement) -> FormatResult<T> {
    let text = element.text().trim();
    if text.is_empty() {
        return Ok(T::default());
    }
    text.parse()
        .map_err(|_| FormatError::xml(format!("{}: \"{text}\" is not a number", element.name)))
}

fn parse_flag(element: &XmlElement) -> bool {
    parse_bool(element.text()).unwrap_or(false)
}

fn decode_base64(element: &XmlElement) -> FormatResult<Vec<u8>> {
    BASE64
        .decode(element.text().trim())
        .map_err(|e| FormatError::xml(format!("{}: {e}", element.name)))
}

fn is_true(element: &XmlElement, attribute: &str) -> bool {
    element
        .attr(attribute)
        .and_then(parse_bool)
        .unwrap_or(false)
}

// ──────────────────────────────────────────────────────────────
// Reading
// ──────────────────────────────────────────────────────────────

pub(crate) fn read(
    xml: &[u8],
    stream: ProtectedStream,
    progress: &Progress,
) -> FormatResult<Document> {
    let root = XmlElement::parse(xml, progress)?;
    if root.name != "KeePassFile" {
        return Err(FormatError::xml(format!("unexpected root element {}", root.name)));
    }
    let mut reader = DocumentReader {
        stream,
        progress,
        items: 0,
    };
    let mut meta = Meta::default();
    let mut binaries = BinaryPool::new();
    let mut body = None;
    for child in &root.children {
        match child.name.as_str() {
            "Meta" => reader.read_meta(child, &mut meta, &mut binaries)?,
            "Root" => body = Some(reader.read_root(child)?),
            other => debug!(element = other, "skipping unknown document element"),
        }
    }
    let (tree, deleted_objects) =
        body.ok_or_else(|| FormatError::xml("document has no Root element"))?;
    debug!(
        groups = tree.group_count(),
        entries = tree.entry_count(),
        deleted = deleted_objects.len(),
        "document parsed"
    );
    Ok(Document {
        meta,
        tree,
        deleted_objects,
        binaries,
    })
}

struct DocumentReader<'a> {
    stream: ProtectedStream,
    progress: &'a Progress,
    items: usize,
}

impl DocumentReader<'_> {
    fn poll(&mut self) -> FormatResult<()> {
        self.items += 1;
        if self.items % ITEMS_PER_POLL == 0 {
            self.progress.check()?;
        }
        Ok(())
    }

    /// Raw bytes of a value, run through the keystream when it is protected
    fn unprotect(&mut self, element: &XmlElement) -> FormatResult<Zeroizing<Vec<u8>>> {
        let mut bytes = Zeroizing::new(decode_base64(element)?);
        self.stream.apply(&mut bytes);
        Ok(bytes)
    }

    fn read_value(&mut self, element: &XmlElement) -> FormatResult<(String, bool)> {
        if is_true(element, "Protected") {
            let bytes = self.unprotect(element)?;
            return Ok((String::from_utf8_lossy(&bytes).into_owned(), true));
        }
        Ok((
            element.text().to_owned(),
            is_true(element, "ProtectInMemory"),
        ))
    }

    fn read_meta(
        &mut self,
        element: &XmlElement,
        meta: &mut Meta,
        binaries: &mut BinaryPool,
    ) -> FormatResult<()> {
        for child in &element.children {
            let text = child.text();
            match child.name.as_str() {
                "Generator" => meta.generator = text.to_owned(),
                "HeaderHash" => {
                    let hash = decode_base64(child)?;
                    meta.header_hash = Some(
                        hash.as_slice()
                            .try_into()
                            .map_err(|_| FormatError::xml("HeaderHash is not 32 bytes"))?,
                    );
                }
                "DatabaseName" => meta.database_name = text.to_owned(),
                "DatabaseNameChanged" => meta.database_name_changed = parse_time(text)?,
                "DatabaseDescription" => meta.database_description = text.to_owned(),
                "DatabaseDescriptionChanged" => {
                    meta.database_description_changed = parse_time(text)?
                }
                "DefaultUserName" => meta.default_user_name = text.to_owned(),
                "DefaultUserNameChanged" => meta.default_user_name_changed = parse_time(text)?,
                "MaintenanceHistoryDays" => meta.maintenance_history_days = parse_number(child)?,
                "Color" => meta.color = text.to_owned(),
                "MasterKeyChanged" => meta.master_key_changed = parse_time(text)?,
                "MasterKeyChangeRec" => meta.master_key_change_rec = parse_number(child)?,
                "MasterKeyChangeForce" => meta.master_key_change_force = parse_number(child)?,
                "MemoryProtection" => {
                    let protection = &mut meta.memory_protection;
                    for flag in &child.children {
                        match flag.name.as_str() {
                            "ProtectTitle" => protection.title = parse_flag(flag),
                            "ProtectUserName" => protection.user_name = parse_flag(flag),
                            "ProtectPassword" => protection.password = parse_flag(flag),
                            "ProtectURL" => protection.url = parse_flag(flag),
                            "ProtectNotes" => protection.notes = parse_flag(flag),
                            other => debug!(element = other, "skipping unknown protection flag"),
                        }
                    }
                }
                "CustomIcons" => {
                    for icon in child.children_named("Icon") {
                        let uuid = icon
                            .child_text("UUID")
                            .map(parse_uuid)
                            .transpose()?
                            .flatten()
                            .ok_or_else(|| FormatError::xml("custom icon without UUID"))?;
                        let data = match icon.child("Data") {
                            Some(data) => decode_base64(data)?,
                            None => Vec::new(),
                        };
                        meta.custom_icons.push(CustomIcon {
                            uuid,
                            data,
                            name: icon.child_text("Name").map(str::to_owned),
                        });
                    }
                }
                "RecycleBinEnabled" => meta.recycle_bin_enabled = parse_flag(child),
                "RecycleBinUUID" => meta.recycle_bin_uuid = parse_uuid(text)?,
                "RecycleBinChanged" => meta.recycle_bin_changed = parse_time(text)?,
                "EntryTemplatesGroup" => meta.entry_templates_group = parse_uuid(text)?,
                "EntryTemplatesGroupChanged" => {
                    meta.entry_templates_group_changed = parse_time(text)?
                }
                "HistoryMaxItems" => meta.history_max_items = parse_number(child)?,
                "HistoryMaxSize" => meta.history_max_size = parse_number(child)?,
                "LastSelectedGroup" => meta.last_selected_group = parse_uuid(text)?,
                "LastTopVisibleGroup" => meta.last_top_visible_group = parse_uuid(text)?,
                "Binaries" => self.read_meta_binaries(child, binaries)?,
                "CustomData" => meta.custom_data = read_custom_data(child)?,
                other => debug!(element = other, "skipping unknown Meta element"),
            }
        }
        Ok(())
    }

    fn read_meta_binaries(
        &mut self,
        element: &XmlElement,
        binaries: &mut BinaryPool,
    ) -> FormatResult<()> {
        for binary in element.children_named("Binary") {
            let id: usize = binary
                .attr("ID")
                .and_then(|id| id.trim().parse().ok())
                .ok_or_else(|| FormatError::xml("Binary without a numeric ID"))?;
            let is_protected = is_true(binary, "Protected");
            let is_compressed = is_true(binary, "Compressed");
            let stored = if is_protected {
                self.unprotect(binary)?
            } else {
                Zeroizing::new(decode_base64(binary)?)
            };
            let data = if is_compressed {
                gunzip(&stored)?
            } else {
                stored.to_vec()
            };
            binaries.insert(
                id,
                PoolBinary {
                    data,
                    is_compressed,
                    is_protected,
                },
            );
        }
        Ok(())
    }

    fn read_root(&mut self, element: &XmlElement) -> FormatResult<(Tree, Vec<DeletedObject>)> {
        let mut tree = None;
        let mut deleted = Vec::new();
        for child in &element.children {
            match child.name.as_str() {
                "Group" if tree.is_none() => {
                    let mut root_tree = Tree::new(read_group_fields(child)?, true);
                    let root = root_tree.root();
                    self.read_group_children(child, &mut root_tree, root)?;
                    tree = Some(root_tree);
                }
                "DeletedObjects" => {
                    for object in child.children_named("DeletedObject") {
                        let uuid = object.child_text("UUID").map(parse_uuid).transpose()?;
                        let Some(uuid) = uuid.flatten() else {
                            debug!("skipping tombstone without UUID");
                            continue;
                        };
                        let deletion_time = match object.child_text("DeletionTime") {
                            Some(text) => parse_time(text)?,
                            None => crate::model::times::now(),
                        };
                        deleted.push(DeletedObject {
                            uuid,
                            deletion_time,
                        });
                    }
                }
                other => debug!(element = other, "skipping unknown Root element"),
            }
        }
        let tree = tree.ok_or_else(|| FormatError::xml("Root has no group"))?;
        Ok((tree, deleted))
    }

    /// Entries and subgroups, in document order
    fn read_group_children(
        &mut self,
        element: &XmlElement,
        tree: &mut Tree,
        id: GroupId,
    ) -> FormatResult<()> {
        for child in &element.children {
            match child.name.as_str() {
                "Entry" => {
                    let entry = self.read_entry(child)?;
                    tree.add_entry(id, entry)?;
                }
                "Group" => {
                    let group = read_group_fields(child)?;
                    let sub = tree.add_group(id, group)?;
                    self.read_group_children(child, tree, sub)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn read_entry(&mut self, element: &XmlElement) -> FormatResult<Entry> {
        self.poll()?;
        let mut entry = Entry::default();
        let mut has_uuid = false;
        for child in &element.children {
            let text = child.text();
            match child.name.as_str() {
                "UUID" => {
                    if let Some(uuid) = parse_uuid(text)? {
                        entry.uuid = uuid;
                        has_uuid = true;
                    }
                }
                "IconID" => entry.icon_id = parse_number(child)?,
                "CustomIconUUID" => entry.custom_icon_uuid = parse_uuid(text)?,
                "ForegroundColor" => entry.foreground_color = text.to_owned(),
                "BackgroundColor" => entry.background_color = text.to_owned(),
                "OverrideURL" => entry.override_url = text.to_owned(),
                "Tags" => entry.tags = text.to_owned(),
                "Times" => entry.times = read_times(child)?,
                "String" => {
                    let name = child.child_text("Key").unwrap_or_default();
                    let (value, is_protected) = match child.child("Value") {
                        Some(value) => self.read_value(value)?,
                        None => (String::new(), false),
                    };
                    entry.fields.push(EntryField::new(name, &value, is_protected));
                }
                "Binary" => entry.attachments.push(read_attachment_ref(child)?),
                "AutoType" => entry.auto_type = read_auto_type(child)?,
                "CustomData" => entry.custom_data = read_custom_data(child)?,
                "History" => {
                    for old in child.children_named("Entry") {
                        let old = self.read_entry(old)?;
                        entry.history.push(old);
                    }
                }
                other => debug!(element = other, "skipping unknown Entry element"),
            }
        }
        if !has_uuid {
            debug!(uuid = %entry.uuid, "entry without UUID got a fresh one");
        }
        Ok(entry)
    }
}

/// Group settings only; children are added once the group is in the tree
fn read_group_fields(element: &XmlElement) -> FormatResult<Group> {
    let mut group = Group::new("");
    for child in &element.children {
        let text = child.text();
        match child.name.as_str() {
            "UUID" => {
                if let Some(uuid) = parse_uuid(text)? {
                    group.uuid = uuid;
                }
            }
            "Name" => group.name = text.to_owned(),
            "Notes" => group.notes = text.to_owned(),
            "IconID" => group.icon_id = parse_number(child)?,
            "CustomIconUUID" => group.custom_icon_uuid = parse_uuid(text)?,
            "Times" => group.times = read_times(child)?,
            "IsExpanded" => group.is_expanded = parse_flag(child),
            "DefaultAutoTypeSequence" => group.default_auto_type_sequence = text.to_owned(),
            "EnableAutoType" => group.enable_auto_type = parse_bool(text),
            "EnableSearching" => group.enable_searching = parse_bool(text),
            "LastTopVisibleEntry" => group.last_top_visible_entry = parse_uuid(text)?,
            "CustomData" => group.custom_data = read_custom_data(child)?,
            "Entry" | "Group" => {}
            other => debug!(element = other, "skipping unknown Group element"),
        }
    }
    Ok(group)
}

fn read_times(element: &XmlElement) -> FormatResult<Times> {
    let mut times = Times::now();
    for child in &element.children {
        let text = child.text();
        match child.name.as_str() {
            "CreationTime" => times.creation = parse_time(text)?,
            "LastModificationTime" => times.last_modification = parse_time(text)?,
            "LastAccessTime" => times.last_access = parse_time(text)?,
            "ExpiryTime" => times.expiry = parse_time(text)?,
            "Expires" => times.expires = parse_flag(child),
            "UsageCount" => times.usage_count = parse_number(child)?,
            "LocationChanged" => times.location_changed = parse_time(text)?,
            other => debug!(element = other, "skipping unknown Times element"),
        }
    }
    Ok(times)
}

/// `<Binary><Key/><Value Ref="n"/></Binary>`; inline data is accepted too
fn read_attachment_ref(element: &XmlElement) -> FormatResult<Attachment> {
    let name = element.child_text("Key").unwrap_or_default();
    let Some(value) = element.child("Value") else {
        return Ok(Attachment::new(name, Vec::new()));
    };
    match value.attr("Ref") {
        Some(reference) => {
            let id = reference
                .trim()
                .parse()
                .map_err(|_| FormatError::xml(format!("attachment ref \"{reference}\"")))?;
            let mut attachment = Attachment::new(name, Vec::new());
            attachment.pool_id = Some(id);
            Ok(attachment)
        }
        None => Ok(Attachment::new(name, decode_base64(value)?)),
    }
}

fn read_auto_type(element: &XmlElement) -> FormatResult<AutoType> {
    let mut auto_type = AutoType::default();
    for child in &element.children {
        match child.name.as_str() {
            "Enabled" => auto_type.enabled = parse_flag(child),
            "DataTransferObfuscation" => auto_type.obfuscation = parse_number(child)?,
            "DefaultSequence" => auto_type.default_sequence = child.text().to_owned(),
            "Association" => auto_type.associations.push(AutoTypeAssociation {
                window: child.child_text("Window").unwrap_or_default().to_owned(),
                keystroke_sequence: child
                    .child_text("KeystrokeSequence")
                    .unwrap_or_default()
                    .to_owned(),
            }),
            other => debug!(element = other, "skipping unknown AutoType element"),
        }
    }
    Ok(auto_type)
}

fn read_custom_data(element: &XmlElement) -> FormatResult<Vec<CustomDataItem>> {
    element
        .children_named("Item")
        .map(|item| {
            Ok(CustomDataItem {
                key: item.child_text("Key").unwrap_or_default().to_owned(),
                value: item.child_text("Value").unwrap_or_default().to_owned(),
                last_modified: item
                    .child_text("LastModificationTime")
                    .map(parse_time)
                    .transpose()?,
            })
        })
        .collect()
}

// ──────────────────────────────────────────────────────────────
// Writing
// ──────────────────────────────────────────────────────────────

pub(crate) fn write(
    parts: DocumentParts<'_>,
    format: FormatVersion,
    stream: ProtectedStream,
    progress: &Progress,
) -> FormatResult<Vec<u8>> {
    let mut writer = DocumentWriter {
        xml: XmlWriter::new()?,
        format,
        stream,
        progress,
        items: 0,
    };
    writer.xml.start("KeePassFile")?;
    writer.write_meta(&parts)?;
    writer.xml.start("Root")?;
    writer.write_group(parts.tree, parts.tree.root(), &parts)?;
    writer.xml.start("DeletedObjects")?;
    for object in parts.deleted_objects {
        writer.xml.start("DeletedObject")?;
        writer.xml.leaf("UUID", &uuid_text(Some(object.uuid)))?;
        writer.time("DeletionTime", object.deletion_time)?;
        writer.xml.end("DeletedObject")?;
    }
    writer.xml.end("DeletedObjects")?;
    writer.xml.end("Root")?;
    writer.xml.end("KeePassFile")?;
    Ok(writer.xml.into_inner())
}

struct DocumentWriter<'a> {
    xml: XmlWriter,
    format: FormatVersion,
    stream: ProtectedStream,
    progress: &'a Progress,
    items: usize,
}

impl DocumentWriter<'_> {
    fn poll(&mut self) -> FormatResult<()> {
        self.items += 1;
        if self.items % ITEMS_PER_POLL == 0 {
            self.progress.check()?;
        }
        Ok(())
    }

    fn time(&mut self, name: &str, time: DateTime<Utc>) -> FormatResult<()> {
        let text = time_text(time, self.format);
        self.xml.leaf(name, &text)
    }

    fn uuid(&mut self, name: &str, uuid: Option<Uuid>) -> FormatResult<()> {
        self.xml.leaf(name, &uuid_text(uuid))
    }

    fn number(&mut self, name: &str, value: impl ToString) -> FormatResult<()> {
        self.xml.leaf(name, &value.to_string())
    }

    /// Runs the bytes through the keystream and writes them as base64
    fn protected(&mut self, name: &str, extra: &[(&str, &str)], bytes: &[u8]) -> FormatResult<()> {
        let mut buffer = Zeroizing::new(bytes.to_vec());
        self.stream.apply(&mut buffer);
        let encoded = Zeroizing::new(BASE64.encode(buffer.as_slice()));
        let mut attributes = extra.to_vec();
        attributes.push(("Protected", "True"));
        self.xml.leaf_with(name, &attributes, &encoded)
    }

    fn write_meta(&mut self, parts: &DocumentParts<'_>) -> FormatResult<()> {
        let meta = parts.meta;
        self.xml.start("Meta")?;
        self.xml.leaf("Generator", &meta.generator)?;
        if let Some(hash) = parts.header_hash {
            self.xml.leaf("HeaderHash", &BASE64.encode(hash))?;
        }
        self.xml.leaf("DatabaseName", &meta.database_name)?;
        self.time("DatabaseNameChanged", meta.database_name_changed)?;
        self.xml.leaf("DatabaseDescription", &meta.database_description)?;
        self.time("DatabaseDescriptionChanged", meta.database_description_changed)?;
        self.xml.leaf("DefaultUserName", &meta.default_user_name)?;
        self.time("DefaultUserNameChanged", meta.default_user_name_changed)?;
        self.number("MaintenanceHistoryDays", meta.maintenance_history_days)?;
        self.xml.leaf("Color", &meta.color)?;
        self.time("MasterKeyChanged", meta.master_key_changed)?;
        self.number("MasterKeyChangeRec", meta.master_key_change_rec)?;
        self.number("MasterKeyChangeForce", meta.master_key_change_force)?;

        let protection = meta.memory_protection;
        self.xml.start("MemoryProtection")?;
        self.xml.leaf_bool("ProtectTitle", protection.title)?;
        self.xml.leaf_bool("ProtectUserName", protection.user_name)?;
        self.xml.leaf_bool("ProtectPassword", protection.password)?;
        self.xml.leaf_bool("ProtectURL", protection.url)?;
        self.xml.leaf_bool("ProtectNotes", protection.notes)?;
        self.xml.end("MemoryProtection")?;

        if !meta.custom_icons.is_empty() {
            self.xml.start("CustomIcons")?;
            for icon in &meta.custom_icons {
                self.xml.start("Icon")?;
                self.uuid("UUID", Some(icon.uuid))?;
                self.xml.leaf("Data", &BASE64.encode(&icon.data))?;
                if let Some(name) = icon.name.as_deref().filter(|_| self.format == FormatVersion::V4) {
                    self.xml.leaf("Name", name)?;
                }
                self.xml.end("Icon")?;
            }
            self.xml.end("CustomIcons")?;
        }

        self.xml.leaf_bool("RecycleBinEnabled", meta.recycle_bin_enabled)?;
        self.uuid("RecycleBinUUID", meta.recycle_bin_uuid)?;
        self.time("RecycleBinChanged", meta.recycle_bin_changed)?;
        self.uuid("EntryTemplatesGroup", meta.entry_templates_group)?;
        self.time("EntryTemplatesGroupChanged", meta.entry_templates_group_changed)?;
        self.number("HistoryMaxItems", meta.history_max_items)?;
        self.number("HistoryMaxSize", meta.history_max_size)?;
        self.uuid("LastSelectedGroup", meta.last_selected_group)?;
        self.uuid("LastTopVisibleGroup", meta.last_top_visible_group)?;

        if let Some(binaries) = parts.binaries {
            self.xml.start("Binaries")?;
            for (id, binary) in binaries.iter() {
                self.poll()?;
                let stored = if binary.is_compressed {
                    Zeroizing::new(gzip(&binary.data)?)
                } else {
                    Zeroizing::new(binary.data.clone())
                };
                let id = id.to_string();
                let compressed = crate::xml::bool_text(binary.is_compressed);
                let attributes = [("ID", id.as_str()), ("Compressed", compressed)];
                if binary.is_protected {
                    self.protected("Binary", &attributes, &stored)?;
                } else {
                    self.xml
                        .leaf_with("Binary", &attributes, &BASE64.encode(stored.as_slice()))?;
                }
            }
            self.xml.end("Binaries")?;
        }
        self.write_custom_data(&meta.custom_data)?;
        self.xml.end("Meta")
    }

    fn write_times(&mut self, times: &Times) -> FormatResult<()> {
        self.xml.start("Times")?;
        self.time("CreationTime", times.creation)?;
        self.time("LastModificationTime", times.last_modification)?;
        self.time("LastAccessTime", times.last_access)?;
        self.time("ExpiryTime", times.expiry)?;
        self.xml.leaf_bool("Expires", times.expires)?;
        self.number("UsageCount", times.usage_count)?;
        self.time("LocationChanged", times.location_changed)?;
        self.xml.end("Times")
    }

    fn write_custom_data(&mut self, items: &[CustomDataItem]) -> FormatResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.xml.start("CustomData")?;
        for item in items {
            self.xml.start("Item")?;
            self.xml.leaf("Key", &item.key)?;
            self.xml.leaf("Value", &item.value)?;
            if let Some(time) = item.last_modified.filter(|_| self.format == FormatVersion::V4) {
                self.time("LastModificationTime", time)?;
            }
            self.xml.end("Item")?;
        }
        self.xml.end("CustomData")
    }

    fn write_group(
        &mut self,
        tree: &Tree,
        id: GroupId,
        parts: &DocumentParts<'_>,
    ) -> FormatResult<()> {
        let group = tree
            .group(id)
            .ok_or_else(|| FormatError::corrupted("dangling group id"))?;
        self.xml.start("Group")?;
        self.uuid("UUID", Some(group.uuid))?;
        self.xml.leaf("Name", &group.name)?;
        self.xml.leaf("Notes", &group.notes)?;
        self.number("IconID", group.icon_id)?;
        if group.custom_icon_uuid.is_some() {
            self.uuid("CustomIconUUID", group.custom_icon_uuid)?;
        }
        self.write_times(&group.times)?;
        self.xml.leaf_bool("IsExpanded", group.is_expanded)?;
        self.xml
            .leaf("DefaultAutoTypeSequence", &group.default_auto_type_sequence)?;
        self.xml.leaf_opt_bool("EnableAutoType", group.enable_auto_type)?;
        self.xml.leaf_opt_bool("EnableSearching", group.enable_searching)?;
        self.uuid("LastTopVisibleEntry", group.last_top_visible_entry)?;
        self.write_custom_data(&group.custom_data)?;

        for entry_id in group.entries() {
            let entry = tree
                .entry(*entry_id)
                .ok_or_else(|| FormatError::corrupted("dangling entry id"))?;
            self.write_entry(entry, parts)?;
        }
        for child in group.groups() {
            self.write_group(tree, *child, parts)?;
        }
        self.xml.end("Group")
    }

    fn write_entry(&mut self, entry: &Entry, parts: &DocumentParts<'_>) -> FormatResult<()> {
        self.poll()?;
        self.xml.start("Entry")?;
        self.uuid("UUID", Some(entry.uuid))?;
        self.number("IconID", entry.icon_id)?;
        if entry.custom_icon_uuid.is_some() {
            self.uuid("CustomIconUUID", entry.custom_icon_uuid)?;
        }
        self.xml.leaf("ForegroundColor", &entry.foreground_color)?;
        self.xml.leaf("BackgroundColor", &entry.background_color)?;
        self.xml.leaf("OverrideURL", &entry.override_url)?;
        self.xml.leaf("Tags", &entry.tags)?;
        self.write_times(&entry.times)?;

        for field in &entry.fields {
            self.xml.start("String")?;
            self.xml.leaf("Key", &field.name)?;
            if field.is_protected || parts.meta.memory_protection.is_protected(&field.name) {
                self.protected("Value", &[], field.value().as_bytes())?;
            } else {
                self.xml.leaf("Value", field.value())?;
            }
            self.xml.end("String")?;
        }
        for attachment in &entry.attachments {
            let id = attachment.pool_id.ok_or_else(|| {
                FormatError::corrupted(format!("attachment \"{}\" has no pool id", attachment.name))
            })?;
            let id = id.to_string();
            self.xml.start("Binary")?;
            self.xml.leaf("Key", &attachment.name)?;
            self.xml.leaf_with("Value", &[("Ref", id.as_str())], "")?;
            self.xml.end("Binary")?;
        }

        let auto_type = &entry.auto_type;
        self.xml.start("AutoType")?;
        self.xml.leaf_bool("Enabled", auto_type.enabled)?;
        self.number("DataTransferObfuscation", auto_type.obfuscation)?;
        if !auto_type.default_sequence.is_empty() {
            self.xml.leaf("DefaultSequence", &auto_type.default_sequence)?;
        }
        for association in &auto_type.associations {
            self.xml.start("Association")?;
            self.xml.leaf("Window", &association.window)?;
            self.xml
                .leaf("KeystrokeSequence", &association.keystroke_sequence)?;
            self.xml.end("Association")?;
        }
        self.xml.end("AutoType")?;
        self.write_custom_data(&entry.custom_data)?;

        if !entry.history.is_empty() {
            self.xml.start("History")?;
            for old in &entry.history {
                self.write_entry(old, parts)?;
            }
            self.xml.end("History")?;
        }
        self.xml.end("Entry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::InnerStreamKind;
    use chrono::TimeZone;

    fn stream() -> ProtectedStream {
        ProtectedStream::new(InnerStreamKind::ChaCha20, &[5u8; 64]).unwrap()
    }

    #[test]
    fn both_time_encodings_are_accepted() {
        let time = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let v3 = time_text(time, FormatVersion::V3);
        let v4 = time_text(time, FormatVersion::V4);
        assert_eq!(v3, "2021-03-04T05:06:07Z");
        assert_eq!(parse_time(&v3).unwrap(), time);
        assert_eq!(parse_time(&v4).unwrap(), time);
    }

    #[test]
    fn nil_uuid_reads_as_none() {
        assert_eq!(parse_uuid(&uuid_text(None)).unwrap(), None);
        let uuid = Uuid::new_v4();
        assert_eq!(parse_uuid(&uuid_text(Some(uuid))).unwrap(), Some(uuid));
        assert!(parse_uuid("not base64!").is_err());
    }

    #[test]
    fn protected_values_survive_in_document_order() {
        let mut tree = Tree::new(Group::new("Root"), true);
        let root = tree.root();
        let sub = tree.add_group(root, Group::new("Sub")).unwrap();
        for (group, secret) in [(root, "first"), (sub, "second"), (root, "third")] {
            let mut entry = Entry::new();
            entry.set_value("Password", secret);
            entry.set_field("PIN", "1234", true);
            tree.add_entry(group, entry).unwrap();
        }
        let meta = Meta::default();
        let parts = DocumentParts {
            meta: &meta,
            tree: &tree,
            deleted_objects: &[DeletedObject::now(Uuid::new_v4())],
            binaries: None,
            header_hash: None,
        };
        let xml = write(parts, FormatVersion::V4, stream(), &Progress::new()).unwrap();
        assert!(!String::from_utf8_lossy(&xml).contains("second"));

        let doc = read(&xml, stream(), &Progress::new()).unwrap();
        let passwords: Vec<String> = doc
            .tree
            .all_entries()
            .into_iter()
            .map(|id| doc.tree.entry(id).unwrap().password().to_owned())
            .collect();
        assert_eq!(passwords.len(), 3);
        for secret in ["first", "second", "third"] {
            assert!(passwords.iter().any(|p| p == secret));
        }
        assert_eq!(doc.deleted_objects.len(), 1);
        let pin = doc.tree.entry(doc.tree.all_entries()[0]).unwrap().field("PIN").unwrap();
        assert!(pin.is_protected);
        assert_eq!(pin.value(), "1234");
    }

    #[test]
    fn v3_binaries_and_header_hash_live_in_meta() {
        let mut tree = Tree::new(Group::new("Root"), true);
        let mut entry = Entry::new();
        let mut attachment = Attachment::new("note.txt", b"attached".to_vec());
        attachment.pool_id = Some(0);
        entry.attachments.push(attachment);
        tree.add_entry(tree.root(), entry).unwrap();

        let mut pool = BinaryPool::new();
        pool.insert(
            0,
            PoolBinary {
                data: b"attached".to_vec(),
                is_compressed: true,
                is_protected: false,
            },
        );
        let meta = Meta::default();
        let parts = DocumentParts {
            meta: &meta,
            tree: &tree,
            deleted_objects: &[],
            binaries: Some(&pool),
            header_hash: Some([9u8; 32]),
        };
        let salsa = || ProtectedStream::new(InnerStreamKind::Salsa20, &[1u8; 32]).unwrap();
        let xml = write(parts, FormatVersion::V3, salsa(), &Progress::new()).unwrap();
        let doc = read(&xml, salsa(), &Progress::new()).unwrap();
        assert_eq!(doc.meta.header_hash, Some([9u8; 32]));
        assert_eq!(doc.binaries.get(0).unwrap().data, b"attached");
        let entry = doc.tree.entry(doc.tree.all_entries()[0]).unwrap();
        assert_eq!(entry.attachments[0].pool_id(), Some(0));
        assert!(entry.attachments[0].data.is_empty());
    }
}
