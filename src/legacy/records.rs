// src/legacy/records.rs
//! Tag-coded group and entry records of the legacy payload
//!
//! Each record is a run of `(u16 type, u32 size, data)` fields closed by a
//! `0xFFFF` field. Strings are UTF-8 with a trailing NUL, dates use the
//! packed 5-byte layout.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::consts::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USER_NAME};
use crate::error::{FormatError, FormatResult};
use crate::model::{Attachment, Entry, EntryField, Group, Times};
use crate::progress::Progress;
use crate::util::{c_string, le_u32, ByteReader};

const FIELD_RESERVED: u16 = 0x0000;
const FIELD_END: u16 = 0xFFFF;

const GROUP_ID: u16 = 0x0001;
const GROUP_NAME: u16 = 0x0002;
const GROUP_CREATION: u16 = 0x0003;
const GROUP_LAST_MOD: u16 = 0x0004;
const GROUP_LAST_ACCESS: u16 = 0x0005;
const GROUP_EXPIRY: u16 = 0x0006;
const GROUP_ICON: u16 = 0x0007;
const GROUP_LEVEL: u16 = 0x0008;
const GROUP_FLAGS: u16 = 0x0009;

const ENTRY_UUID: u16 = 0x0001;
const ENTRY_GROUP_ID: u16 = 0x0002;
const ENTRY_ICON: u16 = 0x0003;
const ENTRY_TITLE: u16 = 0x0004;
const ENTRY_URL: u16 = 0x0005;
const ENTRY_USER_NAME: u16 = 0x0006;
const ENTRY_PASSWORD: u16 = 0x0007;
const ENTRY_NOTES: u16 = 0x0008;
const ENTRY_CREATION: u16 = 0x0009;
const ENTRY_LAST_MOD: u16 = 0x000A;
const ENTRY_LAST_ACCESS: u16 = 0x000B;
const ENTRY_EXPIRY: u16 = 0x000C;
const ENTRY_BINARY_DESC: u16 = 0x000D;
const ENTRY_BINARY_DATA: u16 = 0x000E;

const RECORDS_PER_POLL: usize = 256;

// Meta-stream sentinel values
const META_STREAM_BINARY_DESC: &str = "bin-stream";
const META_STREAM_TITLE: &str = "Meta-Info";
const META_STREAM_USER_NAME: &str = "SYSTEM";
const META_STREAM_URL: &str = "$";

pub(crate) struct GroupRecord {
    pub group: Group,
    pub level: u16,
}

pub(crate) struct EntryRecord {
    pub entry: Entry,
    pub group_id: u32,
}

/// Date standing for "never expires"
pub fn never_expires() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2999, 12, 28, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn unpack_date(bytes: &[u8; 5]) -> DateTime<Utc> {
    let [b0, b1, b2, b3, b4] = bytes.map(u32::from);
    let year = (b0 << 6) | (b1 >> 2);
    let month = ((b1 & 0x03) << 2) | (b2 >> 6);
    let day = (b2 >> 1) & 0x1F;
    let hour = ((b2 & 0x01) << 4) | (b3 >> 4);
    let minute = ((b3 & 0x0F) << 2) | (b4 >> 6);
    let second = b4 & 0x3F;
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

pub fn pack_date(date: &DateTime<Utc>) -> [u8; 5] {
    let year = date.year().clamp(0, 4095) as u32;
    let (month, day) = (date.month(), date.day());
    let (hour, minute, second) = (date.hour(), date.minute(), date.second());
    [
        ((year >> 6) & 0x3F) as u8,
        (((year & 0x3F) << 2) | ((month >> 2) & 0x03)) as u8,
        (((month & 0x03) << 6) | ((day & 0x1F) << 1) | ((hour >> 4) & 0x01)) as u8,
        (((hour & 0x0F) << 4) | ((minute >> 2) & 0x0F)) as u8,
        (((minute & 0x03) << 6) | (second & 0x3F)) as u8,
    ]
}

fn date_field(data: &[u8]) -> FormatResult<DateTime<Utc>> {
    let bytes: [u8; 5] = data
        .try_into()
        .map_err(|_| FormatError::corrupted("date field must be 5 bytes"))?;
    Ok(unpack_date(&bytes))
}

fn u32_field(data: &[u8]) -> FormatResult<u32> {
    le_u32(data).ok_or_else(|| FormatError::corrupted("integer field too short"))
}

fn set_expiry(times: &mut Times, expiry: DateTime<Utc>) {
    times.expires = expiry < never_expires();
    times.expiry = expiry;
}

/// Reads the next `(type, data)` pair
fn next_field<'a>(reader: &mut ByteReader<'a>) -> FormatResult<(u16, &'a [u8])> {
    let kind = reader.read_u16()?;
    let size = reader.read_u32()? as usize;
    let data = reader.read_bytes(size)?;
    Ok((kind, data))
}

fn read_group(reader: &mut ByteReader<'_>) -> FormatResult<GroupRecord> {
    let mut group = Group::new("");
    let mut level = 0u16;
    loop {
        let (kind, data) = next_field(reader)?;
        match kind {
            FIELD_RESERVED => {}
            GROUP_ID => group.legacy_id = u32_field(data)?,
            GROUP_NAME => group.name = c_string(data),
            GROUP_CREATION => group.times.creation = date_field(data)?,
            GROUP_LAST_MOD => group.times.last_modification = date_field(data)?,
            GROUP_LAST_ACCESS => group.times.last_access = date_field(data)?,
            GROUP_EXPIRY => set_expiry(&mut group.times, date_field(data)?),
            GROUP_ICON => group.icon_id = u32_field(data)?,
            GROUP_LEVEL => {
                let bytes: [u8; 2] = data
                    .get(..2)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| FormatError::corrupted("group level field too short"))?;
                level = u16::from_le_bytes(bytes);
            }
            GROUP_FLAGS => group.flags = u32_field(data)?,
            FIELD_END => break,
            other => return Err(FormatError::corrupted(format!("unknown group field {other:#06x}"))),
        }
    }
    Ok(GroupRecord { group, level })
}

fn read_entry(reader: &mut ByteReader<'_>) -> FormatResult<EntryRecord> {
    let mut entry = Entry::default();
    let mut group_id = 0u32;
    let mut title = String::new();
    let mut url = String::new();
    let mut user_name = String::new();
    let mut password = String::new();
    let mut notes = String::new();
    let mut binary_desc = String::new();
    let mut binary_data = Vec::new();
    loop {
        let (kind, data) = next_field(reader)?;
        match kind {
            FIELD_RESERVED => {}
            ENTRY_UUID => {
                let bytes: [u8; 16] = data
                    .try_into()
                    .map_err(|_| FormatError::corrupted("entry uuid must be 16 bytes"))?;
                entry.uuid = Uuid::from_bytes(bytes);
            }
            ENTRY_GROUP_ID => group_id = u32_field(data)?,
            ENTRY_ICON => entry.icon_id = u32_field(data)?,
            ENTRY_TITLE => title = c_string(data),
            ENTRY_URL => url = c_string(data),
            ENTRY_USER_NAME => user_name = c_string(data),
            ENTRY_PASSWORD => password = c_string(data),
            ENTRY_NOTES => notes = c_string(data),
            ENTRY_CREATION => entry.times.creation = date_field(data)?,
            ENTRY_LAST_MOD => entry.times.last_modification = date_field(data)?,
            ENTRY_LAST_ACCESS => entry.times.last_access = date_field(data)?,
            ENTRY_EXPIRY => set_expiry(&mut entry.times, date_field(data)?),
            ENTRY_BINARY_DESC => binary_desc = c_string(data),
            ENTRY_BINARY_DATA => binary_data = data.to_vec(),
            FIELD_END => break,
            other => return Err(FormatError::corrupted(format!("unknown entry field {other:#06x}"))),
        }
    }
    entry.fields = vec![
        EntryField::new(FIELD_TITLE, &title, false),
        EntryField::new(FIELD_USER_NAME, &user_name, false),
        EntryField::new(FIELD_PASSWORD, &password, true),
        EntryField::new(FIELD_URL, &url, false),
        EntryField::new(FIELD_NOTES, &notes, false),
    ];
    if !binary_desc.is_empty() || !binary_data.is_empty() {
        let mut attachment = Attachment::new(&binary_desc, binary_data);
        attachment.is_compressed = false;
        entry.attachments.push(attachment);
    }
    Ok(EntryRecord { entry, group_id })
}

/// Parses all records; counts come from the header
pub(crate) fn read_records(
    data: &[u8],
    group_count: u32,
    entry_count: u32,
    progress: &Progress,
) -> FormatResult<(Vec<GroupRecord>, Vec<EntryRecord>)> {
    let mut reader = ByteReader::new(data);
    let mut groups = Vec::with_capacity(group_count as usize);
    for index in 0..group_count as usize {
        if index % RECORDS_PER_POLL == 0 {
            progress.check()?;
        }
        groups.push(read_group(&mut reader)?);
    }
    let mut entries = Vec::with_capacity(entry_count as usize);
    for index in 0..entry_count as usize {
        if index % RECORDS_PER_POLL == 0 {
            progress.check()?;
        }
        entries.push(read_entry(&mut reader)?);
    }
    Ok((groups, entries))
}

fn write_field(out: &mut Vec<u8>, kind: u16, data: &[u8]) {
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn write_string(out: &mut Vec<u8>, kind: u16, value: &str) {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    write_field(out, kind, &bytes);
}

fn expiry_of(times: &Times) -> DateTime<Utc> {
    if times.expires {
        times.expiry
    } else {
        never_expires()
    }
}

pub(crate) fn write_group(out: &mut Vec<u8>, group: &Group, level: u16) {
    write_field(out, GROUP_ID, &group.legacy_id.to_le_bytes());
    write_string(out, GROUP_NAME, &group.name);
    write_field(out, GROUP_CREATION, &pack_date(&group.times.creation));
    write_field(out, GROUP_LAST_MOD, &pack_date(&group.times.last_modification));
    write_field(out, GROUP_LAST_ACCESS, &pack_date(&group.times.last_access));
    write_field(out, GROUP_EXPIRY, &pack_date(&expiry_of(&group.times)));
    write_field(out, GROUP_ICON, &group.icon_id.to_le_bytes());
    write_field(out, GROUP_LEVEL, &level.to_le_bytes());
    write_field(out, GROUP_FLAGS, &group.flags.to_le_bytes());
    write_field(out, FIELD_END, &[]);
}

pub(crate) fn write_entry(out: &mut Vec<u8>, entry: &Entry, group_id: u32) {
    write_field(out, ENTRY_UUID, entry.uuid.as_bytes());
    write_field(out, ENTRY_GROUP_ID, &group_id.to_le_bytes());
    write_field(out, ENTRY_ICON, &entry.icon_id.to_le_bytes());
    write_string(out, ENTRY_TITLE, entry.title());
    write_string(out, ENTRY_URL, entry.url());
    write_string(out, ENTRY_USER_NAME, entry.user_name());
    write_string(out, ENTRY_PASSWORD, entry.password());
    write_string(out, ENTRY_NOTES, entry.notes());
    write_field(out, ENTRY_CREATION, &pack_date(&entry.times.creation));
    write_field(out, ENTRY_LAST_MOD, &pack_date(&entry.times.last_modification));
    write_field(out, ENTRY_LAST_ACCESS, &pack_date(&entry.times.last_access));
    write_field(out, ENTRY_EXPIRY, &pack_date(&expiry_of(&entry.times)));
    let (desc, data) = match entry.attachments.first() {
        Some(attachment) => (attachment.name.as_str(), attachment.data.as_slice()),
        None => ("", &[][..]),
    };
    write_string(out, ENTRY_BINARY_DESC, desc);
    write_field(out, ENTRY_BINARY_DATA, data);
    write_field(out, FIELD_END, &[]);
}

/// Internal entries some applications use to store settings
pub(crate) fn is_meta_stream(entry: &Entry) -> bool {
    let Some(attachment) = entry.attachments.first() else {
        return false;
    };
    !attachment.data.is_empty()
        && !entry.notes().is_empty()
        && attachment.name == META_STREAM_BINARY_DESC
        && entry.title() == META_STREAM_TITLE
        && entry.user_name() == META_STREAM_USER_NAME
        && entry.url() == META_STREAM_URL
        && entry.icon_id == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_dates_keep_second_precision() {
        let date = Utc.with_ymd_and_hms(2021, 7, 14, 13, 45, 59).unwrap();
        assert_eq!(unpack_date(&pack_date(&date)), date);
        assert_eq!(unpack_date(&pack_date(&never_expires())), never_expires());
    }

    #[test]
    fn never_expires_means_no_expiry() {
        let mut group = Group::new("Internet");
        group.legacy_id = 7;
        let mut out = Vec::new();
        write_group(&mut out, &group, 2);
        let record = read_group(&mut ByteReader::new(&out)).unwrap();
        assert_eq!(record.level, 2);
        assert_eq!(record.group.legacy_id, 7);
        assert_eq!(record.group.name, "Internet");
        assert!(!record.group.times.expires);
    }

    #[test]
    fn meta_stream_needs_every_sentinel() {
        let mut entry = Entry::new();
        entry.set_value("Title", "Meta-Info");
        entry.set_value("UserName", "SYSTEM");
        entry.set_value("URL", "$");
        entry.set_value("Notes", "KPX_CUSTOM_ICONS_4");
        entry.attachments.push(Attachment::new("bin-stream", vec![1, 2, 3]));
        assert!(is_meta_stream(&entry));
        entry.icon_id = 1;
        assert!(!is_meta_stream(&entry));
    }

    #[test]
    fn unknown_group_field_is_corruption() {
        let mut out = Vec::new();
        write_field(&mut out, 0x0042, &[1]);
        assert!(read_group(&mut ByteReader::new(&out)).is_err());
    }
}
