// src/header/variant.rs
//! Typed key/value dictionary used for v4 KDF parameters and custom data

use crate::error::{FormatError, FormatResult};
use crate::util::ByteReader;

const VERSION: u16 = 0x0100;
const VERSION_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_U32: u8 = 0x04;
const TYPE_U64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_I32: u8 = 0x0C;
const TYPE_I64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTES: u8 = 0x42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U32(u32),
    U64(u64),
    Bool(bool),
    I32(i32),
    I64(i64),
    String(String),
    Bytes(Vec<u8>),
}

/// Insertion-ordered so a re-serialized dictionary keeps the original layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDictionary {
    items: Vec<(String, Value)>,
}

impl VariantDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.items.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.items.push((key.to_owned(), value)),
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::U64(v) => Some(*v),
            Value::U32(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key)? {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut reader = ByteReader::new(data);
        let version = reader.read_u16()?;
        if version & VERSION_CRITICAL_MASK > VERSION & VERSION_CRITICAL_MASK {
            return Err(FormatError::header(format!(
                "unsupported variant dictionary version {version:#06x}"
            )));
        }

        let mut dict = VariantDictionary::new();
        loop {
            let kind = reader.read_u8()?;
            if kind == TYPE_END {
                break;
            }
            let key_len = read_len(&mut reader)?;
            let key = String::from_utf8(reader.read_bytes(key_len)?.to_vec())
                .map_err(|_| FormatError::header("variant dictionary key is not UTF-8"))?;
            let value_len = read_len(&mut reader)?;
            let raw = reader.read_bytes(value_len)?;
            let value = match kind {
                TYPE_U32 => Value::U32(fixed(raw, &key)?),
                TYPE_U64 => Value::U64(fixed(raw, &key)?),
                TYPE_BOOL => Value::Bool(raw.first().is_some_and(|b| *b != 0)),
                TYPE_I32 => Value::I32(fixed(raw, &key)?),
                TYPE_I64 => Value::I64(fixed(raw, &key)?),
                TYPE_STRING => Value::String(String::from_utf8_lossy(raw).into_owned()),
                TYPE_BYTES => Value::Bytes(raw.to_vec()),
                other => {
                    return Err(FormatError::header(format!(
                        "unknown variant type {other:#04x} for {key}"
                    )))
                }
            };
            dict.items.push((key, value));
        }
        Ok(dict)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = VERSION.to_le_bytes().to_vec();
        for (key, value) in &self.items {
            let (kind, raw): (u8, Vec<u8>) = match value {
                Value::U32(v) => (TYPE_U32, v.to_le_bytes().to_vec()),
                Value::U64(v) => (TYPE_U64, v.to_le_bytes().to_vec()),
                Value::Bool(v) => (TYPE_BOOL, vec![u8::from(*v)]),
                Value::I32(v) => (TYPE_I32, v.to_le_bytes().to_vec()),
                Value::I64(v) => (TYPE_I64, v.to_le_bytes().to_vec()),
                Value::String(v) => (TYPE_STRING, v.as_bytes().to_vec()),
                Value::Bytes(v) => (TYPE_BYTES, v.clone()),
            };
            out.push(kind);
            out.extend_from_slice(&(key.len() as i32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(raw.len() as i32).to_le_bytes());
            out.extend_from_slice(&raw);
        }
        out.push(TYPE_END);
        out
    }
}

fn read_len(reader: &mut ByteReader<'_>) -> FormatResult<usize> {
    let len = reader.read_i32()?;
    usize::try_from(len).map_err(|_| FormatError::header("negative variant length"))
}

trait FromLe: Sized {
    fn from_le(raw: &[u8]) -> Option<Self>;
}

macro_rules! impl_from_le {
    ($($t:ty),*) => {$(
        impl FromLe for $t {
            fn from_le(raw: &[u8]) -> Option<Self> {
                Some(<$t>::from_le_bytes(raw.try_into().ok()?))
            }
        }
    )*};
}

impl_from_le!(u32, u64, i32, i64);

fn fixed<T: FromLe>(raw: &[u8], key: &str) -> FormatResult<T> {
    T::from_le(raw).ok_or_else(|| FormatError::header(format!("bad value size for {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_writes_in_order() {
        let mut dict = VariantDictionary::new();
        dict.set("$UUID", Value::Bytes(vec![1, 2, 3]));
        dict.set("R", Value::U64(6000));
        dict.set("flag", Value::Bool(true));
        dict.set("R", Value::U64(7000));
        let parsed = VariantDictionary::parse(&dict.serialize()).unwrap();
        assert_eq!(parsed, dict);
        assert_eq!(parsed.get_u64("R"), Some(7000));
    }

    #[test]
    fn rejects_future_major_version() {
        assert!(VariantDictionary::parse(&[0x00, 0x02, 0x00]).is_err());
    }
}
