// src/modern/inner_header.rs
//! v4 inner header: protected-stream settings and embedded binaries
//!
//! Sits in front of the XML document inside the decrypted payload. Fields
//! are `(u8 id, i32 size, data)`; binaries keep their position as pool id.

use zeroize::Zeroizing;

use crate::enums::InnerStreamKind;
use crate::error::{FormatError, FormatResult};
use crate::util::{le_u32, ByteReader};

const FIELD_END: u8 = 0;
const FIELD_STREAM_ID: u8 = 1;
const FIELD_STREAM_KEY: u8 = 2;
const FIELD_BINARY: u8 = 3;

const BINARY_FLAG_PROTECTED: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InnerBinary {
    pub data: Vec<u8>,
    pub is_protected: bool,
}

pub(crate) struct InnerHeader {
    pub stream: InnerStreamKind,
    pub stream_key: Zeroizing<Vec<u8>>,
    pub binaries: Vec<InnerBinary>,
}

impl InnerHeader {
    /// Parses the inner header and returns it with the bytes consumed
    pub fn read(data: &[u8]) -> FormatResult<(Self, usize)> {
        let mut reader = ByteReader::new(data);
        let mut stream = None;
        let mut stream_key = Zeroizing::new(Vec::new());
        let mut binaries = Vec::new();
        loop {
            let id = reader.read_u8()?;
            let size = usize::try_from(reader.read_i32()?)
                .map_err(|_| FormatError::corrupted("negative inner header field size"))?;
            let value = reader.read_bytes(size)?;
            match id {
                FIELD_END => break,
                FIELD_STREAM_ID => {
                    let raw = le_u32(value)
                        .ok_or_else(|| FormatError::corrupted("inner stream id must be 4 bytes"))?;
                    stream = Some(InnerStreamKind::from_id(raw).ok_or_else(|| {
                        FormatError::corrupted(format!("unknown inner stream id {raw}"))
                    })?);
                }
                FIELD_STREAM_KEY => stream_key = Zeroizing::new(value.to_vec()),
                FIELD_BINARY => {
                    let (&flags, content) = value
                        .split_first()
                        .ok_or_else(|| FormatError::corrupted("empty binary field"))?;
                    binaries.push(InnerBinary {
                        data: content.to_vec(),
                        is_protected: flags & BINARY_FLAG_PROTECTED != 0,
                    });
                }
                other => tracing::debug!(id = other, "skipping unknown inner header field"),
            }
        }
        let stream =
            stream.ok_or_else(|| FormatError::corrupted("inner header has no stream id"))?;
        Ok((
            InnerHeader {
                stream,
                stream_key,
                binaries,
            },
            reader.position(),
        ))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut field = |id: u8, parts: &[&[u8]]| {
            let size: usize = parts.iter().map(|p| p.len()).sum();
            out.push(id);
            out.extend_from_slice(&(size as i32).to_le_bytes());
            for part in parts {
                out.extend_from_slice(part);
            }
        };
        field(FIELD_STREAM_ID, &[&self.stream.id().to_le_bytes()]);
        field(FIELD_STREAM_KEY, &[self.stream_key.as_slice()]);
        for binary in &self.binaries {
            let flags = if binary.is_protected {
                BINARY_FLAG_PROTECTED
            } else {
                0
            };
            field(FIELD_BINARY, &[&[flags], binary.data.as_slice()]);
        }
        field(FIELD_END, &[]);
    }
}
