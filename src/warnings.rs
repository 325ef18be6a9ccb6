// src/warnings.rs
//! Non-fatal problems found while loading
//!
//! None of these stop a load; they are collected and handed back with the
//! database so the caller can decide whether to tell the user.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// Pool binaries no entry refers to
    UnusedAttachments { ids: Vec<usize> },
    /// An entry refers to a pool id that does not exist; the attachment is dropped
    MissingAttachment { entry: String, id: usize },
    /// Attachments stored without a name were renamed
    NamelessAttachments { entries: Vec<String> },
    /// Custom fields with an empty name (left as they are)
    NamelessCustomFields { entries: Vec<String> },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnusedAttachments { ids } => {
                write!(f, "{} stored attachment(s) are not used by any entry", ids.len())
            }
            Self::MissingAttachment { entry, id } => {
                write!(f, "entry \"{entry}\" refers to missing attachment #{id}")
            }
            Self::NamelessAttachments { entries } => write!(
                f,
                "attachments without a name were renamed in: {}",
                entries.join(", ")
            ),
            Self::NamelessCustomFields { entries } => write!(
                f,
                "custom fields without a name found in: {}",
                entries.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadWarnings {
    /// Application that last wrote the file, when the format records it
    pub generator: Option<String>,
    pub issues: Vec<LoadWarning>,
}

impl LoadWarnings {
    pub fn push(&mut self, warning: LoadWarning) {
        tracing::warn!("{warning}");
        self.issues.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
