// src/error.rs
//! Error types for the entire crate
//!
//! `DatabaseError` is the only type that crosses the codec boundary. The
//! other enums are internal to the format layers and get rewrapped by
//! [`FormatError::into_load_error`] / [`FormatError::into_save_error`].

use thiserror::Error;

use crate::enums::CancelReason;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Cannot open database: {reason}")]
    LoadError { reason: String },

    #[error("Invalid password or key file")]
    InvalidKey,

    #[error("Cannot save database: {reason}")]
    SaveError { reason: String },

    #[error("Operation interrupted: {0}")]
    Cancelled(CancelReason),
}

impl DatabaseError {
    pub fn load(reason: impl Into<String>) -> Self {
        DatabaseError::LoadError {
            reason: reason.into(),
        }
    }

    pub fn save(reason: impl Into<String>) -> Self {
        DatabaseError::SaveError {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Padding error")]
    Padding,

    #[error("Key derivation failed: {0}")]
    Kdf(String),

    #[error("Unsupported KDF parameters: {0}")]
    KdfParams(String),
}

#[derive(Error, Debug, Clone)]
pub enum ChallengeResponseError {
    #[error("No hardware key available")]
    NotAvailable,

    #[error("Challenge-response cancelled")]
    Cancelled,

    #[error("Challenge-response timed out")]
    Timeout,

    #[error("Hardware key error: {0}")]
    Hardware(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("Composite key is in state {actual:?}, operation needs {expected:?}")]
    InvalidState {
        expected: crate::keys::KeyState,
        actual: crate::keys::KeyState,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("Unknown group")]
    UnknownGroup,

    #[error("Unknown entry")]
    UnknownEntry,

    #[error("Cannot move a group into its own subtree")]
    CyclicMove,

    #[error("The root group cannot be moved or deleted")]
    RootGroup,

    #[error("Entries cannot be placed in the root group of this format")]
    EntryInRoot,
}

/// Internal format-layer error, never returned from the public codec API
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Header error: {0}")]
    Header(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("{0}")]
    Crypto(#[from] CryptoError),

    #[error("{0}")]
    ChallengeResponse(#[from] ChallengeResponseError),

    #[error("{0}")]
    Key(#[from] KeyError),

    #[error("{0}")]
    Tree(#[from] TreeError),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Invalid password or key file")]
    InvalidKey,

    #[error("Operation interrupted: {0}")]
    Cancelled(CancelReason),
}

impl FormatError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        FormatError::Corrupted(reason.into())
    }

    pub fn header(reason: impl Into<String>) -> Self {
        FormatError::Header(reason.into())
    }

    pub fn xml(reason: impl std::fmt::Display) -> Self {
        FormatError::Xml(reason.to_string())
    }

    pub fn into_load_error(self) -> DatabaseError {
        match self {
            FormatError::InvalidKey => DatabaseError::InvalidKey,
            FormatError::Cancelled(reason) => DatabaseError::Cancelled(reason),
            other => DatabaseError::LoadError {
                reason: other.to_string(),
            },
        }
    }

    pub fn into_save_error(self) -> DatabaseError {
        match self {
            FormatError::Cancelled(reason) => DatabaseError::Cancelled(reason),
            other => DatabaseError::SaveError {
                reason: other.to_string(),
            },
        }
    }
}

impl From<quick_xml::Error> for FormatError {
    fn from(err: quick_xml::Error) -> Self {
        FormatError::Xml(err.to_string())
    }
}

pub type FormatResult<T> = std::result::Result<T, FormatError>;
