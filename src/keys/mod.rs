// src/keys/mod.rs
//! Master key material: composite key state machine and per-format helpers
mod challenge;
mod composite;
mod helper;

pub use challenge::{ChallengeHandler, ChallengeResult, ResponseSender};
pub use composite::{CompositeKey, KeyFileSource, KeyState};
pub use helper::{KeyHelper, LegacyKeyHelper, ModernKeyHelper};
