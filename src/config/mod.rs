// src/config/mod.rs
//! Configuration system for encrypted-db-codec
//!
//! Central, lazy-loaded global config with TOML + env overrides. Only
//! defaults for *new* databases and resolver limits live here; everything
//! about an existing file comes from its own header.

pub use app::{load, ChallengeSettings, Config, FormatSettings, KdfSettings, ReferenceSettings};

mod app;
mod defaults;
