// src/config/app.rs
use super::defaults::*;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::enums::{CipherKind, FormatVersion, KdfKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kdf: KdfSettings,
    pub format: FormatSettings,
    pub references: ReferenceSettings,
    pub challenge: ChallengeSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    pub kind: KdfKind,
    pub aes_rounds: u64,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    pub version: FormatVersion,
    pub cipher: CipherKind,
    pub compression: bool,
    pub block_size: usize,
    pub legacy_rounds: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceSettings {
    pub max_depth: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub timeout_secs: u64,
}

impl ChallengeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            kdf: default_kdf(),
            format: default_format(),
            references: default_references(),
            challenge: default_challenge(),
        }
    }
}

impl Default for KdfSettings {
    fn default() -> Self {
        default_kdf()
    }
}

impl Default for FormatSettings {
    fn default() -> Self {
        default_format()
    }
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        default_references()
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        default_challenge()
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load config at runtime; falls back to defaults if missing or malformed
pub fn load() -> &'static Config {
    CONFIG.get_or_init(|| {
        let Some(path) = config_path().filter(|p| p.exists()) else {
            debug!("no config file found, using built-in defaults");
            return Config::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => Config::from_toml_str(&content).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "invalid TOML config, using defaults");
                Config::default()
            }),
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot read config, using defaults");
                Config::default()
            }
        }
    })
}
