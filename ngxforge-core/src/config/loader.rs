//! Configuration snapshot loader
//!
//! Snapshots are the serialized form of a [`Config`], as an editor would
//! persist it. Parsing nginx text lives in `ngxforge-config`.

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::Path;

/// Snapshot serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Toml,
}

impl SnapshotFormat {
    /// Pick a format from a file extension, `None` for nginx text
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(SnapshotFormat::Json),
            Some("toml") => Some(SnapshotFormat::Toml),
            _ => None,
        }
    }
}

/// Configuration loader for snapshot formats
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a snapshot from a `.json` or `.toml` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read snapshot file: {}", e)))?;

        match SnapshotFormat::from_path(path) {
            Some(SnapshotFormat::Json) => Self::from_json(&content),
            Some(SnapshotFormat::Toml) => Self::from_toml(&content),
            None => Err(Error::Config(format!(
                "Unknown snapshot format: {}",
                path.display()
            ))),
        }
    }

    /// Write a snapshot, choosing the format from the extension
    pub fn save<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match SnapshotFormat::from_path(path) {
            Some(SnapshotFormat::Json) => Self::to_json(config)?,
            Some(SnapshotFormat::Toml) => Self::to_toml(config)?,
            None => {
                return Err(Error::Config(format!(
                    "Unknown snapshot format: {}",
                    path.display()
                )));
            }
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse JSON snapshot
    pub fn from_json(content: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid JSON: {}", e)))?;
        config.check_references()?;
        Ok(config)
    }

    /// Parse TOML snapshot
    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.check_references()?;
        Ok(config)
    }

    pub fn to_json(config: &Config) -> Result<String> {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("JSON serialization failed: {}", e)))
    }

    pub fn to_toml(config: &Config) -> Result<String> {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("TOML serialization failed: {}", e)))
    }
}
