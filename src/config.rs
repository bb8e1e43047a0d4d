//! Host configuration module
//!
//! Parses the NPC host configuration from YAML. Every key has a default, so
//! an empty file is a valid (JSON-backed) configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::database::StorageKind;

/// NPC host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcConfig {
    // ============================================
    // Storage
    // ============================================
    /// Backend token: `json`, `sqlite` or `mysql` (case-insensitive)
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Directory, SQLite file/URL or MySQL URL, depending on the backend
    #[serde(default = "default_storage_location")]
    pub storage_location: String,

    // ============================================
    // Skins & World
    // ============================================
    #[serde(default = "default_skin_dir")]
    pub skin_dir: String,

    /// Levels the standalone world exposes
    #[serde(default = "default_levels")]
    pub levels: Vec<String>,
}

fn default_storage_type() -> String {
    "json".to_string()
}

fn default_storage_location() -> String {
    "./npc_db/".to_string()
}

fn default_skin_dir() -> String {
    "./npc_skins/".to_string()
}

fn default_levels() -> Vec<String> {
    vec!["world".to_string()]
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            storage_location: default_storage_location(),
            skin_dir: default_skin_dir(),
            levels: default_levels(),
        }
    }
}

impl NpcConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use npckeeper::config::NpcConfig;
    ///
    /// let config = NpcConfig::from_file("conf/npc.yaml")
    ///     .expect("Failed to load config");
    /// println!("Storage: {}", config.storage_type);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: NpcConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: NpcConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Unknown backend tokens and empty locations are fatal at startup.
    fn validate(&self) -> Result<()> {
        self.storage_kind()?;
        anyhow::ensure!(
            !self.storage_location.trim().is_empty(),
            "storage_location cannot be empty"
        );
        anyhow::ensure!(!self.skin_dir.trim().is_empty(), "skin_dir cannot be empty");
        anyhow::ensure!(
            self.levels.iter().all(|l| !l.trim().is_empty()),
            "levels cannot contain an empty name"
        );
        Ok(())
    }

    pub fn storage_kind(&self) -> Result<StorageKind> {
        self.storage_type
            .parse::<StorageKind>()
            .with_context(|| format!("Invalid storage_type '{}'", self.storage_type))
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
