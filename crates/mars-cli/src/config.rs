//! CLI configuration file

use anyhow::{Context, Result};
use mars_core::{ArchiveConfig, StorageMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `config.toml`
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Skip confirmation prompts for destructive commands
    #[serde(default)]
    pub assume_yes: bool,
    /// Settings applied to every archive the CLI opens
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Load the config file, falling back to `MARS_*` environment variables
    /// when it does not exist
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path(),
        };

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Config {
                archive: ArchiveConfig::from_env()?,
                ..Config::default()
            })
        }
    }

    /// Parse a config file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.archive.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path(),
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mars")
            .join("config.toml")
    }

    /// Archive settings with command-line overrides applied
    pub fn archive_config(&self, force_virtual: bool) -> ArchiveConfig {
        let mut config = self.archive.clone();
        if force_virtual {
            config.mode = StorageMode::Virtual;
        }
        config
    }
}
