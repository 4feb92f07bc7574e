// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Settings persistence (load/save).

use super::link::Role;
use super::saved::SavedConfig;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

const SETTINGS_FILE: &str = "settings.toml";

/// Sole owner and writer of the persisted settings record.
///
/// Loading never fails toward the caller: a missing or unreadable file
/// yields defaults plus a logged warning. Saving reports failure as a
/// plain `false` so the control surface stays panic-free.
pub struct ConfigStore {
    config_dir: PathBuf,
    config: SavedConfig,
}

impl ConfigStore {
    /// Store rooted at the standard per-user config directory.
    pub fn open() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("", "", "oblink").ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(dirs.config_dir()))
    }

    /// Store rooted at an explicit directory.
    pub fn at(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_path_buf(),
            config: SavedConfig::default(),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn config(&self) -> &SavedConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SavedConfig {
        &mut self.config
    }

    /// Load the record from disk, falling back to defaults on any error.
    pub fn load(&mut self) -> &SavedConfig {
        match self.try_load() {
            Ok(config) => {
                self.config = config;
            }
            Err(e) => {
                warn!("Failed to load settings, using defaults: {e}");
                self.config = SavedConfig::default();
            }
        }
        &self.config
    }

    fn try_load(&self) -> Result<SavedConfig, ConfigError> {
        let path = self.settings_path();
        if !path.exists() {
            info!("Settings file not found, using defaults: {}", path.display());
            return Ok(SavedConfig::default());
        }
        let content = fs::read_to_string(&path)?;
        let config: SavedConfig = toml::from_str(&content)?;
        info!(
            "Loaded settings from {}: role={}",
            path.display(),
            config.active_role.as_str()
        );
        Ok(config)
    }

    /// Write the full record. Returns false (and logs) on failure.
    pub fn save(&self) -> bool {
        match self.try_save() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save settings: {e}");
                false
            }
        }
    }

    fn try_save(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir)?;
        let content = toml::to_string_pretty(&self.config)?;
        fs::write(self.settings_path(), content)?;
        info!(
            "Saved settings to {}: role={}",
            self.settings_path().display(),
            self.config.active_role.as_str()
        );
        Ok(())
    }

    /// Merge one role's fields from a launch-argument string, in memory.
    pub fn update_from_args(&mut self, args: &str, role: Role) {
        self.config.update_from_args(args, role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ConfigStore::at(dir.path());
        let config = store.load().clone();
        assert_eq!(config, SavedConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ConfigStore::at(dir.path());
        store.config_mut().auto_start = false;
        store.config_mut().tx_link_name = "matinale".to_string();
        assert!(store.save());

        let mut fresh = ConfigStore::at(dir.path());
        let config = fresh.load();
        assert!(!config.auto_start);
        assert_eq!(config.tx_link_name, "matinale");
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("deep").join("path");
        let store = ConfigStore::at(&nested);
        assert!(store.save());
        assert!(nested.join("settings.toml").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("settings.toml"), "not = [valid").expect("write");
        let mut store = ConfigStore::at(dir.path());
        assert_eq!(store.load(), &SavedConfig::default());
    }

    #[test]
    fn test_update_from_args_is_memory_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ConfigStore::at(dir.path());
        store.update_from_args("10.0.0.5 studio show tx 10.0.0.6", Role::Tx);
        assert_eq!(store.config().tx_config_host, "10.0.0.5");
        assert!(!store.settings_path().exists());
    }
}
