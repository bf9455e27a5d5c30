use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::repro::error::ConfigError;
use crate::repro::mode::Mode;

/// Storage file used when a config does not name one
pub const DEFAULT_STORAGE_FILE: &str = "recordings.json";

/// Interceptor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Backing storage file
    pub path: PathBuf,
    /// Initial dispatch mode
    pub mode: Mode,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_FILE),
            mode: Mode::Bypass,
        }
    }
}

/// TOML representation of the storage section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlStorageConfig {
    /// Path to the storage file; relative paths resolve against the config file
    pub path: Option<PathBuf>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    /// Dispatch mode (`bypass`, `record` or `playback`)
    pub mode: Option<Mode>,
    /// Storage configuration
    pub storage: Option<TomlStorageConfig>,
}

impl InterceptorConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Parse a config from TOML text, merging it over the defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = Self::default();
        if let Some(mode) = toml_config.mode {
            config.mode = mode;
        }
        if let Some(path) = toml_config.storage.and_then(|storage| storage.path) {
            config.path = path;
        }
        Ok(config)
    }

    /// Load a config file. A relative storage path is taken relative to the
    /// directory holding the config file.
    pub fn load(config_file: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(config_file).map_err(|source| ConfigError::Read {
            path: config_file.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;

        if config.path.is_relative() {
            if let Some(dir) = config_file.parent() {
                config.path = dir.join(&config.path);
            }
        }

        tracing::debug!(
            config = %config_file.display(),
            path = %config.path.display(),
            mode = %config.mode,
            "Loaded interceptor config"
        );
        Ok(config)
    }
}
