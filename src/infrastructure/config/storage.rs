//! Locates, loads and saves the cache configuration file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache_config::CacheConfig;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be resolved.
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Config could not be serialized.
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Owns the directory holding `config.toml`.
///
/// Relative paths inside the file are taken relative to the file itself, so a
/// config can carry its cache directory along when it is moved.
pub struct StorageManager {
    config_dir: PathBuf,
}

impl StorageManager {
    /// Uses the platform config directory for `imgcache`.
    ///
    /// # Errors
    /// Returns [`ConfigError::ConfigDirNotFound`] if there is no home directory.
    pub fn new() -> Result<Self, ConfigError> {
        ProjectDirs::from("com", "imgcache", "imgcache")
            .map(|dirs| Self::with_dir(dirs.config_dir().to_path_buf()))
            .ok_or(ConfigError::ConfigDirNotFound)
    }

    /// Uses `config_dir` instead of the platform default.
    #[must_use]
    pub const fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Returns the directory holding the config file.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the configuration from `path_override` or the default path.
    ///
    /// A missing file is created with defaults. A malformed file is left as
    /// is and defaults are used. Unusable limits are repaired and relative
    /// paths resolved against the file's directory.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or the default written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<CacheConfig, ConfigError> {
        let path = path_override.map_or_else(|| self.config_path(), Path::to_path_buf);

        let config = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<CacheConfig>(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Malformed config file, using defaults");
                CacheConfig::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, writing defaults");
                let config = CacheConfig::default();
                write_atomically(&path, &config)?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        debug!(path = %path.display(), "Loaded cache configuration");
        Ok(config.sanitized().resolved_against(base))
    }

    /// Saves `config` to the default config file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be written.
    pub fn save_config(&self, config: &CacheConfig) -> Result<(), ConfigError> {
        write_atomically(&self.config_path(), config)
    }
}

/// Writes through a sibling temp file so a crash never leaves half a config.
fn write_atomically(path: &Path, config: &CacheConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
