//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::args::CliArgs;
use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, dirs_cache_path};
use crate::infrastructure::image::memory_cache::DEFAULT_CACHE_SIZE;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Cache configuration, loaded from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go nowhere when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Disk cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Memory tier configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Disk tier configuration.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Memory tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of decoded images kept in memory.
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,

    /// Maximum total decoded bytes kept in memory.
    #[serde(default)]
    pub max_cost_bytes: Option<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            max_cost_bytes: None,
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Size above which the least recently accessed files are removed.
    #[serde(default = "default_disk_size")]
    pub max_size_bytes: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_disk_size(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

const fn default_memory_capacity() -> usize {
    DEFAULT_CACHE_SIZE
}

const fn default_disk_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("{}/{}", crate::NAME, crate::VERSION)
}

impl CacheConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(capacity) = args.memory_capacity {
            self.memory.capacity = capacity;
        }
        if let Some(max_cost) = args.memory_max_bytes {
            self.memory.max_cost_bytes = Some(max_cost);
        }
        if let Some(max_size) = args.disk_max_bytes {
            self.disk.max_size_bytes = max_size;
        }
        if let Some(timeout) = args.timeout_secs {
            self.network.timeout_secs = timeout;
        }
    }

    /// Replaces limits that would leave a tier unusable with working values.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.memory.capacity == 0 {
            warn!("memory.capacity must be at least 1, using 1");
            self.memory.capacity = 1;
        }
        if self.memory.max_cost_bytes == Some(0) {
            warn!("memory.max_cost_bytes of 0 would evict everything, ignoring it");
            self.memory.max_cost_bytes = None;
        }
        if self.network.timeout_secs == 0 {
            warn!(
                default = default_timeout_secs(),
                "network.timeout_secs must be positive, using default"
            );
            self.network.timeout_secs = default_timeout_secs();
        }
        self
    }

    /// Anchors relative `cache_dir` and `log_path` at `base`.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        for path in [&mut self.cache_dir, &mut self.log_path].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Returns the effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(dirs_cache_path)
    }

    /// Returns the effective log file path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone()
    }
}
