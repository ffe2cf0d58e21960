//! Cache configuration.

pub mod args;
pub mod cache_config;
pub mod storage;

pub use args::{CliArgs, Command};
pub use cache_config::{CacheConfig, DiskConfig, LogLevel, MemoryConfig, NetworkConfig};
pub use storage::{ConfigError, StorageManager};
