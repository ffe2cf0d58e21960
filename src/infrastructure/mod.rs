//! Infrastructure layer with storage, network and configuration adapters.

/// Cache configuration.
pub mod config;
/// Image caching (memory, disk, network pipeline).
pub mod image;

pub use config::{CacheConfig, CliArgs, Command, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskImageCache, DownloadNotifier, HttpImageFetcher, ImageCache, ImageCacheBuilder,
    ImageCacheStats, ImageRsCodec, LoggingObserver, MemoryImageCache,
};
