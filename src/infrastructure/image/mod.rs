//! Image caching infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction
//! - Disk caching behind a serial write queue
//! - Download start/stop notifications
//! - The fetch pipeline tying both tiers to the network

pub mod cache;
pub mod codec;
pub mod completion;
pub mod disk_cache;
pub mod http_fetcher;
pub mod memory_cache;
pub mod notifier;
pub mod write_queue;

pub use cache::{ImageCache, ImageCacheBuilder, ImageCacheStats};
pub use codec::ImageRsCodec;
pub use completion::{Completion, CompletionCallback};
pub use disk_cache::DiskImageCache;
pub use http_fetcher::HttpImageFetcher;
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use notifier::{DownloadGuard, DownloadNotifier, LoggingObserver, SubscriptionId};
pub use write_queue::{BlockingOperation, BytesProducer, DiskOperation, DiskWriteQueue};
