//! In-memory LRU image cache implementation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::ports::ImageCachePort;
use crate::infrastructure::config::MemoryConfig;

/// Default maximum number of images to cache in memory.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// In-memory LRU cache for decoded images.
///
/// Bounded by entry count and, optionally, by the total decoded size of the
/// images it holds. Whichever limit is hit first evicts least recently used
/// entries.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    max_cost: Option<u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Inner {
    entries: LruCache<CacheKey, CachedImage>,
    cost: u64,
}

/// Returns the decoded size of an image in bytes.
fn image_cost(image: &image::DynamicImage) -> u64 {
    image.as_bytes().len() as u64
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity and no cost limit.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_cost_limit(capacity, None)
    }

    /// Creates a new cache bounded by entry count and total decoded bytes.
    #[must_use]
    pub fn with_cost_limit(capacity: usize, max_cost: Option<u64>) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                cost: 0,
            }),
            max_cost,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache from configuration.
    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::with_cost_limit(config.capacity, config.max_cost_bytes)
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            cost: inner.cost,
        }
    }

    /// Peeks at an image without promoting it in the LRU or touching stats.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedImage> {
        self.inner.lock().entries.peek(key).cloned()
    }

    /// Returns the total decoded size of the cached images in bytes.
    pub fn cost(&self) -> u64 {
        self.inner.lock().cost
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("max_cost", &self.max_cost)
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Total decoded bytes held.
    pub cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.hit_rate, self.hits, self.misses
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.inner.lock();
        if let Some(img) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(url = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(url = %key, "Memory cache miss");
            None
        }
    }

    fn set(&self, key: CacheKey, image: CachedImage) {
        let mut inner = self.inner.lock();
        debug!(url = %key, "Storing image in memory cache");
        inner.cost += image_cost(&image);
        if let Some((_, displaced)) = inner.entries.push(key, image) {
            inner.cost -= image_cost(&displaced);
        }

        let Some(max_cost) = self.max_cost else {
            return;
        };
        // The newest entry always stays, even if it alone exceeds the limit.
        while inner.cost > max_cost && inner.entries.len() > 1 {
            let Some((evicted, img)) = inner.entries.pop_lru() else {
                break;
            };
            inner.cost -= image_cost(&img);
            trace!(url = %evicted, "Evicted image over memory cost limit");
        }
    }

    fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(img) = inner.entries.pop(key) {
            inner.cost -= image_cost(&img);
            debug!(url = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.cost = 0;
        debug!("Cleared memory image cache");
    }
}
