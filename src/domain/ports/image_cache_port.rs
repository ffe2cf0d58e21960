//! Port definition for the memory tier.

use crate::domain::entities::{CacheKey, CachedImage};

/// Port for a bounded in-process image store.
///
/// Implementations own their eviction policy and internal locking. Calls are
/// synchronous so a hit can be answered on the caller's thread. A miss says
/// nothing about the disk or network tiers.
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the store.
    fn get(&self, key: &CacheKey) -> Option<CachedImage>;

    /// Stores an image, possibly evicting others.
    fn set(&self, key: CacheKey, image: CachedImage);

    /// Removes an image from the store.
    fn remove(&self, key: &CacheKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the store.
    fn clear(&self);
}
