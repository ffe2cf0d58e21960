//! Decoded image types shared by every cache tier.

use std::sync::Arc;

use super::CacheKey;

/// A decoded image held by the memory tier.
///
/// Disk never stores this form, only the raw bytes it was decoded from.
pub type CachedImage = Arc<image::DynamicImage>;

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    MemoryCache,
    /// Loaded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A resolved image together with the tier that produced it.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The key the image was requested under.
    pub key: CacheKey,
    /// The decoded image.
    pub image: CachedImage,
    /// Which tier answered the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Creates a new loaded image.
    #[must_use]
    pub const fn new(key: CacheKey, image: CachedImage, source: ImageSource) -> Self {
        Self { key, image, source }
    }
}
