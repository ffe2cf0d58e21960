//! Port for turning raw bytes into images and back.

use crate::domain::errors::CacheResult;

/// Decodes fetched bytes and encodes caller-supplied images for persistence.
///
/// Both calls are CPU bound; the cache runs them off async worker threads.
pub trait ImageCodecPort: Send + Sync {
    /// Decodes raw bytes into an image.
    ///
    /// # Errors
    /// Returns [`CacheError::Decode`](crate::domain::errors::CacheError::Decode)
    /// if the bytes are not a supported image.
    fn decode(&self, bytes: &[u8]) -> CacheResult<image::DynamicImage>;

    /// Encodes an image into bytes suitable for the disk tier.
    ///
    /// # Errors
    /// Returns [`CacheError::Encode`](crate::domain::errors::CacheError::Encode)
    /// if the image cannot be encoded.
    fn encode(&self, image: &image::DynamicImage) -> CacheResult<Vec<u8>>;
}
