//! Port for the network tier.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Fetches the raw bytes behind an image URL.
///
/// Timeouts and retries are the implementation's concern; the cache imposes
/// none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Downloads the bytes at `url`.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}
