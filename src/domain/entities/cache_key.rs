//! Cache key derived from an image URL.

use sha2::{Digest, Sha256};

use crate::domain::errors::{CacheError, CacheResult};

/// Extension used for cached image files on disk.
pub const CACHE_FILE_EXTENSION: &str = "img";

/// Canonical identifier for a cached image.
///
/// The URL is kept verbatim and used as the memory-store key. The disk file
/// name is the hex SHA-256 of the URL, so a hostile URL can never inject path
/// separators or traverse out of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from a URL.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] if the URL is empty, whitespace only,
    /// or contains a NUL byte.
    pub fn parse(url: impl Into<String>) -> CacheResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(CacheError::invalid_url("url is empty"));
        }
        if url.contains('\0') {
            return Err(CacheError::invalid_url("url contains a NUL byte"));
        }
        Ok(Self(url))
    }

    /// Returns the URL this key was built from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the lowercase hex SHA-256 digest of the URL.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the file name under which this key is stored on disk.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{CACHE_FILE_EXTENSION}", self.digest())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = CacheError;

    fn try_from(s: &str) -> CacheResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(s: String) -> CacheResult<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
