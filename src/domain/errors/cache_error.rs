//! Cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Cache error variants.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("image not found: {key}")]
    NotFound { key: String },

    #[error("invalid image url: {reason}")]
    InvalidUrl { reason: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("encode error: {message}")]
    Encode { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("disk write queue is closed")]
    QueueClosed,

    #[error("no tokio runtime is running")]
    NoRuntime,
}

impl CacheError {
    /// Creates not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates invalid url error.
    #[must_use]
    pub fn invalid_url(reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            reason: reason.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates encode error.
    #[must_use]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Returns whether the error means "no image" rather than a misuse of the
    /// API. Such errors are delivered to callbacks as an absent result.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Network { .. } | Self::Decode { .. }
        )
    }
}
