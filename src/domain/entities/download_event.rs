//! Download notifications broadcast while the network tier is active.

use super::CacheKey;

/// Phase of a network download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    /// The network fetch is about to start.
    Started,
    /// The network fetch finished, successfully or not.
    Stopped,
}

impl std::fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Ephemeral notification about a network download. Not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    /// The URL being downloaded.
    pub url: CacheKey,
    /// Whether the download started or stopped.
    pub phase: DownloadPhase,
}

impl DownloadEvent {
    /// Creates a `Started` event.
    #[must_use]
    pub const fn started(url: CacheKey) -> Self {
        Self {
            url,
            phase: DownloadPhase::Started,
        }
    }

    /// Creates a `Stopped` event.
    #[must_use]
    pub const fn stopped(url: CacheKey) -> Self {
        Self {
            url,
            phase: DownloadPhase::Stopped,
        }
    }

    /// Returns true for `Started` events.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self.phase, DownloadPhase::Started)
    }
}
