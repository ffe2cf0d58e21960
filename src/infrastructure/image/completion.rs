//! One-shot delivery of fetch results.

use std::sync::Arc;

use tracing::trace;

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::ports::ImageCacheDelegate;

/// Boxed one-shot result callback.
pub type CompletionCallback = Box<dyn FnOnce(Option<CachedImage>) + Send + 'static>;

/// Where the result of a single fetch goes.
///
/// [`Completion::deliver`] consumes the value, so a fetch can never report
/// twice.
pub enum Completion {
    /// Closure invoked with the image or `None`.
    Callback(CompletionCallback),
    /// Delegate notified with the URL and the image or `None`.
    Delegate(Arc<dyn ImageCacheDelegate>),
}

impl Completion {
    /// Wraps a closure.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Option<CachedImage>) + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    /// Wraps a delegate.
    #[must_use]
    pub fn delegate(delegate: Arc<dyn ImageCacheDelegate>) -> Self {
        Self::Delegate(delegate)
    }

    /// Hands the result to the caller on the current thread.
    pub fn deliver(self, url: &CacheKey, image: Option<CachedImage>) {
        trace!(url = %url, found = image.is_some(), "Delivering fetch result");
        match self {
            Self::Callback(f) => f(image),
            Self::Delegate(delegate) => delegate.did_load_image(url, image),
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => write!(f, "Completion::Callback"),
            Self::Delegate(_) => write!(f, "Completion::Delegate"),
        }
    }
}
