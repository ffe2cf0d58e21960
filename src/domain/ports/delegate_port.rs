//! Observer-style delivery of fetch results.

use crate::domain::entities::{CacheKey, CachedImage};

/// Receives the result of a fetch issued with a delegate instead of a closure.
///
/// Called exactly once per fetch, on the thread that finished the work.
pub trait ImageCacheDelegate: Send + Sync {
    /// Called with the image, or `None` when it could not be loaded.
    fn did_load_image(&self, url: &CacheKey, image: Option<CachedImage>);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Delegate that records every delivery.
    #[derive(Default)]
    pub struct RecordingDelegate {
        pub deliveries: Mutex<Vec<(CacheKey, Option<CachedImage>)>>,
    }

    impl RecordingDelegate {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count(&self) -> usize {
            self.deliveries.lock().unwrap().len()
        }
    }

    impl ImageCacheDelegate for RecordingDelegate {
        fn did_load_image(&self, url: &CacheKey, image: Option<CachedImage>) {
            self.deliveries.lock().unwrap().push((url.clone(), image));
        }
    }
}
