//! Domain entity definitions.

mod cache_key;
mod download_event;
mod image;

pub use cache_key::{CACHE_FILE_EXTENSION, CacheKey};
pub use download_event::{DownloadEvent, DownloadPhase};
pub use image::{CachedImage, ImageSource, LoadedImage};
