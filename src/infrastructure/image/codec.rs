//! Image codec backed by the `image` crate.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageCodecPort;

/// Decodes any format the `image` crate was built with and encodes to PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRsCodec;

impl ImageRsCodec {
    /// Creates a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ImageCodecPort for ImageRsCodec {
    fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| CacheError::decode(format!("Failed to decode image: {e}")))
    }

    fn encode(&self, image: &DynamicImage) -> CacheResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| CacheError::encode(format!("Failed to encode image: {e}")))?;
        Ok(buf.into_inner())
    }
}
