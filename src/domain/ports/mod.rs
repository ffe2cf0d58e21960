mod codec_port;
mod delegate_port;
mod download_observer_port;
mod fetcher_port;
mod image_cache_port;

pub use codec_port::ImageCodecPort;
pub use delegate_port::ImageCacheDelegate;
pub use download_observer_port::DownloadObserver;
pub use fetcher_port::ImageFetcherPort;
pub use image_cache_port::ImageCachePort;
