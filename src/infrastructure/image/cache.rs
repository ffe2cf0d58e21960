//! Tiered image cache orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage, ImageSource, LoadedImage};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{
    DownloadObserver, ImageCacheDelegate, ImageCachePort, ImageCodecPort, ImageFetcherPort,
};
use crate::infrastructure::config::CacheConfig;

use super::codec::ImageRsCodec;
use super::completion::Completion;
use super::disk_cache::DiskImageCache;
use super::http_fetcher::HttpImageFetcher;
use super::memory_cache::MemoryImageCache;
use super::notifier::{DownloadGuard, DownloadNotifier, SubscriptionId};
use super::write_queue::DiskOperation;

/// Two-tier (memory + disk) cache for images fetched over the network.
///
/// Construct one per process and share it as `Arc<ImageCache>`. Background
/// work runs on the tokio runtime the cache was built on, so the public
/// fetch calls may be made from any thread.
pub struct ImageCache {
    pipeline: Arc<Pipeline>,
    runtime: Handle,
}

/// The collaborators each background fetch task needs.
struct Pipeline {
    memory: Arc<dyn ImageCachePort>,
    disk: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    codec: Arc<dyn ImageCodecPort>,
    notifier: Arc<DownloadNotifier>,
}

/// Builds an [`ImageCache`], substituting any collaborator.
pub struct ImageCacheBuilder {
    config: CacheConfig,
    cache_dir: Option<PathBuf>,
    memory: Option<Arc<dyn ImageCachePort>>,
    fetcher: Option<Arc<dyn ImageFetcherPort>>,
    codec: Option<Arc<dyn ImageCodecPort>>,
}

impl ImageCacheBuilder {
    /// Starts from configuration; defaults are used for every collaborator.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            cache_dir: None,
            memory: None,
            fetcher: None,
            codec: None,
        }
    }

    /// Overrides the disk cache directory.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Uses a custom memory store.
    #[must_use]
    pub fn memory_store(mut self, memory: Arc<dyn ImageCachePort>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Uses a custom network transport.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ImageFetcherPort>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Uses a custom codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn ImageCodecPort>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Opens the disk tier and starts its write queue.
    ///
    /// # Errors
    /// Returns [`CacheError::NoRuntime`] when not polled inside a tokio
    /// runtime, or an error if the cache directory or HTTP client cannot be
    /// created.
    pub async fn build(self) -> CacheResult<ImageCache> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let cache_dir = self
            .cache_dir
            .unwrap_or_else(|| self.config.effective_cache_dir());
        let disk = Arc::new(DiskImageCache::new(cache_dir, self.config.disk.max_size_bytes).await?);

        let memory = match self.memory {
            Some(memory) => memory,
            None => Arc::new(MemoryImageCache::from_config(&self.config.memory)),
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpImageFetcher::new(&self.config.network)?),
        };
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(ImageRsCodec::new()));

        info!(dir = %disk.cache_dir().display(), "Image cache ready");

        Ok(ImageCache {
            pipeline: Arc::new(Pipeline {
                memory,
                disk,
                fetcher,
                codec,
                notifier: Arc::new(DownloadNotifier::new()),
            }),
            runtime,
        })
    }
}

impl ImageCache {
    /// Creates a cache with default collaborators.
    ///
    /// # Errors
    /// Returns error if the cache directory or HTTP client cannot be created.
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        ImageCacheBuilder::new(config).build().await
    }

    /// Starts building a cache with custom collaborators.
    #[must_use]
    pub fn builder(config: CacheConfig) -> ImageCacheBuilder {
        ImageCacheBuilder::new(config)
    }

    /// Requests an image and reports the result to `on_complete`.
    ///
    /// A memory hit calls `on_complete` before this returns, on the calling
    /// thread. Otherwise disk and network are consulted on a background task
    /// and `on_complete` runs there, exactly once, with `None` on failure.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] without calling `on_complete` if the
    /// URL is unusable as a key.
    pub fn fetch<F>(&self, url: &str, on_complete: F) -> CacheResult<()>
    where
        F: FnOnce(Option<CachedImage>) + Send + 'static,
    {
        self.dispatch(url, Completion::callback(on_complete))
    }

    /// Same as [`fetch`](Self::fetch) but reports to a delegate.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] without notifying the delegate if
    /// the URL is unusable as a key.
    pub fn fetch_with_delegate(
        &self,
        url: &str,
        delegate: Arc<dyn ImageCacheDelegate>,
    ) -> CacheResult<()> {
        self.dispatch(url, Completion::delegate(delegate))
    }

    fn dispatch(&self, url: &str, completion: Completion) -> CacheResult<()> {
        let key = CacheKey::parse(url)?;

        if let Some(image) = self.pipeline.memory.get(&key) {
            completion.deliver(&key, Some(image));
            return Ok(());
        }

        let pipeline = self.pipeline.clone();
        self.runtime.spawn(async move {
            let resolving = {
                let key = key.clone();
                tokio::spawn(async move { pipeline.resolve_below_memory(&key).await })
            };
            let image = match resolving.await {
                Ok(Ok(loaded)) => Some(loaded.image),
                Ok(Err(e)) => {
                    debug!(url = %key, error = %e, "Image unavailable");
                    None
                }
                Err(e) => {
                    error!(url = %key, error = %e, "Image fetch task failed");
                    None
                }
            };
            completion.deliver(&key, image);
        });
        Ok(())
    }

    /// Resolves an image through every tier and reports where it came from.
    ///
    /// # Errors
    /// Returns the network or decode error if no tier could supply the image.
    pub async fn load(&self, url: &str) -> CacheResult<LoadedImage> {
        let key = CacheKey::parse(url)?;
        self.pipeline.resolve(&key).await
    }

    /// Reads and decodes an image from disk on the calling thread, never
    /// touching the network or the memory tier.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] if the URL is unusable as a key.
    pub fn fetch_from_disk_only(&self, url: &str) -> CacheResult<Option<CachedImage>> {
        let key = CacheKey::parse(url)?;
        let Some(bytes) = self.pipeline.disk.read(&key) else {
            return Ok(None);
        };
        match self.pipeline.codec.decode(&bytes) {
            Ok(image) => Ok(Some(Arc::new(image))),
            Err(e) => {
                warn!(url = %key, error = %e, "Discarding undecodable disk entry");
                self.pipeline.disk.discard(&key, Bytes::from(bytes));
                Ok(None)
            }
        }
    }

    /// Stores an image the caller already has. Memory is updated immediately;
    /// the PNG encoding and disk write happen on the disk queue.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] for an unusable URL, or
    /// [`CacheError::QueueClosed`] if the disk queue has stopped.
    pub fn set(&self, url: &str, image: CachedImage) -> CacheResult<()> {
        let key = CacheKey::parse(url)?;
        self.pipeline.memory.set(key.clone(), image.clone());

        let codec = self.pipeline.codec.clone();
        self.pipeline
            .disk
            .write_with(&key, Box::new(move || codec.encode(&image)))
    }

    /// Evicts an image from both tiers.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidUrl`] if the URL is unusable as a key.
    pub fn remove(&self, url: &str) -> CacheResult<()> {
        let key = CacheKey::parse(url)?;
        self.pipeline.memory.remove(&key);
        self.pipeline.disk.remove(&key);
        Ok(())
    }

    /// Queues a raw write to an arbitrary path on the disk queue.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the disk queue has stopped.
    pub fn write_bytes(&self, bytes: Bytes, path: impl Into<PathBuf>) -> CacheResult<()> {
        self.pipeline.disk.queue().write_bytes(bytes, path.into())
    }

    /// Queues custom blocking disk work behind every pending write.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the disk queue has stopped.
    pub fn submit_disk_operation<F>(&self, op: F) -> CacheResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pipeline.disk.queue().submit(DiskOperation::Custom(Box::new(op)))
    }

    /// Waits until every disk operation queued so far has run.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the disk queue has stopped.
    pub async fn flush(&self) -> CacheResult<()> {
        self.pipeline.disk.flush().await
    }

    /// Clears both tiers.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the disk queue has stopped.
    pub async fn clear(&self) -> CacheResult<()> {
        self.pipeline.memory.clear();
        self.pipeline.disk.clear().await?;
        info!("Cleared all image caches");
        Ok(())
    }

    /// Returns the download notification bus.
    #[must_use]
    pub fn notifier(&self) -> &Arc<DownloadNotifier> {
        &self.pipeline.notifier
    }

    /// Registers a download observer.
    pub fn subscribe(&self, observer: Arc<dyn DownloadObserver>) -> SubscriptionId {
        self.pipeline.notifier.subscribe(observer)
    }

    /// Returns the disk tier.
    #[must_use]
    pub fn disk(&self) -> &DiskImageCache {
        &self.pipeline.disk
    }

    /// Returns a snapshot of cache occupancy.
    #[must_use]
    pub fn stats(&self) -> ImageCacheStats {
        ImageCacheStats {
            memory_entries: self.pipeline.memory.len(),
            disk_entries: self.pipeline.disk.len(),
            disk_bytes: self.pipeline.disk.current_size(),
            disk_write_failures: self.pipeline.disk.write_failures(),
            active_downloads: self.pipeline.notifier.active_downloads(),
        }
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("disk", &self.pipeline.disk)
            .field("notifier", &self.pipeline.notifier)
            .finish_non_exhaustive()
    }
}

/// Occupancy snapshot returned by [`ImageCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCacheStats {
    /// Images held in memory.
    pub memory_entries: usize,
    /// Files held on disk.
    pub disk_entries: usize,
    /// Bytes held on disk.
    pub disk_bytes: u64,
    /// Disk writes that failed since startup.
    pub disk_write_failures: u64,
    /// Network downloads in flight.
    pub active_downloads: usize,
}

impl std::fmt::Display for ImageCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} in memory, {} on disk ({} bytes, {} failed writes), {} downloading",
            self.memory_entries,
            self.disk_entries,
            self.disk_bytes,
            self.disk_write_failures,
            self.active_downloads
        )
    }
}

impl Pipeline {
    async fn resolve(&self, key: &CacheKey) -> CacheResult<LoadedImage> {
        if let Some(image) = self.memory.get(key) {
            return Ok(LoadedImage::new(key.clone(), image, ImageSource::MemoryCache));
        }
        self.resolve_below_memory(key).await
    }

    /// Disk then network, for callers that already missed in memory.
    async fn resolve_below_memory(&self, key: &CacheKey) -> CacheResult<LoadedImage> {
        if let Some(image) = self.load_from_disk(key).await {
            self.memory.set(key.clone(), image.clone());
            return Ok(LoadedImage::new(key.clone(), image, ImageSource::DiskCache));
        }

        self.download(key).await
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<CachedImage> {
        let bytes = Bytes::from(self.disk.read_async(key).await?);
        match self.decode(bytes.clone()).await {
            Ok(image) => {
                debug!(url = %key, "Decoded image from disk cache");
                Some(image)
            }
            Err(e) => {
                warn!(url = %key, error = %e, "Discarding undecodable disk entry");
                self.disk.discard(key, bytes);
                None
            }
        }
    }

    async fn download(&self, key: &CacheKey) -> CacheResult<LoadedImage> {
        let _download = DownloadGuard::begin(self.notifier.clone(), key.clone());
        debug!(url = %key, "Downloading image from network");

        let bytes = self.fetcher.fetch(key.as_str()).await?;
        let image = self.decode(bytes.clone()).await?;

        self.memory.set(key.clone(), image.clone());
        if let Err(e) = self.disk.write(key, bytes) {
            warn!(url = %key, error = %e, "Failed to queue disk write");
        }

        trace!(url = %key, source = "network", "Image loaded successfully");
        Ok(LoadedImage::new(key.clone(), image, ImageSource::Network))
    }

    async fn decode<B>(&self, bytes: B) -> CacheResult<CachedImage>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || codec.decode(bytes.as_ref()))
            .await
            .map_err(|e| CacheError::decode(format!("Decode task panicked: {e}")))?
            .map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DownloadEvent, DownloadPhase};
    use crate::domain::ports::mocks::{MockImageFetcherPort, RecordingObserver};
    use std::future::Future;
    use std::pin::pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll, Waker};
    use tempfile::TempDir;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    const URL: &str = "https://x/a.png";

    fn png_bytes(side: u32) -> Bytes {
        let img = image::DynamicImage::new_rgb8(side, side);
        Bytes::from(ImageRsCodec::new().encode(&img).unwrap())
    }

    fn serving(bytes: Bytes, times: usize) -> MockImageFetcherPort {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_fetch()
            .times(times)
            .returning(move |_| Ok(bytes.clone()));
        fetcher
    }

    fn offline() -> MockImageFetcherPort {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher.expect_fetch().never();
        fetcher
    }

    fn not_found(times: usize) -> MockImageFetcherPort {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_fetch()
            .times(times)
            .returning(|url: &str| Err(CacheError::not_found(url)));
        fetcher
    }

    fn unreachable(times: usize) -> MockImageFetcherPort {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_fetch()
            .times(times)
            .returning(|_| Err(CacheError::network("Request failed: connection refused")));
        fetcher
    }

    /// Delegate that hands its first delivery to a oneshot and counts calls.
    struct ChannelDelegate {
        tx: Mutex<Option<oneshot::Sender<(CacheKey, Option<CachedImage>)>>>,
        calls: AtomicUsize,
    }

    impl ChannelDelegate {
        fn new() -> (Arc<Self>, oneshot::Receiver<(CacheKey, Option<CachedImage>)>) {
            let (tx, rx) = oneshot::channel();
            let delegate = Arc::new(Self {
                tx: Mutex::new(Some(tx)),
                calls: AtomicUsize::new(0),
            });
            (delegate, rx)
        }
    }

    impl ImageCacheDelegate for ChannelDelegate {
        fn did_load_image(&self, url: &CacheKey, image: Option<CachedImage>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = self.tx.lock().unwrap().take() {
                let _ = tx.send((url.clone(), image));
            }
        }
    }

    struct Harness {
        cache: ImageCache,
        memory: Arc<MemoryImageCache>,
        events: Arc<RecordingObserver>,
        dir: TempDir,
    }

    async fn harness_in(dir: TempDir, fetcher: MockImageFetcherPort) -> Harness {
        let memory = Arc::new(MemoryImageCache::new(16));
        let cache = ImageCache::builder(CacheConfig::default())
            .cache_dir(dir.path())
            .memory_store(memory.clone())
            .fetcher(Arc::new(fetcher))
            .build()
            .await
            .unwrap();
        let events = Arc::new(RecordingObserver::new());
        cache.subscribe(events.clone());
        Harness {
            cache,
            memory,
            events,
            dir,
        }
    }

    async fn harness(fetcher: MockImageFetcherPort) -> Harness {
        harness_in(TempDir::new().unwrap(), fetcher).await
    }

    /// Issues a fetch and waits for its single delivery, also reporting how
    /// many download events had been published when the callback ran.
    async fn fetch_and_wait(h: &Harness, url: &str) -> (Option<CachedImage>, usize) {
        let (tx, rx) = oneshot::channel();
        let events = h.events.clone();
        h.cache
            .fetch(url, move |image| {
                let _ = tx.send((image, events.count()));
            })
            .unwrap();
        rx.await.unwrap()
    }

    /// Issues a fetch without awaiting it, so several can be in flight.
    fn fetch_pending(h: &Harness) -> oneshot::Receiver<Option<CachedImage>> {
        let (tx, rx) = oneshot::channel();
        h.cache
            .fetch(URL, move |image| {
                let _ = tx.send(image);
            })
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_set_then_fetch_hits_memory_without_network() {
        let h = harness(offline()).await;
        let img = Arc::new(image::DynamicImage::new_rgb8(3, 3));

        h.cache.set(URL, img.clone()).unwrap();

        let delivered = Arc::new(Mutex::new(None));
        let slot = delivered.clone();
        h.cache
            .fetch(URL, move |image| *slot.lock().unwrap() = Some(image))
            .unwrap();

        // Memory hits are delivered before fetch returns.
        let image = delivered.lock().unwrap().take().flatten().unwrap();
        assert!(Arc::ptr_eq(&image, &img));
        assert_eq!(h.events.count(), 0);
    }

    #[tokio::test]
    async fn test_disk_hit_populates_memory_without_events() {
        let h = harness(offline()).await;
        let key = CacheKey::parse(URL).unwrap();
        h.cache.disk().write(&key, png_bytes(5)).unwrap();
        h.cache.flush().await.unwrap();
        assert!(h.memory.peek(&key).is_none());

        let (image, events_seen) = fetch_and_wait(&h, URL).await;

        assert_eq!(image.unwrap().width(), 5);
        assert_eq!(events_seen, 0);
        assert_eq!(h.events.count(), 0);
        assert!(h.memory.peek(&key).is_some());
    }

    #[tokio::test]
    async fn test_network_fetch_brackets_with_events_before_callback() {
        let h = harness(serving(png_bytes(4), 1)).await;

        let (image, events_seen) = fetch_and_wait(&h, URL).await;

        assert_eq!(image.unwrap().width(), 4);
        assert_eq!(events_seen, 2);
        let url = CacheKey::parse(URL).unwrap();
        assert_eq!(
            h.events.events(),
            vec![DownloadEvent::started(url.clone()), DownloadEvent::stopped(url)]
        );
        assert_eq!(h.cache.notifier().active_downloads(), 0);
    }

    #[tokio::test]
    async fn test_network_result_populates_both_tiers() {
        let h = harness(serving(png_bytes(4), 1)).await;

        let (image, _) = fetch_and_wait(&h, URL).await;
        assert!(image.is_some());
        h.cache.flush().await.unwrap();

        let key = CacheKey::parse(URL).unwrap();
        assert!(h.memory.peek(&key).is_some());
        let from_disk = h.cache.fetch_from_disk_only(URL).unwrap().unwrap();
        assert_eq!(from_disk.width(), 4);

        // Second fetch is a memory hit: the mock allows only one network call.
        let (again, _) = fetch_and_wait(&h, URL).await;
        assert!(again.is_some());
        assert_eq!(h.events.count(), 2);
    }

    #[tokio::test]
    async fn test_not_found_delivers_absent_and_caches_nothing() {
        let h = harness(not_found(1)).await;
        let url = "https://x/missing.png";

        let (image, events_seen) = fetch_and_wait(&h, url).await;
        h.cache.flush().await.unwrap();

        assert!(image.is_none());
        assert_eq!(events_seen, 2);
        let key = CacheKey::parse(url).unwrap();
        assert!(h.memory.peek(&key).is_none());
        assert!(h.cache.disk().read(&key).is_none());
        assert_eq!(h.events.events()[1].phase, DownloadPhase::Stopped);
    }

    #[tokio::test]
    async fn test_decode_failure_is_never_persisted() {
        let h = harness(serving(Bytes::from_static(b"<html>oops</html>"), 1)).await;

        let (image, events_seen) = fetch_and_wait(&h, URL).await;
        h.cache.flush().await.unwrap();

        assert!(image.is_none());
        assert_eq!(events_seen, 2);
        assert!(h.cache.fetch_from_disk_only(URL).unwrap().is_none());
        assert_eq!(h.cache.stats().disk_entries, 0);
        assert_eq!(h.cache.stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn test_remove_forces_network() {
        let h = harness(serving(png_bytes(4), 2)).await;

        assert!(fetch_and_wait(&h, URL).await.0.is_some());
        h.cache.flush().await.unwrap();

        h.cache.remove(URL).unwrap();
        assert!(h.cache.fetch_from_disk_only(URL).unwrap().is_none());

        let (image, _) = fetch_and_wait(&h, URL).await;
        assert!(image.is_some());
        assert_eq!(h.events.count(), 4);
    }

    #[tokio::test]
    async fn test_set_then_disk_only_after_flush() {
        let h = harness(offline()).await;
        let img = Arc::new(image::DynamicImage::new_rgb8(6, 2));

        h.cache.set(URL, img).unwrap();
        // Before the queue drains the file may or may not exist; both are valid.
        let _ = h.cache.fetch_from_disk_only(URL).unwrap();

        h.cache.flush().await.unwrap();
        let from_disk = h.cache.fetch_from_disk_only(URL).unwrap().unwrap();
        assert_eq!((from_disk.width(), from_disk.height()), (6, 2));
    }

    #[tokio::test]
    async fn test_disk_only_never_touches_memory() {
        let h = harness(offline()).await;
        let key = CacheKey::parse(URL).unwrap();
        h.cache.disk().write(&key, png_bytes(2)).unwrap();
        h.cache.flush().await.unwrap();

        assert!(h.cache.fetch_from_disk_only(URL).unwrap().is_some());
        assert!(h.memory.peek(&key).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_falls_back_to_network() {
        let h = harness(serving(png_bytes(3), 1)).await;
        let key = CacheKey::parse(URL).unwrap();
        h.cache
            .disk()
            .write(&key, Bytes::from_static(b"truncated"))
            .unwrap();
        h.cache.flush().await.unwrap();

        let (image, events_seen) = fetch_and_wait(&h, URL).await;
        h.cache.flush().await.unwrap();

        assert_eq!(image.unwrap().width(), 3);
        assert_eq!(events_seen, 2);
        // The discarded entry is replaced by the downloaded one, not deleted.
        let from_disk = h.cache.fetch_from_disk_only(URL).unwrap().unwrap();
        assert_eq!(from_disk.width(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_entry_discard_keeps_pending_set() {
        let h = harness(offline()).await;
        let key = CacheKey::parse(URL).unwrap();
        h.cache
            .disk()
            .write(&key, Bytes::from_static(b"corrupt"))
            .unwrap();
        h.cache.flush().await.unwrap();

        // Hold the queue so the set() below is still pending during the read.
        let (release, hold) = std::sync::mpsc::channel::<()>();
        h.cache
            .submit_disk_operation(move || {
                let _ = hold.recv();
            })
            .unwrap();
        h.cache
            .set(URL, Arc::new(image::DynamicImage::new_rgb8(6, 2)))
            .unwrap();

        assert!(h.cache.fetch_from_disk_only(URL).unwrap().is_none());

        release.send(()).unwrap();
        h.cache.flush().await.unwrap();

        let from_disk = h.cache.fetch_from_disk_only(URL).unwrap().unwrap();
        assert_eq!((from_disk.width(), from_disk.height()), (6, 2));
    }

    #[tokio::test]
    async fn test_disk_write_failure_never_reaches_caller() {
        let h = harness(serving(png_bytes(4), 1)).await;
        let key = CacheKey::parse(URL).unwrap();
        // A directory where the entry should go makes the final rename fail.
        std::fs::create_dir(h.cache.disk().path_for(&key)).unwrap();

        let (image, _) = fetch_and_wait(&h, URL).await;
        h.cache.flush().await.unwrap();

        assert_eq!(image.unwrap().width(), 4);
        assert_eq!(h.cache.disk().write_failures(), 1);
        assert_eq!(h.cache.stats().disk_write_failures, 1);
        assert!(h.memory.peek(&key).is_some());
    }

    #[tokio::test]
    async fn test_miss_counts_one_memory_lookup() {
        let h = harness(not_found(1)).await;

        let (image, _) = fetch_and_wait(&h, URL).await;

        assert!(image.is_none());
        let stats = h.memory.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_panicking_observer_still_delivers_once() {
        let h = harness(serving(png_bytes(4), 1)).await;
        h.cache.subscribe(Arc::new(|event: &DownloadEvent| {
            assert!(!event.is_started(), "observer failure");
        }));

        let (image, _) = fetch_and_wait(&h, URL).await;

        assert!(image.is_none());
        assert_eq!(h.cache.notifier().active_downloads(), 0);
        assert_eq!(h.events.events().last().map(|e| e.phase), Some(DownloadPhase::Stopped));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let dir = TempDir::new().unwrap();
        let mut build = pin!(ImageCache::builder(CacheConfig::default())
            .cache_dir(dir.path())
            .build());
        let mut cx = Context::from_waker(Waker::noop());

        match build.as_mut().poll(&mut cx) {
            Poll::Ready(Err(CacheError::NoRuntime)) => {}
            other => panic!("expected NoRuntime, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delegate_called_once() {
        let h = harness(serving(png_bytes(4), 1)).await;
        let (delegate, rx) = ChannelDelegate::new();

        h.cache.fetch_with_delegate(URL, delegate.clone()).unwrap();
        let (url, image) = rx.await.unwrap();
        h.cache.flush().await.unwrap();

        assert_eq!(url.as_str(), URL);
        assert!(image.is_some());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delegate_receives_absent_result() {
        let h = harness(not_found(1)).await;
        let (delegate, rx) = ChannelDelegate::new();

        h.cache
            .fetch_with_delegate("https://x/missing.png", delegate.clone())
            .unwrap();
        let (url, image) = rx.await.unwrap();

        assert_eq!(url.as_str(), "https://x/missing.png");
        assert!(image.is_none());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_fast_without_callback() {
        let h = harness(offline()).await;
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();

        let result = h.cache.fetch("", move |_| *flag.lock().unwrap() = true);

        assert!(matches!(result, Err(CacheError::InvalidUrl { .. })));
        assert!(!*called.lock().unwrap());
        assert_err!(h.cache.set("  ", Arc::new(image::DynamicImage::new_rgb8(1, 1))));
        assert_err!(h.cache.fetch_from_disk_only(""));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_independent() {
        let h = harness(serving(png_bytes(4), 2)).await;

        let first = fetch_pending(&h);
        let second = fetch_pending(&h);
        let (a, b) = (first.await.unwrap(), second.await.unwrap());

        assert!(a.is_some() && b.is_some());
        let started = h
            .events
            .events()
            .iter()
            .filter(|e| e.is_started())
            .count();
        assert_eq!(started, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_from_non_runtime_thread() {
        let h = harness(serving(png_bytes(4), 1)).await;
        let cache = Arc::new(h.cache);
        let (tx, rx) = oneshot::channel();

        let issuer = cache.clone();
        std::thread::spawn(move || {
            issuer
                .fetch(URL, move |image| {
                    let _ = tx.send(image.is_some());
                })
                .unwrap();
        })
        .join()
        .unwrap();

        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_disk_operations_share_the_queue() {
        let h = harness(offline()).await;
        let path = h.dir.path().join("notes.bin");
        let observed = Arc::new(Mutex::new(None));

        assert_ok!(h.cache.write_bytes(Bytes::from_static(b"abc"), path.clone()));
        {
            let (path, observed) = (path.clone(), observed.clone());
            assert_ok!(h.cache.submit_disk_operation(move || {
                *observed.lock().unwrap() = std::fs::read(&path).ok();
            }));
        }
        h.cache.flush().await.unwrap();

        assert_eq!(observed.lock().unwrap().as_deref(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn test_load_reports_source() {
        let h = harness(serving(png_bytes(4), 1)).await;

        let first = h.cache.load(URL).await.unwrap();
        assert_eq!(first.source, ImageSource::Network);

        let second = h.cache.load(URL).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);

        h.cache.flush().await.unwrap();
        h.memory.clear();
        let third = h.cache.load(URL).await.unwrap();
        assert_eq!(third.source, ImageSource::DiskCache);
    }

    #[tokio::test]
    async fn test_load_surfaces_network_error() {
        let h = harness(unreachable(1)).await;

        let err = h.cache.load(URL).await.unwrap_err();
        assert!(matches!(err, CacheError::Network { .. }));
        assert!(err.is_absent());
    }

    #[tokio::test]
    async fn test_load_surfaces_not_found() {
        let h = harness(not_found(1)).await;

        let err = h.cache.load(URL).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { ref key } if key == URL));
        assert!(err.is_absent());
    }

    #[tokio::test]
    async fn test_clear_empties_both_tiers() {
        let h = harness(serving(png_bytes(4), 1)).await;
        assert!(fetch_and_wait(&h, URL).await.0.is_some());
        h.cache.flush().await.unwrap();

        h.cache.clear().await.unwrap();

        let stats = h.cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.disk_entries, 0);
        assert!(h.cache.fetch_from_disk_only(URL).unwrap().is_none());
    }
}
