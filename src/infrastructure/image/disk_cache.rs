//! Disk-based image cache for persistence across sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CACHE_FILE_EXTENSION, CacheKey};
use crate::domain::errors::{CacheError, CacheResult};

use super::write_queue::{BytesProducer, DiskOperation, DiskWriteQueue};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Suffix for files that are still being written.
const PARTIAL_SUFFIX: &str = "partial";

/// Disk-based image cache that persists raw image bytes.
///
/// Reads happen directly on the caller. Writes and removals go through a
/// [`DiskWriteQueue`] so at most one mutation touches the directory at a time.
pub struct DiskImageCache {
    state: Arc<DiskState>,
    queue: DiskWriteQueue,
}

/// Directory bookkeeping shared with the write queue worker.
pub(crate) struct DiskState {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
    write_failures: AtomicU64,
}

fn is_cache_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CACHE_FILE_EXTENSION)
}

impl DiskImageCache {
    /// Creates a new disk cache in the specified directory and starts its
    /// write queue on the current tokio runtime.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::io(format!("Failed to create cache dir: {e}")))?;
        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| CacheError::io(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_cache_file(&path)
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            } else if path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX) {
                // Left behind by a write interrupted before its rename.
                let _ = fs::remove_file(&path).await;
            }
        }

        let state = Arc::new(DiskState {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
            write_failures: AtomicU64::new(0),
        });

        state.cleanup_if_needed().await;

        debug!(
            dir = %state.cache_dir.display(),
            items = count,
            size = total_size,
            "Opened disk cache"
        );

        let queue = DiskWriteQueue::spawn(state.clone());
        Ok(Self { state, queue })
    }

    /// Returns the cache root directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.state.cache_dir
    }

    /// Returns the path for a cached image.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.state.cache_dir.join(key.file_name())
    }

    /// Returns the serialized queue used for every mutation of the directory.
    #[must_use]
    pub const fn queue(&self) -> &DiskWriteQueue {
        &self.queue
    }

    /// Reads raw image bytes synchronously. A missing file is a miss, not an
    /// error.
    #[must_use]
    pub fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => {
                trace!(url = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(url = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(url = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Reads raw image bytes without blocking the runtime.
    pub async fn read_async(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(url = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(url = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(url = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Queues raw bytes to be written for `key`.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub fn write(&self, key: &CacheKey, bytes: Bytes) -> CacheResult<()> {
        self.queue.submit(DiskOperation::Write {
            path: self.path_for(key),
            bytes,
        })
    }

    /// Queues a write whose bytes are produced on the worker, in queue order.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub fn write_with(&self, key: &CacheKey, produce: BytesProducer) -> CacheResult<()> {
        self.queue.submit(DiskOperation::Encode {
            path: self.path_for(key),
            produce,
        })
    }

    /// Removes an image from disk cache.
    ///
    /// The file is deleted immediately, and a second removal is queued behind
    /// any write for the same key that is still pending.
    pub fn remove(&self, key: &CacheKey) {
        let path = self.path_for(key);
        self.state.remove_now(&path);
        if let Err(e) = self.queue.submit(DiskOperation::Remove { path }) {
            warn!(url = %key, error = %e, "Failed to queue disk removal");
        }
    }

    /// Queues deletion of an entry that turned out to be unusable.
    ///
    /// The file is only deleted if it still holds `stale` when the queue
    /// reaches this operation, so a newer write for the same key survives.
    pub fn discard(&self, key: &CacheKey, stale: Bytes) {
        if let Err(e) = self.queue.submit(DiskOperation::Discard {
            path: self.path_for(key),
            stale,
        }) {
            warn!(url = %key, error = %e, "Failed to queue disk discard");
        }
    }

    /// Clears the entire disk cache once every queued operation has run.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub async fn clear(&self) -> CacheResult<()> {
        self.queue.submit(DiskOperation::Clear)?;
        self.queue.flush().await
    }

    /// Waits until every operation queued before this call has executed.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub async fn flush(&self) -> CacheResult<()> {
        self.queue.flush().await
    }

    /// Checks if an image is cached.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Returns the current cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.state.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many queued writes failed since startup.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.state.write_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.state.cache_dir)
            .field("max_size", &self.state.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskState {
    fn is_managed(&self, path: &Path) -> bool {
        path.parent() == Some(self.cache_dir.as_path()) && is_cache_file(path)
    }

    pub(crate) fn record_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Writes bytes through a temporary file and renames it into place, so
    /// readers never observe a half-written entry.
    pub(crate) async fn persist(&self, path: &Path, bytes: &[u8]) {
        if let Err(e) = self.write_file(path, bytes).await {
            self.record_failure();
            warn!(path = %path.display(), error = %e, "Failed to write disk cache entry");
        }
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(format!("Failed to create parent dir: {e}")))?;
        }

        let partial = path.with_extension(PARTIAL_SUFFIX);
        let old_size = fs::metadata(path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| CacheError::io(format!("Failed to create cache file: {e}")))?;

        file.write_all(bytes)
            .await
            .map_err(|e| CacheError::io(format!("Failed to write cache file: {e}")))?;

        file.flush()
            .await
            .map_err(|e| CacheError::io(format!("Failed to flush cache file: {e}")))?;
        drop(file);

        fs::rename(&partial, path)
            .await
            .map_err(|e| CacheError::io(format!("Failed to move cache file into place: {e}")))?;

        if !self.is_managed(path) {
            debug!(path = %path.display(), size = bytes.len(), "Wrote file through disk queue");
            return Ok(());
        }

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                saturating_sub_u64(&self.current_size, old - new_size);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(path = %path.display(), size = bytes.len(), "Stored image in disk cache");

        self.cleanup_if_needed().await;

        Ok(())
    }

    fn forget(&self, path: &Path, size: u64) {
        if self.is_managed(path) {
            saturating_sub_u64(&self.current_size, size);
            saturating_sub_usize(&self.item_count, 1);
        }
    }

    /// Deletes a file on the calling thread.
    pub(crate) fn remove_now(&self, path: &Path) {
        let size = std::fs::metadata(path).map(|m| m.len()).ok();
        match std::fs::remove_file(path) {
            Ok(()) => {
                if let Some(s) = size {
                    self.forget(path, s);
                }
                debug!(path = %path.display(), "Evicted from disk cache");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict from disk cache"),
        }
    }

    pub(crate) async fn remove(&self, path: &Path) {
        let size = fs::metadata(path).await.map(|m| m.len()).ok();
        match fs::remove_file(path).await {
            Ok(()) => {
                if let Some(s) = size {
                    self.forget(path, s);
                }
                debug!(path = %path.display(), "Evicted from disk cache");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to evict from disk cache"),
        }
    }

    pub(crate) async fn discard(&self, path: &Path, stale: &[u8]) {
        match fs::read(path).await {
            Ok(current) if current == stale => self.remove(path).await,
            Ok(_) => trace!(path = %path.display(), "Entry rewritten since it was read, keeping it"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to check entry before discarding"),
        }
    }

    pub(crate) async fn clear(&self) {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read cache dir");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_cache_file(&path) && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
    }

    /// Removes least recently accessed entries once over the size limit,
    /// down to 90% of it.
    ///
    /// The running counters only decide whether to look. The directory scan
    /// is authoritative and replaces them.
    async fn cleanup_if_needed(&self) {
        if self.current_size.load(Ordering::Relaxed) <= self.max_size {
            return;
        }

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }

        let mut current_size: u64 = files.iter().map(|(_, _, size)| size).sum();
        let mut count = files.len();
        if current_size <= self.max_size {
            self.current_size.store(current_size, Ordering::Relaxed);
            self.item_count.store(count, Ordering::Relaxed);
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        files.sort_by_key(|(_, time, _)| *time);
        let floor = self.max_size - self.max_size / 10;
        let mut freed_count = 0usize;

        for (path, _, size) in files {
            if current_size <= floor {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            } else {
                trace!(path = %path.display(), "Removed old cache file");
                current_size -= size;
                count -= 1;
                freed_count += 1;
            }
        }
        self.current_size.store(current_size, Ordering::Relaxed);
        self.item_count.store(count, Ordering::Relaxed);

        debug!(
            size = current_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }
}

fn saturating_sub_u64(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(n))
    });
}

fn saturating_sub_usize(counter: &AtomicUsize, n: usize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(n))
    });
}

/// Returns the default cache directory path.
#[must_use]
pub fn dirs_cache_path() -> PathBuf {
    directories::ProjectDirs::from("com", "imgcache", "imgcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("imgcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
