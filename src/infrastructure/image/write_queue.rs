//! Serialized disk write queue.
//!
//! A single tokio task drains an unbounded channel of [`DiskOperation`]s one
//! at a time, in submission order. Blocking work submitted through the queue
//! runs on the blocking pool but is awaited before the next operation starts,
//! so no two operations ever overlap.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::domain::errors::{CacheError, CacheResult};

use super::disk_cache::DiskState;

/// Arbitrary blocking work run on the queue.
pub type BlockingOperation = Box<dyn FnOnce() + Send + 'static>;

/// Deferred producer of the bytes to persist.
pub type BytesProducer = Box<dyn FnOnce() -> CacheResult<Vec<u8>> + Send + 'static>;

/// A unit of work for the disk queue.
pub enum DiskOperation {
    /// Write bytes to a path, replacing any previous content.
    Write {
        /// Destination file.
        path: PathBuf,
        /// Content to write.
        bytes: Bytes,
    },
    /// Produce bytes on the worker, then write them to a path.
    Encode {
        /// Destination file.
        path: PathBuf,
        /// Called on the blocking pool when the operation is reached.
        produce: BytesProducer,
    },
    /// Delete a file if present.
    Remove {
        /// File to delete.
        path: PathBuf,
    },
    /// Delete a file only if it still holds exactly these bytes.
    Discard {
        /// File to delete.
        path: PathBuf,
        /// Content that was found to be unusable.
        stale: Bytes,
    },
    /// Delete every cached image.
    Clear,
    /// Run caller-supplied blocking work.
    Custom(BlockingOperation),
    /// Signal once every earlier operation has completed.
    Flush(oneshot::Sender<()>),
}

impl std::fmt::Debug for DiskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { path, bytes } => f
                .debug_struct("Write")
                .field("path", path)
                .field("len", &bytes.len())
                .finish(),
            Self::Encode { path, .. } => f
                .debug_struct("Encode")
                .field("path", path)
                .finish_non_exhaustive(),
            Self::Remove { path } => f.debug_struct("Remove").field("path", path).finish(),
            Self::Discard { path, stale } => f
                .debug_struct("Discard")
                .field("path", path)
                .field("len", &stale.len())
                .finish(),
            Self::Clear => write!(f, "Clear"),
            Self::Custom(_) => write!(f, "Custom"),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

/// Handle to the single-worker disk queue. Cheap to clone.
///
/// The worker stops once every handle has been dropped and the channel is
/// drained.
#[derive(Debug, Clone)]
pub struct DiskWriteQueue {
    tx: mpsc::UnboundedSender<DiskOperation>,
}

impl DiskWriteQueue {
    /// Starts the worker on the current tokio runtime.
    pub(crate) fn spawn(state: Arc<DiskState>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_worker_loop(rx, state));
        Self { tx }
    }

    /// Queues an operation.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub fn submit(&self, op: DiskOperation) -> CacheResult<()> {
        trace!(op = ?op, "Queueing disk operation");
        self.tx.send(op).map_err(|_| CacheError::QueueClosed)
    }

    /// Queues a raw write of `bytes` to `path`.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub fn write_bytes(&self, bytes: Bytes, path: PathBuf) -> CacheResult<()> {
        self.submit(DiskOperation::Write { path, bytes })
    }

    /// Queues arbitrary blocking work behind every pending operation.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub fn submit_blocking<F>(&self, op: F) -> CacheResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(DiskOperation::Custom(Box::new(op)))
    }

    /// Waits until every operation queued before this call has executed.
    ///
    /// # Errors
    /// Returns [`CacheError::QueueClosed`] if the worker has stopped.
    pub async fn flush(&self) -> CacheResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(DiskOperation::Flush(done_tx))?;
        done_rx.await.map_err(|_| CacheError::QueueClosed)
    }

    async fn run_worker_loop(mut rx: mpsc::UnboundedReceiver<DiskOperation>, state: Arc<DiskState>) {
        debug!("Disk write queue started");
        while let Some(op) = rx.recv().await {
            match op {
                DiskOperation::Write { path, bytes } => state.persist(&path, &bytes).await,
                DiskOperation::Encode { path, produce } => {
                    match tokio::task::spawn_blocking(produce).await {
                        Ok(Ok(bytes)) => state.persist(&path, &bytes).await,
                        Ok(Err(e)) => {
                            state.record_failure();
                            warn!(path = %path.display(), error = %e, "Failed to produce bytes for disk cache");
                        }
                        Err(e) => {
                            state.record_failure();
                            error!(path = %path.display(), error = %e, "Encode task panicked");
                        }
                    }
                }
                DiskOperation::Remove { path } => state.remove(&path).await,
                DiskOperation::Discard { path, stale } => state.discard(&path, &stale).await,
                DiskOperation::Clear => state.clear().await,
                DiskOperation::Custom(work) => {
                    if let Err(e) = tokio::task::spawn_blocking(work).await {
                        error!(error = %e, "Custom disk operation panicked");
                    }
                }
                DiskOperation::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Disk write queue closed");
    }
}
