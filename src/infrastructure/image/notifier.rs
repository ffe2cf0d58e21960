//! Broadcast of download start/stop events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{info, trace};

use crate::domain::entities::{CacheKey, DownloadEvent, DownloadPhase};
use crate::domain::ports::DownloadObserver;

/// Handle returned by [`DownloadNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fire-and-forget broadcast of [`DownloadEvent`]s.
///
/// Observers are called synchronously on whichever thread publishes. There is
/// no queue and no replay: an observer registered late misses earlier events.
#[derive(Default)]
pub struct DownloadNotifier {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn DownloadObserver>)>>,
    next_id: AtomicU64,
    active: AtomicUsize,
}

impl DownloadNotifier {
    /// Creates a notifier with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for every future event.
    pub fn subscribe(&self, observer: Arc<dyn DownloadObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        trace!(id = id.0, "Download observer subscribed");
        id
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        before != observers.len()
    }

    /// Returns the number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns how many network downloads are currently in flight.
    pub fn active_downloads(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Delivers an event to every registered observer.
    pub fn publish(&self, event: &DownloadEvent) {
        // Snapshot so observers may (un)subscribe from inside the callback.
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        trace!(url = %event.url, phase = %event.phase, observers = observers.len(), "Publishing download event");
        for observer in observers {
            observer.on_download_event(event);
        }
    }
}

impl std::fmt::Debug for DownloadNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadNotifier")
            .field("observers", &self.observer_count())
            .field("active", &self.active_downloads())
            .finish()
    }
}

/// Brackets one network attempt: publishes `Started` on creation and
/// `Stopped` when dropped, however the attempt ends.
#[must_use = "the download is reported as stopped as soon as the guard is dropped"]
pub struct DownloadGuard {
    notifier: Arc<DownloadNotifier>,
    url: CacheKey,
}

impl DownloadGuard {
    /// Publishes `Started` for `url`.
    ///
    /// The guard exists before any observer runs, so a panicking observer
    /// still ends in `Stopped` and releases the active count.
    pub fn begin(notifier: Arc<DownloadNotifier>, url: CacheKey) -> Self {
        notifier.active.fetch_add(1, Ordering::Relaxed);
        let guard = Self { notifier, url };
        guard
            .notifier
            .publish(&DownloadEvent::started(guard.url.clone()));
        guard
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.notifier.active.fetch_sub(1, Ordering::Relaxed);
        self.notifier
            .publish(&DownloadEvent::stopped(self.url.clone()));
    }
}

/// Observer that logs every download event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl DownloadObserver for LoggingObserver {
    fn on_download_event(&self, event: &DownloadEvent) {
        match event.phase {
            DownloadPhase::Started => info!(url = %event.url, "Download started"),
            DownloadPhase::Stopped => info!(url = %event.url, "Download stopped"),
        }
    }
}
