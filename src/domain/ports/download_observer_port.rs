use crate::domain::entities::DownloadEvent;

/// Port for observers of network download activity.
pub trait DownloadObserver: Send + Sync {
    /// Called synchronously on the publishing thread.
    fn on_download_event(&self, event: &DownloadEvent);
}

impl<F> DownloadObserver for F
where
    F: Fn(&DownloadEvent) + Send + Sync,
{
    fn on_download_event(&self, event: &DownloadEvent) {
        self(event);
    }
}
