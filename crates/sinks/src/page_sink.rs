use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use noctipede_core::{CrawlError, PageRecord, PageSink};

/// Producer half of the page sink. Channel capacity is the backpressure:
/// workers block here when the writer falls behind.
#[derive(Clone)]
pub struct ChannelPageSink {
    tx: mpsc::Sender<PageRecord>,
}

#[async_trait]
impl PageSink for ChannelPageSink {
    async fn store_page(&self, page: PageRecord) -> Result<(), CrawlError> {
        self.tx
            .send(page)
            .await
            .map_err(|_| CrawlError::SinkUnavailable("page channel closed".into()))
    }
}

/// Consumer task. Appends page records as JSON lines and writes body bytes
/// content-addressed by hash, standing in for the external relational and
/// object stores.
pub struct PageWriter {
    data_dir: PathBuf,
    rx: mpsc::Receiver<PageRecord>,
}

impl PageWriter {
    pub fn channel(data_dir: impl Into<PathBuf>, capacity: usize) -> (ChannelPageSink, PageWriter) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ChannelPageSink { tx },
            PageWriter {
                data_dir: data_dir.into(),
                rx,
            },
        )
    }

    async fn store(&self, page: &PageRecord) -> Result<(), CrawlError> {
        let bodies = self.data_dir.join("bodies");
        tokio::fs::create_dir_all(&bodies)
            .await
            .map_err(|e| CrawlError::SinkUnavailable(e.to_string()))?;

        let body_path = bodies.join(&page.content_hash);
        // Content-addressed: identical bodies are written once.
        if tokio::fs::metadata(&body_path).await.is_err() {
            tokio::fs::write(&body_path, &page.body)
                .await
                .map_err(|e| CrawlError::SinkUnavailable(e.to_string()))?;
        }

        let mut line = serde_json::to_vec(page)
            .map_err(|e| CrawlError::SinkUnavailable(e.to_string()))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join("pages.jsonl"))
            .await
            .map_err(|e| CrawlError::SinkUnavailable(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| CrawlError::SinkUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Drain pages until shutdown, then flush whatever is still queued.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut pages_stored = 0u64;
        let mut last_store_time = std::time::Instant::now();
        let stall_threshold = std::time::Duration::from_secs(300);
        loop {
            tokio::select! {
                page = self.rx.recv() => {
                    let Some(page) = page else {
                        info!(pages_stored, "page channel closed, writer exiting");
                        break;
                    };
                    match self.store(&page).await {
                        Ok(()) => {
                            pages_stored += 1;
                            last_store_time = std::time::Instant::now();
                            info!(url = %page.url, total = pages_stored, "stored page");
                        }
                        Err(e) => error!(url = %page.url, "store failed: {}", e),
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {
                    if last_store_time.elapsed() > stall_threshold {
                        warn!(
                            pages_stored,
                            idle_secs = last_store_time.elapsed().as_secs(),
                            "no pages stored recently, crawl may be stalled"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    // Drain until every sender is gone. Workers may still be
                    // blocked on a full channel; stopping early would wedge
                    // them mid-shutdown.
                    info!(pages_stored, "page writer draining for shutdown");
                    while let Some(page) = self.rx.recv().await {
                        if let Err(e) = self.store(&page).await {
                            error!(url = %page.url, "store failed during drain: {}", e);
                        } else {
                            pages_stored += 1;
                        }
                    }
                    info!(pages_stored, "page writer shut down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use noctipede_core::Network;

    fn record(url: &str, body: &[u8]) -> PageRecord {
        PageRecord {
            site: "http://a.onion/".to_string(),
            url: url.to_string(),
            final_url: url.to_string(),
            network: Network::Tor,
            transport: "tor_socks".to_string(),
            status_code: 200,
            title: Some("t".to_string()),
            content_hash: fake_hash(body),
            body: body.to_vec(),
            links: Vec::new(),
            media: Vec::new(),
            truncated: false,
            fetched_at: Utc::now(),
            elapsed_ms: 1,
        }
    }

    // stand-in hash so these tests need no digest dependency
    fn fake_hash(body: &[u8]) -> String {
        format!("{:x}", body.iter().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u64)))
    }

    #[tokio::test]
    async fn writer_persists_record_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, writer) = PageWriter::channel(dir.path(), 8);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let page = record("http://a.onion/p", b"<html>body</html>");
        let hash = page.content_hash.clone();
        sink.store_page(page).await.unwrap();

        let handle = tokio::spawn(writer.run(shutdown_tx.subscribe()));
        // drop the sender so the shutdown drain can run dry
        drop(sink);
        let _ = shutdown_tx.send(());
        handle.await.unwrap();

        let jsonl = std::fs::read_to_string(dir.path().join("pages.jsonl")).unwrap();
        assert!(jsonl.contains("http://a.onion/p"));
        let body = std::fs::read(dir.path().join("bodies").join(&hash)).unwrap();
        assert_eq!(body, b"<html>body</html>");
        // body bytes stay out of the JSON line
        assert!(!jsonl.contains("<html>body</html>"));
    }

    #[tokio::test]
    async fn closed_channel_reports_sink_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, writer) = PageWriter::channel(dir.path(), 1);
        drop(writer);
        let err = sink.store_page(record("http://a.onion/", b"x")).await.unwrap_err();
        assert!(matches!(err, CrawlError::SinkUnavailable(_)));
    }
}
