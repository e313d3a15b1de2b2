use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrawlError;
use crate::health::ReadinessSnapshot;

/// Which network plane a URL belongs to. Pure function of the host suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Clearnet,
    Tor,
    I2p,
}

impl Network {
    pub fn of(url: &Url) -> Network {
        match url.host_str() {
            Some(h) if h.ends_with(".onion") => Network::Tor,
            Some(h) if h.ends_with(".i2p") => Network::I2p,
            _ => Network::Clearnet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Clearnet => "clearnet",
            Network::Tor => "tor",
            Network::I2p => "i2p",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// A seed site. Identity is the normalized URL; mutated only through the
/// gate, and only by the worker currently holding it.
#[derive(Debug, Clone)]
pub struct Site {
    pub key: String,
    pub url: Url,
    pub network: Network,
    pub status: SiteStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_count: u32,
}

impl Site {
    pub fn new(key: String, url: Url) -> Self {
        let network = Network::of(&url);
        Self {
            key,
            url,
            network,
            status: SiteStatus::Pending,
            last_crawled_at: None,
            last_attempt_at: None,
            error_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_body_size: usize,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(45),
            max_body_size: 10 * 1024 * 1024,
            max_redirects: 5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub truncated: bool,
    /// Concrete path the request took: `tor_socks`, `i2p_http`, or
    /// `i2p_internal:<endpoint>`.
    pub transport: String,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// What the pipeline hands to the page sink. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub site: String,
    pub url: String,
    pub final_url: String,
    pub network: Network,
    pub transport: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub content_hash: String,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub links: Vec<ExtractedLink>,
    pub media: Vec<MediaRef>,
    pub truncated: bool,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub anchor_text: Option<String>,
    pub network: Network,
    pub is_external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Other,
}

impl MediaKind {
    /// Classify a media URL by its path extension against the supported
    /// image format list.
    pub fn classify(url: &str, image_formats: &[String]) -> MediaKind {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit('.').next() {
            Some(ext) if image_formats.iter().any(|f| f.eq_ignore_ascii_case(ext)) => {
                MediaKind::Image
            }
            _ => MediaKind::Other,
        }
    }
}

/// Reference to a binary discovered on a page. The binary itself is fetched
/// and stored downstream of the analysis queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
    pub page_url: String,
    pub discovered_at: DateTime<Utc>,
}

/// A single probe result. Probes never raise; failure is a verdict.
#[derive(Debug, Clone)]
pub struct ProbeVerdict {
    pub ok: bool,
    pub detail: String,
    pub successful_sites: Vec<String>,
}

impl ProbeVerdict {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
            successful_sites: Vec::new(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            successful_sites: Vec::new(),
        }
    }
}

/// A configured fetch capability: transport selection already applied.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, CrawlError>;
}

/// Durable page storage behind the external relational + object stores.
#[async_trait]
pub trait PageSink: Send + Sync + 'static {
    async fn store_page(&self, page: PageRecord) -> Result<(), CrawlError>;
}

/// Queue feeding the external media/image analyzers.
#[async_trait]
pub trait MediaQueue: Send + Sync + 'static {
    async fn enqueue_media(&self, media: MediaRef) -> Result<(), CrawlError>;
}

/// Stateless network-health checks; verdicts go to the readiness oracle.
#[async_trait]
pub trait ProxyProber: Send + Sync + 'static {
    async fn probe_tor_socks(&self) -> ProbeVerdict;
    async fn probe_i2p_http(&self) -> ProbeVerdict;
    async fn probe_i2p_internal(&self, endpoint: &str) -> ProbeVerdict;
}

/// Readiness state as seen by the crawler manager and the HTTP surface.
#[async_trait]
pub trait ReadinessSource: Send + Sync + 'static {
    /// Latest published snapshot, possibly stale.
    fn snapshot(&self) -> Arc<ReadinessSnapshot>;

    /// Latest snapshot, refreshing first if stale. Waits at most `max_wait`
    /// for the refresh; on deadline the stale snapshot is returned as-is.
    async fn fresh_snapshot(&self, max_wait: Duration) -> Arc<ReadinessSnapshot>;
}
