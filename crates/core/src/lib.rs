pub mod config;
pub mod error;
pub mod health;
pub mod types;

pub use config::AppConfig;
pub use error::CrawlError;
pub use health::{ProxyHealthBoard, ReadinessSnapshot};
pub use types::{
    ExtractedLink, FetchConfig, FetchResponse, Fetcher, MediaKind, MediaQueue, MediaRef, Network,
    PageRecord, PageSink, ProbeVerdict, ProxyProber, ReadinessSource, Site, SiteStatus,
};
