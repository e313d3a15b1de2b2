use serde::Deserialize;

use crate::error::CrawlError;

/// Well-known destination eepsites used as probe targets. The statistics
/// site is the primary I2P connectivity indicator; the rest are auxiliaries
/// (registry, project site, community forum, lead developer's site). These
/// are destinations, never proxies, and are rejected if configured in the
/// internal-proxy fleet.
pub const I2P_PROBE_HOSTS: &[&str] = &[
    "stats.i2p",
    "reg.i2p",
    "i2p-projekt.i2p",
    "i2pforum.i2p",
    "zzz.i2p",
];

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub tor: TorConfig,
    pub i2p: I2pConfig,
    pub readiness: ReadinessConfig,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_concurrent_crawlers")]
    pub max_concurrent_crawlers: usize,
    #[serde(default = "default_crawl_delay_seconds")]
    pub crawl_delay_seconds: u64,
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_crawl_depth")]
    pub max_crawl_depth: u32,
    #[serde(default = "default_max_offsite_depth")]
    pub max_offsite_depth: u32,
    #[serde(default = "default_true")]
    pub skip_recent_crawls: bool,
    #[serde(default = "default_recent_crawl_hours")]
    pub recent_crawl_hours: u64,
    #[serde(default = "default_max_pages_per_site")]
    pub max_pages_per_site: usize,
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TorConfig {
    pub proxy_host: String,
    pub proxy_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_tor_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl TorConfig {
    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct I2pConfig {
    pub proxy_host: String,
    pub proxy_port: u16,
    #[serde(default)]
    pub internal_proxies: Vec<String>,
    #[serde(default = "default_true")]
    pub use_internal_proxies: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_i2p_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl I2pConfig {
    pub fn http_proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_bind")]
    pub bind_addr: String,
    #[serde(default = "default_bootstrap_duration")]
    pub bootstrap_duration_seconds: u64,
    #[serde(default = "default_min_active_i2p")]
    pub min_active_i2p: usize,
    #[serde(default = "default_true")]
    pub require_i2p_quorum: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_refresh_deadline")]
    pub refresh_deadline_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: String,
    #[serde(default = "default_page_channel_capacity")]
    pub page_channel_capacity: usize,
    #[serde(default = "default_ai_queue_max_size")]
    pub ai_queue_max_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    #[serde(default = "default_moderation_threshold")]
    pub moderation_threshold: u32,
    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: u64,
    #[serde(default = "default_image_formats")]
    pub supported_image_formats: Vec<String>,
}

fn default_max_concurrent_crawlers() -> usize {
    10
}
fn default_crawl_delay_seconds() -> u64 {
    3
}
fn default_max_links_per_page() -> usize {
    50
}
fn default_max_queue_size() -> usize {
    500
}
fn default_max_crawl_depth() -> u32 {
    10
}
fn default_max_offsite_depth() -> u32 {
    1
}
fn default_recent_crawl_hours() -> u64 {
    24
}
fn default_max_pages_per_site() -> usize {
    100
}
fn default_max_body_size_mb() -> usize {
    10
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_tor_request_timeout() -> u64 {
    45
}
fn default_i2p_request_timeout() -> u64 {
    90
}
fn default_readiness_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_bootstrap_duration() -> u64 {
    1800
}
fn default_min_active_i2p() -> usize {
    5
}
fn default_poll_interval() -> u64 {
    30
}
fn default_refresh_deadline() -> u64 {
    30
}
fn default_page_channel_capacity() -> usize {
    64
}
fn default_ai_queue_max_size() -> usize {
    100
}
fn default_moderation_threshold() -> u32 {
    30
}
fn default_max_image_size_mb() -> u64 {
    10
}
fn default_image_formats() -> Vec<String> {
    ["webp", "jpg", "jpeg", "png", "gif", "bmp", "tiff", "svg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Apply environment overrides through a lookup function, so tests can
    /// inject values without touching the process environment.
    pub fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(v: &str) -> Option<T> {
            v.trim().parse::<T>().ok()
        }
        fn parse_bool(v: &str) -> bool {
            v != "0" && !v.eq_ignore_ascii_case("false")
        }

        if let Some(v) = get("MAX_CONCURRENT_CRAWLERS") {
            if let Some(n) = parse::<usize>(&v).filter(|&n| n > 0 && n <= 128) {
                self.crawler.max_concurrent_crawlers = n;
            }
        }
        if let Some(v) = get("CRAWL_DELAY_SECONDS") {
            if let Some(n) = parse::<u64>(&v) {
                self.crawler.crawl_delay_seconds = n;
            }
        }
        if let Some(v) = get("MAX_LINKS_PER_PAGE") {
            if let Some(n) = parse::<usize>(&v) {
                self.crawler.max_links_per_page = n;
            }
        }
        if let Some(v) = get("MAX_QUEUE_SIZE") {
            if let Some(n) = parse::<usize>(&v) {
                self.crawler.max_queue_size = n;
            }
        }
        if let Some(v) = get("MAX_CRAWL_DEPTH") {
            if let Some(n) = parse::<u32>(&v) {
                self.crawler.max_crawl_depth = n;
            }
        }
        if let Some(v) = get("MAX_OFFSITE_DEPTH") {
            if let Some(n) = parse::<u32>(&v) {
                self.crawler.max_offsite_depth = n;
            }
        }
        if let Some(v) = get("SKIP_RECENT_CRAWLS") {
            self.crawler.skip_recent_crawls = parse_bool(&v);
        }
        if let Some(v) = get("RECENT_CRAWL_HOURS") {
            if let Some(n) = parse::<u64>(&v) {
                self.crawler.recent_crawl_hours = n;
            }
        }
        if let Some(v) = get("TOR_PROXY_HOST") {
            self.tor.proxy_host = v;
        }
        if let Some(v) = get("TOR_PROXY_PORT") {
            if let Some(n) = parse::<u16>(&v) {
                self.tor.proxy_port = n;
            }
        }
        if let Some(v) = get("I2P_PROXY_HOST") {
            self.i2p.proxy_host = v;
        }
        if let Some(v) = get("I2P_PROXY_PORT") {
            if let Some(n) = parse::<u16>(&v) {
                self.i2p.proxy_port = n;
            }
        }
        if let Some(v) = get("I2P_INTERNAL_PROXIES") {
            self.i2p.internal_proxies = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("USE_I2P_INTERNAL_PROXIES") {
            self.i2p.use_internal_proxies = parse_bool(&v);
        }
        if let Some(v) = get("BOOTSTRAP_DURATION") {
            if let Some(n) = parse::<u64>(&v) {
                self.readiness.bootstrap_duration_seconds = n;
            }
        }
        if let Some(v) = get("MIN_ACTIVE_I2P") {
            if let Some(n) = parse::<usize>(&v) {
                self.readiness.min_active_i2p = n;
            }
        }
        if let Some(v) = get("AI_QUEUE_MAX_SIZE") {
            if let Some(n) = parse::<usize>(&v) {
                self.storage.ai_queue_max_size = n;
            }
        }
        if let Some(v) = get("MODERATION_THRESHOLD") {
            if let Some(n) = parse::<u32>(&v) {
                self.analysis.moderation_threshold = n;
            }
        }
        if let Some(v) = get("MAX_IMAGE_SIZE_MB") {
            if let Some(n) = parse::<u64>(&v) {
                self.analysis.max_image_size_mb = n;
            }
        }
        if let Some(v) = get("SUPPORTED_IMAGE_FORMATS") {
            self.analysis.supported_image_formats = v
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Startup validation. Any error here aborts the process.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.tor.proxy_host.is_empty() {
            return Err(CrawlError::Config("tor proxy host is empty".into()));
        }
        if self.i2p.proxy_host.is_empty() {
            return Err(CrawlError::Config("i2p proxy host is empty".into()));
        }
        if self.crawler.max_concurrent_crawlers == 0 {
            return Err(CrawlError::Config(
                "max_concurrent_crawlers must be at least 1".into(),
            ));
        }
        if self.readiness.min_active_i2p == 0 && self.readiness.require_i2p_quorum {
            return Err(CrawlError::Config(
                "min_active_i2p must be at least 1 when the quorum is required".into(),
            ));
        }
        // Internal proxies must provide proxy service; the probe destinations
        // (statistics, registry, project, forum, developer) are not proxies.
        for endpoint in &self.i2p.internal_proxies {
            let host = endpoint.split(':').next().unwrap_or(endpoint);
            if I2P_PROBE_HOSTS.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                return Err(CrawlError::Config(format!(
                    "{endpoint} is a probe destination, not an internal proxy"
                )));
            }
        }
        if self.storage.data_dir.is_empty() {
            return Err(CrawlError::Config("storage data_dir is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_config() -> AppConfig {
        toml::from_str(
            r#"
            [crawler]
            [tor]
            proxy_host = "tor1"
            proxy_port = 9050
            [i2p]
            proxy_host = "i2p1"
            proxy_port = 4444
            internal_proxies = ["notbob.i2p", "purokishi.i2p"]
            [readiness]
            [storage]
            data_dir = "/tmp/noctipede"
            [analysis]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_match_design() {
        let cfg = base_config();
        assert_eq!(cfg.crawler.max_concurrent_crawlers, 10);
        assert_eq!(cfg.crawler.crawl_delay_seconds, 3);
        assert_eq!(cfg.crawler.max_links_per_page, 50);
        assert_eq!(cfg.crawler.max_queue_size, 500);
        assert_eq!(cfg.crawler.max_crawl_depth, 10);
        assert_eq!(cfg.crawler.max_offsite_depth, 1);
        assert!(cfg.crawler.skip_recent_crawls);
        assert_eq!(cfg.crawler.recent_crawl_hours, 24);
        assert_eq!(cfg.readiness.bootstrap_duration_seconds, 1800);
        assert_eq!(cfg.readiness.min_active_i2p, 5);
        assert_eq!(cfg.storage.ai_queue_max_size, 100);
        assert_eq!(cfg.analysis.moderation_threshold, 30);
        assert_eq!(cfg.analysis.supported_image_formats.len(), 8);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let parsed: Result<AppConfig, _> = toml::from_str(
            r#"
            [crawler]
            not_a_real_option = 7
            [tor]
            proxy_host = "tor1"
            proxy_port = 9050
            [i2p]
            proxy_host = "i2p1"
            proxy_port = 4444
            [readiness]
            [storage]
            data_dir = "/tmp/x"
            [analysis]
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = base_config();
        let env: HashMap<&str, &str> = [
            ("MAX_CONCURRENT_CRAWLERS", "4"),
            ("CRAWL_DELAY_SECONDS", "1"),
            ("SKIP_RECENT_CRAWLS", "false"),
            ("I2P_INTERNAL_PROXIES", "false.i2p, stormycloud.i2p"),
            ("MIN_ACTIVE_I2P", "2"),
            ("SUPPORTED_IMAGE_FORMATS", "png,.webp"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.crawler.max_concurrent_crawlers, 4);
        assert_eq!(cfg.crawler.crawl_delay_seconds, 1);
        assert!(!cfg.crawler.skip_recent_crawls);
        assert_eq!(
            cfg.i2p.internal_proxies,
            vec!["false.i2p".to_string(), "stormycloud.i2p".to_string()]
        );
        assert_eq!(cfg.readiness.min_active_i2p, 2);
        assert_eq!(cfg.analysis.supported_image_formats, vec!["png", "webp"]);
    }

    #[test]
    fn out_of_range_worker_override_is_ignored() {
        let mut cfg = base_config();
        cfg.apply_overrides(|k| {
            (k == "MAX_CONCURRENT_CRAWLERS").then(|| "9000".to_string())
        });
        assert_eq!(cfg.crawler.max_concurrent_crawlers, 10);
    }

    #[test]
    fn destination_sites_rejected_as_internal_proxies() {
        let mut cfg = base_config();
        cfg.i2p.internal_proxies = vec!["notbob.i2p".into(), "stats.i2p".into()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("stats.i2p"));

        cfg.i2p.internal_proxies = vec!["notbob.i2p".into(), "purokishi.i2p".into()];
        assert!(cfg.validate().is_ok());
    }
}
