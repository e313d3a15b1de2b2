use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("all i2p internal proxies exhausted for {url}")]
    AllI2pProxiesExhausted { url: String },

    #[error("http status {status}")]
    Http { status: u16 },

    #[error("too many redirects (cap {0})")]
    TooManyRedirects(usize),

    #[error("redirect left the {0} plane")]
    CrossPlaneRedirect(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("media ref dropped: analysis queue closed")]
    Dropped,

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Transport-layer failures are the ones that justify rerouting an I2P
    /// fetch through the internal-proxy chain. HTTP-level replies from the
    /// origin (4xx) are not transport failures.
    pub fn is_transport_level(&self) -> bool {
        matches!(
            self,
            CrawlError::TransportUnavailable(_)
                | CrawlError::Proxy(_)
                | CrawlError::Timeout(_)
                | CrawlError::AllI2pProxiesExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_level_classification() {
        assert!(CrawlError::Proxy("refused".into()).is_transport_level());
        assert!(CrawlError::Timeout(Duration::from_secs(5)).is_transport_level());
        assert!(!CrawlError::Http { status: 404 }.is_transport_level());
        assert!(!CrawlError::Parse("bad html".into()).is_transport_level());
    }

    #[test]
    fn display_carries_the_operational_detail() {
        assert_eq!(CrawlError::Http { status: 502 }.to_string(), "http status 502");
        assert_eq!(CrawlError::Cancelled.to_string(), "cancelled");
        assert_eq!(
            CrawlError::AllI2pProxiesExhausted {
                url: "http://reg.i2p/".into()
            }
            .to_string(),
            "all i2p internal proxies exhausted for http://reg.i2p/"
        );
        assert_eq!(
            CrawlError::TooManyRedirects(5).to_string(),
            "too many redirects (cap 5)"
        );
    }
}
