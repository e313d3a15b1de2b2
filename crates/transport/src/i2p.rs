use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use noctipede_core::{CrawlError, FetchConfig, FetchResponse, ProxyHealthBoard};

use crate::client::{build_client, execute_fetch};

/// Fetches eepsites through the configured I2P HTTP proxy, falling back to
/// the internal-proxy fleet when the primary route fails at the transport
/// layer or the proxy answers with a server error.
pub struct I2pClient {
    primary: reqwest::Client,
    primary_addr: String,
    internal: Vec<(String, reqwest::Client)>,
    use_internal: bool,
    board: Arc<ProxyHealthBoard>,
    config: FetchConfig,
}

impl I2pClient {
    pub fn new(
        proxy_addr: &str,
        internal_endpoints: &[String],
        use_internal: bool,
        board: Arc<ProxyHealthBoard>,
        config: FetchConfig,
    ) -> Result<Self, CrawlError> {
        let primary = build_client(&format!("http://{proxy_addr}"), &config)?;

        // Fleet order is insertion order; the fallback walk depends on it.
        let mut internal = Vec::with_capacity(internal_endpoints.len());
        for endpoint in internal_endpoints {
            match build_client(&format!("http://{endpoint}"), &config) {
                Ok(client) => internal.push((endpoint.clone(), client)),
                Err(e) => warn!(endpoint = %endpoint, "skipping internal proxy: {}", e),
            }
        }

        Ok(Self {
            primary,
            primary_addr: proxy_addr.to_string(),
            internal,
            use_internal,
            board,
            config,
        })
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        debug!(url = %url, proxy = %self.primary_addr, "fetching via i2p http proxy");
        match execute_fetch(&self.primary, url, &self.config, "i2p_http").await {
            Ok(resp) if resp.status < 500 => Ok(resp),
            Ok(resp) => {
                if !self.use_internal {
                    return Ok(resp);
                }
                warn!(url = %url, status = resp.status, "i2p proxy server error, trying internal chain");
                self.fetch_via_internal(url).await
            }
            Err(e) if e.is_transport_level() && self.use_internal => {
                warn!(url = %url, "i2p proxy unreachable ({}), trying internal chain", e);
                self.fetch_via_internal(url).await
            }
            Err(e) => Err(e),
        }
    }

    /// One pass over the fleet in insertion order, skipping endpoints the
    /// readiness oracle currently marks failed. First non-error wins.
    async fn fetch_via_internal(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        for (endpoint, client) in &self.internal {
            if self.board.is_failed(endpoint) {
                debug!(endpoint = %endpoint, "skipping failed internal proxy");
                continue;
            }
            let transport = format!("i2p_internal:{endpoint}");
            match execute_fetch(client, url, &self.config, &transport).await {
                Ok(resp) if resp.status < 500 => {
                    debug!(url = %url, endpoint = %endpoint, "internal proxy succeeded");
                    return Ok(resp);
                }
                Ok(resp) => {
                    warn!(endpoint = %endpoint, status = resp.status, "internal proxy server error");
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, "internal proxy fetch failed: {}", e);
                }
            }
        }
        Err(CrawlError::AllI2pProxiesExhausted {
            url: url.to_string(),
        })
    }

    pub fn internal_endpoints(&self) -> impl Iterator<Item = &str> {
        self.internal.iter().map(|(name, _)| name.as_str())
    }
}
