use tracing::debug;
use url::Url;

use noctipede_core::{CrawlError, FetchConfig, FetchResponse};

use crate::client::{build_client, execute_fetch};

/// Fetches through the Tor SOCKS5 proxy. `socks5h` keeps hostname
/// resolution inside the proxy, which onion addresses require and which
/// keeps clearnet DNS off the local resolver.
pub struct TorClient {
    client: reqwest::Client,
    config: FetchConfig,
}

impl TorClient {
    pub fn new(socks_addr: &str, config: FetchConfig) -> Result<Self, CrawlError> {
        let client = build_client(&format!("socks5h://{socks_addr}"), &config)?;
        Ok(Self { client, config })
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        debug!(url = %url, "fetching via tor");
        execute_fetch(&self.client, url, &self.config, "tor_socks").await
    }
}
