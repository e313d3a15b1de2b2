pub mod client;
pub mod i2p;
pub mod tor;

use async_trait::async_trait;
use url::Url;

use noctipede_core::{CrawlError, FetchResponse, Fetcher, Network};

pub use i2p::I2pClient;
pub use tor::TorClient;

/// Routes each URL to the transport for its plane and runs the fetch.
///
/// Routing is a pure function of the host suffix: `.onion` and clearnet go
/// through the Tor SOCKS proxy (direct clearnet fetches are forbidden),
/// `.i2p` goes through the I2P HTTP proxy with the internal-proxy chain as
/// fallback.
pub struct TransportSelector {
    tor: TorClient,
    i2p: I2pClient,
}

impl TransportSelector {
    pub fn new(tor: TorClient, i2p: I2pClient) -> Self {
        Self { tor, i2p }
    }

    /// The transport a URL will take, before any fallback.
    pub fn planned_transport(url: &Url) -> &'static str {
        match Network::of(url) {
            Network::Tor | Network::Clearnet => "tor_socks",
            Network::I2p => "i2p_http",
        }
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CrawlError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        match Network::of(url) {
            Network::Tor | Network::Clearnet => self.tor.fetch(url).await,
            Network::I2p => self.i2p.fetch(url).await,
        }
    }
}

#[async_trait]
impl Fetcher for TransportSelector {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, CrawlError> {
        TransportSelector::fetch(self, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_first_match_on_host_suffix() {
        let onion = Url::parse("http://s4k4ceiapwwgcm3mkb6e4diqecpo7kvdnfr5gg7sph7jjppqkvwwqtyd.onion/").unwrap();
        let eep = Url::parse("http://reg.i2p/hosts.txt").unwrap();
        let clear = Url::parse("https://example.com/").unwrap();

        assert_eq!(TransportSelector::planned_transport(&onion), "tor_socks");
        assert_eq!(TransportSelector::planned_transport(&eep), "i2p_http");
        // clearnet must tunnel through Tor, never fetched directly
        assert_eq!(TransportSelector::planned_transport(&clear), "tor_socks");
    }
}
