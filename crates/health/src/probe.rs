use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use noctipede_core::config::I2P_PROBE_HOSTS;
use noctipede_core::{CrawlError, ProbeVerdict, ProxyProber};

/// IP-echo service used as the Tor canary. The reply says whether the
/// observed exit IP is a Tor exit.
pub const TOR_CHECK_URL: &str = "https://check.torproject.org/api/ip";

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TOTAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Stateless probes against the configured proxies. Clients are built once;
/// every call returns a verdict, never an error.
pub struct Prober {
    tor_socks_addr: String,
    tor_client: reqwest::Client,
    i2p_client: reqwest::Client,
    internal_clients: HashMap<String, reqwest::Client>,
}

fn probe_client(proxy_url: &str) -> Result<reqwest::Client, CrawlError> {
    let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| CrawlError::Proxy(e.to_string()))?;
    reqwest::Client::builder()
        .proxy(proxy)
        .connect_timeout(PROBE_CONNECT_TIMEOUT)
        .timeout(PROBE_TOTAL_TIMEOUT)
        .build()
        .map_err(|e| CrawlError::TransportUnavailable(e.to_string()))
}

impl Prober {
    pub fn new(
        tor_socks_addr: &str,
        i2p_proxy_addr: &str,
        internal_endpoints: &[String],
    ) -> Result<Self, CrawlError> {
        let tor_client = probe_client(&format!("socks5h://{tor_socks_addr}"))?;
        let i2p_client = probe_client(&format!("http://{i2p_proxy_addr}"))?;
        let mut internal_clients = HashMap::with_capacity(internal_endpoints.len());
        for endpoint in internal_endpoints {
            internal_clients.insert(endpoint.clone(), probe_client(&format!("http://{endpoint}"))?);
        }
        Ok(Self {
            tor_socks_addr: tor_socks_addr.to_string(),
            tor_client,
            i2p_client,
            internal_clients,
        })
    }
}

#[async_trait]
impl ProxyProber for Prober {
    async fn probe_tor_socks(&self) -> ProbeVerdict {
        // TCP reachability first: a closed SOCKS port should report as such
        // instead of as a canary failure.
        match tokio::time::timeout(
            PROBE_CONNECT_TIMEOUT,
            TcpStream::connect(&self.tor_socks_addr),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return ProbeVerdict::error(format!("socks endpoint unreachable: {e}")),
            Err(_) => return ProbeVerdict::error("socks connect timed out"),
        }

        match self.tor_client.get(TOR_CHECK_URL).send().await {
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() {
                    return ProbeVerdict::error(format!("check service returned {status}"));
                }
                match resp.bytes().await {
                    Ok(body) => match serde_json::from_slice::<serde_json::Value>(&body) {
                        Ok(v) if v.get("IsTor").and_then(|b| b.as_bool()) == Some(true) => {
                            let ip = v.get("IP").and_then(|s| s.as_str()).unwrap_or("unknown");
                            ProbeVerdict::ok(format!("tor exit confirmed ({ip})"))
                        }
                        // HTTP-layer success through the proxy is sufficient
                        // even when exit confirmation is unavailable.
                        _ => ProbeVerdict::ok("reachable through socks, exit not confirmed"),
                    },
                    Err(e) => ProbeVerdict::error(format!("canary body read failed: {e}")),
                }
            }
            Err(e) => ProbeVerdict::error(format!("canary fetch failed: {e}")),
        }
    }

    async fn probe_i2p_http(&self) -> ProbeVerdict {
        let primary = I2P_PROBE_HOSTS[0];
        let url = format!("http://{primary}/");
        debug!(url = %url, "probing i2p http proxy");
        match self.i2p_client.get(&url).send().await {
            Ok(resp) if resp.status().as_u16() < 400 => {
                ProbeVerdict::ok(format!("{primary} reachable"))
            }
            Ok(resp) => ProbeVerdict::error(format!("{primary} returned {}", resp.status())),
            Err(e) => ProbeVerdict::error(format!("proxy fetch failed: {e}")),
        }
    }

    async fn probe_i2p_internal(&self, endpoint: &str) -> ProbeVerdict {
        let Some(client) = self.internal_clients.get(endpoint) else {
            return ProbeVerdict::error(format!("unknown internal proxy {endpoint}"));
        };

        let mut successes = Vec::new();
        let mut last_failure = String::new();
        for host in I2P_PROBE_HOSTS {
            let url = format!("http://{host}/");
            match client.get(&url).send().await {
                Ok(resp) if resp.status().as_u16() < 400 => successes.push(host.to_string()),
                Ok(resp) => last_failure = format!("{host} returned {}", resp.status()),
                Err(e) => last_failure = format!("{host}: {e}"),
            }
        }

        if successes.is_empty() {
            ProbeVerdict::error(if last_failure.is_empty() {
                "no probe sites reachable".to_string()
            } else {
                last_failure
            })
        } else {
            let detail = format!(
                "{}/{} probe sites reachable",
                successes.len(),
                I2P_PROBE_HOSTS.len()
            );
            let mut verdict = ProbeVerdict::ok(detail);
            verdict.successful_sites = successes;
            verdict
        }
    }
}
