use std::collections::BTreeMap;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Per-plane probe outcome as published in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PlaneStatus {
    pub status: String,
    pub detail: String,
}

impl PlaneStatus {
    pub fn from_verdict(ok: bool, detail: &str) -> Self {
        Self {
            status: if ok { "ok" } else { "error" }.to_string(),
            detail: detail.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalProxyDetail {
    pub status: String,
    pub successful_sites: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalProxySummary {
    pub active_count: usize,
    pub minimum_required: usize,
    pub sufficient: bool,
    pub details: BTreeMap<String, InternalProxyDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct I2pStatus {
    pub proxy_working: bool,
    pub connectivity: bool,
    pub internal_proxies: InternalProxySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapInfo {
    pub bootstrap_mode: bool,
    pub system_age_seconds: f64,
    pub bootstrap_remaining_seconds: f64,
    pub expected_full_readiness_seconds: i64,
}

/// Immutable record of the network-health state at one instant. Replaced
/// wholesale at each refresh; readers never observe a torn snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessSnapshot {
    pub ready_for_crawling: bool,
    pub tor: PlaneStatus,
    pub i2p: I2pStatus,
    pub bootstrap_info: BootstrapInfo,
    pub readiness_summary: String,
    #[serde(skip)]
    pub produced_at: Instant,
}

impl ReadinessSnapshot {
    /// A snapshot for the moment before the first probe fan-out completes.
    pub fn initial(minimum_required: usize, bootstrap_info: BootstrapInfo) -> Self {
        Self {
            ready_for_crawling: false,
            tor: PlaneStatus::from_verdict(false, "not probed yet"),
            i2p: I2pStatus {
                proxy_working: false,
                connectivity: false,
                internal_proxies: InternalProxySummary {
                    active_count: 0,
                    minimum_required,
                    sufficient: false,
                    details: BTreeMap::new(),
                },
            },
            bootstrap_info,
            readiness_summary: "readiness not yet probed".to_string(),
            produced_at: Instant::now(),
        }
    }

    pub fn cache_age_seconds(&self) -> f64 {
        self.produced_at.elapsed().as_secs_f64()
    }
}

/// Last-known proxy endpoint health, written by the readiness oracle and
/// read by the transport layer when walking the internal-proxy chain.
#[derive(Default)]
pub struct ProxyHealthBoard {
    failed: DashMap<String, ()>,
}

impl ProxyHealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, endpoint: &str, ok: bool) {
        if ok {
            self.failed.remove(endpoint);
        } else {
            self.failed.insert(endpoint.to_string(), ());
        }
    }

    pub fn is_failed(&self, endpoint: &str) -> bool {
        self.failed.contains_key(endpoint)
    }
}
