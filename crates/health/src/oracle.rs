use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use noctipede_core::health::{
    BootstrapInfo, I2pStatus, InternalProxyDetail, InternalProxySummary, PlaneStatus,
    ReadinessSnapshot,
};
use noctipede_core::{ProbeVerdict, ProxyHealthBoard, ProxyProber, ReadinessSource};

use crate::cache::{self, BOOTSTRAP_OK_TTL, OPERATIONAL_TTL};

#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub bootstrap_duration: Duration,
    pub min_active_i2p: usize,
    pub require_i2p_quorum: bool,
    pub refresh_deadline: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            bootstrap_duration: Duration::from_secs(1800),
            min_active_i2p: 5,
            require_i2p_quorum: true,
            refresh_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct EndpointEntry {
    verdict: Option<ProbeVerdict>,
    probed_at: Option<Instant>,
    successes: u64,
    failures: u64,
}

impl EndpointEntry {
    fn is_fresh(&self, bootstrap: bool) -> bool {
        match (&self.verdict, self.probed_at) {
            (Some(v), Some(at)) => cache::is_fresh(at.elapsed(), bootstrap, v.ok),
            _ => false,
        }
    }

    fn record(&mut self, verdict: ProbeVerdict) {
        if verdict.ok {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.verdict = Some(verdict);
        self.probed_at = Some(Instant::now());
    }

    fn ok(&self) -> bool {
        self.verdict.as_ref().map(|v| v.ok).unwrap_or(false)
    }
}

struct OracleState {
    tor: EndpointEntry,
    i2p_http: EndpointEntry,
    internal: Vec<(String, EndpointEntry)>,
}

/// Aggregates probe verdicts into the current readiness snapshot.
///
/// Per-endpoint cache entries are validated against the TTL applicable to
/// their own last outcome, so a failure cached early in bootstrap cannot
/// outlive the failed-endpoint retry interval. Snapshots are replaced
/// wholesale through a watch channel; readers never see a torn one. The
/// oracle itself never fails. An all-error snapshot is a normal output.
pub struct ReadinessOracle {
    prober: Arc<dyn ProxyProber>,
    board: Arc<ProxyHealthBoard>,
    settings: OracleSettings,
    started_at: Instant,
    state: Mutex<OracleState>,
    /// Coalesces refresh triggers: one probe fan-out in flight at a time,
    /// latecomers wait for it and then observe the fresh state.
    refresh_gate: Mutex<()>,
    tx: watch::Sender<Arc<ReadinessSnapshot>>,
    rx: watch::Receiver<Arc<ReadinessSnapshot>>,
}

impl ReadinessOracle {
    pub fn new(
        prober: Arc<dyn ProxyProber>,
        internal_endpoints: &[String],
        board: Arc<ProxyHealthBoard>,
        settings: OracleSettings,
    ) -> Self {
        let started_at = Instant::now();
        let initial = ReadinessSnapshot::initial(
            settings.min_active_i2p,
            BootstrapInfo {
                bootstrap_mode: true,
                system_age_seconds: 0.0,
                bootstrap_remaining_seconds: settings.bootstrap_duration.as_secs_f64(),
                expected_full_readiness_seconds: settings.bootstrap_duration.as_secs() as i64,
            },
        );
        let (tx, rx) = watch::channel(Arc::new(initial));
        let internal = internal_endpoints
            .iter()
            .map(|name| (name.clone(), EndpointEntry::default()))
            .collect();
        Self {
            prober,
            board,
            settings,
            started_at,
            state: Mutex::new(OracleState {
                tor: EndpointEntry::default(),
                i2p_http: EndpointEntry::default(),
                internal,
            }),
            refresh_gate: Mutex::new(()),
            tx,
            rx,
        }
    }

    fn in_bootstrap(&self) -> bool {
        cache::in_bootstrap(self.started_at.elapsed(), self.settings.bootstrap_duration)
    }

    fn bootstrap_info(&self) -> BootstrapInfo {
        let age = self.started_at.elapsed();
        let remaining = self.settings.bootstrap_duration.saturating_sub(age);
        BootstrapInfo {
            bootstrap_mode: cache::in_bootstrap(age, self.settings.bootstrap_duration),
            system_age_seconds: age.as_secs_f64(),
            bootstrap_remaining_seconds: remaining.as_secs_f64(),
            expected_full_readiness_seconds: remaining.as_secs() as i64,
        }
    }

    async fn needs_refresh(&self) -> bool {
        let bootstrap = self.in_bootstrap();
        let state = self.state.lock().await;
        !state.tor.is_fresh(bootstrap)
            || !state.i2p_http.is_fresh(bootstrap)
            || state.internal.iter().any(|(_, e)| !e.is_fresh(bootstrap))
    }

    /// Probe whatever is stale and publish a new snapshot. Concurrent
    /// callers coalesce behind one fan-out.
    pub async fn refresh_if_stale(&self) {
        if !self.needs_refresh().await {
            return;
        }
        let _guard = self.refresh_gate.lock().await;
        if !self.needs_refresh().await {
            return;
        }
        self.refresh_locked().await;
    }

    async fn refresh_locked(&self) {
        let bootstrap = self.in_bootstrap();
        let (probe_tor, probe_i2p, stale_internal) = {
            let state = self.state.lock().await;
            (
                !state.tor.is_fresh(bootstrap),
                !state.i2p_http.is_fresh(bootstrap),
                state
                    .internal
                    .iter()
                    .filter(|(_, e)| !e.is_fresh(bootstrap))
                    .map(|(name, _)| name.clone())
                    .collect::<Vec<_>>(),
            )
        };

        let deadline = tokio::time::Instant::now() + self.settings.refresh_deadline;

        // One task per endpoint plus the two plane-level probes, all bounded
        // by the fan-out deadline.
        let tor_task = probe_tor.then(|| {
            let prober = Arc::clone(&self.prober);
            tokio::spawn(async move { prober.probe_tor_socks().await })
        });
        let i2p_task = probe_i2p.then(|| {
            let prober = Arc::clone(&self.prober);
            tokio::spawn(async move { prober.probe_i2p_http().await })
        });
        let internal_tasks: Vec<(String, JoinHandle<ProbeVerdict>)> = stale_internal
            .into_iter()
            .map(|endpoint| {
                let prober = Arc::clone(&self.prober);
                let name = endpoint.clone();
                (
                    endpoint,
                    tokio::spawn(async move { prober.probe_i2p_internal(&name).await }),
                )
            })
            .collect();

        async fn collect(
            handle: JoinHandle<ProbeVerdict>,
            deadline: tokio::time::Instant,
        ) -> ProbeVerdict {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(e)) => ProbeVerdict::error(format!("probe task failed: {e}")),
                Err(_) => ProbeVerdict::error("probe missed the refresh deadline"),
            }
        }

        let tor_verdict = match tor_task {
            Some(handle) => Some(collect(handle, deadline).await),
            None => None,
        };
        let i2p_verdict = match i2p_task {
            Some(handle) => Some(collect(handle, deadline).await),
            None => None,
        };
        let mut internal_verdicts = Vec::with_capacity(internal_tasks.len());
        for (endpoint, handle) in internal_tasks {
            internal_verdicts.push((endpoint, collect(handle, deadline).await));
        }

        let snapshot = {
            let mut state = self.state.lock().await;
            if let Some(verdict) = tor_verdict {
                state.tor.record(verdict);
            }
            if let Some(verdict) = i2p_verdict {
                state.i2p_http.record(verdict);
            }
            for (endpoint, verdict) in internal_verdicts {
                self.board.mark(&endpoint, verdict.ok);
                if let Some((_, entry)) = state.internal.iter_mut().find(|(n, _)| n == &endpoint) {
                    entry.record(verdict);
                    debug!(
                        endpoint = %endpoint,
                        ok = entry.ok(),
                        successes = entry.successes,
                        failures = entry.failures,
                        "internal proxy probed"
                    );
                }
            }
            self.build_snapshot(&state)
        };

        info!(summary = %snapshot.readiness_summary, "readiness snapshot published");
        self.tx.send_replace(Arc::new(snapshot));
    }

    fn build_snapshot(&self, state: &OracleState) -> ReadinessSnapshot {
        let bootstrap_info = self.bootstrap_info();

        let tor_ok = state.tor.ok();
        let tor = PlaneStatus::from_verdict(
            tor_ok,
            state
                .tor
                .verdict
                .as_ref()
                .map(|v| v.detail.as_str())
                .unwrap_or("not probed yet"),
        );

        let proxy_working = state.i2p_http.ok();

        let mut details = BTreeMap::new();
        let mut active_count = 0;
        for (name, entry) in &state.internal {
            let ok = entry.ok();
            if ok {
                active_count += 1;
            }
            details.insert(
                name.clone(),
                InternalProxyDetail {
                    status: if ok { "ok" } else { "error" }.to_string(),
                    successful_sites: entry
                        .verdict
                        .as_ref()
                        .map(|v| v.successful_sites.clone())
                        .unwrap_or_default(),
                },
            );
        }

        let sufficient = active_count >= self.settings.min_active_i2p;
        let quorum_leg = sufficient || !self.settings.require_i2p_quorum;
        let ready_for_crawling = tor_ok && proxy_working && quorum_leg;

        let readiness_summary = format!(
            "{}: tor={} i2p_proxy={} internal={}/{}{}",
            if ready_for_crawling { "ready" } else { "not ready" },
            if tor_ok { "ok" } else { "error" },
            if proxy_working { "ok" } else { "error" },
            active_count,
            self.settings.min_active_i2p,
            if bootstrap_info.bootstrap_mode {
                " (bootstrap)"
            } else {
                ""
            },
        );

        ReadinessSnapshot {
            ready_for_crawling,
            tor,
            i2p: I2pStatus {
                proxy_working,
                connectivity: proxy_working || active_count > 0,
                internal_proxies: InternalProxySummary {
                    active_count,
                    minimum_required: self.settings.min_active_i2p,
                    sufficient,
                    details,
                },
            },
            bootstrap_info,
            readiness_summary,
            produced_at: Instant::now(),
        }
    }

    /// Background refresher at the shortest TTL in use.
    pub fn spawn_refresher(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let tick = if self.in_bootstrap() {
                    BOOTSTRAP_OK_TTL
                } else {
                    OPERATIONAL_TTL
                };
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {
                        self.refresh_if_stale().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("readiness refresher shutting down");
                        break;
                    }
                }
            }
        })
    }

    #[cfg(test)]
    async fn invalidate_all(&self) {
        let mut state = self.state.lock().await;
        state.tor.probed_at = None;
        state.i2p_http.probed_at = None;
        for (_, entry) in state.internal.iter_mut() {
            entry.probed_at = None;
        }
    }
}

#[async_trait]
impl ReadinessSource for ReadinessOracle {
    fn snapshot(&self) -> Arc<ReadinessSnapshot> {
        self.rx.borrow().clone()
    }

    async fn fresh_snapshot(&self, max_wait: Duration) -> Arc<ReadinessSnapshot> {
        let _ = tokio::time::timeout(max_wait, self.refresh_if_stale()).await;
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeProber {
        tor_ok: AtomicBool,
        i2p_ok: AtomicBool,
        internal_ok: Mutex<HashMap<String, bool>>,
        tor_probes: AtomicUsize,
    }

    impl FakeProber {
        fn new(tor_ok: bool, i2p_ok: bool, internal: &[(&str, bool)]) -> Arc<Self> {
            Arc::new(Self {
                tor_ok: AtomicBool::new(tor_ok),
                i2p_ok: AtomicBool::new(i2p_ok),
                internal_ok: Mutex::new(
                    internal
                        .iter()
                        .map(|(n, ok)| (n.to_string(), *ok))
                        .collect(),
                ),
                tor_probes: AtomicUsize::new(0),
            })
        }

        async fn set_internal(&self, endpoint: &str, ok: bool) {
            self.internal_ok.lock().await.insert(endpoint.to_string(), ok);
        }
    }

    #[async_trait]
    impl ProxyProber for FakeProber {
        async fn probe_tor_socks(&self) -> ProbeVerdict {
            self.tor_probes.fetch_add(1, Ordering::SeqCst);
            if self.tor_ok.load(Ordering::SeqCst) {
                ProbeVerdict::ok("tor exit confirmed (198.51.100.7)")
            } else {
                ProbeVerdict::error("socks endpoint unreachable")
            }
        }

        async fn probe_i2p_http(&self) -> ProbeVerdict {
            if self.i2p_ok.load(Ordering::SeqCst) {
                ProbeVerdict::ok("stats.i2p reachable")
            } else {
                ProbeVerdict::error("proxy fetch failed")
            }
        }

        async fn probe_i2p_internal(&self, endpoint: &str) -> ProbeVerdict {
            if *self.internal_ok.lock().await.get(endpoint).unwrap_or(&false) {
                let mut v = ProbeVerdict::ok("1/5 probe sites reachable");
                v.successful_sites = vec!["stats.i2p".to_string()];
                v
            } else {
                ProbeVerdict::error("no probe sites reachable")
            }
        }
    }

    fn endpoints(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn settings(min_active: usize) -> OracleSettings {
        OracleSettings {
            min_active_i2p: min_active,
            refresh_deadline: Duration::from_secs(5),
            ..OracleSettings::default()
        }
    }

    #[tokio::test]
    async fn quorum_edge_flips_within_one_refresh() {
        let prober = FakeProber::new(true, true, &[("a.i2p", true), ("b.i2p", false), ("c.i2p", false)]);
        let board = Arc::new(ProxyHealthBoard::new());
        let oracle = ReadinessOracle::new(
            prober.clone(),
            &endpoints(&["a.i2p", "b.i2p", "c.i2p"]),
            board.clone(),
            settings(2),
        );

        oracle.refresh_if_stale().await;
        let snap = oracle.snapshot();
        assert!(!snap.i2p.internal_proxies.sufficient);
        assert_eq!(snap.i2p.internal_proxies.active_count, 1);
        assert!(!snap.ready_for_crawling);
        assert!(board.is_failed("b.i2p"));

        prober.set_internal("b.i2p", true).await;
        oracle.invalidate_all().await;
        oracle.refresh_if_stale().await;

        let snap = oracle.snapshot();
        assert!(snap.i2p.internal_proxies.sufficient);
        assert_eq!(snap.i2p.internal_proxies.active_count, 2);
        assert!(snap.ready_for_crawling);
        assert!(!board.is_failed("b.i2p"));
    }

    #[tokio::test]
    async fn failed_endpoint_recovers_after_invalidation() {
        // The failure cached during bootstrap must not survive once the
        // endpoint's entry goes stale and the endpoint comes up.
        let prober = FakeProber::new(false, false, &[("a.i2p", false)]);
        let oracle = ReadinessOracle::new(
            prober.clone(),
            &endpoints(&["a.i2p"]),
            Arc::new(ProxyHealthBoard::new()),
            settings(1),
        );

        oracle.refresh_if_stale().await;
        assert!(!oracle.snapshot().ready_for_crawling);

        prober.tor_ok.store(true, Ordering::SeqCst);
        prober.i2p_ok.store(true, Ordering::SeqCst);
        prober.set_internal("a.i2p", true).await;
        oracle.invalidate_all().await;
        oracle.refresh_if_stale().await;

        let snap = oracle.snapshot();
        assert!(snap.ready_for_crawling, "{}", snap.readiness_summary);
        assert_eq!(
            snap.i2p.internal_proxies.details["a.i2p"].successful_sites,
            vec!["stats.i2p"]
        );
    }

    #[tokio::test]
    async fn concurrent_triggers_coalesce_into_one_fanout() {
        let prober = FakeProber::new(true, true, &[("a.i2p", true)]);
        let oracle = Arc::new(ReadinessOracle::new(
            prober.clone(),
            &endpoints(&["a.i2p"]),
            Arc::new(ProxyHealthBoard::new()),
            settings(1),
        ));

        let a = {
            let oracle = Arc::clone(&oracle);
            tokio::spawn(async move { oracle.refresh_if_stale().await })
        };
        let b = {
            let oracle = Arc::clone(&oracle);
            tokio::spawn(async move { oracle.refresh_if_stale().await })
        };
        let _ = a.await;
        let _ = b.await;

        assert_eq!(prober.tor_probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quorum_leg_can_be_relaxed_but_is_still_reported() {
        let prober = FakeProber::new(true, true, &[("a.i2p", false)]);
        let oracle = ReadinessOracle::new(
            prober,
            &endpoints(&["a.i2p"]),
            Arc::new(ProxyHealthBoard::new()),
            OracleSettings {
                require_i2p_quorum: false,
                min_active_i2p: 1,
                refresh_deadline: Duration::from_secs(5),
                ..OracleSettings::default()
            },
        );
        oracle.refresh_if_stale().await;
        let snap = oracle.snapshot();
        assert!(snap.ready_for_crawling);
        assert!(!snap.i2p.internal_proxies.sufficient);
    }

    #[tokio::test]
    async fn summary_names_the_failing_planes() {
        let prober = FakeProber::new(false, true, &[("a.i2p", true)]);
        let oracle = ReadinessOracle::new(
            prober,
            &endpoints(&["a.i2p"]),
            Arc::new(ProxyHealthBoard::new()),
            settings(1),
        );
        oracle.refresh_if_stale().await;
        let snap = oracle.snapshot();
        assert!(!snap.ready_for_crawling);
        assert!(snap.readiness_summary.starts_with("not ready"));
        assert!(snap.readiness_summary.contains("tor=error"));
    }
}
