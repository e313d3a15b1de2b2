use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use warp::Filter;

use noctipede_core::types::ReadinessSource;
use noctipede_core::CrawlError;

use crate::oracle::ReadinessOracle;

/// How long a request may wait on a coalesced refresh before answering
/// with whatever snapshot is current. Stale-but-honest beats hung.
const RESPONSE_REFRESH_DEADLINE: Duration = Duration::from_secs(2);

async fn readiness_handler(
    oracle: Arc<ReadinessOracle>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let snap = oracle.fresh_snapshot(RESPONSE_REFRESH_DEADLINE).await;
    let mut value = serde_json::to_value(&*snap).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "cache_age_seconds".to_string(),
            serde_json::json!(snap.cache_age_seconds()),
        );
    }
    Ok(warp::reply::json(&value))
}

pub fn routes(
    oracle: Arc<ReadinessOracle>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "readiness")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&oracle)))
        .and_then(readiness_handler)
}

/// Bind and serve the readiness endpoint. A bind failure is returned to the
/// caller, which treats it as fatal.
pub fn serve(
    oracle: Arc<ReadinessOracle>,
    bind_addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, CrawlError> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| CrawlError::Config(format!("invalid readiness bind address {bind_addr}: {e}")))?;

    let (bound, fut) = warp::serve(routes(oracle))
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown.recv().await;
        })
        .map_err(|e| CrawlError::Config(format!("failed to bind readiness endpoint: {e}")))?;

    info!(addr = %bound, "readiness endpoint listening");
    Ok(tokio::spawn(fut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use noctipede_core::{ProbeVerdict, ProxyHealthBoard, ProxyProber};

    use crate::oracle::OracleSettings;

    struct AllOkProber;

    #[async_trait]
    impl ProxyProber for AllOkProber {
        async fn probe_tor_socks(&self) -> ProbeVerdict {
            ProbeVerdict::ok("tor exit confirmed (198.51.100.7)")
        }
        async fn probe_i2p_http(&self) -> ProbeVerdict {
            ProbeVerdict::ok("stats.i2p reachable")
        }
        async fn probe_i2p_internal(&self, _endpoint: &str) -> ProbeVerdict {
            let mut v = ProbeVerdict::ok("2/5 probe sites reachable");
            v.successful_sites = vec!["stats.i2p".to_string(), "reg.i2p".to_string()];
            v
        }
    }

    #[tokio::test]
    async fn endpoint_reports_snapshot_with_cache_age() {
        let endpoints = vec!["notbob.i2p".to_string(), "purokishi.i2p".to_string()];
        let oracle = Arc::new(ReadinessOracle::new(
            Arc::new(AllOkProber),
            &endpoints,
            Arc::new(ProxyHealthBoard::new()),
            OracleSettings {
                min_active_i2p: 2,
                ..OracleSettings::default()
            },
        ));

        let filter = routes(oracle);
        let resp = warp::test::request()
            .method("GET")
            .path("/api/readiness")
            .reply(&filter)
            .await;

        assert_eq!(resp.status(), 200);
        let value: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(value["ready_for_crawling"], true);
        assert_eq!(value["tor"]["status"], "ok");
        assert_eq!(value["i2p"]["proxy_working"], true);
        assert_eq!(value["i2p"]["internal_proxies"]["active_count"], 2);
        assert_eq!(value["i2p"]["internal_proxies"]["sufficient"], true);
        assert_eq!(
            value["i2p"]["internal_proxies"]["details"]["notbob.i2p"]["status"],
            "ok"
        );
        assert!(value["bootstrap_info"]["bootstrap_mode"].is_boolean());
        assert!(value["cache_age_seconds"].is_number());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let oracle = Arc::new(ReadinessOracle::new(
            Arc::new(AllOkProber),
            &[],
            Arc::new(ProxyHealthBoard::new()),
            OracleSettings::default(),
        ));
        let filter = routes(oracle);
        let resp = warp::test::request()
            .method("GET")
            .path("/api/other")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), 404);
    }
}
