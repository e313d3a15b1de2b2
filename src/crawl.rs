use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use noctipede_core::{AppConfig, FetchConfig, MediaQueue, ProxyHealthBoard, ReadinessSource};
use noctipede_frontier::{FrontierLimits, RecencyPolicy, SiteGate};
use noctipede_health::{server, OracleSettings, Prober, ReadinessOracle};
use noctipede_sinks::{media_queue::run_analysis_drain, AnalysisSettings, BoundedMediaQueue, PageWriter};
use noctipede_transport::{I2pClient, TorClient, TransportSelector};

use crate::pipeline::{self, CrawlContext, PipelineSettings};
use crate::seeds::{load_seed_file, DEFAULT_SEEDS};

/// How long a worker waits on the gate before re-checking for shutdown.
const GATE_WAIT: Duration = Duration::from_secs(2);
/// Dispatch pause while readiness is lost mid-run.
const NOT_READY_PAUSE: Duration = Duration::from_secs(5);

fn fetch_config(
    connect_timeout_seconds: u64,
    request_timeout_seconds: u64,
    max_body_size_mb: usize,
) -> FetchConfig {
    FetchConfig {
        connect_timeout: Duration::from_secs(connect_timeout_seconds),
        timeout: Duration::from_secs(request_timeout_seconds),
        max_body_size: max_body_size_mb * 1024 * 1024,
        ..FetchConfig::default()
    }
}

pub async fn run_crawl(
    config: AppConfig,
    seeds_path: Option<String>,
    single_seed: Option<String>,
) -> Result<()> {
    // --- seed collection; a missing seed file aborts ---
    let mut seed_urls: Vec<Url> = Vec::new();
    if let Some(s) = single_seed {
        seed_urls.push(Url::parse(&s)?);
    }
    if let Some(path) = seeds_path {
        seed_urls.extend(load_seed_file(&path)?);
    }
    if seed_urls.is_empty() {
        seed_urls.extend(DEFAULT_SEEDS.iter().filter_map(|s| Url::parse(s).ok()));
        info!("no seeds provided, using default seeds");
    }

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // --- transports share one proxy health board with the oracle ---
    let board = Arc::new(ProxyHealthBoard::new());
    let tor = TorClient::new(
        &config.tor.socks_addr(),
        fetch_config(
            config.tor.connect_timeout_seconds,
            config.tor.request_timeout_seconds,
            config.crawler.max_body_size_mb,
        ),
    )?;
    let i2p = I2pClient::new(
        &config.i2p.http_proxy_addr(),
        &config.i2p.internal_proxies,
        config.i2p.use_internal_proxies,
        Arc::clone(&board),
        fetch_config(
            config.i2p.connect_timeout_seconds,
            config.i2p.request_timeout_seconds,
            config.crawler.max_body_size_mb,
        ),
    )?;
    let selector = Arc::new(TransportSelector::new(tor, i2p));

    // --- readiness oracle + HTTP surface; bind failure is fatal ---
    let prober = Arc::new(Prober::new(
        &config.tor.socks_addr(),
        &config.i2p.http_proxy_addr(),
        &config.i2p.internal_proxies,
    )?);
    let oracle = Arc::new(ReadinessOracle::new(
        prober,
        &config.i2p.internal_proxies,
        Arc::clone(&board),
        OracleSettings {
            bootstrap_duration: Duration::from_secs(config.readiness.bootstrap_duration_seconds),
            min_active_i2p: config.readiness.min_active_i2p,
            require_i2p_quorum: config.readiness.require_i2p_quorum,
            refresh_deadline: Duration::from_secs(config.readiness.refresh_deadline_seconds),
        },
    ));
    let server_handle = server::serve(
        Arc::clone(&oracle),
        &config.readiness.bind_addr,
        shutdown_tx.subscribe(),
    )?;
    let refresher_handle = Arc::clone(&oracle).spawn_refresher(shutdown_tx.subscribe());

    // --- sinks ---
    let (page_sink, writer) = PageWriter::channel(
        &config.storage.data_dir,
        config.storage.page_channel_capacity,
    );
    let writer_handle = tokio::spawn(writer.run(shutdown_tx.subscribe()));
    let media_queue = Arc::new(BoundedMediaQueue::new(config.storage.ai_queue_max_size));
    let analysis_handle = tokio::spawn(run_analysis_drain(
        Arc::clone(&media_queue),
        AnalysisSettings::from(&config.analysis),
        shutdown_tx.subscribe(),
    ));

    // --- gate ---
    let gate = Arc::new(SiteGate::new(RecencyPolicy {
        skip_recent: config.crawler.skip_recent_crawls,
        window: chrono::Duration::hours(config.crawler.recent_crawl_hours as i64),
        failed_revisit: chrono::Duration::seconds(60),
    }));
    for url in seed_urls {
        gate.add_seed(url).await;
    }
    info!(sites = gate.site_count().await, "seeds loaded");

    // --- block on readiness before dispatching anything ---
    let poll = Duration::from_secs(config.readiness.poll_interval_seconds.clamp(1, 30));
    let refresh_wait = Duration::from_secs(config.readiness.refresh_deadline_seconds);
    loop {
        let snap = oracle.fresh_snapshot(refresh_wait).await;
        if snap.ready_for_crawling {
            info!(summary = %snap.readiness_summary, "network ready, starting crawl");
            break;
        }
        info!(summary = %snap.readiness_summary, "waiting for network readiness");
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = signal::ctrl_c() => {
                info!("shutdown before readiness was reached");
                let _ = shutdown_tx.send(());
                media_queue.close();
                // writer exits once every sender is gone
                drop(page_sink);
                let _ = writer_handle.await;
                let _ = analysis_handle.await;
                let _ = refresher_handle.await;
                let _ = server_handle.await;
                return Ok(());
            }
        }
    }

    // --- worker pool ---
    let worker_count = config.crawler.max_concurrent_crawlers;
    let ctx = Arc::new(CrawlContext {
        fetcher: selector,
        pages: Arc::new(page_sink),
        media: Arc::clone(&media_queue) as Arc<dyn MediaQueue>,
        settings: PipelineSettings {
            frontier_limits: FrontierLimits {
                max_links_per_page: config.crawler.max_links_per_page,
                max_queue_size: config.crawler.max_queue_size,
                max_depth: config.crawler.max_crawl_depth,
                max_offsite_depth: config.crawler.max_offsite_depth,
            },
            crawl_delay: Duration::from_secs(config.crawler.crawl_delay_seconds),
            max_pages_per_site: config.crawler.max_pages_per_site,
            image_formats: config.analysis.supported_image_formats.clone(),
            ..PipelineSettings::default()
        },
    });

    info!(worker_count, "spawning crawl workers");
    let mut worker_handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let ctx = Arc::clone(&ctx);
        let gate = Arc::clone(&gate);
        let oracle = Arc::clone(&oracle);
        let shutdown = shutdown_tx.subscribe();
        let fetch_shutdown = shutdown_tx.subscribe();
        worker_handles.push(tokio::spawn(worker_loop(
            worker_id,
            ctx,
            gate,
            oracle,
            shutdown,
            fetch_shutdown,
        )));
    }

    info!("press Ctrl+C to stop crawling ({worker_count} workers active)");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in worker_handles {
        let _ = handle.await;
    }
    let (pending, in_progress, done, failed) = gate.status_counts().await;
    info!(pending, in_progress, done, failed, "workers drained");

    media_queue.close();
    // last page-sink sender lives in the context; the writer drains and
    // exits once it is gone
    drop(ctx);
    let _ = writer_handle.await;
    let _ = analysis_handle.await;
    let _ = refresher_handle.await;
    let _ = server_handle.await;

    info!("shutdown complete");
    Ok(())
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<CrawlContext>,
    gate: Arc<SiteGate>,
    oracle: Arc<ReadinessOracle>,
    mut shutdown: broadcast::Receiver<()>,
    mut fetch_shutdown: broadcast::Receiver<()>,
) {
    info!(worker_id, "worker started");
    loop {
        // dispatch only against a snapshot that says the networks are up
        let snap = oracle.snapshot();
        if !snap.ready_for_crawling {
            warn!(worker_id, summary = %snap.readiness_summary, "readiness lost, pausing dispatch");
            tokio::select! {
                _ = tokio::time::sleep(NOT_READY_PAUSE) => continue,
                _ = shutdown.recv() => break,
            }
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            lease = gate.next_site(GATE_WAIT) => {
                let Some(lease) = lease else { continue };
                info!(worker_id, site = %lease.key, network = lease.network.as_str(), "site leased");
                let (outcome, stats) = pipeline::crawl_site(&ctx, &lease, &mut fetch_shutdown).await;
                gate.complete(&lease.key, outcome).await;
                if stats.errors > 0 {
                    warn!(
                        worker_id,
                        site = %lease.key,
                        pages = stats.pages_recorded,
                        errors = stats.errors,
                        ?outcome,
                        "site pass finished with errors"
                    );
                } else {
                    info!(
                        worker_id,
                        site = %lease.key,
                        pages = stats.pages_recorded,
                        ?outcome,
                        "site pass finished"
                    );
                }
            }
        }
    }
    info!(worker_id, "worker shutting down");
}
