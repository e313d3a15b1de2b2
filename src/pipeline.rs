use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use noctipede_core::{CrawlError, Fetcher, MediaKind, MediaQueue, PageRecord, PageSink};
use noctipede_frontier::{FrontierEntry, FrontierLimits, LeasedSite, SiteFrontier, SiteOutcome};
use noctipede_parser::parse_response;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frontier_limits: FrontierLimits,
    pub crawl_delay: Duration,
    pub max_pages_per_site: usize,
    pub image_formats: Vec<String>,
    pub sink_retries: u32,
    pub sink_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frontier_limits: FrontierLimits::default(),
            crawl_delay: Duration::from_secs(3),
            max_pages_per_site: 100,
            image_formats: vec![
                "webp".into(),
                "jpg".into(),
                "jpeg".into(),
                "png".into(),
                "gif".into(),
                "bmp".into(),
                "tiff".into(),
                "svg".into(),
            ],
            sink_retries: 3,
            sink_backoff: Duration::from_millis(500),
        }
    }
}

/// Everything a worker needs to turn a leased site into pages.
pub struct CrawlContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub pages: Arc<dyn PageSink>,
    pub media: Arc<dyn MediaQueue>,
    pub settings: PipelineSettings,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SitePassStats {
    pub pages_recorded: usize,
    pub errors: usize,
}

/// Drain one site's frontier until it is empty, the per-site budget is hit,
/// or the pass dies at the transport layer.
pub async fn crawl_site(
    ctx: &CrawlContext,
    lease: &LeasedSite,
    shutdown: &mut broadcast::Receiver<()>,
) -> (SiteOutcome, SitePassStats) {
    let mut frontier = SiteFrontier::new(&lease.url, ctx.settings.frontier_limits.clone());
    let mut stats = SitePassStats::default();

    while let Some(entry) = frontier.pop() {
        if stats.pages_recorded + stats.errors >= ctx.settings.max_pages_per_site {
            debug!(site = %lease.key, "per-site budget reached");
            break;
        }
        if shutdown.try_recv().is_ok() {
            debug!(site = %lease.key, "cancellation observed mid-site");
            break;
        }
        match fetch_one(ctx, lease, &entry, &mut frontier).await {
            Ok(status) => {
                stats.pages_recorded += 1;
                if status >= 400 {
                    debug!(url = %entry.url, status, "http error recorded, not retried");
                }
            }
            Err(e @ CrawlError::SinkUnavailable(_)) => {
                stats.errors += 1;
                warn!(site = %lease.key, "sink unavailable, yielding site: {}", e);
                break;
            }
            Err(e @ CrawlError::AllI2pProxiesExhausted { .. }) => {
                stats.errors += 1;
                warn!(site = %lease.key, "{}", e);
                break;
            }
            Err(e) => {
                stats.errors += 1;
                warn!(url = %entry.url, "fetch failed: {}", e);
            }
        }
    }

    let outcome = if stats.pages_recorded > 0 {
        SiteOutcome::Done
    } else {
        SiteOutcome::Failed
    };
    (outcome, stats)
}

/// One URL end to end: fetch, parse, persist, enqueue media, descend.
async fn fetch_one(
    ctx: &CrawlContext,
    lease: &LeasedSite,
    entry: &FrontierEntry,
    frontier: &mut SiteFrontier,
) -> Result<u16, CrawlError> {
    let resp = ctx.fetcher.fetch(&entry.url).await?;
    let page = parse_response(&resp, &lease.key, &ctx.settings.image_formats)?;
    let status = page.status_code;

    let media_refs: Vec<_> = page
        .media
        .iter()
        .filter(|m| m.kind == MediaKind::Image)
        .cloned()
        .collect();
    let links = page.links.clone();

    store_with_retry(ctx, page).await?;

    for media in media_refs {
        if let Err(e) = ctx.media.enqueue_media(media).await {
            debug!(url = %entry.url, "media enqueue failed: {}", e);
        }
    }

    // Error pages are recorded but not descended into.
    if status < 400 {
        let added = frontier.push_links(entry, &links);
        if added > 0 {
            debug!(url = %entry.url, added, queued = frontier.len(), "links enqueued");
        }
    }

    info!(
        url = %entry.url,
        status,
        transport = %resp.transport,
        elapsed_ms = resp.elapsed_ms,
        truncated = resp.truncated,
        "page fetched"
    );

    if !ctx.settings.crawl_delay.is_zero() {
        tokio::time::sleep(ctx.settings.crawl_delay).await;
    }
    Ok(status)
}

async fn store_with_retry(ctx: &CrawlContext, page: PageRecord) -> Result<(), CrawlError> {
    let mut attempt = 0u32;
    loop {
        match ctx.pages.store_page(page.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= ctx.settings.sink_retries {
                    return Err(e);
                }
                warn!(url = %page.url, attempt, "page sink rejected, backing off: {}", e);
                tokio::time::sleep(ctx.settings.sink_backoff).await;
            }
        }
    }
}
