use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use url::Url;

use noctipede_core::{Network, Site, SiteStatus};

use crate::normalize_url;

#[derive(Debug, Clone)]
pub struct RecencyPolicy {
    pub skip_recent: bool,
    pub window: chrono::Duration,
    /// Failed sites come back on the next pass, not in a tight loop.
    pub failed_revisit: chrono::Duration,
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self {
            skip_recent: true,
            window: chrono::Duration::hours(24),
            failed_revisit: chrono::Duration::seconds(60),
        }
    }
}

/// Handle for a site a worker currently holds. Completion goes back
/// through [`SiteGate::complete`] with the same key.
#[derive(Debug, Clone)]
pub struct LeasedSite {
    pub key: String,
    pub url: Url,
    pub network: Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteOutcome {
    Done,
    Failed,
}

struct GateInner {
    sites: HashMap<String, Site>,
    order: Vec<String>,
}

/// Holds the seed set and serializes site state transitions. Dispatch is in
/// insertion order; a site is held by at most one worker at any instant.
pub struct SiteGate {
    inner: Mutex<GateInner>,
    notify: Notify,
    policy: RecencyPolicy,
}

impl SiteGate {
    pub fn new(policy: RecencyPolicy) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                sites: HashMap::new(),
                order: Vec::new(),
            }),
            notify: Notify::new(),
            policy,
        }
    }

    /// Register a seed. Returns false if the normalized URL is already known.
    pub async fn add_seed(&self, url: Url) -> bool {
        let key = normalize_url(&url);
        let mut inner = self.inner.lock().await;
        if inner.sites.contains_key(&key) {
            return false;
        }
        inner.order.push(key.clone());
        inner.sites.insert(key.clone(), Site::new(key, url));
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    fn dispatchable(site: &Site, now: DateTime<Utc>, policy: &RecencyPolicy) -> bool {
        match site.status {
            SiteStatus::InProgress => false,
            SiteStatus::Pending => true,
            SiteStatus::Failed => match site.last_attempt_at {
                Some(at) => now - at >= policy.failed_revisit,
                None => true,
            },
            SiteStatus::Done => match site.last_crawled_at {
                Some(at) if policy.skip_recent => now - at >= policy.window,
                _ => true,
            },
        }
    }

    /// Lease the first dispatchable site, marking it in-progress.
    pub async fn try_lease(&self) -> Option<LeasedSite> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner.order.clone();
        for key in keys {
            if let Some(site) = inner.sites.get_mut(&key) {
                if Self::dispatchable(site, now, &self.policy) {
                    site.status = SiteStatus::InProgress;
                    debug!(site = %site.key, "site leased");
                    return Some(LeasedSite {
                        key: site.key.clone(),
                        url: site.url.clone(),
                        network: site.network,
                    });
                }
            }
        }
        None
    }

    /// Lease the next dispatchable site, waiting at most `wait` for one to
    /// become available. The bounded wait keeps shutdown responsive.
    pub async fn next_site(&self, wait: Duration) -> Option<LeasedSite> {
        if let Some(lease) = self.try_lease().await {
            return Some(lease);
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        self.try_lease().await
    }

    /// Release a held site with its outcome.
    pub async fn complete(&self, key: &str, outcome: SiteOutcome) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        if let Some(site) = inner.sites.get_mut(key) {
            match outcome {
                SiteOutcome::Done => {
                    site.status = SiteStatus::Done;
                    site.last_crawled_at = Some(now);
                }
                SiteOutcome::Failed => {
                    site.status = SiteStatus::Failed;
                    site.error_count += 1;
                }
            }
            site.last_attempt_at = Some(now);
            debug!(site = %key, ?outcome, "site released");
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn site_count(&self) -> usize {
        self.inner.lock().await.sites.len()
    }

    /// (pending, in_progress, done, failed) for progress logging.
    pub async fn status_counts(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.lock().await;
        let mut counts = (0, 0, 0, 0);
        for site in inner.sites.values() {
            match site.status {
                SiteStatus::Pending => counts.0 += 1,
                SiteStatus::InProgress => counts.1 += 1,
                SiteStatus::Done => counts.2 += 1,
                SiteStatus::Failed => counts.3 += 1,
            }
        }
        counts
    }
}
