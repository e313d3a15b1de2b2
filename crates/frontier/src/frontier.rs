use std::collections::{HashSet, VecDeque};

use tracing::trace;
use url::Url;

use noctipede_core::{ExtractedLink, Network};

use crate::normalize_url;

#[derive(Debug, Clone)]
pub struct FrontierLimits {
    pub max_links_per_page: usize,
    pub max_queue_size: usize,
    pub max_depth: u32,
    pub max_offsite_depth: u32,
}

impl Default for FrontierLimits {
    fn default() -> Self {
        Self {
            max_links_per_page: 50,
            max_queue_size: 500,
            max_depth: 10,
            max_offsite_depth: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    /// Hops away from the site's own host. 0 while on the site.
    pub offsite_depth: u32,
}

/// Intra-site URL frontier, drained by the single worker holding the site.
/// Deduplication is by normalized URL; links never leave the site's plane.
pub struct SiteFrontier {
    site_host: String,
    network: Network,
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    limits: FrontierLimits,
    dropped: u64,
}

impl SiteFrontier {
    pub fn new(root: &Url, limits: FrontierLimits) -> Self {
        let mut frontier = Self {
            site_host: root.host_str().unwrap_or("").to_string(),
            network: Network::of(root),
            queue: VecDeque::new(),
            seen: HashSet::new(),
            limits,
            dropped: 0,
        };
        frontier.seen.insert(normalize_url(root));
        frontier.queue.push_back(FrontierEntry {
            url: root.clone(),
            depth: 0,
            offsite_depth: 0,
        });
        frontier
    }

    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Enqueue links discovered on a page, bounded by the per-page cap, the
    /// queue cap, and the depth caps. Returns how many were accepted.
    pub fn push_links(&mut self, parent: &FrontierEntry, links: &[ExtractedLink]) -> usize {
        let depth = parent.depth + 1;
        if depth > self.limits.max_depth {
            return 0;
        }

        let mut added = 0;
        for link in links {
            if added >= self.limits.max_links_per_page {
                break;
            }
            if self.queue.len() >= self.limits.max_queue_size {
                self.dropped += 1;
                continue;
            }
            let Ok(url) = Url::parse(&link.url) else {
                continue;
            };
            if Network::of(&url) != self.network {
                continue;
            }
            let host = url.host_str().unwrap_or("");
            let offsite_depth = if host == self.site_host {
                0
            } else {
                parent.offsite_depth + 1
            };
            if offsite_depth > self.limits.max_offsite_depth {
                continue;
            }
            let key = normalize_url(&url);
            if !self.seen.insert(key) {
                continue;
            }
            trace!(url = %url, depth, offsite_depth, "frontier enqueue");
            self.queue.push_back(FrontierEntry {
                url,
                depth,
                offsite_depth,
            });
            added += 1;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Url {
        Url::parse("http://site.onion/").unwrap()
    }

    fn link(url: &str) -> ExtractedLink {
        let parsed = Url::parse(url).unwrap();
        ExtractedLink {
            network: Network::of(&parsed),
            url: url.to_string(),
            anchor_text: None,
            is_external: false,
        }
    }

    #[test]
    fn root_is_the_first_entry() {
        let mut frontier = SiteFrontier::new(&root(), FrontierLimits::default());
        let entry = frontier.pop().unwrap();
        assert_eq!(entry.url.as_str(), "http://site.onion/");
        assert_eq!(entry.depth, 0);
        assert!(frontier.is_empty());
    }

    #[test]
    fn dedup_is_by_normalized_url() {
        let mut frontier = SiteFrontier::new(&root(), FrontierLimits::default());
        let parent = frontier.pop().unwrap();
        let added = frontier.push_links(
            &parent,
            &[
                link("http://site.onion/a"),
                link("http://site.onion/a/"),
                link("http://site.onion/a#frag"),
                link("http://site.onion/b"),
            ],
        );
        assert_eq!(added, 2);
    }

    #[test]
    fn per_page_cap_applies() {
        let limits = FrontierLimits {
            max_links_per_page: 3,
            ..FrontierLimits::default()
        };
        let mut frontier = SiteFrontier::new(&root(), limits);
        let parent = frontier.pop().unwrap();
        let links: Vec<ExtractedLink> = (0..10)
            .map(|i| link(&format!("http://site.onion/p{i}")))
            .collect();
        assert_eq!(frontier.push_links(&parent, &links), 3);
    }

    #[test]
    fn queue_cap_drops_overflow() {
        let limits = FrontierLimits {
            max_links_per_page: 100,
            max_queue_size: 5,
            ..FrontierLimits::default()
        };
        let mut frontier = SiteFrontier::new(&root(), limits);
        let parent = frontier.pop().unwrap();
        let links: Vec<ExtractedLink> = (0..10)
            .map(|i| link(&format!("http://site.onion/p{i}")))
            .collect();
        let added = frontier.push_links(&parent, &links);
        assert_eq!(added, 5);
        assert!(frontier.dropped() > 0);
    }

    #[test]
    fn depth_cap_stops_descent() {
        let limits = FrontierLimits {
            max_depth: 2,
            ..FrontierLimits::default()
        };
        let mut frontier = SiteFrontier::new(&root(), limits);
        let deep_parent = FrontierEntry {
            url: root(),
            depth: 2,
            offsite_depth: 0,
        };
        assert_eq!(
            frontier.push_links(&deep_parent, &[link("http://site.onion/deeper")]),
            0
        );
    }

    #[test]
    fn links_never_leave_the_plane() {
        let mut frontier = SiteFrontier::new(&root(), FrontierLimits::default());
        let parent = frontier.pop().unwrap();
        let added = frontier.push_links(
            &parent,
            &[
                link("http://other.i2p/"),
                link("https://example.com/"),
                link("http://other.onion/"),
            ],
        );
        // Only the same-plane onion link survives, as offsite depth 1.
        assert_eq!(added, 1);
        let entry = frontier.pop().unwrap();
        assert_eq!(entry.url.as_str(), "http://other.onion/");
        assert_eq!(entry.offsite_depth, 1);
    }

    #[test]
    fn offsite_depth_caps_cross_host_descent() {
        let mut frontier = SiteFrontier::new(&root(), FrontierLimits::default());
        let offsite_parent = FrontierEntry {
            url: Url::parse("http://other.onion/page").unwrap(),
            depth: 1,
            offsite_depth: 1,
        };
        // Further away is rejected, back home is accepted.
        let added = frontier.push_links(
            &offsite_parent,
            &[
                link("http://third.onion/"),
                link("http://site.onion/return"),
            ],
        );
        assert_eq!(added, 1);
        let entry = frontier.pop().unwrap();
        assert_eq!(entry.url.as_str(), "http://site.onion/return");
        assert_eq!(entry.offsite_depth, 0);
    }
}
