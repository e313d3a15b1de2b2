pub mod frontier;
pub mod gate;

use url::Url;

pub use frontier::{FrontierEntry, FrontierLimits, SiteFrontier};
pub use gate::{LeasedSite, RecencyPolicy, SiteGate, SiteOutcome};

/// Normalize a URL for identity: drop the fragment, strip the trailing
/// slash, lowercase.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(&path[..path.len() - 1]);
    }
    normalized.to_string().to_lowercase()
}
