use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use thiserror::Error;
use url::Url;

use noctipede_core::{CrawlError, FetchConfig, FetchResponse, Network};

#[derive(Error, Debug)]
pub(crate) enum RedirectRule {
    #[error("too many redirects")]
    TooMany,
    #[error("cross-plane redirect")]
    CrossPlane,
}

pub(crate) enum RedirectDecision {
    Follow,
    TooMany,
    CrossPlane,
}

/// Redirect rule shared by every transport: bounded chain length, and the
/// chain may never leave the plane it started on.
pub(crate) fn redirect_decision(previous: &[Url], next: &Url, cap: usize) -> RedirectDecision {
    if previous.len() > cap {
        return RedirectDecision::TooMany;
    }
    let start_plane = previous.first().map(Network::of);
    match start_plane {
        Some(plane) if plane != Network::of(next) => RedirectDecision::CrossPlane,
        _ => RedirectDecision::Follow,
    }
}

pub(crate) fn plane_redirect_policy(cap: usize) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        match redirect_decision(attempt.previous(), attempt.url(), cap) {
            RedirectDecision::Follow => attempt.follow(),
            RedirectDecision::TooMany => attempt.error(RedirectRule::TooMany),
            RedirectDecision::CrossPlane => attempt.error(RedirectRule::CrossPlane),
        }
    })
}

pub(crate) fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers
}

/// Build a proxied client with the shared timeout/redirect/header settings.
/// `proxy_url` is `socks5h://host:port` for Tor and `http://host[:port]`
/// for I2P proxies.
pub(crate) fn build_client(proxy_url: &str, config: &FetchConfig) -> Result<reqwest::Client, CrawlError> {
    let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| CrawlError::Proxy(e.to_string()))?;
    reqwest::Client::builder()
        .proxy(proxy)
        .cookie_store(true)
        .user_agent(&config.user_agent)
        .default_headers(default_headers())
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .redirect(plane_redirect_policy(config.max_redirects))
        .build()
        .map_err(|e| CrawlError::TransportUnavailable(e.to_string()))
}

fn error_chain_contains(err: &reqwest::Error, needle: &str) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = source {
        if cause.to_string().contains(needle) {
            return true;
        }
        source = cause.source();
    }
    false
}

pub(crate) fn map_reqwest_error(err: reqwest::Error, config: &FetchConfig) -> CrawlError {
    if err.is_timeout() {
        CrawlError::Timeout(config.timeout)
    } else if err.is_redirect() {
        if error_chain_contains(&err, "cross-plane") {
            CrawlError::CrossPlaneRedirect("origin".to_string())
        } else {
            CrawlError::TooManyRedirects(config.max_redirects)
        }
    } else if err.is_connect() {
        CrawlError::Proxy(err.to_string())
    } else {
        CrawlError::TransportUnavailable(err.to_string())
    }
}

/// Read the body up to the configured cap. Oversize responses are truncated
/// and flagged, not failed.
async fn read_body_capped(
    resp: &mut reqwest::Response,
    cap: usize,
    config: &FetchConfig,
) -> Result<(Vec<u8>, bool), CrawlError> {
    let mut body: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| map_reqwest_error(e, config))?
    {
        if body.len() + chunk.len() > cap {
            let take = cap - body.len();
            body.extend_from_slice(&chunk[..take]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, truncated))
}

/// One GET through an already-configured client. Shared by every transport.
pub(crate) async fn execute_fetch(
    client: &reqwest::Client,
    url: &Url,
    config: &FetchConfig,
    transport: &str,
) -> Result<FetchResponse, CrawlError> {
    let start = Instant::now();

    let resp = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, config))?;

    let status = resp.status().as_u16();
    let final_url = Url::parse(resp.url().as_str()).unwrap_or_else(|_| url.clone());

    let mut headers = HashMap::new();
    for (k, v) in resp.headers() {
        if let Ok(val) = v.to_str() {
            headers.insert(k.as_str().to_string(), val.to_string());
        }
    }
    let content_type = headers.get("content-type").cloned();

    let mut resp = resp;
    let (body, truncated) = read_body_capped(&mut resp, config.max_body_size, config).await?;

    Ok(FetchResponse {
        url: url.clone(),
        final_url,
        status,
        headers,
        body,
        content_type,
        truncated,
        transport: transport.to_string(),
        fetched_at: chrono::Utc::now(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}
