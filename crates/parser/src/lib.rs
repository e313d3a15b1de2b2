pub mod html;

use chrono::Utc;
use sha2::{Digest, Sha256};

use noctipede_core::{CrawlError, FetchResponse, MediaKind, MediaRef, PageRecord};

pub use html::{parse_html, HtmlResult};

/// Hex sha256 of the raw body bytes.
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Whether a response should go through HTML extraction. A missing
/// content-type is treated as HTML, matching what eepsites actually serve.
pub fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
        .unwrap_or(true)
}

/// Turn a fetch response into a page record. HTML extraction failures are
/// not fatal: the body and hash are still recorded, extraction is skipped.
pub fn parse_response(
    resp: &FetchResponse,
    site_key: &str,
    image_formats: &[String],
) -> Result<PageRecord, CrawlError> {
    let hash = content_hash(&resp.body);
    let network = noctipede_core::Network::of(&resp.url);

    let mut record = PageRecord {
        site: site_key.to_string(),
        url: resp.url.to_string(),
        final_url: resp.final_url.to_string(),
        network,
        transport: resp.transport.clone(),
        status_code: resp.status,
        title: None,
        content_hash: hash,
        body: resp.body.clone(),
        links: Vec::new(),
        media: Vec::new(),
        truncated: resp.truncated,
        fetched_at: resp.fetched_at,
        elapsed_ms: resp.elapsed_ms,
    };

    if !is_html(resp.content_type.as_deref()) {
        return Ok(record);
    }

    let body_text = String::from_utf8_lossy(&resp.body);
    let parsed = html::parse_html(&body_text, &resp.final_url);

    record.title = parsed.title;
    record.links = parsed.links;
    record.media = parsed
        .media_urls
        .into_iter()
        .map(|url| MediaRef {
            kind: MediaKind::classify(&url, image_formats),
            page_url: resp.final_url.to_string(),
            discovered_at: Utc::now(),
            url,
        })
        .collect();

    Ok(record)
}
