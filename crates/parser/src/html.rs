use scraper::{Html, Selector};
use url::Url;

use noctipede_core::{ExtractedLink, Network};

pub struct HtmlResult {
    pub title: Option<String>,
    pub links: Vec<ExtractedLink>,
    pub media_urls: Vec<String>,
    pub meta_description: Option<String>,
    pub language: Option<String>,
}

pub fn parse_html(html_str: &str, base_url: &Url) -> HtmlResult {
    let document = Html::parse_document(html_str);
    let base_host = base_url.host_str().unwrap_or("");

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let links = extract_links(&document, base_url, base_host);
    let media_urls = extract_media(&document, base_url);

    let meta_description = selector("meta[name='description']")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("content").map(|s| s.to_string()));

    let language = selector("html")
        .and_then(|s| document.select(&s).next())
        .and_then(|el| el.value().attr("lang").map(|s| s.to_string()));

    HtmlResult {
        title,
        links,
        media_urls,
        meta_description,
        language,
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn extract_links(document: &Html, base_url: &Url, base_host: &str) -> Vec<ExtractedLink> {
    let Some(sel) = selector("a[href]") else {
        return vec![];
    };

    document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?;

            // Skip non-crawlable URL schemes
            if href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with("data:")
                || href.starts_with('#')
            {
                return None;
            }

            let resolved = base_url.join(href).ok()?;
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                return None;
            }
            let host = resolved.host_str().unwrap_or("");

            Some(ExtractedLink {
                network: Network::of(&resolved),
                url: resolved.to_string(),
                anchor_text: {
                    let t = el.text().collect::<String>().trim().to_string();
                    if t.is_empty() {
                        None
                    } else {
                        Some(t)
                    }
                },
                is_external: host != base_host,
            })
        })
        .collect()
}

/// Media candidates: images, audio/video sources, and explicit icons.
/// Relative references resolve against the final URL of the page.
fn extract_media(document: &Html, base_url: &Url) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |raw: &str| {
        if raw.starts_with("data:") {
            return;
        }
        if let Ok(resolved) = base_url.join(raw) {
            if resolved.scheme() == "http" || resolved.scheme() == "https" {
                let s = resolved.to_string();
                if !out.contains(&s) {
                    out.push(s);
                }
            }
        }
    };

    if let Some(sel) = selector("img[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push(src);
            }
        }
    }
    if let Some(sel) = selector("video[src], audio[src], source[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push(src);
            }
        }
    }
    if let Some(sel) = selector("link[rel='icon'][href], link[rel='shortcut icon'][href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                push(href);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://site.i2p/sub/index.html").unwrap()
    }

    #[test]
    fn resolves_relative_links_against_base() {
        let html = r#"<a href="a.html">a</a> <a href="/top">top</a>"#;
        let result = parse_html(html, &base());
        let urls: Vec<_> = result.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["http://site.i2p/sub/a.html", "http://site.i2p/top"]);
        assert!(result.links.iter().all(|l| !l.is_external));
        assert!(result.links.iter().all(|l| l.network == Network::I2p));
    }

    #[test]
    fn classifies_cross_plane_links() {
        let html = r#"
            <a href="http://abc.onion/x">onion</a>
            <a href="http://reg.i2p/">i2p</a>
            <a href="https://example.com/">clear</a>
        "#;
        let result = parse_html(html, &base());
        let nets: Vec<_> = result.links.iter().map(|l| l.network).collect();
        assert_eq!(nets, vec![Network::Tor, Network::I2p, Network::Clearnet]);
        assert!(result.links[0].is_external);
    }

    #[test]
    fn skips_non_crawlable_schemes() {
        let html = r##"
            <a href="mailto:x@y.z">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="#anchor">frag</a>
            <a href="ftp://host/file">ftp</a>
            <a href="real.html">real</a>
        "##;
        let result = parse_html(html, &base());
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].url, "http://site.i2p/sub/real.html");
    }

    #[test]
    fn extracts_and_dedupes_media() {
        let html = r#"
            <img src="pic.jpg">
            <img src="pic.jpg">
            <img src="data:image/png;base64,AAAA">
            <video src="/clip.webm"></video>
            <link rel="icon" href="/favicon.ico">
        "#;
        let result = parse_html(html, &base());
        assert_eq!(
            result.media_urls,
            vec![
                "http://site.i2p/sub/pic.jpg",
                "http://site.i2p/clip.webm",
                "http://site.i2p/favicon.ico"
            ]
        );
    }

    #[test]
    fn title_and_language() {
        let html = r#"<html lang="de"><head><title>  Seite  </title>
            <meta name="description" content="desc"></head></html>"#;
        let result = parse_html(html, &base());
        assert_eq!(result.title.as_deref(), Some("Seite"));
        assert_eq!(result.language.as_deref(), Some("de"));
        assert_eq!(result.meta_description.as_deref(), Some("desc"));
    }
}
