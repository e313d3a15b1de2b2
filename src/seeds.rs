use tracing::warn;
use url::Url;

use noctipede_core::CrawlError;

/// Fallback seeds covering each plane, used when no seed file is given.
pub const DEFAULT_SEEDS: &[&str] = &[
    "http://example.com/",
    "http://duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion/",
    "http://stats.i2p/",
    "http://reg.i2p/",
];

/// Parse seed lines: one absolute URL per line, `#` starts a comment,
/// blank lines are ignored. Lines that are not absolute URLs are skipped
/// with a warning.
pub fn parse_seed_lines(content: &str) -> Vec<Url> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match Url::parse(line) {
                Ok(url) if url.host_str().is_some() => Some(url),
                _ => {
                    warn!(line = %line, "skipping invalid seed URL");
                    None
                }
            }
        })
        .collect()
}

/// A missing seed file is fatal; the caller aborts on it.
pub fn load_seed_file(path: &str) -> Result<Vec<Url>, CrawlError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CrawlError::Config(format!("cannot read seed file {path}: {e}")))?;
    Ok(parse_seed_lines(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_ignored() {
        let content = "\
# onion directory
http://a.onion/

  # indented comment
http://stats.i2p/
";
        let seeds = parse_seed_lines(content);
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].as_str(), "http://a.onion/");
        assert_eq!(seeds[1].as_str(), "http://stats.i2p/");
    }

    #[test]
    fn invalid_lines_are_skipped() {
        let content = "not a url\nhttp://ok.onion/\n/relative/path\n";
        let seeds = parse_seed_lines(content);
        assert_eq!(seeds.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_seed_file("/nonexistent/seeds.txt").unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn default_seeds_all_parse() {
        for seed in DEFAULT_SEEDS {
            assert!(Url::parse(seed).is_ok(), "{seed}");
        }
    }
}
