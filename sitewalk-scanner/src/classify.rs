use crate::gzip::has_gzip_magic;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static SITEMAP_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*sitemap:\s*(\S.*?)\s*$").expect("valid sitemap directive regex")
});

const XML_MEDIA_TYPES: &[&str] = &["text/xml", "application/xml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Xml,
    GzipXml,
    NotSitemap,
}

fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase(),
    }
}

fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let primary = value.split(';').next()?.trim().to_lowercase();
    if primary.is_empty() { None } else { Some(primary) }
}

/// Decide how a fetched body should be read.
///
/// Checked in order: `.xml` path, XML content type, gzip magic bytes,
/// `.xml.gz` path.
pub fn classify(url: &str, headers: &HeaderMap, body: &[u8]) -> DocumentKind {
    let path = url_path(url);

    if path.ends_with(".xml") {
        return DocumentKind::Xml;
    }

    if let Some(media) = media_type(headers)
        && XML_MEDIA_TYPES.contains(&media.as_str())
    {
        return DocumentKind::Xml;
    }

    if has_gzip_magic(body) {
        return DocumentKind::GzipXml;
    }

    if path.ends_with(".xml.gz") {
        return DocumentKind::GzipXml;
    }

    debug!("{} does not look like a sitemap", url);
    DocumentKind::NotSitemap
}

pub fn is_robots_url(url: &str) -> bool {
    url_path(url).ends_with("/robots.txt")
}

/// Collect the `Sitemap:` directives of a robots.txt body, resolved
/// against the robots.txt URL. Values that cannot be resolved are skipped.
pub fn sitemaps_from_robots(text: &str, base_url: &str) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let mut sitemaps = Vec::new();

    for line in text.lines() {
        let Some(caps) = SITEMAP_DIRECTIVE.captures(line) else {
            continue;
        };
        let value = &caps[1];
        let resolved = match &base {
            Some(base) => base.join(value),
            None => Url::parse(value),
        };
        match resolved {
            Ok(url) => sitemaps.push(url.to_string()),
            Err(e) => debug!("Skipping sitemap directive {:?}: {}", value, e),
        }
    }

    sitemaps
}
