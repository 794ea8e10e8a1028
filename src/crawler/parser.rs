//! HTML parser for extracting candidate links
//!
//! This module handles parsing fetched markup to extract:
//! - Links to follow (anchors, canonical links)
//! - Embedded documents (iframe, embed, object)
//! - Page title

use crate::url::normalize_link;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Normalized absolute links, first occurrence order, no duplicates
    pub links: Vec<Url>,
}

/// Element/attribute pairs that carry candidate links
const LINK_SOURCES: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("link[rel='canonical'][href]", "href"),
    ("iframe[src]", "src"),
    ("embed[src]", "src"),
    ("object[data]", "data"),
];

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`, including `download` anchors
/// - `<link rel="canonical" href="...">`
/// - `<iframe src>`, `<embed src>`, `<object data>`
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:`, `data:` links
/// - Fragment-only links
/// - Anything that fails normalization (non-HTTP schemes, no host)
///
/// Relative links resolve against `<base href>` when the page declares one.
///
/// # Example
///
/// ```no_run
/// use escalade::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// ```
pub fn parse_html(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = declared_base(&document, page_url).unwrap_or_else(|| page_url.clone());

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, &base),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn declared_base(document: &Html, page_url: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    page_url.join(href.trim()).ok()
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for (css, attr) in LINK_SOURCES {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };

        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            if let Some(url) = resolve_link(raw, base) {
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
        }
    }

    links
}

/// Resolves and normalizes one raw link, or drops it
fn resolve_link(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();

    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lowered = raw.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    normalize_link(raw, base).ok()
}
