//! Page vs document classification of normalized URLs

use std::collections::HashSet;
use url::Url;

/// Default extensions the crawler treats as downloadable
pub const DEFAULT_DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xlsx", "xls", "ppt", "pptx", "txt", "csv", "html", "htm",
];

/// Markup/script extensions that are always crawled as pages
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "php", "asp", "aspx", "jsp"];

/// What kind of resource a URL points to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// HTML page: fetched through the tier ladder and mined for links
    Page,
    /// Downloadable document: handed to the file downloader
    Document,
}

/// Classifies URLs by the extension of their last path segment
#[derive(Debug, Clone)]
pub struct LinkClassifier {
    document_extensions: HashSet<String>,
}

impl Default for LinkClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DOCUMENT_EXTENSIONS.iter().copied())
    }
}

impl LinkClassifier {
    /// Creates a classifier from an extension allow-list (case-insensitive, no dots)
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            document_extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Classifies a normalized URL
    ///
    /// Extensionless URLs are ambiguous and default to `Page`; markup
    /// extensions stay pages even when they appear in the allow-list.
    pub fn classify(&self, url: &Url) -> LinkKind {
        match path_extension(url) {
            Some(ext)
                if self.document_extensions.contains(&ext) && !is_page_extension(&ext) =>
            {
                LinkKind::Document
            }
            _ => LinkKind::Page,
        }
    }

    /// Returns true if `extension` is in the allow-list
    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        self.document_extensions
            .contains(&extension.to_ascii_lowercase())
    }
}

/// Returns true for markup/script extensions (`php`, `aspx`, ...) served by page handlers
pub fn is_page_extension(extension: &str) -> bool {
    PAGE_EXTENSIONS
        .iter()
        .any(|page| page.eq_ignore_ascii_case(extension))
}

/// Returns the lowercased extension of the URL's last path segment
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
