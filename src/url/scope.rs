//! Keeps a crawl on the seed site

use serde::{Deserialize, Serialize};
use url::Url;

/// How far from the seed a crawl may wander
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeMode {
    /// Any path on the seed's host and port
    #[default]
    SameOrigin,
    /// Only paths under the seed's directory
    Subpath,
}

/// The crawl boundary derived from a seed URL
#[derive(Debug, Clone)]
pub struct Scope {
    host: String,
    port: Option<u16>,
    base_path: String,
    mode: ScopeMode,
}

impl Scope {
    /// Builds the scope of a normalized seed URL
    pub fn new(seed: &Url, mode: ScopeMode) -> Self {
        Self {
            host: site_host(seed),
            port: seed.port_or_known_default(),
            base_path: directory_of(seed.path()),
            mode,
        }
    }

    /// Returns true if `url` is served by the seed's host and port
    ///
    /// A leading `www.` is ignored on both sides, and http/https are treated
    /// as the same site.
    pub fn same_origin(&self, url: &Url) -> bool {
        let port = url.port_or_known_default();
        let ports_match = port == self.port || (is_web_port(port) && is_web_port(self.port));
        site_host(url) == self.host && ports_match
    }

    /// Returns true if `url` is inside the crawl boundary
    pub fn contains(&self, url: &Url) -> bool {
        if !self.same_origin(url) {
            return false;
        }
        match self.mode {
            ScopeMode::SameOrigin => true,
            ScopeMode::Subpath => {
                let path = url.path();
                let dir = self.base_path.trim_end_matches('/');
                dir.is_empty() || path == dir || path.starts_with(&self.base_path)
            }
        }
    }
}

/// Identity of a URL within its site, as `same_origin` sees it
///
/// Drops the scheme, a leading `www.` and the default web ports, so
/// `http://www.example.com/a` and `https://example.com/a` share one key.
pub fn site_key(url: &Url) -> String {
    let mut key = site_host(url);
    let port = url.port_or_known_default();
    if let Some(port) = port.filter(|_| !is_web_port(port)) {
        key.push_str(&format!(":{}", port));
    }
    key.push_str(url.path());
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

fn is_web_port(port: Option<u16>) -> bool {
    matches!(port, Some(80) | Some(443))
}

fn site_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

/// Directory of a path, always ending in '/'
///
/// A last segment with an extension is treated as a file; anything else is
/// a directory whose trailing slash was removed by normalization.
fn directory_of(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or_default();
    if last.contains('.') {
        match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => "/".to_string(),
        }
    } else if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}
