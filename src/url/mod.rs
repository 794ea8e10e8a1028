//! URL handling module for Escalade
//!
//! This module provides URL normalization, page/document classification and
//! the scope check that keeps a crawl on its seed site. Everything here is a
//! pure function of its inputs.

mod classify;
mod normalize;
mod scope;

pub use classify::{
    is_page_extension, path_extension, LinkClassifier, LinkKind, DEFAULT_DOCUMENT_EXTENSIONS,
};
pub use normalize::{normalize_link, normalize_url};
pub use scope::{site_key, Scope, ScopeMode};
