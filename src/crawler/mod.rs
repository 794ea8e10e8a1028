//! Crawler module for page and document processing
//!
//! This module contains the core crawling logic, including:
//! - Frontier queue and visited set
//! - HTML parsing and link extraction
//! - Document download, validation and persistence
//! - Overall crawl orchestration over a worker pool

mod coordinator;
mod downloader;
mod frontier;
mod parser;

pub use coordinator::{CrawlProgress, CrawlResult, HaltReason, Orchestrator};
pub use downloader::{
    derive_filename, extension_for_content_type, DerivedName, DownloadAttempt, DownloadError,
    DownloadSettings, FileDownloader,
};
pub use frontier::{Frontier, FrontierEntry, Verdict};
pub use parser::{parse_html, ParsedPage};
