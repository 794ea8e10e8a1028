//! Configuration module for Escalade
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and turns the result into the settings consumed by the fetch
//! ladder, the downloader and new crawl tasks.
//!
//! # Example
//!
//! ```no_run
//! use escalade::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("escalade.toml")).unwrap();
//! println!("Tasks default to max depth {}", config.crawl.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlConfig, DownloaderConfig, ProviderConfig, StorageConfig, SufficiencyConfig,
    SystemConfig, TierOverride, TiersConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
