//! Escalade: an adaptive, budget-aware document crawler
//!
//! This crate crawls a single target site through a remote rendering/proxy
//! provider whose fetch quality can be escalated tier by tier, discovering
//! pages and downloadable documents while staying inside per-task page,
//! document, depth and time budgets.

pub mod config;
pub mod crawler;
pub mod fetch;
pub mod output;
pub mod state;
pub mod storage;
pub mod task;
pub mod url;

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Escalade operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Download error: {0}")]
    Download(#[from] crawler::DownloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task {0} is running")]
    TaskActive(Uuid),

    #[error("Task {task_id} is not owned by user {user_id}")]
    NotOwner { task_id: Uuid, user_id: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: state::TaskStatus,
        to: state::TaskStatus,
    },

    #[error("Status transition {from} -> {to} for task {task_id} was not persisted")]
    TransitionNotPersisted {
        task_id: Uuid,
        from: state::TaskStatus,
        to: state::TaskStatus,
    },

    #[error("Malformed trigger message: {0}")]
    Trigger(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Escalade operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{CrawlTask, ErrorKind, TaskStatus};
pub use task::TaskManager;
pub use url::{normalize_link, normalize_url, LinkKind};
