//! State module for tracking crawl tasks
//!
//! This module provides the data model shared by the orchestrator, the task
//! lifecycle manager and the storage collaborators.
//!
//! # Components
//!
//! - `TaskStatus`: lifecycle state of one crawl task (pending, running, terminal states)
//! - `ErrorKind`: closed classification of per-URL and task-level failures
//! - `CrawlTask`: the authoritative task record, with limits, policy and counters
//! - `DownloadedFile`: the in-memory record of a persisted document

mod document;
mod error_kind;
mod task;
mod task_status;

// Re-export main types
pub use document::{DocumentRef, DownloadedFile};
pub use error_kind::{ErrorBudget, ErrorKind, ErrorSummary};
pub use task::{CrawlCounters, CrawlLimits, CrawlPolicy, CrawlTask};
pub use task_status::TaskStatus;
