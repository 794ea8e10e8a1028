//! The crawl task record and its budgets

use crate::fetch::DomainType;
use crate::state::{ErrorSummary, TaskStatus};
use crate::url::ScopeMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Resource budgets for one crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlLimits {
    /// Maximum number of pages visited
    pub max_pages: u32,

    /// Maximum number of documents downloaded
    pub max_documents: u32,

    /// Maximum discovery depth of any dispatched URL (seed is depth 0)
    pub max_depth: u32,

    /// Size of the worker pool
    pub max_workers: u32,

    /// Delay between two dispatches of the same worker (milliseconds)
    pub request_delay_ms: u64,

    /// Wall-clock budget for the whole task (seconds)
    pub total_timeout_secs: u64,

    /// Timeout of a single provider request (seconds)
    pub page_timeout_secs: u64,
}

impl CrawlLimits {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    /// Returns a copy with the worker pool clamped to `1..=ceiling`
    pub fn bounded(mut self, worker_ceiling: u32) -> Self {
        self.max_workers = self.max_workers.clamp(1, worker_ceiling.max(1));
        self
    }
}

/// Behavioural knobs of one crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPolicy {
    /// Which sufficiency checker judges fetched pages
    pub domain_type: DomainType,

    /// Whether content that failed the checker at the top tier is still used
    pub accept_degraded: bool,

    /// How discovered links are scoped to the seed site
    pub scope: ScopeMode,

    /// Whether documents hosted outside the seed origin may be downloaded
    pub allow_offsite_documents: bool,

    /// Fetch-related errors tolerated before the task fails
    pub max_fetch_errors: u32,

    /// Storage errors tolerated before the task fails
    pub max_storage_errors: u32,
}

/// Running totals of a crawl task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCounters {
    pub pages_visited: u32,
    pub documents_downloaded: u32,
    pub bytes_downloaded: u64,
}

/// One crawl run, as persisted by the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: Uuid,
    pub user_id: String,
    pub seed_url: String,
    pub limits: CrawlLimits,
    pub policy: CrawlPolicy,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub counters: CrawlCounters,

    /// Error counts per kind
    #[serde(default)]
    pub error_summary: ErrorSummary,

    /// The error that made the task fail, if it failed
    #[serde(default)]
    pub fatal_error: Option<String>,
}

impl CrawlTask {
    /// Creates a new pending task
    pub fn new(
        user_id: impl Into<String>,
        seed_url: impl Into<String>,
        limits: CrawlLimits,
        policy: CrawlPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            seed_url: seed_url.into(),
            limits,
            policy,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            counters: CrawlCounters::default(),
            error_summary: ErrorSummary::new(),
            fatal_error: None,
        }
    }

    /// Storage key prefix under which this task's documents live
    pub fn storage_prefix(&self) -> String {
        format!("{}/{}", self.user_id, self.id)
    }
}
