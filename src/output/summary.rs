//! Report data assembled from a task snapshot

use crate::fetch::UsageSnapshot;
use crate::state::{DownloadedFile, ErrorSummary, TaskStatus};
use crate::task::TaskSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while writing reports
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to format output: {0}")]
    Format(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Everything a report shows about one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    // Task metadata
    pub task_id: Uuid,
    pub user_id: String,
    pub seed_url: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Seconds between creation and the last status change of a finished task
    pub duration_seconds: Option<u64>,
    pub config_hash: Option<String>,

    // Counters
    pub pages_visited: u32,
    pub documents_downloaded: u32,
    pub bytes_downloaded: u64,

    /// URLs still queued (live runs only)
    pub frontier_len: Option<usize>,

    pub error_summary: ErrorSummary,
    pub fatal_error: Option<String>,

    pub usage: Option<UsageSnapshot>,
    pub files: Vec<DownloadedFile>,
}

impl TaskSummary {
    /// Builds a summary from a status snapshot
    pub fn from_snapshot(snapshot: &TaskSnapshot, config_hash: Option<&str>) -> Self {
        let task = &snapshot.task;
        let duration_seconds = if task.status.is_terminal() {
            u64::try_from((task.updated_at - task.created_at).num_seconds()).ok()
        } else {
            None
        };

        Self {
            task_id: task.id,
            user_id: task.user_id.clone(),
            seed_url: task.seed_url.clone(),
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            duration_seconds,
            config_hash: config_hash.map(str::to_string),
            pages_visited: task.counters.pages_visited,
            documents_downloaded: task.counters.documents_downloaded,
            bytes_downloaded: task.counters.bytes_downloaded,
            frontier_len: snapshot.progress.as_ref().map(|p| p.frontier_len),
            error_summary: task.error_summary.clone(),
            fatal_error: task.fatal_error.clone(),
            usage: snapshot.usage.clone(),
            files: snapshot.files.clone(),
        }
    }

    /// Total number of recorded per-URL errors
    pub fn total_errors(&self) -> u64 {
        self.error_summary.values().sum()
    }

    /// Share of provider requests that failed, in percent
    pub fn failure_rate(&self) -> f64 {
        match &self.usage {
            Some(usage) if usage.total_attempts > 0 => {
                (usage.total_failures as f64 / usage.total_attempts as f64) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Serializes the summary as pretty-printed JSON
    pub fn to_json(&self) -> OutputResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetch::{Tier, TierUsage};
    use crate::state::{CrawlLimits, CrawlPolicy, CrawlTask, ErrorKind};
    use crate::fetch::DomainType;
    use crate::url::ScopeMode;

    pub(crate) fn sample_snapshot() -> TaskSnapshot {
        let mut task = CrawlTask::new(
            "user-1",
            "https://example.test/",
            CrawlLimits {
                max_pages: 10,
                max_documents: 5,
                max_depth: 2,
                max_workers: 2,
                request_delay_ms: 0,
                total_timeout_secs: 60,
                page_timeout_secs: 10,
            },
            CrawlPolicy {
                domain_type: DomainType::Generic,
                accept_degraded: true,
                scope: ScopeMode::SameOrigin,
                allow_offsite_documents: false,
                max_fetch_errors: 10,
                max_storage_errors: 1,
            },
        );
        task.status = TaskStatus::Completed;
        task.updated_at = task.created_at + chrono::Duration::seconds(42);
        task.counters.pages_visited = 3;
        task.counters.documents_downloaded = 1;
        task.counters.bytes_downloaded = 2048;
        task.error_summary.insert(ErrorKind::HttpStatus, 2);
        task.error_summary.insert(ErrorKind::TooSmall, 1);

        let file = DownloadedFile {
            source_url: "https://example.test/report.pdf".to_string(),
            filename: "report.pdf".to_string(),
            size: 2048,
            content_type: Some("application/pdf".to_string()),
            extension: "pdf".to_string(),
            storage_key: format!("user-1/{}/report.pdf", task.id),
            sha256: "ab".repeat(32),
            downloaded_at: task.updated_at,
        };

        let usage = UsageSnapshot {
            per_tier: vec![
                TierUsage {
                    tier: Tier::Basic,
                    attempts: 4,
                    successes: 3,
                    failures: 1,
                },
                TierUsage {
                    tier: Tier::Rendered,
                    attempts: 1,
                    successes: 1,
                    failures: 0,
                },
            ],
            total_attempts: 5,
            total_successes: 4,
            total_failures: 1,
            credits: 9,
            bytes: 40_000,
            latency_ms: 1500,
        };

        TaskSnapshot {
            task,
            progress: None,
            usage: Some(usage),
            files: vec![file],
        }
    }

    #[test]
    fn test_summary_from_snapshot() {
        let summary = TaskSummary::from_snapshot(&sample_snapshot(), Some("abc123"));

        assert_eq!(summary.status, TaskStatus::Completed);
        assert_eq!(summary.duration_seconds, Some(42));
        assert_eq!(summary.total_errors(), 3);
        assert_eq!(summary.failure_rate(), 20.0);
        assert_eq!(summary.config_hash.as_deref(), Some("abc123"));
        assert!(summary.frontier_len.is_none());
    }

    #[test]
    fn test_running_task_has_no_duration() {
        let mut snapshot = sample_snapshot();
        snapshot.task.status = TaskStatus::Running;
        let summary = TaskSummary::from_snapshot(&snapshot, None);
        assert!(summary.duration_seconds.is_none());
    }

    #[test]
    fn test_summary_json() {
        let json = TaskSummary::from_snapshot(&sample_snapshot(), None)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status"], "completed");
        assert_eq!(value["error_summary"]["http_status"], 2);
        assert_eq!(value["usage"]["credits"], 9);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
