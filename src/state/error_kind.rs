//! Error classification shared by every crawl component
//!
//! Per-URL failures are never propagated as raw errors across the task
//! status boundary; they are folded into an `ErrorSummary` keyed by kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counts of recorded errors per kind
pub type ErrorSummary = BTreeMap<ErrorKind, u64>;

/// Closed classification of crawl errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed URL or disallowed scheme; dropped, never retried
    InvalidUrl,
    /// Network failure or timeout after retries at every tier
    FetchTransport,
    /// Explicit anti-bot signal (403/429) at the highest tier
    FetchBlocked,
    /// Content present but rejected by the sufficiency checker at the top tier
    FetchInsufficientContent,
    /// Definitive non-2xx answer that is neither blocking nor transient
    HttpStatus,
    /// Document smaller than the configured minimum
    TooSmall,
    /// Document larger than the configured maximum
    TooLarge,
    /// Document extension outside the allow-list
    UnsupportedType,
    /// Document content identical to one already stored for the task
    Duplicate,
    /// Document fetch ended with a non-2xx status
    DownloadFailed,
    /// Blob storage rejected a write
    StorageError,
    /// Threshold of per-URL errors exceeded
    TaskFatal,
}

/// Which fatal-error budget an error kind is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBudget {
    /// Provider/network failures
    Fetch,
    /// Persistence failures
    Storage,
}

impl ErrorKind {
    /// Returns the budget this kind counts against, if any
    ///
    /// Degraded content, filtered documents and invalid links are recorded
    /// but never push a task towards failure.
    pub fn budget(&self) -> Option<ErrorBudget> {
        match self {
            Self::FetchTransport | Self::FetchBlocked | Self::HttpStatus | Self::DownloadFailed => {
                Some(ErrorBudget::Fetch)
            }
            Self::StorageError => Some(ErrorBudget::Storage),
            _ => None,
        }
    }

    /// Returns the stable string form used in reports and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::FetchTransport => "fetch_transport",
            Self::FetchBlocked => "fetch_blocked",
            Self::FetchInsufficientContent => "fetch_insufficient_content",
            Self::HttpStatus => "http_status",
            Self::TooSmall => "too_small",
            Self::TooLarge => "too_large",
            Self::UnsupportedType => "unsupported_type",
            Self::Duplicate => "duplicate",
            Self::DownloadFailed => "download_failed",
            Self::StorageError => "storage_error",
            Self::TaskFatal => "task_fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budgets_are_separate() {
        assert_eq!(ErrorKind::FetchTransport.budget(), Some(ErrorBudget::Fetch));
        assert_eq!(ErrorKind::FetchBlocked.budget(), Some(ErrorBudget::Fetch));
        assert_eq!(ErrorKind::DownloadFailed.budget(), Some(ErrorBudget::Fetch));
        assert_eq!(ErrorKind::StorageError.budget(), Some(ErrorBudget::Storage));
    }

    #[test]
    fn test_soft_errors_have_no_budget() {
        assert_eq!(ErrorKind::InvalidUrl.budget(), None);
        assert_eq!(ErrorKind::FetchInsufficientContent.budget(), None);
        assert_eq!(ErrorKind::TooSmall.budget(), None);
        assert_eq!(ErrorKind::Duplicate.budget(), None);
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&ErrorKind::FetchInsufficientContent).unwrap();
        assert_eq!(json, "\"fetch_insufficient_content\"");
        assert_eq!(ErrorKind::TooSmall.to_string(), "too_small");
    }
}
