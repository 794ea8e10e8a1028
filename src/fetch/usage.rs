//! Per-task usage and cost accounting
//!
//! Every provider attempt, whatever its outcome, is folded into a shared
//! `UsageStats`. Counters are plain atomics so concurrent workers never
//! serialize on a lock just to count.

use crate::fetch::tier::Tier;
use crate::state::ErrorKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// Description of one provider request
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub url: Url,
    pub tier: Tier,

    /// HTTP status, if the transport produced a response
    pub status: Option<u16>,

    pub content_length: usize,
    pub elapsed: Duration,

    /// True when the response was accepted for its purpose
    pub success: bool,

    pub error: Option<ErrorKind>,

    /// Estimated credits charged
    pub cost: u32,
}

/// Running totals for one task
#[derive(Debug, Default)]
pub struct UsageStats {
    attempts: [AtomicU64; 4],
    successes: [AtomicU64; 4],
    failures: [AtomicU64; 4],
    credits: AtomicU64,
    bytes: AtomicU64,
    latency_ms: AtomicU64,
}

/// Per-tier slice of a usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub tier: Tier,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Point-in-time copy of `UsageStats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub per_tier: Vec<TierUsage>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub credits: u64,
    pub bytes: u64,
    pub latency_ms: u64,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one attempt into the totals
    pub fn record(&self, attempt: &FetchAttempt) {
        let i = attempt.tier.index();
        self.attempts[i].fetch_add(1, Ordering::Relaxed);
        if attempt.success {
            self.successes[i].fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures[i].fetch_add(1, Ordering::Relaxed);
        }
        self.credits
            .fetch_add(u64::from(attempt.cost), Ordering::Relaxed);
        self.bytes
            .fetch_add(attempt.content_length as u64, Ordering::Relaxed);
        self.latency_ms
            .fetch_add(attempt.elapsed.as_millis() as u64, Ordering::Relaxed);

        tracing::trace!(
            url = %attempt.url,
            tier = %attempt.tier,
            status = ?attempt.status,
            success = attempt.success,
            error = ?attempt.error,
            "provider attempt"
        );
    }

    /// Number of attempts made at `tier`
    pub fn attempts_at(&self, tier: Tier) -> u64 {
        self.attempts[tier.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let per_tier: Vec<TierUsage> = Tier::ALL
            .iter()
            .map(|tier| {
                let i = tier.index();
                TierUsage {
                    tier: *tier,
                    attempts: self.attempts[i].load(Ordering::Relaxed),
                    successes: self.successes[i].load(Ordering::Relaxed),
                    failures: self.failures[i].load(Ordering::Relaxed),
                }
            })
            .collect();

        UsageSnapshot {
            total_attempts: per_tier.iter().map(|t| t.attempts).sum(),
            total_successes: per_tier.iter().map(|t| t.successes).sum(),
            total_failures: per_tier.iter().map(|t| t.failures).sum(),
            per_tier,
            credits: self.credits.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
        }
    }
}
