/// Task status definitions for tracking a crawl run
///
/// This module defines the states a crawl task moves through and which
/// transitions between them are legal.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task was created but no run has started
    Pending,

    /// The frontier has been seeded and workers are dispatching
    Running,

    /// The frontier drained or a limit (pages, documents, total timeout) was reached
    Completed,

    /// The fatal-error threshold was exceeded
    Failed,

    /// Cooperative cancellation was requested and in-flight work drained
    Cancelled,
}

impl TaskStatus {
    /// Returns true if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// Transitions are monotonic: a terminal task is never resurrected and a
    /// running task never goes back to pending.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) | (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Completed)
            | (Self::Running, Self::Failed)
            | (Self::Running, Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
