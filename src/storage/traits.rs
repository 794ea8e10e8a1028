//! Storage traits and error types
//!
//! This module defines the interfaces of the external collaborators the
//! crawler persists into: the task metadata store, the blob store for
//! downloaded documents, and the downstream document sink.

use crate::state::{CrawlTask, DocumentRef, DownloadedFile, TaskStatus};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task already exists: {0}")]
    TaskExists(Uuid),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Rejects writes that would move a task backwards or out of a terminal state
pub(crate) fn check_transition(from: TaskStatus, to: TaskStatus) -> StorageResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition { from, to })
    }
}

/// Task metadata store
///
/// Implementations must make `transition_status` and `finish_task` atomic
/// compare-and-set writes: the write only happens if the stored status still
/// equals `from`. Pairs that `TaskStatus::can_transition_to` refuses fail
/// with `StorageError::InvalidTransition` before anything is read.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task record
    async fn insert_task(&self, task: &CrawlTask) -> StorageResult<()>;

    /// Loads a task record, `None` if unknown
    async fn get_task(&self, id: Uuid) -> StorageResult<Option<CrawlTask>>;

    /// Moves a task from `from` to `to`
    ///
    /// # Returns
    ///
    /// `false` if the stored status was not `from` (nothing written)
    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StorageResult<bool>;

    /// Writes counters and error summary; never touches the status
    async fn save_progress(&self, task: &CrawlTask) -> StorageResult<()>;

    /// Commits the final record of a run together with its downloaded files
    ///
    /// The task's own status is the target; `from` is the expected current
    /// status.
    async fn finish_task(
        &self,
        task: &CrawlTask,
        from: TaskStatus,
        files: &[DownloadedFile],
    ) -> StorageResult<bool>;

    /// Removes a task record and its file records
    async fn delete_task(&self, id: Uuid) -> StorageResult<()>;

    /// Downloaded files recorded for a task
    async fn list_files(&self, id: Uuid) -> StorageResult<Vec<DownloadedFile>>;
}

/// Durable blob storage for downloaded documents
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Removes a blob; removing a missing key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Downstream consumer of stored documents (e.g. text extraction)
///
/// Submission is fire-and-forget: the crawler never waits on the consumer.
pub trait DocumentSink: Send + Sync {
    fn submit(&self, document: DocumentRef);
}
