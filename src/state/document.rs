//! Records describing downloaded documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a successful document fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// URL the document was fetched from
    pub source_url: String,

    /// Generated filename, unique within the task
    pub filename: String,

    /// Size of the stored content in bytes
    pub size: u64,

    /// Declared content type, if the response carried one
    pub content_type: Option<String>,

    /// Lowercased file extension without the dot
    pub extension: String,

    /// Key under which the blob store holds the content
    pub storage_key: String,

    /// Hex SHA-256 of the content
    pub sha256: String,

    pub downloaded_at: DateTime<Utc>,
}

/// Reference handed to the downstream text-extraction collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub task_id: Uuid,
    pub storage_key: String,
    pub content_type: Option<String>,
    pub source_url: String,
}

impl DownloadedFile {
    /// Builds the downstream reference for this file
    pub fn to_ref(&self, task_id: Uuid) -> DocumentRef {
        DocumentRef {
            task_id,
            storage_key: self.storage_key.clone(),
            content_type: self.content_type.clone(),
            source_url: self.source_url.clone(),
        }
    }
}
