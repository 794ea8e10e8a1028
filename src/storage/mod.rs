//! Storage module for persisting crawl tasks and documents
//!
//! This module holds the crawler's external collaborators, each behind a
//! trait so tests can swap in in-memory doubles:
//! - `TaskStore`: task metadata with compare-and-set status transitions
//!   (`SqliteTaskStore`, `MemoryTaskStore`)
//! - `BlobStore`: downloaded document content (`FsBlobStore`, `MemoryBlobStore`)
//! - `DocumentSink`: fire-and-forget hand-off to downstream processing

mod blob;
mod memory;
mod schema;
mod sink;
mod sqlite;
mod traits;

pub use blob::{FsBlobStore, MemoryBlobStore, StoredBlob};
pub use memory::MemoryTaskStore;
pub use sink::{ChannelDocumentSink, NullDocumentSink};
pub use sqlite::SqliteTaskStore;
pub use traits::{BlobStore, DocumentSink, StorageError, StorageResult, TaskStore};
