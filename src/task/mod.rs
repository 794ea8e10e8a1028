//! Task lifecycle management
//!
//! This module bridges persisted `CrawlTask` records and in-process
//! orchestrator runs:
//! - Creating tasks and writing them through to the task store
//! - Starting runs (idempotently) and cancelling them cooperatively
//! - Status snapshots combining the stored record with live progress
//! - Deleting finished tasks together with their stored documents
//! - Inbound trigger messages with an ownership check

mod manager;
mod trigger;

pub use manager::{TaskManager, TaskSnapshot};
pub use trigger::TriggerMessage;
