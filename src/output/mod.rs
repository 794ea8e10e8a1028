//! Output module for task reports
//!
//! This module handles:
//! - Assembling a `TaskSummary` from a task snapshot
//! - Printing a console summary
//! - Writing a markdown report (usage per tier, credits, errors, documents)

mod console;
mod markdown;
mod summary;

pub use console::{format_console_summary, print_summary};
pub use markdown::{format_markdown_report, write_markdown_report};
pub use summary::{format_bytes, OutputError, OutputResult, TaskSummary};
