//! Markdown report generation
//!
//! This module renders a task summary as a markdown document: run
//! information, counters, provider usage per tier, the error summary and
//! the list of downloaded documents.

use crate::output::summary::{format_bytes, OutputResult, TaskSummary};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report of a task
///
/// # Arguments
///
/// * `summary` - The task summary
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn write_markdown_report(summary: &TaskSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(summary);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a task summary as markdown
pub fn format_markdown_report(summary: &TaskSummary) -> String {
    let mut md = String::new();

    md.push_str("# Escalade Crawl Report\n\n");

    md.push_str("## Task Information\n\n");
    md.push_str(&format!("- **Task ID**: {}\n", summary.task_id));
    md.push_str(&format!("- **User**: {}\n", summary.user_id));
    md.push_str(&format!("- **Seed URL**: {}\n", summary.seed_url));
    md.push_str(&format!("- **Status**: {}\n", summary.status));
    md.push_str(&format!("- **Created**: {}\n", summary.created_at.to_rfc3339()));
    md.push_str(&format!("- **Updated**: {}\n", summary.updated_at.to_rfc3339()));
    if let Some(duration) = summary.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    if let Some(hash) = &summary.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    if let Some(fatal) = &summary.fatal_error {
        md.push_str(&format!("- **Fatal Error**: {}\n", fatal));
    }
    md.push('\n');

    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Pages Visited**: {}\n", summary.pages_visited));
    md.push_str(&format!(
        "- **Documents Downloaded**: {}\n",
        summary.documents_downloaded
    ));
    md.push_str(&format!(
        "- **Bytes Downloaded**: {}\n",
        format_bytes(summary.bytes_downloaded)
    ));
    if let Some(queued) = summary.frontier_len {
        md.push_str(&format!("- **Queued URLs**: {}\n", queued));
    }
    md.push_str(&format!("- **Total Errors**: {}\n\n", summary.total_errors()));

    if let Some(usage) = &summary.usage {
        md.push_str("## Provider Usage\n\n");
        md.push_str("| Tier | Attempts | Successes | Failures |\n");
        md.push_str("|------|----------|-----------|----------|\n");
        for tier in &usage.per_tier {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                tier.tier, tier.attempts, tier.successes, tier.failures
            ));
        }
        md.push('\n');
        md.push_str(&format!("- **Credits**: {}\n", usage.credits));
        md.push_str(&format!(
            "- **Failure Rate**: {:.2}%\n",
            summary.failure_rate()
        ));
        md.push_str(&format!("- **Transferred**: {}\n\n", format_bytes(usage.bytes)));
    }

    if !summary.error_summary.is_empty() {
        md.push_str("## Error Summary\n\n");
        md.push_str("| Error Kind | Count |\n");
        md.push_str("|------------|-------|\n");

        for (kind, count) in &summary.error_summary {
            md.push_str(&format!("| {} | {} |\n", kind, count));
        }
        md.push('\n');
    }

    if !summary.files.is_empty() {
        md.push_str("## Downloaded Documents\n\n");
        md.push_str("| File | Size | Type | Source |\n");
        md.push_str("|------|------|------|--------|\n");

        for file in &summary.files {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                file.filename,
                format_bytes(file.size),
                file.content_type.as_deref().unwrap_or("-"),
                file.source_url
            ));
        }
        md.push('\n');
    }

    md
}
