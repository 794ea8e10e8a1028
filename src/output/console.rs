//! Console summary of a task

use crate::output::summary::{format_bytes, TaskSummary};

/// Formats the summary printed after a crawl or a status query
pub fn format_console_summary(summary: &TaskSummary) -> String {
    let mut out = String::new();

    out.push_str("=== Crawl Task ===\n\n");
    out.push_str(&format!("  Task:    {}\n", summary.task_id));
    out.push_str(&format!("  Seed:    {}\n", summary.seed_url));
    out.push_str(&format!("  Status:  {}\n", summary.status));
    if let Some(duration) = summary.duration_seconds {
        out.push_str(&format!("  Took:    {}s\n", duration));
    }
    if let Some(fatal) = &summary.fatal_error {
        out.push_str(&format!("  Failure: {}\n", fatal));
    }
    out.push('\n');

    out.push_str("Counters:\n");
    out.push_str(&format!("  Pages visited:        {}\n", summary.pages_visited));
    out.push_str(&format!(
        "  Documents downloaded: {} ({})\n",
        summary.documents_downloaded,
        format_bytes(summary.bytes_downloaded)
    ));
    if let Some(queued) = summary.frontier_len {
        out.push_str(&format!("  Queued URLs:          {}\n", queued));
    }
    out.push('\n');

    if let Some(usage) = &summary.usage {
        out.push_str("Provider usage:\n");
        for tier in usage.per_tier.iter().filter(|t| t.attempts > 0) {
            out.push_str(&format!(
                "  {:<9} {} attempts, {} ok, {} failed\n",
                tier.tier.as_str(), tier.attempts, tier.successes, tier.failures
            ));
        }
        out.push_str(&format!(
            "  Credits: {} ({:.1}% of requests failed)\n\n",
            usage.credits,
            summary.failure_rate()
        ));
    }

    if !summary.error_summary.is_empty() {
        out.push_str("Errors:\n");
        // Most frequent first
        let mut counts: Vec<_> = summary.error_summary.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (kind, count) in counts {
            out.push_str(&format!("  {}: {}\n", kind, count));
        }
        out.push('\n');
    }

    if !summary.files.is_empty() {
        out.push_str(&format!("Documents ({}):\n", summary.files.len()));
        for file in &summary.files {
            out.push_str(&format!("  - {} [{}]\n", file.storage_key, format_bytes(file.size)));
        }
    }

    out
}

/// Prints the console summary to stdout
pub fn print_summary(summary: &TaskSummary) {
    print!("{}", format_console_summary(summary));
}
