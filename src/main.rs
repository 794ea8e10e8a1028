//! Escalade main entry point
//!
//! This is the command-line interface for the Escalade document crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use escalade::config::{load_config_with_hash, Config};
use escalade::fetch::{build_http_client, ApiFetchProvider, DirectFetchProvider, FetchProvider, Tier};
use escalade::output::{print_summary, write_markdown_report, TaskSummary};
use escalade::storage::{ChannelDocumentSink, FsBlobStore, SqliteTaskStore};
use escalade::task::{TaskSnapshot, TriggerMessage};
use escalade::{normalize_url, TaskManager, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

/// Escalade: an adaptive, budget-aware document crawler
///
/// Escalade crawls one site through a rendering/proxy provider, escalating
/// fetch quality only when cheaper tiers fail, and stores the documents it
/// finds.
#[derive(Parser, Debug)]
#[command(name = "escalade")]
#[command(version)]
#[command(about = "An adaptive, budget-aware document crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Validate config and show what would be done without doing it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task for SEED and run it to the end (Ctrl-C cancels)
    Crawl {
        /// Seed URL
        seed: String,

        /// Owner of the task
        #[arg(long, default_value = "local")]
        user: String,

        #[arg(long)]
        max_pages: Option<u32>,

        #[arg(long)]
        max_documents: Option<u32>,

        #[arg(long)]
        max_depth: Option<u32>,

        /// Write a markdown report to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the status of a task
    Status {
        task_id: Uuid,

        /// Write a markdown report to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start a task from a `{"task_id": ..., "user_id": ...}` message and wait for it
    Trigger {
        message: String,
    },

    /// Delete a finished or never-started task and its documents
    Delete {
        task_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        return handle_dry_run(&config, &cli.command);
    }

    let manager = build_manager(config)?;

    match cli.command {
        Command::Crawl {
            seed,
            user,
            max_pages,
            max_documents,
            max_depth,
            report,
            json,
        } => {
            let mut limits = manager.config().default_limits();
            limits.max_pages = max_pages.unwrap_or(limits.max_pages);
            limits.max_documents = max_documents.unwrap_or(limits.max_documents);
            limits.max_depth = max_depth.unwrap_or(limits.max_depth);
            let policy = manager.config().default_policy();

            let task = manager.create_with(&user, &seed, limits, policy).await?;
            println!("Created task {}", task.id);
            manager.start(task.id).await?;

            let snapshot = run_to_end(&manager, task.id).await?;
            let status = snapshot.task.status;
            report_snapshot(&snapshot, &config_hash, report.as_deref(), json)?;

            if status == TaskStatus::Failed {
                anyhow::bail!("task {} failed", task.id);
            }
        }
        Command::Status {
            task_id,
            report,
            json,
        } => {
            let snapshot = manager.get_status(task_id).await?;
            report_snapshot(&snapshot, &config_hash, report.as_deref(), json)?;
        }
        Command::Trigger { message } => {
            let message = TriggerMessage::from_json(&message)?;
            let task_id = message.task_id;
            let status = manager.handle_trigger(&message).await?;
            if status == TaskStatus::Running {
                let snapshot = run_to_end(&manager, task_id).await?;
                report_snapshot(&snapshot, &config_hash, None, false)?;
            } else {
                println!("Task {} not started: already {}", task_id, status);
            }
        }
        Command::Delete { task_id } => {
            manager.delete(task_id).await?;
            println!("Deleted task {}", task_id);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("escalade=info,warn"),
            1 => EnvFilter::new("escalade=debug,info"),
            2 => EnvFilter::new("escalade=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Wires the configured provider and stores into a task manager
fn build_manager(config: Config) -> anyhow::Result<TaskManager> {
    let client = build_http_client(&config.provider.user_agent)?;
    let provider: Arc<dyn FetchProvider> = match &config.provider.endpoint {
        Some(endpoint) => {
            let endpoint = Url::parse(endpoint).context("invalid provider endpoint")?;
            tracing::info!("Fetching through provider API at {}", endpoint);
            Arc::new(ApiFetchProvider::new(
                client,
                endpoint,
                config.provider.api_key.clone(),
            ))
        }
        None => {
            tracing::info!("No provider endpoint configured; fetching targets directly");
            Arc::new(DirectFetchProvider::new(client))
        }
    };

    let store = SqliteTaskStore::new(Path::new(&config.storage.database_path))
        .with_context(|| format!("opening database {}", config.storage.database_path))?;
    let blobs = FsBlobStore::new(config.storage.blob_root.clone());

    let (sink, mut documents) = ChannelDocumentSink::channel();
    tokio::spawn(async move {
        while let Some(document) = documents.recv().await {
            tracing::debug!(
                "Document ready for processing: {} ({})",
                document.storage_key,
                document.content_type.as_deref().unwrap_or("unknown type")
            );
        }
    });

    Ok(TaskManager::new(
        config,
        provider,
        Arc::new(store),
        Arc::new(blobs),
        Arc::new(sink),
    ))
}

/// Waits for a task, cancelling it cooperatively on Ctrl-C
async fn run_to_end(manager: &TaskManager, task_id: Uuid) -> anyhow::Result<TaskSnapshot> {
    let wait = manager.wait(task_id);
    tokio::pin!(wait);

    tokio::select! {
        snapshot = &mut wait => return Ok(snapshot?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; cancelling task {} after in-flight work drains", task_id);
            manager.cancel(task_id).await?;
        }
    }

    Ok(wait.await?)
}

fn report_snapshot(
    snapshot: &TaskSnapshot,
    config_hash: &str,
    report: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let summary = TaskSummary::from_snapshot(snapshot, Some(config_hash));

    if json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }

    if let Some(path) = report {
        write_markdown_report(&summary, path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}

/// Handles --dry-run: shows the effective configuration and planned work
fn handle_dry_run(config: &Config, command: &Command) -> anyhow::Result<()> {
    println!("=== Escalade Dry Run ===\n");

    let limits = config.default_limits();
    println!("Task Defaults:");
    println!("  Max pages: {}", limits.max_pages);
    println!("  Max documents: {}", limits.max_documents);
    println!("  Max depth: {}", limits.max_depth);
    println!(
        "  Workers: {} (ceiling {})",
        limits.max_workers, config.system.worker_ceiling
    );
    println!("  Request delay: {}ms", limits.request_delay_ms);
    println!(
        "  Timeouts: {}s per request, {}s total",
        limits.page_timeout_secs, limits.total_timeout_secs
    );
    println!(
        "  Fatal thresholds: {} fetch / {} storage errors",
        config.crawl.max_fetch_errors, config.crawl.max_storage_errors
    );

    println!("\nProvider:");
    match &config.provider.endpoint {
        Some(endpoint) => println!("  Endpoint: {}", endpoint),
        None => println!("  Endpoint: none (direct fetch)"),
    }
    println!(
        "  Retries: {} (delay {}ms)",
        config.provider.retries, config.provider.retry_delay_ms
    );

    println!("\nTiers:");
    let tiers = config.tier_table();
    for tier in Tier::ALL {
        let params = tiers.get(tier);
        println!(
            "  {:<9} render={} egress={:?} wait={}ms cost={}",
            tier.as_str(),
            params.render_js,
            params.egress,
            params.wait_ms,
            params.cost
        );
    }

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Documents: {}", config.storage.blob_root);

    if let Command::Crawl { seed, .. } = command {
        let seed = normalize_url(seed)?;
        println!("\nWould crawl: {}", seed);
    }

    Ok(())
}
