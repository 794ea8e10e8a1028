//! Crawl orchestrator - drives one crawl task end to end
//!
//! This module contains the worker pool that coordinates all aspects of a
//! single task's crawl, including:
//! - Seeding and draining the frontier
//! - Enforcing the page, document, depth and time budgets
//! - Dispatching pages to the tier ladder and documents to the downloader
//! - Feeding discovered links back into the frontier
//! - Per-URL error accounting and the fatal-error thresholds
//! - Cooperative cancellation
//!
//! All shared state (frontier, visited set, counters, error summary) lives
//! behind one mutex; the only suspension points are the network calls made
//! by the ladder and the downloader.

use crate::crawler::downloader::{DownloadError, FileDownloader};
use crate::crawler::frontier::{Frontier, FrontierEntry, Verdict};
use crate::crawler::parser::parse_html;
use crate::fetch::{FetchError, FetchedPage, TierLadder, UsageSnapshot};
use crate::state::{
    CrawlCounters, CrawlLimits, CrawlPolicy, CrawlTask, DownloadedFile, ErrorBudget, ErrorKind,
    ErrorSummary, TaskStatus,
};
use crate::url::{normalize_url, LinkClassifier, LinkKind, Scope};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// Poll interval of idle workers
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Progress is logged every this many dispatches
const PROGRESS_EVERY: u64 = 10;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Frontier empty, all workers idle
    Drained,
    /// Page or document budget reached
    LimitReached,
    /// Total task timeout expired
    Timeout,
    /// Cancellation was requested
    Cancelled,
    /// A fatal-error threshold was exceeded
    Fatal,
}

impl HaltReason {
    /// Terminal task status this halt maps to
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Drained | Self::LimitReached | Self::Timeout => TaskStatus::Completed,
            Self::Cancelled => TaskStatus::Cancelled,
            Self::Fatal => TaskStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drained => "drained",
            Self::LimitReached => "limit_reached",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a running crawl
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlProgress {
    pub counters: CrawlCounters,
    pub frontier_len: usize,
    pub in_flight: usize,
    pub visited: usize,
    pub dispatched: u64,
    pub error_summary: ErrorSummary,
    pub usage: UsageSnapshot,
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub halt: HaltReason,
    pub counters: CrawlCounters,
    pub error_summary: ErrorSummary,

    /// Message of the error that made the task fail
    pub fatal_error: Option<String>,

    pub files: Vec<DownloadedFile>,
    pub usage: UsageSnapshot,

    /// Distinct URLs dispatched
    pub visited: usize,

    /// Distinct URLs ever enqueued
    pub discovered: usize,

    /// Deepest dispatched frontier entry
    pub max_depth_dispatched: u32,

    pub elapsed: Duration,
}

/// Page/document counters including in-flight reservations
#[derive(Debug, Default)]
struct Budget {
    pages_visited: u32,
    pages_reserved: u32,
    documents_downloaded: u32,
    documents_reserved: u32,
    bytes_downloaded: u64,
}

impl Budget {
    fn pages_full(&self, limits: &CrawlLimits) -> bool {
        self.pages_visited >= limits.max_pages
    }

    fn documents_full(&self, limits: &CrawlLimits) -> bool {
        self.documents_downloaded >= limits.max_documents
    }

    /// Dispatch decision for one queued entry
    ///
    /// Entries that can never fit are dropped; entries blocked only by
    /// in-flight reservations wait, since a reservation may be released.
    fn verdict(&self, entry: &FrontierEntry, limits: &CrawlLimits) -> Verdict {
        if entry.depth > limits.max_depth {
            return Verdict::Drop;
        }
        let (done, reserved, max) = match entry.kind {
            LinkKind::Page => (self.pages_visited, self.pages_reserved, limits.max_pages),
            LinkKind::Document => (
                self.documents_downloaded,
                self.documents_reserved,
                limits.max_documents,
            ),
        };
        if done >= max {
            Verdict::Drop
        } else if done + reserved >= max {
            Verdict::Keep
        } else {
            Verdict::Take
        }
    }

    fn reserve(&mut self, kind: LinkKind) {
        match kind {
            LinkKind::Page => self.pages_reserved += 1,
            LinkKind::Document => self.documents_reserved += 1,
        }
    }

    fn release(&mut self, kind: LinkKind) {
        match kind {
            LinkKind::Page => self.pages_reserved = self.pages_reserved.saturating_sub(1),
            LinkKind::Document => {
                self.documents_reserved = self.documents_reserved.saturating_sub(1)
            }
        }
    }

    fn counters(&self) -> CrawlCounters {
        CrawlCounters {
            pages_visited: self.pages_visited,
            documents_downloaded: self.documents_downloaded,
            bytes_downloaded: self.bytes_downloaded,
        }
    }
}

#[derive(Debug, Default)]
struct CrawlState {
    frontier: Frontier,
    budget: Budget,
    scope: Option<Scope>,
    in_flight: usize,
    dispatched: u64,
    max_depth_dispatched: u32,
    errors: ErrorSummary,
    fetch_errors: u32,
    storage_errors: u32,
    halt: Option<HaltReason>,
    fatal_error: Option<String>,
}

enum Dispatch {
    Run(FrontierEntry),
    Wait,
    Done,
}

struct Inner {
    task_id: Uuid,
    seed_url: String,
    limits: CrawlLimits,
    policy: CrawlPolicy,
    ladder: Arc<TierLadder>,
    downloader: Arc<FileDownloader>,
    classifier: LinkClassifier,
    cancel: CancellationToken,
    state: Mutex<CrawlState>,
    notify: Notify,
}

/// Runs one crawl task over a bounded worker pool
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator for `task`
    ///
    /// # Arguments
    ///
    /// * `task` - The task record; its limits must already be bounded
    /// * `ladder` - Page/binary fetcher shared by all workers
    /// * `downloader` - Document persister for this task
    /// * `classifier` - Page vs document classifier
    /// * `cancel` - Cooperative cancellation token
    pub fn new(
        task: &CrawlTask,
        ladder: Arc<TierLadder>,
        downloader: Arc<FileDownloader>,
        classifier: LinkClassifier,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                task_id: task.id,
                seed_url: task.seed_url.clone(),
                limits: task.limits,
                policy: task.policy,
                ladder,
                downloader,
                classifier,
                cancel,
                state: Mutex::new(CrawlState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Snapshot for external polling
    pub fn progress(&self) -> CrawlProgress {
        let state = self.inner.lock();
        CrawlProgress {
            counters: state.budget.counters(),
            frontier_len: state.frontier.len(),
            in_flight: state.in_flight,
            visited: state.frontier.visited_count(),
            dispatched: state.dispatched,
            error_summary: state.errors.clone(),
            usage: self.inner.ladder.usage().snapshot(),
        }
    }

    /// Runs the crawl until the frontier drains, a budget is exhausted,
    /// the task times out, is cancelled, or fails
    pub async fn run(&self) -> CrawlResult {
        let inner = &self.inner;
        let started = Instant::now();
        let deadline = started + inner.limits.total_timeout();

        tracing::info!(
            "Starting crawl {} of {} ({} workers, max {} pages / {} documents / depth {})",
            inner.task_id,
            inner.seed_url,
            inner.limits.max_workers,
            inner.limits.max_pages,
            inner.limits.max_documents,
            inner.limits.max_depth
        );

        match normalize_url(&inner.seed_url) {
            Ok(seed) => inner.seed(seed),
            Err(e) => {
                let mut state = inner.lock();
                state.errors.insert(ErrorKind::InvalidUrl, 1);
                inner.halt_fatal(&mut state, format!("invalid seed URL: {}", e));
            }
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..inner.limits.max_workers.max(1) {
            let inner = Arc::clone(inner);
            workers.spawn(async move { inner.worker(worker_id, deadline).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Crawl worker aborted: {}", e);
                let mut state = inner.lock();
                inner.halt_fatal(&mut state, format!("worker aborted: {}", e));
            }
        }

        let result = inner.result(started.elapsed());
        tracing::info!(
            "Crawl {} finished ({}): {} pages, {} documents, {} bytes in {:?}",
            result.task_id,
            result.halt,
            result.counters.pages_visited,
            result.counters.documents_downloaded,
            result.counters.bytes_downloaded,
            result.elapsed
        );
        result
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn seed(&self, seed: Url) {
        let mut state = self.lock();
        let kind = self.classifier.classify(&seed);
        state.scope = Some(Scope::new(&seed, self.policy.scope));
        state.frontier.push(FrontierEntry {
            url: seed,
            depth: 0,
            kind,
        });
    }

    async fn worker(&self, worker_id: u32, deadline: Instant) {
        tracing::debug!("Worker {} started", worker_id);
        let delay = self.limits.request_delay();

        loop {
            let entry = match self.next_dispatch(deadline) {
                Dispatch::Run(entry) => entry,
                Dispatch::Wait => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                    continue;
                }
                Dispatch::Done => break,
            };

            match entry.kind {
                LinkKind::Page => self.process_page(entry).await,
                LinkKind::Document => self.process_document(entry).await,
            }

            {
                let mut state = self.lock();
                state.in_flight = state.in_flight.saturating_sub(1);
            }
            self.notify.notify_waiters();

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        self.notify.notify_waiters();
        tracing::debug!("Worker {} stopped", worker_id);
    }

    /// Picks the next entry under the lock: halt checks, budget checks,
    /// visited check-and-insert
    fn next_dispatch(&self, deadline: Instant) -> Dispatch {
        let mut state = self.lock();

        if state.halt.is_some() {
            return Dispatch::Done;
        }
        if self.cancel.is_cancelled() {
            tracing::info!("Crawl {} cancelled, draining in-flight work", self.task_id);
            state.halt = Some(HaltReason::Cancelled);
            return Dispatch::Done;
        }
        if Instant::now() >= deadline {
            tracing::info!("Crawl {} reached its total timeout", self.task_id);
            state.halt = Some(HaltReason::Timeout);
            return Dispatch::Done;
        }

        let limits = self.limits;
        let CrawlState {
            frontier, budget, ..
        } = &mut *state;
        let next = frontier.take_next(|entry| budget.verdict(entry, &limits));

        let Some(entry) = next else {
            return if state.in_flight == 0 {
                Dispatch::Done
            } else {
                Dispatch::Wait
            };
        };

        state.frontier.mark_visited(&entry.url);
        state.budget.reserve(entry.kind);
        state.in_flight += 1;
        state.dispatched += 1;
        state.max_depth_dispatched = state.max_depth_dispatched.max(entry.depth);

        if state.dispatched % PROGRESS_EVERY == 0 {
            tracing::info!(
                "Progress: {} dispatched, {} pages, {} documents, {} in frontier",
                state.dispatched,
                state.budget.pages_visited,
                state.budget.documents_downloaded,
                state.frontier.len()
            );
        }

        tracing::debug!("Dispatching {:?} {} (depth {})", entry.kind, entry.url, entry.depth);
        Dispatch::Run(entry)
    }

    async fn process_page(&self, entry: FrontierEntry) {
        match self
            .ladder
            .fetch_page(&entry.url, self.policy.domain_type)
            .await
        {
            Ok(page) if !page.is_markup() => self.reroute_document(page).await,
            Ok(page) => self.accept_page(&entry, &page),
            Err(FetchError::InsufficientContent { page, reason, .. })
                if self.policy.accept_degraded =>
            {
                tracing::debug!("Accepting degraded content for {}: {}", entry.url, reason);
                {
                    let mut state = self.lock();
                    *state
                        .errors
                        .entry(ErrorKind::FetchInsufficientContent)
                        .or_insert(0) += 1;
                }
                self.accept_page(&entry, &page);
            }
            Err(e) => {
                let mut state = self.lock();
                state.budget.release(LinkKind::Page);
                self.record_error(&mut state, &entry.url, e.kind(), e.to_string());
            }
        }
    }

    /// Counts a page as visited and enqueues its links
    fn accept_page(&self, entry: &FrontierEntry, page: &FetchedPage) {
        let parsed = parse_html(&page.text(), &page.url);

        let mut state = self.lock();
        state.budget.release(LinkKind::Page);
        state.budget.pages_visited += 1;

        let depth = entry.depth + 1;
        let mut added = 0usize;
        if depth <= self.limits.max_depth {
            for link in parsed.links {
                let kind = self.classifier.classify(&link);
                if !self.in_scope(&state, &link, kind) {
                    continue;
                }
                let full = match kind {
                    LinkKind::Page => state.budget.pages_full(&self.limits),
                    LinkKind::Document => state.budget.documents_full(&self.limits),
                };
                if !full
                    && state.frontier.push(FrontierEntry {
                        url: link,
                        depth,
                        kind,
                    })
                {
                    added += 1;
                }
            }
        }
        drop(state);

        tracing::debug!(
            "Visited {} at tier {} ({} new links)",
            entry.url,
            page.tier,
            added
        );
        if added > 0 {
            self.notify.notify_waiters();
        }
    }

    fn in_scope(&self, state: &CrawlState, url: &Url, kind: LinkKind) -> bool {
        let Some(scope) = &state.scope else {
            return false;
        };
        match kind {
            LinkKind::Page => scope.contains(url),
            LinkKind::Document => self.policy.allow_offsite_documents || scope.same_origin(url),
        }
    }

    /// Hands a page URL that served a document over to the downloader
    async fn reroute_document(&self, page: FetchedPage) {
        {
            let mut state = self.lock();
            state.budget.release(LinkKind::Page);
            let budget = &state.budget;
            if budget.documents_downloaded + budget.documents_reserved >= self.limits.max_documents
            {
                tracing::debug!("Document budget full, skipping {}", page.url);
                return;
            }
            state.budget.reserve(LinkKind::Document);
        }

        let url = page.url.clone();
        let result = self.downloader.store_fetched(page).await;
        self.finish_document(&url, result);
    }

    async fn process_document(&self, entry: FrontierEntry) {
        let result = self.downloader.download_document(&entry.url).await;
        self.finish_document(&entry.url, result);
    }

    fn finish_document(&self, url: &Url, result: Result<DownloadedFile, DownloadError>) {
        let mut state = self.lock();
        state.budget.release(LinkKind::Document);
        match result {
            Ok(file) => {
                state.budget.documents_downloaded += 1;
                state.budget.bytes_downloaded += file.size;
            }
            Err(e) => self.record_error(&mut state, url, e.kind(), e.to_string()),
        }
    }

    /// Records a per-URL error and applies the fatal-error thresholds
    fn record_error(&self, state: &mut CrawlState, url: &Url, kind: ErrorKind, message: String) {
        tracing::warn!("{} failed ({}): {}", url, kind, message);
        *state.errors.entry(kind).or_insert(0) += 1;

        let (count, max, label) = match kind.budget() {
            Some(ErrorBudget::Fetch) => {
                state.fetch_errors += 1;
                (state.fetch_errors, self.policy.max_fetch_errors, "fetch")
            }
            Some(ErrorBudget::Storage) => {
                state.storage_errors += 1;
                (state.storage_errors, self.policy.max_storage_errors, "storage")
            }
            None => return,
        };

        if count > max && state.halt.is_none() {
            self.halt_fatal(
                state,
                format!(
                    "{} error threshold exceeded ({} > {}); last error at {}: {}",
                    label, count, max, url, message
                ),
            );
        }
    }

    fn halt_fatal(&self, state: &mut CrawlState, message: String) {
        if state.halt == Some(HaltReason::Fatal) {
            return;
        }
        tracing::error!("Crawl {} failed: {}", self.task_id, message);
        *state.errors.entry(ErrorKind::TaskFatal).or_insert(0) += 1;
        state.halt = Some(HaltReason::Fatal);
        state.fatal_error = Some(message);
        self.notify.notify_waiters();
    }

    fn result(&self, elapsed: Duration) -> CrawlResult {
        let state = self.lock();
        let halt = state.halt.unwrap_or({
            if state.budget.pages_full(&self.limits) || state.budget.documents_full(&self.limits)
            {
                HaltReason::LimitReached
            } else {
                HaltReason::Drained
            }
        });

        CrawlResult {
            task_id: self.task_id,
            status: halt.status(),
            halt,
            counters: state.budget.counters(),
            error_summary: state.errors.clone(),
            fatal_error: state.fatal_error.clone(),
            files: self.downloader.files(),
            usage: self.ladder.usage().snapshot(),
            visited: state.frontier.visited_count(),
            discovered: state.frontier.discovered_count(),
            max_depth_dispatched: state.max_depth_dispatched,
            elapsed,
        }
    }
}
