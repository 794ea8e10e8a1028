//! Task lifecycle manager
//!
//! Owns the injected collaborators (fetch provider, task store, blob store,
//! document sink) and the table of runs active in this process. Every
//! status transition is written to the task store before it is reported as
//! having happened.

use crate::config::Config;
use crate::crawler::{CrawlProgress, FileDownloader, Orchestrator};
use crate::fetch::{FetchProvider, TierLadder, UsageSnapshot};
use crate::state::{CrawlLimits, CrawlPolicy, CrawlTask, DownloadedFile, TaskStatus};
use crate::storage::{BlobStore, DocumentSink, StorageError, TaskStore};
use crate::task::trigger::TriggerMessage;
use crate::url::normalize_url;
use crate::{CrawlError, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Interval between progress writes of a running task
const PROGRESS_FLUSH: Duration = Duration::from_secs(2);

/// Attempts at writing the terminal record of a run
const FINISH_ATTEMPTS: u32 = 3;

/// Base delay between terminal write attempts (multiplied by the attempt)
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Finished runs remembered for usage reporting
const FINISHED_CAPACITY: usize = 256;

/// Status view of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// The stored record, with live counters while the task runs here
    pub task: CrawlTask,

    /// Live progress, only while the task runs in this process
    pub progress: Option<CrawlProgress>,

    /// Provider usage, when known to this process
    pub usage: Option<UsageSnapshot>,

    pub files: Vec<DownloadedFile>,
}

/// Creates, starts, cancels, inspects and deletes crawl tasks
///
/// Cheap to clone; clones share the same active-run table.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Config,
    provider: Arc<dyn FetchProvider>,
    store: Arc<dyn TaskStore>,
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn DocumentSink>,
    runs: Mutex<HashMap<Uuid, ActiveRun>>,
    finished: Mutex<HashMap<Uuid, FinishedRun>>,
}

struct ActiveRun {
    cancel: CancellationToken,
    orchestrator: Arc<Orchestrator>,
    downloader: Arc<FileDownloader>,

    /// Terminal status once the run is over
    outcome: watch::Receiver<Option<TaskStatus>>,
}

/// What this process keeps about a run after it left the active table
struct FinishedRun {
    usage: UsageSnapshot,
    finished_at: Instant,

    /// Terminal record the task store has not accepted yet
    unpersisted: Option<PendingFinish>,
}

#[derive(Clone)]
struct PendingFinish {
    task: CrawlTask,
    files: Vec<DownloadedFile>,
}

/// Result of writing the terminal record of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishWrite {
    Written,

    /// The store refused it: the task left `Running` elsewhere
    Rejected,

    /// Every attempt failed
    Failed,
}

impl TaskManager {
    /// Creates a manager over the given collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration (task defaults, tiers, downloader)
    /// * `provider` - Fetch provider shared by every task's tier ladder
    /// * `store` - Task metadata store
    /// * `blobs` - Document blob store
    /// * `sink` - Downstream consumer of stored documents
    pub fn new(
        config: Config,
        provider: Arc<dyn FetchProvider>,
        store: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                provider,
                store,
                blobs,
                sink,
                runs: Mutex::new(HashMap::new()),
                finished: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Creates a pending task with the configured default limits and policy
    pub async fn create(&self, user_id: &str, seed_url: &str) -> Result<CrawlTask> {
        let limits = self.inner.config.default_limits();
        let policy = self.inner.config.default_policy();
        self.create_with(user_id, seed_url, limits, policy).await
    }

    /// Creates a pending task with explicit limits and policy
    ///
    /// The seed is normalized and the worker pool clamped to the system
    /// ceiling before the record is written.
    pub async fn create_with(
        &self,
        user_id: &str,
        seed_url: &str,
        limits: CrawlLimits,
        policy: CrawlPolicy,
    ) -> Result<CrawlTask> {
        let seed = normalize_url(seed_url)?;
        let limits = limits.bounded(self.inner.config.system.worker_ceiling);
        let task = CrawlTask::new(user_id, seed.as_str(), limits, policy);

        self.inner.store.insert_task(&task).await?;
        tracing::info!(
            "Created task {} for user {} (seed {})",
            task.id,
            task.user_id,
            task.seed_url
        );
        Ok(task)
    }

    /// Starts a pending task in the background
    ///
    /// A task that is already running or terminal is left alone and its
    /// current status returned.
    ///
    /// # Errors
    ///
    /// `TransitionNotPersisted` if the `Pending -> Running` write failed; the
    /// task then stays pending and no run is started.
    pub async fn start(&self, task_id: Uuid) -> Result<TaskStatus> {
        if self.is_active(task_id) {
            return Ok(TaskStatus::Running);
        }
        self.inner.reconcile(task_id).await;

        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            tracing::debug!("Start of task {} ignored: already {}", task_id, task.status);
            return Ok(task.status);
        }
        task.limits = task.limits.bounded(self.inner.config.system.worker_ceiling);

        let (run, outcome) = self.prepare_run(&task);
        let orchestrator = Arc::clone(&run.orchestrator);
        {
            let mut runs = self.inner.lock_runs();
            if runs.contains_key(&task_id) {
                return Ok(TaskStatus::Running);
            }
            runs.insert(task_id, run);
        }

        match self
            .inner
            .store
            .transition_status(task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.inner.lock_runs().remove(&task_id);
                let current = self.load(task_id).await?;
                tracing::debug!("Task {} changed to {} before it could start", task_id, current.status);
                return Ok(current.status);
            }
            Err(e) => {
                self.inner.lock_runs().remove(&task_id);
                return Err(transition_failure(
                    task_id,
                    TaskStatus::Pending,
                    TaskStatus::Running,
                    e,
                ));
            }
        }

        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        tracing::info!("Task {} is running", task_id);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(task, orchestrator, outcome).await });

        Ok(TaskStatus::Running)
    }

    /// Requests cancellation and returns without waiting for the drain
    ///
    /// A running task keeps reporting `Running` until its in-flight work
    /// has finished; a pending task is cancelled directly.
    pub async fn cancel(&self, task_id: Uuid) -> Result<TaskStatus> {
        let token = self
            .inner
            .lock_runs()
            .get(&task_id)
            .map(|run| run.cancel.clone());
        if let Some(token) = token {
            tracing::info!("Cancellation requested for task {}", task_id);
            token.cancel();
            return Ok(TaskStatus::Running);
        }
        self.inner.reconcile(task_id).await;

        let task = self.load(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                match self
                    .inner
                    .store
                    .transition_status(task_id, TaskStatus::Pending, TaskStatus::Cancelled)
                    .await
                {
                    Ok(true) => {
                        tracing::info!("Task {} cancelled before it started", task_id);
                        Ok(TaskStatus::Cancelled)
                    }
                    Ok(false) => Ok(self.load(task_id).await?.status),
                    Err(e) => Err(transition_failure(
                        task_id,
                        TaskStatus::Pending,
                        TaskStatus::Cancelled,
                        e,
                    )),
                }
            }
            TaskStatus::Running => {
                if self.inner.pending_finish(task_id).is_none() {
                    tracing::warn!("Task {} is not running in this process; cannot cancel it", task_id);
                }
                Ok(TaskStatus::Running)
            }
            status => Ok(status),
        }
    }

    /// Current view of a task
    ///
    /// A terminal record that could not be written when its run ended is
    /// written again first; until that succeeds the stored record is shown.
    pub async fn get_status(&self, task_id: Uuid) -> Result<TaskSnapshot> {
        let live = self
            .inner
            .lock_runs()
            .get(&task_id)
            .map(|run| (run.orchestrator.progress(), run.downloader.files()));

        if live.is_none() {
            self.inner.reconcile(task_id).await;
        }
        let mut task = self.load(task_id).await?;

        if let Some((progress, files)) = live {
            task.counters = progress.counters;
            task.error_summary = progress.error_summary.clone();
            return Ok(TaskSnapshot {
                task,
                usage: Some(progress.usage.clone()),
                progress: Some(progress),
                files,
            });
        }

        let files = self.inner.store.list_files(task_id).await?;
        let usage = self
            .inner
            .lock_finished()
            .get(&task_id)
            .map(|run| run.usage.clone());

        Ok(TaskSnapshot {
            task,
            progress: None,
            usage,
            files,
        })
    }

    /// Waits for a run of this process to finish, then returns the snapshot
    ///
    /// Returns immediately for tasks that are not running here.
    pub async fn wait(&self, task_id: Uuid) -> Result<TaskSnapshot> {
        let receiver = self
            .inner
            .lock_runs()
            .get(&task_id)
            .map(|run| run.outcome.clone());

        if let Some(mut receiver) = receiver {
            // An error only means the run was dropped; the store decides below
            let _ = receiver.wait_for(Option::is_some).await;
        }

        if let Some(status) = self.inner.reconcile(task_id).await {
            return Err(CrawlError::TransitionNotPersisted {
                task_id,
                from: TaskStatus::Running,
                to: status,
            });
        }

        self.get_status(task_id).await
    }

    /// Deletes a terminal or never-started task and its stored documents
    ///
    /// A task stored as `Running` is refused unless its run finished in this
    /// process and only the terminal write is missing.
    pub async fn delete(&self, task_id: Uuid) -> Result<()> {
        if self.is_active(task_id) {
            return Err(CrawlError::TaskActive(task_id));
        }
        let unpersisted = self.inner.reconcile(task_id).await;

        let task = self.load(task_id).await?;
        if task.status == TaskStatus::Running && unpersisted.is_none() {
            return Err(CrawlError::TaskActive(task_id));
        }

        let mut files = self.inner.store.list_files(task_id).await?;
        if let Some(pending) = self.inner.pending_finish(task_id) {
            files.extend(pending.files);
        }
        for file in &files {
            self.inner.blobs.delete(&file.storage_key).await?;
        }
        self.inner.store.delete_task(task_id).await?;
        self.inner.lock_finished().remove(&task_id);

        tracing::info!("Deleted task {} ({} documents removed)", task_id, files.len());
        Ok(())
    }

    /// Starts the task named by a trigger if the sender owns it
    pub async fn handle_trigger(&self, message: &TriggerMessage) -> Result<TaskStatus> {
        let task = self.load(message.task_id).await?;
        if task.user_id != message.user_id {
            tracing::warn!(
                "Rejected trigger for task {} from user {}",
                message.task_id,
                message.user_id
            );
            return Err(CrawlError::NotOwner {
                task_id: message.task_id,
                user_id: message.user_id.clone(),
            });
        }
        self.start(task.id).await
    }

    /// Parses a JSON trigger message and handles it
    pub async fn handle_trigger_json(&self, raw: &str) -> Result<TaskStatus> {
        let message = TriggerMessage::from_json(raw)?;
        self.handle_trigger(&message).await
    }

    /// Whether a run of this task is in progress in this process
    pub fn is_active(&self, task_id: Uuid) -> bool {
        self.inner.lock_runs().contains_key(&task_id)
    }

    /// Ids of the runs in progress in this process
    pub fn active_tasks(&self) -> Vec<Uuid> {
        self.inner.lock_runs().keys().copied().collect()
    }

    async fn load(&self, task_id: Uuid) -> Result<CrawlTask> {
        self.inner
            .store
            .get_task(task_id)
            .await?
            .ok_or(CrawlError::TaskNotFound(task_id))
    }

    /// Builds the per-run ladder, downloader and orchestrator
    fn prepare_run(&self, task: &CrawlTask) -> (ActiveRun, watch::Sender<Option<TaskStatus>>) {
        let config = &self.inner.config;
        let ladder = Arc::new(TierLadder::new(
            Arc::clone(&self.inner.provider),
            config.tier_table(),
            config.ladder_settings(task.limits.page_timeout()),
        ));
        let downloader = Arc::new(FileDownloader::new(
            task,
            Arc::clone(&ladder),
            Arc::clone(&self.inner.blobs),
            Arc::clone(&self.inner.sink),
            config.download_settings(),
        ));
        let cancel = CancellationToken::new();
        let orchestrator = Arc::new(Orchestrator::new(
            task,
            ladder,
            Arc::clone(&downloader),
            config.link_classifier(),
            cancel.clone(),
        ));
        let (sender, receiver) = watch::channel(None);

        let run = ActiveRun {
            cancel,
            orchestrator,
            downloader,
            outcome: receiver,
        };
        (run, sender)
    }
}

impl ManagerInner {
    fn lock_runs(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_finished(&self) -> MutexGuard<'_, HashMap<Uuid, FinishedRun>> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a finished run, evicting the oldest persisted ones over capacity
    fn remember(&self, task_id: Uuid, run: FinishedRun) {
        let mut finished = self.lock_finished();
        finished.insert(task_id, run);

        while finished.len() > FINISHED_CAPACITY {
            let oldest = finished
                .iter()
                .filter(|(_, run)| run.unpersisted.is_none())
                .min_by_key(|(_, run)| run.finished_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    finished.remove(&id);
                }
                None => break,
            }
        }
    }

    fn pending_finish(&self, task_id: Uuid) -> Option<PendingFinish> {
        self.lock_finished()
            .get(&task_id)
            .and_then(|run| run.unpersisted.clone())
    }

    /// Retries the terminal write of a run whose record never reached the store
    ///
    /// # Returns
    ///
    /// The terminal status the store is still missing, if any
    async fn reconcile(&self, task_id: Uuid) -> Option<TaskStatus> {
        let pending = self.pending_finish(task_id)?;
        let write = self
            .store
            .finish_task(&pending.task, TaskStatus::Running, &pending.files)
            .await;

        match write {
            Ok(true) => {
                tracing::info!(
                    "Task {} is {} (final record written late)",
                    task_id,
                    pending.task.status
                );
            }
            Ok(false) | Err(StorageError::InvalidTransition { .. }) => {
                tracing::warn!(
                    "Task {} left the running state elsewhere; dropping its final record",
                    task_id
                );
            }
            Err(e) => {
                tracing::warn!("Final record of task {} still not persisted: {}", task_id, e);
                return Some(pending.task.status);
            }
        }

        if let Some(run) = self.lock_finished().get_mut(&task_id) {
            run.unpersisted = None;
        }
        None
    }

    /// Runs the orchestrator, flushing progress, then commits the outcome
    async fn drive(
        self: Arc<Self>,
        mut task: CrawlTask,
        orchestrator: Arc<Orchestrator>,
        outcome: watch::Sender<Option<TaskStatus>>,
    ) {
        let result = {
            let run = orchestrator.run();
            tokio::pin!(run);
            let mut flush = tokio::time::interval_at(Instant::now() + PROGRESS_FLUSH, PROGRESS_FLUSH);
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    _ = flush.tick() => self.flush_progress(&task, &orchestrator.progress()).await,
                }
            }
        };

        task.status = result.status;
        task.counters = result.counters;
        task.error_summary = result.error_summary.clone();
        task.fatal_error = result.fatal_error.clone();
        task.updated_at = Utc::now();

        let write = self.persist_finish(&task, &result.files).await;
        let status = task.status;
        let task_id = task.id;

        let unpersisted = (write == FinishWrite::Failed).then(|| PendingFinish {
            task,
            files: result.files,
        });
        self.remember(
            task_id,
            FinishedRun {
                usage: result.usage,
                finished_at: Instant::now(),
                unpersisted,
            },
        );
        self.lock_runs().remove(&task_id);
        outcome.send_replace(Some(status));
    }

    async fn flush_progress(&self, task: &CrawlTask, progress: &CrawlProgress) {
        let mut snapshot = task.clone();
        snapshot.counters = progress.counters;
        snapshot.error_summary = progress.error_summary.clone();

        if let Err(e) = self.store.save_progress(&snapshot).await {
            tracing::warn!("Failed to save progress of task {}: {}", task.id, e);
        }
    }

    /// Writes the terminal record, retrying failed writes
    async fn persist_finish(&self, task: &CrawlTask, files: &[DownloadedFile]) -> FinishWrite {
        for attempt in 1..=FINISH_ATTEMPTS {
            match self
                .store
                .finish_task(task, TaskStatus::Running, files)
                .await
            {
                Ok(true) => {
                    tracing::info!("Task {} is {}", task.id, task.status);
                    return FinishWrite::Written;
                }
                Ok(false) => {
                    tracing::error!(
                        "Task {} left the running state elsewhere; final record not written",
                        task.id
                    );
                    return FinishWrite::Rejected;
                }
                Err(e @ StorageError::InvalidTransition { .. }) => {
                    tracing::error!("Final record of task {} refused: {}", task.id, e);
                    return FinishWrite::Rejected;
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} to persist final state of task {} failed: {}",
                        attempt,
                        FINISH_ATTEMPTS,
                        task.id,
                        e
                    );
                    if attempt < FINISH_ATTEMPTS {
                        tokio::time::sleep(FINISH_RETRY_DELAY * attempt).await;
                    }
                }
            }
        }

        tracing::error!(
            "Task {} finished as {} but the final record could not be persisted",
            task.id,
            task.status
        );
        FinishWrite::Failed
    }
}

/// Maps a failed status write onto the error reported to callers
fn transition_failure(
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    e: StorageError,
) -> CrawlError {
    match e {
        StorageError::InvalidTransition { from, to } => CrawlError::InvalidTransition { from, to },
        e => {
            tracing::error!("Failed to persist {} -> {} of task {}: {}", from, to, task_id, e);
            CrawlError::TransitionNotPersisted { task_id, from, to }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::{binary, html, MockProvider};
    use crate::fetch::ProviderResponse;
    use crate::storage::{MemoryBlobStore, MemoryTaskStore, NullDocumentSink};

    const ROOT: &str = "https://example.test/";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.crawl.request_delay_ms = 0;
        config.crawl.total_timeout_secs = 30;
        config.crawl.page_timeout_secs = 5;
        config.provider.retries = 0;
        config.provider.retry_delay_ms = 1;
        config.sufficiency.min_text_len = Some(100);
        config
    }

    fn page_with_links(links: &[&str]) -> ProviderResponse {
        let anchors: String = links
            .iter()
            .map(|l| format!("<a href=\"{}\">link</a>", l))
            .collect();
        html(&format!(
            "<html><body><p>{}</p>{}</body></html>",
            "content ".repeat(40),
            anchors
        ))
    }

    fn small_site() -> MockProvider {
        MockProvider::new()
            .route(ROOT, |_| Ok(page_with_links(&["/about", "/files/report.pdf"])))
            .route("https://example.test/about", |_| Ok(page_with_links(&["/"])))
            .route("https://example.test/files/report.pdf", |_| {
                let mut body = b"%PDF-1.4\n".to_vec();
                body.resize(2048, b'x');
                Ok(binary("application/pdf", &body))
            })
    }

    struct Harness {
        manager: TaskManager,
        provider: Arc<MockProvider>,
        store: Arc<MemoryTaskStore>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn harness(provider: MockProvider) -> Harness {
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let manager = TaskManager::new(
            test_config(),
            provider.clone(),
            store.clone(),
            blobs.clone(),
            Arc::new(NullDocumentSink),
        );
        Harness {
            manager,
            provider,
            store,
            blobs,
        }
    }

    #[tokio::test]
    async fn test_create_persists_pending_task() {
        let h = harness(MockProvider::new());

        let task = h.manager.create("user-1", "HTTPS://Example.TEST:443/#top").await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.seed_url, ROOT);
        let stored = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_seed() {
        let h = harness(MockProvider::new());

        let result = h.manager.create("user-1", "ftp://example.test/").await;
        assert!(matches!(result, Err(CrawlError::Url(_))));
    }

    #[tokio::test]
    async fn test_create_bounds_workers() {
        let h = harness(MockProvider::new());
        let mut limits = h.manager.config().default_limits();
        limits.max_workers = 500;

        let task = h
            .manager
            .create_with("user-1", ROOT, limits, h.manager.config().default_policy())
            .await
            .unwrap();

        assert_eq!(task.limits.max_workers, 16);
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let h = harness(small_site());
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Running);
        let snapshot = h.manager.wait(task.id).await.unwrap();

        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(snapshot.task.counters.pages_visited, 2);
        assert_eq!(snapshot.task.counters.documents_downloaded, 1);
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(
            snapshot.files[0].storage_key,
            format!("user-1/{}/report.pdf", task.id)
        );
        assert!(snapshot.usage.is_some());
        assert!(!h.manager.is_active(task.id));

        let stored = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(h.blobs.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = harness(small_site().with_delay(Duration::from_millis(100)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Running);
        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Running);
        h.manager.wait(task.id).await.unwrap();

        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Completed);
        assert_eq!(h.provider.request_count(ROOT), 1);
    }

    #[tokio::test]
    async fn test_start_not_persisted_leaves_task_pending() {
        let h = harness(small_site());
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.store.fail_next_writes(1);
        let result = h.manager.start(task.id).await;

        assert!(matches!(
            result,
            Err(CrawlError::TransitionNotPersisted {
                from: TaskStatus::Pending,
                to: TaskStatus::Running,
                ..
            })
        ));
        assert!(!h.manager.is_active(task.id));
        assert!(h.provider.requests().is_empty());
        let stored = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);

        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Running);
        let snapshot = h.manager.wait(task.id).await.unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_unknown_task() {
        let h = harness(MockProvider::new());
        let id = Uuid::new_v4();

        assert!(matches!(h.manager.start(id).await, Err(CrawlError::TaskNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let h = harness(small_site());
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        assert_eq!(h.manager.cancel(task.id).await.unwrap(), TaskStatus::Cancelled);
        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Cancelled);
        assert!(h.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let links: Vec<String> = (0..20).map(|i| format!("/p{}", i)).collect();
        let mut provider = MockProvider::new().with_delay(Duration::from_millis(150));
        let root_links = links.clone();
        provider = provider.route(ROOT, move |_| {
            let refs: Vec<&str> = root_links.iter().map(String::as_str).collect();
            Ok(page_with_links(&refs))
        });
        for link in &links {
            provider = provider.route(&format!("https://example.test{}", link), |_| {
                Ok(page_with_links(&[]))
            });
        }
        let h = harness(provider);
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.manager.cancel(task.id).await.unwrap(), TaskStatus::Running);

        let snapshot = h.manager.wait(task.id).await.unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Cancelled);
        assert!(snapshot.task.counters.pages_visited < 21);
        assert_eq!(h.provider.completed(), h.provider.requests().len());
    }

    #[tokio::test]
    async fn test_delete_refused_while_running() {
        let h = harness(small_site().with_delay(Duration::from_millis(200)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        assert!(matches!(
            h.manager.delete(task.id).await,
            Err(CrawlError::TaskActive(_))
        ));

        h.manager.wait(task.id).await.unwrap();
        assert_eq!(h.blobs.keys().len(), 1);

        h.manager.delete(task.id).await.unwrap();
        assert!(h.blobs.keys().is_empty());
        assert!(matches!(
            h.manager.get_status(task.id).await,
            Err(CrawlError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_pending_task() {
        let h = harness(MockProvider::new());
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.delete(task.id).await.unwrap();
        assert!(h.store.get_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trigger_checks_owner() {
        let h = harness(small_site());
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        let foreign = TriggerMessage::new(task.id, "user-2");
        assert!(matches!(
            h.manager.handle_trigger(&foreign).await,
            Err(CrawlError::NotOwner { .. })
        ));
        assert!(!h.manager.is_active(task.id));

        let raw = TriggerMessage::new(task.id, "user-1").to_json().unwrap();
        assert_eq!(
            h.manager.handle_trigger_json(&raw).await.unwrap(),
            TaskStatus::Running
        );
        let snapshot = h.manager.wait(task.id).await.unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_trigger() {
        let h = harness(MockProvider::new());
        assert!(matches!(
            h.manager.handle_trigger_json("{not json").await,
            Err(CrawlError::Trigger(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_write_retried() {
        let h = harness(small_site().with_delay(Duration::from_millis(100)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        h.store.fail_next_writes(FINISH_ATTEMPTS - 1);

        let snapshot = h.manager.wait(task.id).await.unwrap();
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_terminal_write_exhausted() {
        let h = harness(small_site().with_delay(Duration::from_millis(100)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        h.store.set_failing(true);

        let result = h.manager.wait(task.id).await;
        assert!(matches!(
            result,
            Err(CrawlError::TransitionNotPersisted {
                from: TaskStatus::Running,
                to: TaskStatus::Completed,
                ..
            })
        ));

        // Still refused while the store keeps failing
        assert!(h.manager.wait(task.id).await.is_err());
        assert!(matches!(
            h.manager.delete(task.id).await,
            Err(CrawlError::Storage(_))
        ));

        h.store.set_failing(false);
        let stored = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_final_record_written_once_store_recovers() {
        let h = harness(small_site().with_delay(Duration::from_millis(100)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        h.store.set_failing(true);
        assert!(h.manager.wait(task.id).await.is_err());
        assert!(!h.manager.is_active(task.id));

        h.store.set_failing(false);
        let snapshot = h.manager.get_status(task.id).await.unwrap();

        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(snapshot.task.counters.pages_visited, 2);
        assert_eq!(snapshot.files.len(), 1);
        let stored = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);

        assert_eq!(h.manager.wait(task.id).await.unwrap().task.status, TaskStatus::Completed);
        assert_eq!(h.manager.start(task.id).await.unwrap(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_after_unpersisted_finish() {
        let h = harness(small_site().with_delay(Duration::from_millis(100)));
        let task = h.manager.create("user-1", ROOT).await.unwrap();

        h.manager.start(task.id).await.unwrap();
        h.store.set_failing(true);
        assert!(h.manager.wait(task.id).await.is_err());
        h.store.set_failing(false);
        assert_eq!(h.blobs.keys().len(), 1);

        // The late terminal write fails once more; the run is known finished
        h.store.fail_next_writes(1);
        h.manager.delete(task.id).await.unwrap();

        assert!(h.store.get_task(task.id).await.unwrap().is_none());
        assert!(h.blobs.keys().is_empty());
    }

    #[tokio::test]
    async fn test_finished_runs_are_bounded() {
        let h = harness(MockProvider::new());
        let stuck = Uuid::new_v4();
        h.manager.inner.remember(
            stuck,
            FinishedRun {
                usage: UsageSnapshot::default(),
                finished_at: Instant::now(),
                unpersisted: Some(PendingFinish {
                    task: CrawlTask::new(
                        "user-1",
                        ROOT,
                        h.manager.config().default_limits(),
                        h.manager.config().default_policy(),
                    ),
                    files: Vec::new(),
                }),
            },
        );

        let first = Uuid::new_v4();
        for i in 0..FINISHED_CAPACITY + 10 {
            let id = if i == 0 { first } else { Uuid::new_v4() };
            h.manager.inner.remember(
                id,
                FinishedRun {
                    usage: UsageSnapshot::default(),
                    finished_at: Instant::now() + Duration::from_millis(i as u64),
                    unpersisted: None,
                },
            );
        }

        let finished = h.manager.inner.lock_finished();
        assert_eq!(finished.len(), FINISHED_CAPACITY);
        assert!(finished.contains_key(&stuck));
        assert!(!finished.contains_key(&first));
    }

    #[test]
    fn test_refused_transition_reported_as_invalid() {
        let id = Uuid::new_v4();

        let refused = StorageError::InvalidTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::Running,
        };
        assert!(matches!(
            transition_failure(id, TaskStatus::Completed, TaskStatus::Running, refused),
            CrawlError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::Running,
            }
        ));

        let down = StorageError::Unavailable("down".to_string());
        assert!(matches!(
            transition_failure(id, TaskStatus::Pending, TaskStatus::Running, down),
            CrawlError::TransitionNotPersisted { task_id, .. } if task_id == id
        ));
    }

    #[tokio::test]
    async fn test_storage_error_surfaces_on_create() {
        let h = harness(MockProvider::new());
        h.store.set_failing(true);

        let result = h.manager.create("user-1", ROOT).await;
        assert!(matches!(
            result,
            Err(CrawlError::Storage(StorageError::Unavailable(_)))
        ));
    }
}
