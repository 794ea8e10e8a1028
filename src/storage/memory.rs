//! In-memory task store
//!
//! Used by tests and dry runs. Writes can be made to fail on demand to
//! exercise the persistence-failure paths of the lifecycle manager.

use crate::state::{CrawlTask, DownloadedFile, TaskStatus};
use crate::storage::traits::{check_transition, StorageError, StorageResult, TaskStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredTask {
    task: CrawlTask,
    files: Vec<DownloadedFile>,
}

/// Task store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, StoredTask>>,
    failing: AtomicBool,
    fail_next: AtomicU32,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail until switched off again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<Uuid, StoredTask>>> {
        self.tasks
            .lock()
            .map_err(|_| StorageError::Database("task map lock poisoned".to_string()))
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StorageError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_task(&self, task: &CrawlTask) -> StorageResult<()> {
        self.check_write()?;
        let mut tasks = self.lock()?;
        if tasks.contains_key(&task.id) {
            return Err(StorageError::TaskExists(task.id));
        }
        tasks.insert(
            task.id,
            StoredTask {
                task: task.clone(),
                files: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> StorageResult<Option<CrawlTask>> {
        Ok(self.lock()?.get(&id).map(|stored| stored.task.clone()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StorageResult<bool> {
        check_transition(from, to)?;
        self.check_write()?;
        let mut tasks = self.lock()?;
        let stored = tasks.get_mut(&id).ok_or(StorageError::TaskNotFound(id))?;
        if stored.task.status != from {
            return Ok(false);
        }
        stored.task.status = to;
        stored.task.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_progress(&self, task: &CrawlTask) -> StorageResult<()> {
        self.check_write()?;
        let mut tasks = self.lock()?;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or(StorageError::TaskNotFound(task.id))?;
        stored.task.counters = task.counters;
        stored.task.error_summary = task.error_summary.clone();
        stored.task.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_task(
        &self,
        task: &CrawlTask,
        from: TaskStatus,
        files: &[DownloadedFile],
    ) -> StorageResult<bool> {
        check_transition(from, task.status)?;
        self.check_write()?;
        let mut tasks = self.lock()?;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or(StorageError::TaskNotFound(task.id))?;
        if stored.task.status != from {
            return Ok(false);
        }
        stored.task = task.clone();
        stored.files = files.to_vec();
        Ok(true)
    }

    async fn delete_task(&self, id: Uuid) -> StorageResult<()> {
        self.check_write()?;
        self.lock()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::TaskNotFound(id))
    }

    async fn list_files(&self, id: Uuid) -> StorageResult<Vec<DownloadedFile>> {
        Ok(self
            .lock()?
            .get(&id)
            .map(|stored| stored.files.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::DomainType;
    use crate::state::{CrawlLimits, CrawlPolicy};
    use crate::url::ScopeMode;

    fn task() -> CrawlTask {
        CrawlTask::new(
            "user-1",
            "https://example.test/",
            CrawlLimits {
                max_pages: 1,
                max_documents: 1,
                max_depth: 0,
                max_workers: 1,
                request_delay_ms: 0,
                total_timeout_secs: 5,
                page_timeout_secs: 5,
            },
            CrawlPolicy {
                domain_type: DomainType::Generic,
                accept_degraded: true,
                scope: ScopeMode::SameOrigin,
                allow_offsite_documents: false,
                max_fetch_errors: 1,
                max_storage_errors: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryTaskStore::new();
        let task = task();
        store.insert_task(&task).await.unwrap();

        assert!(store
            .transition_status(task.id, TaskStatus::Pending, TaskStatus::Cancelled)
            .await
            .unwrap());
        assert!(!store
            .transition_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_terminal_task_never_resurrected() {
        let store = MemoryTaskStore::new();
        let mut task = task();
        store.insert_task(&task).await.unwrap();
        store
            .transition_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        task.status = TaskStatus::Completed;
        assert!(store.finish_task(&task, TaskStatus::Running, &[]).await.unwrap());

        assert!(matches!(
            store
                .transition_status(task.id, TaskStatus::Completed, TaskStatus::Running)
                .await,
            Err(StorageError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::Running,
            })
        ));

        task.status = TaskStatus::Pending;
        assert!(matches!(
            store.finish_task(&task, TaskStatus::Completed, &[]).await,
            Err(StorageError::InvalidTransition { .. })
        ));

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_injected_failures_are_counted() {
        let store = MemoryTaskStore::new();
        let task = task();
        store.insert_task(&task).await.unwrap();
        store.fail_next_writes(2);

        assert!(store.save_progress(&task).await.is_err());
        assert!(store.save_progress(&task).await.is_err());
        assert!(store.save_progress(&task).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_store_keeps_state() {
        let store = MemoryTaskStore::new();
        let task = task();
        store.insert_task(&task).await.unwrap();
        store.set_failing(true);

        assert!(store
            .transition_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .is_err());
        store.set_failing(false);

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
    }
}
