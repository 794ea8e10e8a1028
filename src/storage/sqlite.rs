//! SQLite task store implementation
//!
//! This module provides a SQLite-based implementation of the `TaskStore`
//! trait. Limits, policy and the error summary are stored as JSON columns;
//! counters get their own columns so progress writes stay small.

use crate::state::{CrawlCounters, CrawlTask, DownloadedFile, TaskStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{check_transition, StorageError, StorageResult, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, user_id, seed_url, status, limits, policy, pages_visited, \
     documents_downloaded, bytes_downloaded, error_summary, fatal_error, created_at, updated_at";

/// SQLite task store
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteTaskStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

/// Raw column values of one `tasks` row
struct TaskRow {
    id: String,
    user_id: String,
    seed_url: String,
    status: String,
    limits: String,
    policy: String,
    pages_visited: i64,
    documents_downloaded: i64,
    bytes_downloaded: i64,
    error_summary: String,
    fatal_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            seed_url: row.get(2)?,
            status: row.get(3)?,
            limits: row.get(4)?,
            policy: row.get(5)?,
            pages_visited: row.get(6)?,
            documents_downloaded: row.get(7)?,
            bytes_downloaded: row.get(8)?,
            error_summary: row.get(9)?,
            fatal_error: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_task(self) -> StorageResult<CrawlTask> {
        let status = TaskStatus::from_db_string(&self.status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown status '{}'", self.status)))?;

        Ok(CrawlTask {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            seed_url: self.seed_url,
            limits: from_json(&self.limits)?,
            policy: from_json(&self.policy)?,
            status,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            counters: CrawlCounters {
                pages_visited: self.pages_visited as u32,
                documents_downloaded: self.documents_downloaded as u32,
                bytes_downloaded: self.bytes_downloaded as u64,
            },
            error_summary: from_json(&self.error_summary)?,
            fatal_error: self.fatal_error,
        })
    }
}

/// Raw column values of one `files` row
struct FileRow {
    source_url: String,
    filename: String,
    size: i64,
    content_type: Option<String>,
    extension: String,
    storage_key: String,
    sha256: String,
    downloaded_at: String,
}

impl FileRow {
    fn into_file(self) -> StorageResult<DownloadedFile> {
        Ok(DownloadedFile {
            source_url: self.source_url,
            filename: self.filename,
            size: self.size as u64,
            content_type: self.content_type,
            extension: self.extension,
            storage_key: self.storage_key,
            sha256: self.sha256,
            downloaded_at: parse_time(&self.downloaded_at)?,
        })
    }
}

fn parse_uuid(s: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn parse_time(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> StorageResult<T> {
    serde_json::from_str(s).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert_task(&self, task: &CrawlTask) -> StorageResult<()> {
        let limits = to_json(&task.limits)?;
        let policy = to_json(&task.policy)?;
        let error_summary = to_json(&task.error_summary)?;

        let conn = self.lock()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                TASK_COLUMNS
            ),
            params![
                task.id.to_string(),
                task.user_id,
                task.seed_url,
                task.status.to_db_string(),
                limits,
                policy,
                i64::from(task.counters.pages_visited),
                i64::from(task.counters.documents_downloaded),
                task.counters.bytes_downloaded as i64,
                error_summary,
                task.fatal_error,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::TaskExists(task.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_task(&self, id: Uuid) -> StorageResult<Option<CrawlTask>> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.to_string()],
                TaskRow::from_row,
            )
            .optional()?
        };

        row.map(TaskRow::into_task).transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> StorageResult<bool> {
        check_transition(from, to)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                to.to_db_string(),
                Utc::now().to_rfc3339(),
                id.to_string(),
                from.to_db_string()
            ],
        )?;
        Ok(changed == 1)
    }

    async fn save_progress(&self, task: &CrawlTask) -> StorageResult<()> {
        let error_summary = to_json(&task.error_summary)?;

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET pages_visited = ?1, documents_downloaded = ?2, bytes_downloaded = ?3,
                error_summary = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                i64::from(task.counters.pages_visited),
                i64::from(task.counters.documents_downloaded),
                task.counters.bytes_downloaded as i64,
                error_summary,
                Utc::now().to_rfc3339(),
                task.id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::TaskNotFound(task.id));
        }
        Ok(())
    }

    async fn finish_task(
        &self,
        task: &CrawlTask,
        from: TaskStatus,
        files: &[DownloadedFile],
    ) -> StorageResult<bool> {
        check_transition(from, task.status)?;
        let error_summary = to_json(&task.error_summary)?;
        let task_id = task.id.to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE tasks SET status = ?1, pages_visited = ?2, documents_downloaded = ?3,
                bytes_downloaded = ?4, error_summary = ?5, fatal_error = ?6, updated_at = ?7
             WHERE id = ?8 AND status = ?9",
            params![
                task.status.to_db_string(),
                i64::from(task.counters.pages_visited),
                i64::from(task.counters.documents_downloaded),
                task.counters.bytes_downloaded as i64,
                error_summary,
                task.fatal_error,
                task.updated_at.to_rfc3339(),
                task_id,
                from.to_db_string(),
            ],
        )?;

        if changed != 1 {
            tx.rollback()?;
            return Ok(false);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO files (task_id, source_url, filename, size, content_type,
                    extension, storage_key, sha256, downloaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for file in files {
                stmt.execute(params![
                    task_id,
                    file.source_url,
                    file.filename,
                    file.size as i64,
                    file.content_type,
                    file.extension,
                    file.storage_key,
                    file.sha256,
                    file.downloaded_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(true)
    }

    async fn delete_task(&self, id: Uuid) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE task_id = ?1", params![id.to_string()])?;
        let deleted = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            tx.rollback()?;
            return Err(StorageError::TaskNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_files(&self, id: Uuid) -> StorageResult<Vec<DownloadedFile>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT source_url, filename, size, content_type, extension, storage_key, sha256,
                    downloaded_at
                 FROM files WHERE task_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| {
                    Ok(FileRow {
                        source_url: row.get(0)?,
                        filename: row.get(1)?,
                        size: row.get(2)?,
                        content_type: row.get(3)?,
                        extension: row.get(4)?,
                        storage_key: row.get(5)?,
                        sha256: row.get(6)?,
                        downloaded_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(FileRow::into_file).collect()
    }
}
