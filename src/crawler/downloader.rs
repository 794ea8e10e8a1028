//! File downloader: fetch, validate and persist document resources
//!
//! # Download Pipeline
//!
//! 1. Binary fetch through the tier ladder (rendering off)
//! 2. Size filter (`TooSmall` / `TooLarge`)
//! 3. Filename derivation, then the type filter on path extensions
//! 4. Content dedup by SHA-256 (`Duplicate`)
//! 5. Per-task unique filename (`name_1.ext`, `name_2.ext`, ...)
//! 6. Blob store `put` under `{user_id}/{task_id}/{filename}`
//! 7. Hand-off to the document sink
//!
//! Every attempt, successful or not, is recorded for the final report.

use crate::fetch::{FetchError, FetchedPage, TierLadder};
use crate::state::{CrawlTask, DownloadedFile, ErrorKind};
use crate::storage::{BlobStore, DocumentSink, StorageError};
use crate::url::{is_page_extension, LinkClassifier, DEFAULT_DOCUMENT_EXTENSIONS};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Extension used when neither the path nor the content type yields one
const FALLBACK_EXTENSION: &str = "bin";

/// Filename used when the URL path has no last segment
const FALLBACK_STEM: &str = "document";

/// Validation settings of the downloader
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Smaller payloads are rejected as error pages in disguise
    pub min_size: u64,

    pub max_size: u64,

    /// Extensions allowed when the URL path carries one
    pub allowed_extensions: Vec<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            min_size: 1024,
            max_size: 100 * 1024 * 1024,
            allowed_extensions: DEFAULT_DOCUMENT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Errors produced while downloading one document
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("download failed with HTTP {status}")]
    DownloadFailed { status: u16 },

    #[error("content too small ({size} < {min} bytes)")]
    TooSmall { size: u64, min: u64 },

    #[error("content too large ({size} > {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported document type '.{0}'")]
    UnsupportedType(String),

    #[error("duplicate content of {0}")]
    Duplicate(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<FetchError> for DownloadError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::HttpStatus { status, .. } | FetchError::Blocked { status, .. } => {
                Self::DownloadFailed { status }
            }
            other => Self::Fetch(other),
        }
    }
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(FetchError::InsufficientContent { .. }) => ErrorKind::DownloadFailed,
            Self::Fetch(e) => e.kind(),
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::TooSmall { .. } => ErrorKind::TooSmall,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::Storage(_) => ErrorKind::StorageError,
        }
    }
}

/// One recorded download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadAttempt {
    pub url: Url,
    pub at: DateTime<Utc>,

    /// Stored filename on success
    pub filename: Option<String>,

    pub error: Option<ErrorKind>,
}

/// A filename split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedName {
    pub filename: String,
    pub extension: String,

    /// True when the extension came from the URL path rather than inference
    pub from_path: bool,
}

#[derive(Debug, Default)]
struct DownloadState {
    filenames: HashSet<String>,
    hashes: HashMap<String, String>,
    files: Vec<DownloadedFile>,
    attempts: Vec<DownloadAttempt>,
}

/// Downloads and persists the documents of one task
pub struct FileDownloader {
    ladder: Arc<TierLadder>,
    blobs: Arc<dyn BlobStore>,
    sink: Arc<dyn DocumentSink>,
    allowed: LinkClassifier,
    settings: DownloadSettings,
    task_id: Uuid,
    key_prefix: String,
    state: Mutex<DownloadState>,
}

impl FileDownloader {
    pub fn new(
        task: &CrawlTask,
        ladder: Arc<TierLadder>,
        blobs: Arc<dyn BlobStore>,
        sink: Arc<dyn DocumentSink>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            ladder,
            blobs,
            sink,
            allowed: LinkClassifier::new(&settings.allowed_extensions),
            settings,
            task_id: task.id,
            key_prefix: task.storage_prefix(),
            state: Mutex::new(DownloadState::default()),
        }
    }

    /// Fetches a document-classified URL and persists it
    pub async fn download_document(&self, url: &Url) -> Result<DownloadedFile, DownloadError> {
        let result = match self.ladder.fetch_binary(url).await {
            Ok(page) => self.persist(page).await,
            Err(e) => Err(DownloadError::from(e)),
        };
        self.record_attempt(url, &result);
        result
    }

    /// Persists content already fetched by a page fetch
    ///
    /// Used when a page URL turns out to serve a document.
    pub async fn store_fetched(&self, page: FetchedPage) -> Result<DownloadedFile, DownloadError> {
        let url = page.url.clone();
        let result = self.persist(page).await;
        self.record_attempt(&url, &result);
        result
    }

    /// Files persisted so far, in download order
    pub fn files(&self) -> Vec<DownloadedFile> {
        self.lock().files.clone()
    }

    pub fn attempts(&self) -> Vec<DownloadAttempt> {
        self.lock().attempts.clone()
    }

    async fn persist(&self, page: FetchedPage) -> Result<DownloadedFile, DownloadError> {
        let size = page.body.len() as u64;
        if size < self.settings.min_size {
            return Err(DownloadError::TooSmall {
                size,
                min: self.settings.min_size,
            });
        }
        if size > self.settings.max_size {
            return Err(DownloadError::TooLarge {
                size,
                max: self.settings.max_size,
            });
        }

        let derived = derive_filename(&page.url, page.mime().as_deref());
        if derived.from_path && !self.allowed.is_allowed_extension(&derived.extension) {
            return Err(DownloadError::UnsupportedType(derived.extension));
        }

        let sha256 = hex::encode(Sha256::digest(&page.body));

        // Reserve hash and filename before the storage write so concurrent
        // workers cannot pick the same ones.
        let filename = {
            let mut state = self.lock();
            if let Some(existing) = state.hashes.get(&sha256) {
                return Err(DownloadError::Duplicate(existing.clone()));
            }
            let filename = unique_filename(&derived.filename, &state.filenames);
            state.filenames.insert(filename.clone());
            state.hashes.insert(sha256.clone(), filename.clone());
            filename
        };

        let storage_key = format!("{}/{}", self.key_prefix, filename);
        if let Err(e) = self
            .blobs
            .put(&storage_key, &page.body, page.content_type.as_deref())
            .await
        {
            let mut state = self.lock();
            state.filenames.remove(&filename);
            state.hashes.remove(&sha256);
            return Err(DownloadError::Storage(e));
        }

        let file = DownloadedFile {
            source_url: page.url.to_string(),
            filename,
            size,
            content_type: page.content_type.clone(),
            extension: derived.extension,
            storage_key,
            sha256,
            downloaded_at: Utc::now(),
        };

        self.lock().files.push(file.clone());
        self.sink.submit(file.to_ref(self.task_id));

        tracing::info!(
            "Downloaded {} ({} bytes) as {}",
            file.source_url,
            file.size,
            file.filename
        );

        Ok(file)
    }

    fn record_attempt(&self, url: &Url, result: &Result<DownloadedFile, DownloadError>) {
        let attempt = DownloadAttempt {
            url: url.clone(),
            at: Utc::now(),
            filename: result.as_ref().ok().map(|f| f.filename.clone()),
            error: result.as_ref().err().map(DownloadError::kind),
        };
        self.lock().attempts.push(attempt);
    }

    fn lock(&self) -> MutexGuard<'_, DownloadState> {
        // State is only mutated in short non-panicking sections
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Derives a filename from the URL path and the declared MIME type
///
/// An extension is inferred only when the last path segment contains no
/// `.`, so a name can never end up with a doubled extension. A script
/// extension (`getfile.php`) serving a document is replaced by the inferred
/// one (`getfile.pdf`).
///
/// # Example
///
/// ```
/// use escalade::crawler::derive_filename;
/// use url::Url;
///
/// let url = Url::parse("https://example.test/reports/annual").unwrap();
/// assert_eq!(derive_filename(&url, Some("application/pdf")).filename, "annual.pdf");
/// ```
pub fn derive_filename(url: &Url, mime: Option<&str>) -> DerivedName {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(sanitize)
        .unwrap_or_default();
    let segment = segment.trim_matches('.');

    let inferred = mime.and_then(extension_for_content_type);

    if let Some((stem, extension)) = segment.rsplit_once('.') {
        if !stem.is_empty() && !extension.is_empty() {
            let replacement =
                inferred.filter(|i| is_page_extension(extension) && !is_page_extension(i));
            if let Some(inferred) = replacement {
                return DerivedName {
                    filename: format!("{}.{}", stem, inferred),
                    extension: inferred.to_string(),
                    from_path: false,
                };
            }
            return DerivedName {
                filename: segment.to_string(),
                extension: extension.to_ascii_lowercase(),
                from_path: true,
            };
        }
    }

    let stem = if segment.is_empty() {
        FALLBACK_STEM
    } else {
        segment
    };
    let extension = inferred.unwrap_or(FALLBACK_EXTENSION);

    DerivedName {
        filename: format!("{}.{}", stem, extension),
        extension: extension.to_string(),
        from_path: false,
    }
}

/// Maps a MIME type onto a file extension
pub fn extension_for_content_type(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let extension = match essence.as_str() {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" | "application/xhtml+xml" => "html",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/rtf" => "rtf",
        "application/zip" => "zip",
        _ => return None,
    };
    Some(extension)
}

/// Appends `_1`, `_2`, ... before the extension until the name is free
fn unique_filename(filename: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(filename) {
        return filename.to_string();
    }

    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (filename, None),
    };

    (1..)
        .map(|n| match extension {
            Some(extension) => format!("{}_{}.{}", stem, n, extension),
            None => format!("{}_{}", stem, n),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| filename.to_string())
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
