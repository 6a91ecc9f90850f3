//! Download worker pool.
//!
//! Workers share the download queue, resolve each key to a local path,
//! transfer it through a temporary file beside the destination and report one
//! [`DownloadResult`] per started key on the completion queue.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, S3FetchError};
use crate::keypath::resolve_destination;
use crate::progress::ProgressTracker;
use crate::queue::ClosableQueue;
use crate::s3_client::ObjectStore;

/// Appended to the destination file name while a transfer is in flight.
pub const TEMP_FILE_SUFFIX: &str = ".s3fetch-part";

/// Outcome of one started key.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub key: String,
    /// `None` when the key could not be mapped to a local path.
    pub destination: Option<PathBuf>,
    /// Bytes written on success.
    pub outcome: std::result::Result<u64, Arc<S3FetchError>>,
}

impl DownloadResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Bytes written; 0 on failure and in dry-run mode.
    pub fn bytes(&self) -> u64 {
        self.outcome.as_ref().copied().unwrap_or(0)
    }

    pub fn error(&self) -> Option<&S3FetchError> {
        self.outcome.as_ref().err().map(|e| e.as_ref())
    }
}

impl fmt::Display for DownloadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(_) => write!(f, "{}...done", self.key),
            Err(e) => write!(f, "{}...error: {}", self.key, e),
        }
    }
}

/// Aggregate returned once the download queue is exhausted.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub failures: Vec<(String, Arc<S3FetchError>)>,
}

impl DownloadSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: DownloadSummary) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

/// Settings shared by every worker for one run.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: String,
    pub download_dir: PathBuf,
    pub threads: usize,
    pub dry_run: bool,
}

/// `dir/file.txt` -> `dir/file.txt.s3fetch-part`
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(TEMP_FILE_SUFFIX);
    destination.with_file_name(name)
}

/// Local paths reserved by the keys of one run.
///
/// Distinct keys can resolve to the same file (`a//f` and `a/f`), and a key
/// ending in [`TEMP_FILE_SUFFIX`] can land on another key's temporary file.
/// The first key to claim a path owns it for the rest of the run.
#[derive(Debug, Default)]
pub struct DestinationClaims {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `destination` and its temporary file for `key`.
    pub fn claim(&self, key: &str, destination: &Path) -> Result<()> {
        let temp_path = temp_path_for(destination);
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);

        if claimed.contains(destination) || claimed.contains(&temp_path) {
            return Err(S3FetchError::DestinationConflict {
                key: key.to_string(),
                destination: destination.to_path_buf(),
            });
        }

        claimed.insert(destination.to_path_buf());
        claimed.insert(temp_path);
        Ok(())
    }
}

/// Download one object to `destination`.
///
/// The body goes to a temporary file in the destination directory and is
/// renamed over the destination only once complete, replacing any existing
/// file. On failure the temporary file is removed before the error is
/// returned. Dry runs touch neither the store nor the filesystem.
///
/// Parent directories are created by the store once the object is found. A
/// transfer aborted part-way may leave those directories behind, empty.
pub async fn download_object(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    destination: &Path,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<u64> {
    if dry_run {
        debug!(key, "Dry run, not downloading");
        return Ok(0);
    }

    let temp_path = temp_path_for(destination);
    let on_chunk = |_bytes: u64| -> Result<()> {
        if cancel.is_cancelled() {
            Err(S3FetchError::Cancelled)
        } else {
            Ok(())
        }
    };

    let result = match store.get_object(bucket, key, &temp_path, &on_chunk).await {
        Ok(bytes) => tokio::fs::rename(&temp_path, destination)
            .await
            .map(|()| bytes)
            .map_err(S3FetchError::from),
        Err(e) => Err(e),
    };

    if result.is_err() {
        remove_temp_file(&temp_path).await;
    }
    result
}

async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}

/// Run the worker pool until the download queue is closed and drained, or the
/// run is cancelled.
///
/// Closes `completion_queue` before returning, whatever the outcome.
pub async fn download_objects(
    store: Arc<dyn ObjectStore>,
    config: PoolConfig,
    download_queue: Arc<ClosableQueue<String>>,
    completion_queue: Arc<ClosableQueue<DownloadResult>>,
    tracker: Option<Arc<dyn ProgressTracker>>,
    cancel: CancellationToken,
) -> Result<DownloadSummary> {
    let threads = config.threads.max(1);
    info!(threads, dry_run = config.dry_run, "Starting download workers");

    let config = Arc::new(config);
    let claims = Arc::new(DestinationClaims::new());
    let handles: Vec<_> = (0..threads)
        .map(|worker_id| {
            tokio::spawn(download_worker(
                worker_id,
                store.clone(),
                config.clone(),
                claims.clone(),
                download_queue.clone(),
                completion_queue.clone(),
                tracker.clone(),
                cancel.clone(),
            ))
        })
        .collect();

    let mut summary = DownloadSummary::default();
    let mut join_error = None;
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(worker_summary) => summary.merge(worker_summary),
            Err(e) => {
                warn!(error = %e, "Download worker panicked");
                join_error.get_or_insert(e);
            }
        }
    }
    completion_queue.close();

    if let Some(e) = join_error {
        return Err(e.into());
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failures.len(),
        cancelled = cancel.is_cancelled(),
        "Download workers finished"
    );
    Ok(summary)
}

async fn download_worker(
    worker_id: usize,
    store: Arc<dyn ObjectStore>,
    config: Arc<PoolConfig>,
    claims: Arc<DestinationClaims>,
    queue: Arc<ClosableQueue<String>>,
    completion: Arc<ClosableQueue<DownloadResult>>,
    tracker: Option<Arc<dyn ProgressTracker>>,
    cancel: CancellationToken,
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();

    loop {
        let key = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Ok(key) => key,
                Err(_) => break,
            },
        };

        // Cancelled while this key was being handed over: it never starts
        if cancel.is_cancelled() {
            debug!(worker_id, key, "Run cancelled, skipping key");
            break;
        }

        let result = process_key(store.as_ref(), &config, &claims, key, &cancel).await;
        match &result.outcome {
            Ok(bytes) => {
                summary.succeeded += 1;
                if let Some(tracker) = &tracker {
                    tracker.record_downloaded(*bytes);
                }
            }
            Err(e) => {
                summary.failures.push((result.key.clone(), e.clone()));
                if e.is_fatal() {
                    cancel.cancel();
                }
            }
        }
        completion.put(result);
    }

    debug!(worker_id, "Worker exiting");
    summary
}

async fn process_key(
    store: &dyn ObjectStore,
    config: &PoolConfig,
    claims: &DestinationClaims,
    key: String,
    cancel: &CancellationToken,
) -> DownloadResult {
    let destination =
        match resolve_destination(&config.download_dir, &key, &config.prefix, &config.delimiter) {
            Ok(destination) => destination,
            Err(e) => {
                warn!(key, error = %e, "Rejected key");
                return DownloadResult {
                    key,
                    destination: None,
                    outcome: Err(Arc::new(e)),
                };
            }
        };

    if let Err(e) = claims.claim(&key, &destination) {
        warn!(key, error = %e, "Destination already claimed");
        return DownloadResult {
            key,
            destination: Some(destination),
            outcome: Err(Arc::new(e)),
        };
    }

    let outcome = download_object(
        store,
        &config.bucket,
        &key,
        &destination,
        config.dry_run,
        cancel,
    )
    .await
    .map_err(Arc::new);

    match &outcome {
        Ok(bytes) => debug!(key, bytes, "Downloaded"),
        Err(e) => warn!(key, error = %e, "Download failed"),
    }

    DownloadResult {
        key,
        destination: Some(destination),
        outcome,
    }
}
