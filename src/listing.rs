//! Listing producer: pages through the store and feeds the download queue.

use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, S3FetchError};
use crate::keypath::is_directory_marker;
use crate::progress::ProgressTracker;
use crate::queue::ClosableQueue;
use crate::s3_client::ObjectStore;

/// Decides which listed keys are queued for download.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    delimiter: String,
    pattern: Option<Regex>,
}

impl KeyFilter {
    /// Compile the optional pattern once, before anything is listed.
    pub fn new(delimiter: &str, pattern: Option<&str>) -> Result<Self> {
        if delimiter.is_empty() {
            return Err(S3FetchError::InvalidArgument(
                "delimiter must not be empty".to_string(),
            ));
        }

        Ok(Self {
            delimiter: delimiter.to_string(),
            pattern: pattern.map(Regex::new).transpose()?,
        })
    }

    pub fn accepts(&self, key: &str) -> bool {
        if is_directory_marker(key, &self.delimiter) {
            debug!(key, "Excluded directory marker");
            return false;
        }

        match &self.pattern {
            Some(pattern) if !pattern.is_match(key) => {
                debug!(key, "Excluded by pattern");
                false
            }
            _ => true,
        }
    }
}

/// What to list.
#[derive(Debug, Clone)]
pub struct Listing {
    pub bucket: String,
    pub prefix: String,
    pub filter: KeyFilter,
}

/// List every page for the bucket and prefix, queueing accepted keys.
///
/// The queue is closed on every exit path, including errors and
/// cancellation, so workers never wait on a producer that has gone away.
/// Returns the number of keys queued.
pub async fn list_objects(
    store: &dyn ObjectStore,
    listing: &Listing,
    queue: &ClosableQueue<String>,
    tracker: Option<&dyn ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let result = enqueue_pages(store, listing, queue, tracker, cancel).await;
    queue.close();
    result
}

async fn enqueue_pages(
    store: &dyn ObjectStore,
    listing: &Listing,
    queue: &ClosableQueue<String>,
    tracker: Option<&dyn ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut queued = 0;
    let mut continuation_token = None;

    loop {
        if cancel.is_cancelled() {
            info!(queued, "Listing aborted");
            return Ok(queued);
        }

        let page = store
            .list_page(&listing.bucket, &listing.prefix, continuation_token.take())
            .await?;

        for key in page.keys {
            if !listing.filter.accepts(&key) {
                continue;
            }
            queue.put(key);
            if let Some(tracker) = tracker {
                tracker.record_found();
            }
            queued += 1;
        }

        match page.next_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    debug!(queued, "Finished adding objects to download queue");
    Ok(queued)
}

/// Run [`list_objects`] in the background. A listing failure cancels the run.
pub fn spawn_listing(
    store: Arc<dyn ObjectStore>,
    listing: Listing,
    queue: Arc<ClosableQueue<String>>,
    tracker: Option<Arc<dyn ProgressTracker>>,
    cancel: CancellationToken,
) -> JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let result =
            list_objects(store.as_ref(), &listing, &queue, tracker.as_deref(), &cancel).await;
        if let Err(ref e) = result {
            warn!(error = %e, "Listing failed, cancelling run");
            cancel.cancel();
        }
        result
    })
}
