use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::completion::spawn_completion_consumer;
use crate::error::{Result, S3FetchError};
use crate::listing::{spawn_listing, KeyFilter, Listing};
use crate::progress::ProgressTracker;
use crate::queue::ClosableQueue;
use crate::s3_client::ObjectStore;
use crate::uri::S3Uri;
use crate::worker::{download_objects, DownloadResult, DownloadSummary, PoolConfig};

/// Options for one download run.
#[derive(Debug, Clone, bon::Builder)]
pub struct DownloadArgs {
    /// `s3://bucket/prefix`
    #[builder(into)]
    pub s3_uri: String,

    #[builder(into, default = PathBuf::from("."))]
    pub download_dir: PathBuf,

    /// Only keys matching this regular expression are downloaded.
    #[builder(into)]
    pub regex: Option<String>,

    #[builder(default = num_cpus::get())]
    pub threads: usize,

    #[builder(into, default = "/".to_string())]
    pub delimiter: String,

    #[builder(default)]
    pub dry_run: bool,
}

/// Optional observers and the cancellation handle for a run.
#[derive(Default)]
pub struct DownloadHooks {
    pub progress: Option<Arc<dyn ProgressTracker>>,
    /// Called from a background task for every result, in completion order.
    pub on_complete: Option<Box<dyn FnMut(DownloadResult) + Send>>,
    pub cancel: CancellationToken,
}

pub async fn download(store: Arc<dyn ObjectStore>, args: DownloadArgs) -> Result<DownloadSummary> {
    download_with(store, args, DownloadHooks::default()).await
}

/// Download every object under the URI's prefix into `args.download_dir`.
///
/// Per-object failures are collected in the summary. Invalid arguments,
/// credential problems and listing failures end the run with an error.
pub async fn download_with(
    store: Arc<dyn ObjectStore>,
    args: DownloadArgs,
    hooks: DownloadHooks,
) -> Result<DownloadSummary> {
    // 1. Validate everything that can fail before listing starts
    let uri = S3Uri::parse(&args.s3_uri)?;
    if args.threads == 0 {
        return Err(S3FetchError::InvalidArgument(
            "thread count must be at least 1".to_string(),
        ));
    }
    let filter = KeyFilter::new(&args.delimiter, args.regex.as_deref())?;

    // 2. Setup queues for the stages
    let download_queue = Arc::new(ClosableQueue::new("download"));
    let completion_queue = Arc::new(ClosableQueue::new("completion"));
    let DownloadHooks {
        progress,
        on_complete,
        cancel,
    } = hooks;

    info!(uri = %uri, threads = args.threads, dry_run = args.dry_run, "Starting download");

    // 3. Spawn the listing producer
    let listing = spawn_listing(
        store.clone(),
        Listing {
            bucket: uri.bucket.clone(),
            prefix: uri.prefix.clone(),
            filter,
        },
        download_queue.clone(),
        progress.clone(),
        cancel.clone(),
    );

    // 4. Register the consumer before any result can be produced
    let consumer = on_complete.map(|handler| spawn_completion_consumer(completion_queue.clone(), handler));

    // 5. Run the worker pool; it closes the completion queue on exit
    let pool = PoolConfig {
        bucket: uri.bucket,
        prefix: uri.prefix,
        delimiter: args.delimiter,
        download_dir: args.download_dir,
        threads: args.threads,
        dry_run: args.dry_run,
    };
    let summary = download_objects(
        store,
        pool,
        download_queue,
        completion_queue,
        progress,
        cancel,
    )
    .await;

    // 6. Await the remaining stages; a listing failure outranks the summary
    let listed = listing.await?;
    if let Some(consumer) = consumer {
        consumer.await?;
    }
    let listed = listed?;
    let summary = summary?;

    info!(
        listed,
        succeeded = summary.succeeded,
        failed = summary.failures.len(),
        "Download finished"
    );
    Ok(summary)
}
