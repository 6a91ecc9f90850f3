use clap::Parser;
use indicatif::HumanBytes;
use s3fetch::cli::Args;
use s3fetch::downloader::{download_with, DownloadHooks};
use s3fetch::progress::ProgressDisplay;
use s3fetch::s3_client::S3Client;
use s3fetch::worker::DownloadResult;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "s3fetch=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    args.validate()?;
    let download_args = args.to_download_args();
    let store = Arc::new(S3Client::from_env(&args.region, args.endpoint_url.as_deref()).await?);

    // Ctrl-C stops new work; in-flight transfers abort at their next chunk
    let cancel = CancellationToken::new();
    let interrupted = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let cancel = cancel.clone();
        let interrupted = interrupted.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Release);
                cancel.cancel();
            }
        }
    });

    let display = Arc::new(ProgressDisplay::new(args.quiet));
    let on_complete: Option<Box<dyn FnMut(DownloadResult) + Send>> = if args.quiet {
        None
    } else {
        let display = display.clone();
        Some(Box::new(move |result: DownloadResult| {
            display.println(result.to_string())
        }))
    };

    if !args.quiet {
        display.println(format!("Starting to download objects from {}", args.s3_uri));
    }

    let hooks = DownloadHooks {
        progress: Some(display.clone()),
        on_complete,
        cancel,
    };
    let summary = download_with(store, download_args, hooks).await?;
    display.finish();

    if interrupted.load(Ordering::Acquire) {
        eprintln!("\nOperation cancelled by user.");
        return Ok(ExitCode::FAILURE);
    }

    let snapshot = display.stats().snapshot();
    if !args.quiet {
        let verb = if args.dry_run { "Listed" } else { "Downloaded" };
        println!(
            "{} {} of {} objects ({}) in {:.1}s",
            verb,
            summary.succeeded,
            snapshot.objects_found,
            HumanBytes(snapshot.bytes_downloaded),
            snapshot.elapsed.as_secs_f64()
        );
    }

    if summary.is_success() {
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("Failed to download {} objects:", summary.failures.len());
    for (key, error) in &summary.failures {
        eprintln!("  {}: {}", key, error);
    }
    Ok(ExitCode::FAILURE)
}
