use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::warn;

use crate::downloader::DownloadArgs;
use crate::error::{Result, S3FetchError};
use crate::uri::S3Uri;

const MAX_THREADS: usize = 1000;

static REGION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2,3}-[a-z]+-\d+$").expect("REGION_PATTERN is a valid regex")
});

#[derive(Parser, Debug, Clone)]
#[command(name = "s3fetch", version)]
#[command(about = "Easily download objects from an S3 bucket")]
#[command(long_about = "Easily download objects from an S3 bucket.\n\n\
    Example: s3fetch s3://my-test-bucket/my/birthday-photos/2020-01-01\n\n\
    The above downloads every object under the `my/birthday-photos/2020-01-01` prefix. \
    Use `s3fetch s3://my-test-bucket/` to download a whole bucket.")]
pub struct Args {
    /// S3 URI in the format s3://bucket/prefix
    pub s3_uri: String,

    /// Bucket region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Enable debug output
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Download directory. Defaults to the current directory
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Only download objects whose key matches this regular expression
    #[arg(short = 'r', long)]
    pub regex: Option<String>,

    /// Number of concurrent downloads. Defaults to the available core count
    #[arg(short = 't', long, value_parser = parse_thread_count)]
    pub threads: Option<usize>,

    /// List objects only, without downloading or creating directories
    #[arg(long, visible_alias = "list-only")]
    pub dry_run: bool,

    /// The "directory" delimiter used in object keys
    #[arg(long, default_value = "/")]
    pub delimiter: String,

    /// Don't print to stdout
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Custom endpoint for S3-compatible stores
    #[arg(long)]
    pub endpoint_url: Option<String>,
}

impl Args {
    /// Check every argument before any network access happens.
    pub fn validate(&self) -> Result<()> {
        S3Uri::parse(&self.s3_uri)?;

        if let Some(pattern) = &self.regex {
            Regex::new(pattern)?;
        }

        if self.delimiter.is_empty() {
            return Err(S3FetchError::InvalidArgument(
                "delimiter must not be empty".to_string(),
            ));
        }

        if !is_plausible_region(&self.region) {
            warn!(
                region = %self.region,
                "Region doesn't match the usual AWS format (e.g. 'us-east-1')"
            );
        }

        if let Some(dir) = &self.download_dir {
            if !dir.exists() {
                return Err(S3FetchError::InvalidArgument(format!(
                    "Download directory does not exist: {}",
                    dir.display()
                )));
            }
            if !dir.is_dir() {
                return Err(S3FetchError::InvalidArgument(format!(
                    "Path exists but is not a directory: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    pub fn to_download_args(&self) -> DownloadArgs {
        DownloadArgs::builder()
            .s3_uri(self.s3_uri.clone())
            .download_dir(self.download_dir.clone().unwrap_or_else(|| PathBuf::from(".")))
            .maybe_regex(self.regex.clone())
            .threads(self.threads.unwrap_or_else(num_cpus::get))
            .delimiter(self.delimiter.clone())
            .dry_run(self.dry_run)
            .build()
    }
}

fn parse_thread_count(s: &str) -> std::result::Result<usize, String> {
    let threads: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid thread count: {}", s))?;

    match threads {
        0 => Err(format!("Thread count must be at least 1. Got: {}", threads)),
        n if n > MAX_THREADS => Err(format!(
            "Thread count must be {} or less. Got: {}",
            MAX_THREADS, threads
        )),
        n => Ok(n),
    }
}

fn is_plausible_region(region: &str) -> bool {
    REGION_PATTERN.is_match(region)
}
