use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Receives accounting events from the listing producer and the workers.
pub trait ProgressTracker: Send + Sync {
    /// An object was accepted for download. Only the listing producer calls this.
    fn record_found(&self);

    /// An object finished downloading (dry-run downloads report 0 bytes).
    fn record_downloaded(&self, bytes: u64);
}

/// Point-in-time copy of [`DownloadStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub objects_found: u64,
    pub objects_downloaded: u64,
    pub bytes_downloaded: u64,
    pub elapsed: Duration,
    pub bytes_per_second: f64,
}

#[derive(Debug, Default)]
struct Completed {
    objects: u64,
    bytes: u64,
}

/// Counters for objects found, objects downloaded and bytes downloaded.
///
/// `objects_found` has a single writer (the listing producer) and is a plain
/// atomic. The download counters are bumped from every worker and share one
/// lock so a snapshot never sees an object counted without its bytes.
#[derive(Debug)]
pub struct DownloadStats {
    started: Instant,
    objects_found: AtomicU64,
    completed: Mutex<Completed>,
}

impl DownloadStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            objects_found: AtomicU64::new(0),
            completed: Mutex::new(Completed::default()),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let (objects_downloaded, bytes_downloaded) = {
            let completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
            (completed.objects, completed.bytes)
        };
        let elapsed = self.started.elapsed();
        let seconds = elapsed.as_secs_f64();
        let bytes_per_second = if seconds > 0.0 {
            bytes_downloaded as f64 / seconds
        } else {
            0.0
        };

        ProgressSnapshot {
            objects_found: self.objects_found.load(Ordering::Acquire),
            objects_downloaded,
            bytes_downloaded,
            elapsed,
            bytes_per_second,
        }
    }
}

impl Default for DownloadStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for DownloadStats {
    fn record_found(&self) {
        self.objects_found.fetch_add(1, Ordering::AcqRel);
    }

    fn record_downloaded(&self, bytes: u64) {
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        completed.objects += 1;
        completed.bytes += bytes;
    }
}

/// Terminal progress bar over objects, with a running byte total.
pub struct ProgressDisplay {
    bar: Option<ProgressBar>,
    stats: DownloadStats,
}

impl ProgressDisplay {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} objects ({msg})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        };

        Self {
            bar,
            stats: DownloadStats::new(),
        }
    }

    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Print a line above the bar, or to stdout when there is no bar.
    pub fn println(&self, message: impl AsRef<str>) {
        match &self.bar {
            Some(bar) => bar.println(message),
            None => println!("{}", message.as_ref()),
        }
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_with_message(format!(
                "{} downloaded",
                HumanBytes(self.stats.snapshot().bytes_downloaded)
            ));
        }
    }
}

impl ProgressTracker for ProgressDisplay {
    fn record_found(&self) {
        self.stats.record_found();
        if let Some(ref bar) = self.bar {
            bar.inc_length(1);
        }
    }

    fn record_downloaded(&self, bytes: u64) {
        self.stats.record_downloaded(bytes);
        if let Some(ref bar) = self.bar {
            bar.inc(1);
            bar.set_message(HumanBytes(self.stats.snapshot().bytes_downloaded).to_string());
        }
    }
}
