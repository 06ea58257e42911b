use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify::{UrlClassifier, UrlKind};
use crate::ytdlp::{DownloadJob, MediaBackend, MediaFormat};

pub mod retry;

pub use retry::{retry_with_backoff, RetryPolicy};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 5;
pub const DEFAULT_WORKERS: usize = 3;

/// Keep the worker count inside the supported range
pub fn clamp_workers(workers: usize) -> usize {
    workers.clamp(MIN_WORKERS, MAX_WORKERS)
}

/// Turn URLs into jobs, reusing classifications made earlier in the run
pub fn build_jobs(
    classifier: &UrlClassifier,
    urls: &[String],
    format: MediaFormat,
    output_dir: &Path,
) -> Vec<DownloadJob> {
    urls.iter()
        .map(|url| DownloadJob {
            url: url.clone(),
            kind: classifier.classify(url),
            format,
            output_dir: output_dir.to_path_buf(),
        })
        .collect()
}

/// Final state of one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Completed {
        files: Vec<PathBuf>,
        /// Collection entries that could not be fetched
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        skipped: Vec<String>,
    },
    Failed { error: String },
}

/// Outcome of one URL after all attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub url: String,
    pub kind: UrlKind,
    pub status: JobStatus,
    pub attempts: u32,
    /// Wall time including backoff, in seconds
    pub elapsed: f64,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Completed { .. })
    }
}

/// Everything that happened during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Results in completion order
    pub results: Vec<JobResult>,
}

impl DownloadReport {
    pub fn succeeded(&self) -> Vec<&JobResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    pub fn failed(&self) -> Vec<&JobResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(JobResult::is_success)
    }

    pub fn total_files(&self) -> usize {
        self.results
            .iter()
            .map(|r| match &r.status {
                JobStatus::Completed { files, .. } => files.len(),
                JobStatus::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Runs downloads through a fixed number of workers
pub struct DownloadManager {
    backend: Arc<dyn MediaBackend>,
    workers: usize,
    retry: RetryPolicy,
    progress: MultiProgress,
}

impl DownloadManager {
    pub fn new(backend: Arc<dyn MediaBackend>, workers: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            workers: clamp_workers(workers),
            retry,
            progress: MultiProgress::new(),
        }
    }

    /// Hide progress spinners
    pub fn quiet(mut self) -> Self {
        self.progress = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Download every job, at most `workers` at a time.
    ///
    /// Never fails as a whole: each job ends up as one entry in the report.
    pub async fn run(&self, jobs: Vec<DownloadJob>) -> DownloadReport {
        let started_at = Utc::now();
        let total = jobs.len();

        tracing::info!(
            "Downloading {} URL(s) with {} worker(s) using {}",
            total,
            self.workers,
            self.backend.name()
        );

        let results = stream::iter(jobs.into_iter().enumerate())
            .map(|(idx, job)| self.run_job(idx + 1, total, job))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        DownloadReport {
            started_at,
            finished_at: Utc::now(),
            results,
        }
    }

    fn spinner(&self) -> ProgressBar {
        let bar = self.progress.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }

    async fn run_job(&self, index: usize, total: usize, job: DownloadJob) -> JobResult {
        let start = Instant::now();
        let bar = self.spinner();
        bar.set_prefix(format!("[{}/{}]", index, total));

        tracing::debug!("Starting {} {} ({})", job.kind, job.url, job.format);

        let backend = &self.backend;
        let max_attempts = self.retry.max_attempts();
        let (result, attempts) = retry_with_backoff(&self.retry, |attempt| {
            if attempt > 1 {
                bar.set_message(format!("retry {}/{} {}", attempt - 1, max_attempts - 1, job.url));
            } else {
                bar.set_message(format!("{} {}", job.kind, job.url));
            }
            let job = &job;
            let bar = &bar;
            async move { backend.download(job, bar).await }
        })
        .await;

        let status = match result {
            Ok(outcome) => {
                bar.finish_with_message(format!("done {}", job.url));
                tracing::info!("Finished {} ({} file(s))", job.url, outcome.files.len());
                JobStatus::Completed {
                    files: outcome.files,
                    skipped: outcome.skipped,
                }
            }
            Err(err) => {
                bar.abandon_with_message(format!("failed {}", job.url));
                tracing::error!("Giving up on {} after {} attempt(s): {:#}", job.url, attempts, err);
                JobStatus::Failed {
                    error: format!("{:#}", err),
                }
            }
        };

        JobResult {
            url: job.url,
            kind: job.kind,
            status,
            attempts,
            elapsed: start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ytdlp::{DownloadOutcome, MockMediaBackend};
    use crate::DownloaderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(url: &str) -> DownloadJob {
        DownloadJob {
            url: url.to_string(),
            kind: UrlKind::Video,
            format: MediaFormat::Video,
            output_dir: PathBuf::from("downloads"),
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_clamp_workers() {
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(3), 3);
        assert_eq!(clamp_workers(99), 5);
    }

    #[test]
    fn test_build_jobs_reuses_earlier_classification() {
        let classifier = UrlClassifier::new();
        let urls = vec![
            "https://youtu.be/aaaaaaaaaaa".to_string(),
            "https://www.youtube.com/playlist?list=PLabc".to_string(),
        ];
        for url in &urls {
            classifier.classify(url);
        }

        let jobs = build_jobs(&classifier, &urls, MediaFormat::Audio, Path::new("music"));

        assert_eq!(classifier.cached_len(), 2);
        assert_eq!(classifier.hits(), 2);
        assert_eq!(jobs[0].kind, UrlKind::Video);
        assert_eq!(jobs[1].kind, UrlKind::Playlist);
        assert!(jobs.iter().all(|j| j.format == MediaFormat::Audio && j.output_dir == Path::new("music")));
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let mut backend = MockMediaBackend::new();
        backend.expect_name().return_const("mock");
        backend.expect_download().returning(|job, _| {
            if job.url.ends_with("bad") {
                Err(DownloaderError::ToolFailed {
                    code: "status 1".into(),
                    stderr: "ERROR: HTTP Error 403".into(),
                }
                .into())
            } else {
                Ok(DownloadOutcome {
                    files: vec![PathBuf::from("downloads/a.mp4")],
                    ..Default::default()
                })
            }
        });

        let manager = DownloadManager::new(Arc::new(backend), 3, fast_policy(2)).quiet();
        let report = manager
            .run(vec![job("https://youtu.be/good"), job("https://youtu.be/bad")])
            .await;

        assert_eq!(report.results.len(), 2);
        assert!(!report.all_succeeded());
        assert_eq!(report.total_files(), 1);

        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].url, "https://youtu.be/bad");
        assert_eq!(failed[0].attempts, 3);
        match &failed[0].status {
            JobStatus::Failed { error } => assert!(error.contains("403")),
            other => panic!("unexpected status: {:?}", other),
        }

        assert_eq!(report.succeeded()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_unavailable_video_is_tried_once() {
        let mut backend = MockMediaBackend::new();
        backend.expect_name().return_const("mock");
        backend
            .expect_download()
            .times(1)
            .returning(|_, _| Err(DownloaderError::Unavailable("ERROR: Video unavailable".into()).into()));

        let manager = DownloadManager::new(Arc::new(backend), 1, fast_policy(4)).quiet();
        let report = manager.run(vec![job("https://youtu.be/gone")]).await;

        assert_eq!(report.failed()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_on_retry() {
        let mut backend = MockMediaBackend::new();
        backend.expect_name().return_const("mock");
        let mut calls = 0;
        backend.expect_download().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(anyhow::anyhow!("connection reset"))
            } else {
                Ok(DownloadOutcome::default())
            }
        });

        let manager = DownloadManager::new(Arc::new(backend), 2, fast_policy(3)).quiet();
        let report = manager.run(vec![job("https://youtu.be/flaky")]).await;

        assert!(report.all_succeeded());
        assert_eq!(report.results[0].attempts, 2);
    }

    /// Tracks how many downloads run at the same time
    struct SlowBackend {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MediaBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn check_availability(&self) -> bool {
            true
        }

        async fn list_formats(&self, _url: &str) -> crate::Result<String> {
            Ok(String::new())
        }

        async fn download(&self, _job: &DownloadJob, _progress: &ProgressBar) -> crate::Result<DownloadOutcome> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(DownloadOutcome::default())
        }
    }

    #[tokio::test]
    async fn test_worker_limit_is_respected() {
        let backend = Arc::new(SlowBackend {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let jobs = (0..8).map(|i| job(&format!("https://youtu.be/{}", i))).collect();
        let manager = DownloadManager::new(backend.clone(), 2, RetryPolicy::none()).quiet();
        let report = manager.run(jobs).await;

        assert_eq!(report.results.len(), 8);
        assert!(report.all_succeeded());
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_manager_clamps_workers() {
        let manager = DownloadManager::new(Arc::new(MockMediaBackend::new()), 42, RetryPolicy::none());
        assert_eq!(manager.workers(), MAX_WORKERS);
    }
}
