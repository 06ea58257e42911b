//! ytpool - download YouTube videos, playlists and channels concurrently
//!
//! This library classifies YouTube URLs, hands each one to yt-dlp through a bounded
//! worker pool and retries failed downloads with exponential backoff.

pub mod classify;
pub mod cli;
pub mod config;
pub mod download;
pub mod output;
pub mod utils;
pub mod ytdlp;

pub use classify::{parse_urls, UrlClassifier, UrlKind};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use download::{DownloadManager, DownloadReport, JobResult, JobStatus, RetryPolicy};
pub use ytdlp::{DownloadJob, DownloadOutcome, MediaBackend, MediaFormat, YtDlpBackend};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the downloader
#[derive(thiserror::Error, Debug)]
pub enum DownloaderError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0} is not installed or not on PATH")]
    ToolMissing(String),

    #[error("yt-dlp exited with {code}: {stderr}")]
    ToolFailed { code: String, stderr: String },

    #[error("Content unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DownloaderError {
    /// Whether retrying the same download could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloaderError::ToolFailed { .. })
    }
}
