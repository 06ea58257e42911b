use async_trait::async_trait;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::classify::UrlKind;
use crate::config::Config;
use crate::{DownloaderError, Result};

/// What to keep from a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    /// Video with audio, merged to MP4
    #[default]
    Video,
    /// Audio only, extracted with ffmpeg
    Audio,
}

impl MediaFormat {
    /// Parse a user answer such as "v", "Video" or "2"
    pub fn from_choice(choice: &str) -> Option<Self> {
        match choice.trim().to_lowercase().as_str() {
            "1" | "v" | "video" | "mp4" => Some(MediaFormat::Video),
            "2" | "a" | "audio" | "mp3" => Some(MediaFormat::Audio),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaFormat::Video => write!(f, "video"),
            MediaFormat::Audio => write!(f, "audio"),
        }
    }
}

/// A single URL to hand to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub url: String,
    pub kind: UrlKind,
    pub format: MediaFormat,
    pub output_dir: PathBuf,
}

/// Files produced by a successful download
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub files: Vec<PathBuf>,

    /// Playlist or channel entries yt-dlp could not fetch
    #[serde(default)]
    pub skipped: Vec<String>,
}

/// Something that can fetch media for a URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name shown in logs
    fn name(&self) -> &'static str;

    /// Whether the backend can run at all
    async fn check_availability(&self) -> bool;

    /// Human readable table of available formats
    async fn list_formats(&self, url: &str) -> Result<String>;

    /// Download the job, reporting progress on `progress`
    async fn download(&self, job: &DownloadJob, progress: &ProgressBar) -> Result<DownloadOutcome>;
}

/// A line printed by yt-dlp on stdout
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress { percent: f64, eta: Option<String> },
    File(PathBuf),
    Other(String),
}

const PROGRESS_PREFIX: &str = "[progress]";

const FILE_PREFIX: &str = "[file] ";

const FILE_TEMPLATE: &str = "after_move:[file] %(filepath)s";

const PROGRESS_TEMPLATE: &str =
    "download:[progress] %(progress._percent_str)s %(progress._eta_str)s";

/// stderr fragments that mean retrying cannot help
const PERMANENT_ERRORS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video has been removed",
    "This video is not available",
    "members-only",
    "Join this channel",
    "Sign in to confirm your age",
    "not available in your country",
    "Unsupported URL",
    "does not exist",
    "Incomplete YouTube ID",
];

/// Parse one stdout line produced by our progress and file templates
pub fn parse_output_line(line: &str) -> OutputLine {
    let line = console::strip_ansi_codes(line);
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(path) = line.strip_prefix(FILE_PREFIX) {
        if !path.is_empty() {
            return OutputLine::File(PathBuf::from(path));
        }
    }

    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let mut parts = rest.split_whitespace();
        let percent = parts
            .next()
            .and_then(|p| p.trim_end_matches('%').parse::<f64>().ok());
        let eta = parts
            .next()
            .filter(|eta| !eta.eq_ignore_ascii_case("unknown") && *eta != "NA")
            .map(|eta| eta.to_string());

        return match percent {
            Some(percent) => OutputLine::Progress { percent, eta },
            None => OutputLine::Other(line.to_string()),
        };
    }

    OutputLine::Other(line.to_string())
}

fn error_lines(stderr: &str) -> Vec<&str> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("ERROR:"))
        .collect()
}

fn is_permanent_line(line: &str) -> bool {
    PERMANENT_ERRORS.iter().any(|pattern| line.contains(pattern))
}

/// Map a failed yt-dlp run to a typed error
pub fn classify_failure(code: Option<i32>, stderr: &str) -> DownloaderError {
    let error_lines = error_lines(stderr);

    let summary = error_lines
        .last()
        .copied()
        .or_else(|| stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last())
        .unwrap_or("no error output")
        .to_string();

    // one transient error among several entries is still worth a retry
    if !error_lines.is_empty() && error_lines.iter().all(|line| is_permanent_line(line)) {
        return DownloaderError::Unavailable(summary);
    }

    DownloaderError::ToolFailed {
        code: code.map_or_else(|| "signal".to_string(), |c| format!("status {}", c)),
        stderr: summary,
    }
}

/// Decide what a non-zero yt-dlp exit means for a job.
///
/// With `--ignore-errors` a playlist or channel exits 1 when single entries
/// are gone. If files were produced and every error is permanent, the run
/// counts as completed and the failed entries are listed as skipped.
pub fn settle_failed_run(
    kind: UrlKind,
    code: Option<i32>,
    stderr: &str,
    mut outcome: DownloadOutcome,
) -> Result<DownloadOutcome> {
    let errors = error_lines(stderr);

    if kind.is_collection()
        && !outcome.files.is_empty()
        && !errors.is_empty()
        && errors.iter().all(|line| is_permanent_line(line))
    {
        for entry in &errors {
            tracing::warn!("Skipped entry: {}", entry);
        }
        outcome.skipped = errors.into_iter().map(str::to_string).collect();
        return Ok(outcome);
    }

    Err(classify_failure(code, stderr).into())
}

/// Backend that drives the yt-dlp executable
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    yt_dlp_path: String,
    max_height: u32,
    audio_format: String,
    audio_quality: String,
    archive_file: Option<PathBuf>,
    ffmpeg_location: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl YtDlpBackend {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            yt_dlp_path: config.tools.yt_dlp_path.clone(),
            max_height: config.download.max_height,
            audio_format: config.download.audio_format.clone(),
            audio_quality: config.download.audio_quality.clone(),
            archive_file: config.download.archive_file.clone(),
            ffmpeg_location: config.tools.ffmpeg_location.clone(),
            extra_args: config.tools.extra_args.clone(),
        }
    }

    /// Format selector preferring separate streams capped at `max_height`
    pub fn video_selector(&self) -> String {
        format!(
            "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
            h = self.max_height
        )
    }

    /// Output template for the kind of URL being downloaded
    pub fn output_template(kind: UrlKind, output_dir: &Path) -> String {
        let pattern = match kind {
            UrlKind::Video => "%(title)s.%(ext)s",
            UrlKind::Playlist => "%(playlist_title)s/%(playlist_index)s-%(title)s.%(ext)s",
            UrlKind::Channel => "%(uploader)s/%(upload_date)s-%(title)s.%(ext)s",
        };
        output_dir.join(pattern).to_string_lossy().into_owned()
    }

    /// Arguments for a download run, URL last
    pub fn build_download_args(&self, job: &DownloadJob) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--output".into(),
            Self::output_template(job.kind, &job.output_dir),
            "--newline".into(),
            "--progress".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--print".into(),
            FILE_TEMPLATE.into(),
            "--no-colors".into(),
            "--no-write-subs".into(),
            "--no-write-auto-subs".into(),
            "--no-write-thumbnail".into(),
            "--no-keep-video".into(),
            "--retries".into(),
            "3".into(),
            "--fragment-retries".into(),
            "3".into(),
        ];

        match job.format {
            MediaFormat::Video => {
                args.extend([
                    "--format".into(),
                    self.video_selector(),
                    "--merge-output-format".into(),
                    "mp4".into(),
                    "--remux-video".into(),
                    "mp4".into(),
                ]);
            }
            MediaFormat::Audio => {
                args.extend([
                    "--format".into(),
                    "bestaudio/best".into(),
                    "--extract-audio".into(),
                    "--audio-format".into(),
                    self.audio_format.clone(),
                    "--audio-quality".into(),
                    self.audio_quality.clone(),
                ]);
            }
        }

        if job.kind.is_collection() {
            // one broken entry must not abort the rest of the playlist
            args.push("--ignore-errors".into());
        } else {
            args.push("--no-playlist".into());
        }

        if let Some(archive) = &self.archive_file {
            args.push("--download-archive".into());
            args.push(archive.to_string_lossy().into_owned());
        }

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args.extend(self.extra_args.iter().cloned());
        args.push(job.url.clone());
        args
    }

    fn spawn_error(&self, err: std::io::Error) -> anyhow::Error {
        if err.kind() == ErrorKind::NotFound {
            DownloaderError::ToolMissing(self.yt_dlp_path.clone()).into()
        } else {
            anyhow::Error::new(err).context(format!("Failed to start {}", self.yt_dlp_path))
        }
    }

    /// Installed yt-dlp version, if any
    pub async fn version(&self) -> Option<String> {
        let output = Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for YtDlpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn check_availability(&self) -> bool {
        self.version().await.is_some()
    }

    async fn list_formats(&self, url: &str) -> Result<String> {
        tracing::debug!("Listing formats for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--list-formats", "--no-colors", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr).into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn download(&self, job: &DownloadJob, progress: &ProgressBar) -> Result<DownloadOutcome> {
        fs_err::create_dir_all(&job.output_dir)?;

        let args = self.build_download_args(job);
        tracing::debug!("Running {} {}", self.yt_dlp_path, args.join(" "));

        let mut child = Command::new(&self.yt_dlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // drain stderr concurrently so a chatty run cannot block on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    tracing::warn!("Failed to read yt-dlp stderr: {}", e);
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut outcome = DownloadOutcome::default();

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            // filenames are not guaranteed to be UTF-8
            while reader.read_until(b'\n', &mut buf).await? > 0 {
                let line = String::from_utf8_lossy(&buf).into_owned();
                buf.clear();

                match parse_output_line(&line) {
                    OutputLine::Progress { percent, eta } => {
                        let eta = eta.map(|e| format!(" ETA {}", e)).unwrap_or_default();
                        progress.set_message(format!("{:.1}%{} {}", percent, eta, job.url));
                    }
                    OutputLine::File(path) => {
                        tracing::debug!("Finished file: {}", path.display());
                        outcome.files.push(path);
                    }
                    OutputLine::Other(text) => {
                        if !text.is_empty() {
                            tracing::trace!("yt-dlp: {}", text);
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return settle_failed_run(job.kind, status.code(), &stderr, outcome);
        }

        Ok(outcome)
    }
}
