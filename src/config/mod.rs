use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{clamp_workers, RetryPolicy};
use crate::ytdlp::MediaFormat;
use crate::DownloaderError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Download settings
    pub download: DownloadConfig,

    /// Retry and backoff settings
    pub retry: RetryConfig,

    /// External tool settings
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory downloads are written to
    pub output_dir: PathBuf,

    /// Default format (video or audio)
    pub format: MediaFormat,

    /// Number of concurrent downloads (1-5)
    pub workers: usize,

    /// Maximum video height picked by the format selector
    pub max_height: u32,

    /// Codec used when extracting audio
    pub audio_format: String,

    /// Audio quality passed to ffmpeg (kbps or 0-10 VBR)
    pub audio_quality: String,

    /// yt-dlp download archive, skips already downloaded videos
    pub archive_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Growth factor applied to the delay after each retry
    pub multiplier: f64,

    /// Upper bound for a single delay
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable
    pub yt_dlp_path: String,

    /// Passed to yt-dlp as --ffmpeg-location
    pub ffmpeg_location: Option<PathBuf>,

    /// Extra arguments appended to every yt-dlp download
    pub extra_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            format: MediaFormat::Video,
            workers: 3,
            max_height: 1080,
            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),
            archive_file: None,
        }
    }
}

impl DownloadConfig {
    /// Command-line values take precedence over the configured ones
    pub fn with_overrides(
        &self,
        output_dir: Option<PathBuf>,
        format: Option<MediaFormat>,
        workers: Option<usize>,
    ) -> Self {
        Self {
            output_dir: output_dir.unwrap_or_else(|| self.output_dir.clone()),
            format: format.unwrap_or(self.format),
            workers: clamp_workers(workers.unwrap_or(self.workers)),
            ..self.clone()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_location: None,
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(path_override: Option<&Path>) -> Result<Self> {
        let config_path = match path_override {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            Self::load_from(&config_path)
        } else if path_override.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display())
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                tracing::warn!("Could not write default config: {:#}", e);
            }
            Ok(config)
        }
    }

    /// Parse and validate a config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let mut config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("ytpool").join("config.yaml"))
    }

    /// Validate configuration, clamping the worker count into range
    fn validate(&mut self) -> Result<()> {
        if self.tools.yt_dlp_path.trim().is_empty() {
            return Err(DownloaderError::Config("tools.yt_dlp_path must not be empty".into()).into());
        }

        if self.retry.multiplier < 1.0 {
            return Err(DownloaderError::Config("retry.multiplier must be at least 1.0".into()).into());
        }

        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(DownloaderError::Config(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".into(),
            )
            .into());
        }

        if self.download.audio_format.trim().is_empty() {
            return Err(DownloaderError::Config("download.audio_format must not be empty".into()).into());
        }

        let clamped = clamp_workers(self.download.workers);
        if clamped != self.download.workers {
            tracing::warn!(
                "download.workers = {} is out of range, using {}",
                self.download.workers,
                clamped
            );
            self.download.workers = clamped;
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Output Directory: {}", self.download.output_dir.display());
        println!("  Format: {}", self.download.format);
        println!("  Workers: {}", self.download.workers);
        println!("  Max Height: {}p", self.download.max_height);
        println!(
            "  Audio: {} @ {}",
            self.download.audio_format, self.download.audio_quality
        );
        if let Some(archive) = &self.download.archive_file {
            println!("  Archive: {}", archive.display());
        }
        println!(
            "  Retries: {} (backoff {}ms x{}, max {}ms)",
            self.retry.max_retries,
            self.retry.initial_delay_ms,
            self.retry.multiplier,
            self.retry.max_delay_ms
        );
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
    }

    /// Tell the user where the config lives
    pub async fn interactive_setup(&self) -> Result<()> {
        println!("Edit the config file to change defaults:");
        println!("  {}", Self::config_path()?.display());
        Ok(())
    }

    /// Backoff policy built from the retry section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}
