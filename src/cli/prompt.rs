//! Interactive questions asked when `download` is run without URLs.

use anyhow::{Context, Result};
use console::style;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::classify::parse_urls;
use crate::config::DownloadConfig;
use crate::download::clamp_workers;
use crate::ytdlp::MediaFormat;

/// Answers collected from the user
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadAnswers {
    pub urls: Vec<String>,
    pub output_dir: PathBuf,
    pub format: MediaFormat,
    pub workers: usize,
}

/// Blank answers keep the default directory
pub fn resolve_output_dir(answer: &str, default: &Path) -> PathBuf {
    let answer = answer.trim();
    if answer.is_empty() {
        default.to_path_buf()
    } else {
        PathBuf::from(answer)
    }
}

/// `None` means the answer was not understood
pub fn resolve_format(answer: &str, default: MediaFormat) -> Option<MediaFormat> {
    if answer.trim().is_empty() {
        return Some(default);
    }
    MediaFormat::from_choice(answer)
}

/// Out-of-range numbers are clamped; `None` means not a number
pub fn resolve_workers(answer: &str, default: usize) -> Option<usize> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Some(clamp_workers(default));
    }
    answer.parse::<usize>().ok().map(clamp_workers)
}

pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<std::io::StdinLock<'static>, std::io::Stderr> {
    /// Prompt on stderr, read from stdin
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `question` and read one line; `None` on end of input
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{} ", style(question).bold())?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read answer")?;

        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn warn(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{}", style(message).yellow())?;
        Ok(())
    }

    pub fn ask_urls(&mut self) -> Result<Vec<String>> {
        loop {
            let answer = self
                .ask("Enter YouTube URL(s) (video, playlist or channel; separate with spaces or commas):")?
                .context("No URLs given")?;

            match parse_urls(&answer) {
                Ok(urls) if !urls.is_empty() => return Ok(urls),
                Ok(_) => self.warn("Please enter at least one URL.")?,
                Err(e) => self.warn(&format!("{}", e))?,
            }
        }
    }

    pub fn ask_output_dir(&mut self, default: &Path) -> Result<PathBuf> {
        let question = format!(
            "Enter output directory (press Enter for default: {}):",
            default.display()
        );
        let answer = self.ask(&question)?.unwrap_or_default();
        Ok(resolve_output_dir(&answer, default))
    }

    pub fn ask_format(&mut self, default: MediaFormat) -> Result<MediaFormat> {
        loop {
            let question = format!("Format: [1] video (mp4)  [2] audio only (default: {}):", default);
            let Some(answer) = self.ask(&question)? else {
                return Ok(default);
            };

            match resolve_format(&answer, default) {
                Some(format) => return Ok(format),
                None => self.warn("Please answer 1/video or 2/audio.")?,
            }
        }
    }

    pub fn ask_workers(&mut self, default: usize) -> Result<usize> {
        loop {
            let question = format!(
                "Concurrent downloads, 1-5 (default: {}):",
                clamp_workers(default)
            );
            let Some(answer) = self.ask(&question)? else {
                return Ok(clamp_workers(default));
            };

            match resolve_workers(&answer, default) {
                Some(workers) => return Ok(workers),
                None => self.warn("Please enter a number.")?,
            }
        }
    }

    /// Ask everything a download run needs
    pub fn ask_download(&mut self, defaults: &DownloadConfig) -> Result<DownloadAnswers> {
        let urls = self.ask_urls()?;
        let output_dir = self.ask_output_dir(&defaults.output_dir)?;
        let format = self.ask_format(defaults.format)?;
        let workers = self.ask_workers(defaults.workers)?;

        Ok(DownloadAnswers {
            urls,
            output_dir,
            format,
            workers,
        })
    }
}
