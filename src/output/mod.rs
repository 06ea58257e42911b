use anyhow::{Context, Result};
use console::style;
use std::fmt::Write as _;
use std::path::Path;

use crate::download::{DownloadReport, JobStatus};
use crate::utils::format_duration;

/// Render the end-of-run summary
pub fn format_summary(report: &DownloadReport) -> String {
    let mut out = String::new();
    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let _ = writeln!(out, "{}", style("Download summary").bold());

    for result in &report.results {
        match &result.status {
            JobStatus::Completed { files, skipped } => {
                let _ = writeln!(
                    out,
                    "  {} {} [{}] {} file(s), {} attempt(s), {}",
                    style("✓").green(),
                    result.url,
                    result.kind,
                    files.len(),
                    result.attempts,
                    format_duration(result.elapsed)
                );
                for file in files {
                    let _ = writeln!(out, "      {}", file.display());
                }
                for entry in skipped {
                    let _ = writeln!(out, "      {} skipped: {}", style("!").yellow(), entry);
                }
            }
            JobStatus::Failed { error } => {
                let _ = writeln!(
                    out,
                    "  {} {} [{}] failed after {} attempt(s): {}",
                    style("✗").red(),
                    result.url,
                    result.kind,
                    result.attempts,
                    error
                );
            }
        }
    }

    let _ = writeln!(
        out,
        "{} succeeded, {} failed, {} file(s) in {}",
        report.succeeded().len(),
        report.failed().len(),
        report.total_files(),
        format_duration(elapsed)
    );

    out
}

/// Hints printed after failed downloads
pub fn troubleshooting() -> &'static str {
    "Troubleshooting suggestions:\n\
     1. List the formats available for a URL:\n\
     \x20  ytpool download --list-formats <URL>\n\
     2. Check that the video is available in your region\n\
     3. Make sure yt-dlp is up to date:\n\
     \x20  yt-dlp -U   (or: pip install --upgrade yt-dlp)"
}

/// Print the summary, plus hints when something failed
pub fn print_summary(report: &DownloadReport) {
    println!();
    print!("{}", format_summary(report));

    if !report.all_succeeded() {
        println!();
        println!("{}", troubleshooting());
    }
}

/// Save the run report as pretty JSON
pub fn save_report(report: &DownloadReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs_err::write(path, content)?;
    Ok(())
}
