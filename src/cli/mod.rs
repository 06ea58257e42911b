use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::ytdlp::MediaFormat;

pub mod prompt;

#[derive(Parser)]
#[command(
    name = "ytpool",
    about = "ytpool - Download YouTube videos, playlists and channels concurrently",
    version,
    long_about = "A CLI tool that hands YouTube videos, playlists and channels to yt-dlp through a small pool of workers, retrying failed downloads with exponential backoff. Optionally keeps only the audio."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the default location
    #[arg(short = 'c', long = "config", global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one or more videos, playlists or channels
    Download {
        /// URLs or video ids (prompted for when none are given)
        #[arg(value_name = "URL")]
        urls: Vec<String>,

        /// Read additional URLs from a file, one or more per line
        #[arg(short, long, value_name = "FILE")]
        batch_file: Option<PathBuf>,

        /// Output directory (default: ./downloads)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Keep the video or only the audio
        #[arg(short, long, value_enum)]
        format: Option<MediaFormat>,

        /// Number of concurrent downloads (1-5)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Retries per URL after the first failure
        #[arg(long, value_name = "COUNT")]
        retries: Option<u32>,

        /// Write a JSON report of the run to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,

        /// List available formats instead of downloading
        #[arg(long)]
        list_formats: bool,
    },

    /// Show or edit the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
