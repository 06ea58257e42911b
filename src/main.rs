use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ytpool::classify::{parse_urls, read_batch_file, UrlClassifier};
use ytpool::cli::prompt::{DownloadAnswers, Prompter};
use ytpool::cli::{Cli, Commands};
use ytpool::download::build_jobs;
use ytpool::ytdlp::{MediaBackend, YtDlpBackend};
use ytpool::{output, utils, Config, DownloadManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "ytpool=debug" } else { "ytpool=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config_file.as_deref()).await?;

    match cli.command {
        Commands::Download {
            urls,
            batch_file,
            output: output_dir,
            format,
            workers,
            retries,
            report,
            list_formats,
        } => {
            let classifier = UrlClassifier::new();
            let defaults = config.download.with_overrides(output_dir, format, workers);

            let mut urls = parse_urls(&urls.join(" "))?;
            if let Some(path) = &batch_file {
                for url in read_batch_file(path)? {
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
            }

            // Listing formats only needs URLs
            let answers = if urls.is_empty() && !list_formats {
                Prompter::stdio().ask_download(&defaults)?
            } else {
                if urls.is_empty() {
                    urls = Prompter::stdio().ask_urls()?;
                }
                DownloadAnswers {
                    urls,
                    output_dir: defaults.output_dir,
                    format: defaults.format,
                    workers: defaults.workers,
                }
            };

            for url in &answers.urls {
                tracing::info!("Detected {} URL: {}", classifier.classify(url), url);
            }

            // Check for required external dependencies (non-fatal)
            let missing_deps = utils::check_dependencies(&config.tools.yt_dlp_path).await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            let backend = Arc::new(YtDlpBackend::from_config(&config));

            if list_formats {
                print_formats(&*backend, &answers.urls).await;
                return Ok(());
            }

            let mut retry = config.retry_policy();
            if let Some(retries) = retries {
                retry.max_retries = retries;
            }

            let jobs = build_jobs(&classifier, &answers.urls, answers.format, &answers.output_dir);

            println!("\nStarting download...");
            println!("Output: {}", answers.output_dir.display());
            println!("Format: {}", answers.format);

            let mut manager = DownloadManager::new(backend, answers.workers, retry);
            if cli.quiet {
                manager = manager.quiet();
            }

            let result = manager.run(jobs).await;
            output::print_summary(&result);

            if let Some(path) = report {
                output::save_report(&result, &path)?;
                println!("Report saved to: {}", path.display());
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.interactive_setup().await?;
            }
        }
    }

    Ok(())
}

/// Print the format table for each URL, continuing past failures
async fn print_formats(backend: &dyn MediaBackend, urls: &[String]) {
    for url in urls {
        println!("Available formats for {}:", url);
        match backend.list_formats(url).await {
            Ok(table) => println!("{}", table),
            Err(e) => {
                eprintln!("Error listing formats: {:#}", e);
                eprintln!("{}", output::troubleshooting());
            }
        }
    }
}
