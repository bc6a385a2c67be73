use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use serde::Serialize;
use tokio::io::BufReader;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{Cli, MergeArgs};
use crate::config::{Config, LoggingConfig};
use crate::directory::{codec, ChannelBuilder, Directory, Instance};
use crate::error::{Error, Result};
use crate::feed::FeedFetcher;
use crate::pipeline::{cancel_pair, FetchPipeline, InputStats, PipelineReport};

/// Write a default configuration file
pub fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::config_file()?,
    };

    if path.exists() && !force {
        warn!("Configuration file already exists: {}", path.display());
        println!("Configuration already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Config::default().save(&path)?;

    info!("Created default configuration: {}", path.display());
    println!("✅ Wrote default configuration to {}", path.display());
    Ok(())
}

/// Load an optional directory, run the fetch pipeline over the input URLs
/// and write the merged directory.
pub async fn merge(args: MergeArgs, config: &Config) -> Result<()> {
    let instance = if args.private {
        Instance::Private
    } else {
        config.settings.instance
    };
    let workers = args.workers.unwrap_or(config.settings.workers);
    if workers == 0 {
        return Err(Error::Config("Workers must be greater than 0".to_string()));
    }

    let directory = match &args.directory {
        Some(path) => codec::load_file(path, instance)?,
        None => Directory::new(instance),
    };
    let directory = Arc::new(directory);
    let before = (directory.len(), directory.feed_count());

    let fetcher = FeedFetcher::from_settings(&config.settings)?;
    let pipeline = FetchPipeline::new(Arc::new(fetcher), Arc::clone(&directory))
        .with_workers(workers)
        .with_builder(ChannelBuilder::new(config.channel.clone()));

    let (canceller, cancel) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing feeds already in flight");
            canceller.cancel();
        }
    });

    info!("Merging feeds into a {} directory with {} worker(s)", instance, workers);
    let result = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            pipeline.run(BufReader::new(file), cancel).await
        }
        None => pipeline.run(BufReader::new(tokio::io::stdin()), cancel).await,
    };
    interrupt.abort();
    let (stats, report) = result?;

    match &args.output {
        Some(path) => codec::dump_file(&directory, path)?,
        None => codec::dump_to_writer(&directory, std::io::stdout().lock())?,
    }

    print_merge_summary(&stats, &report, before, &directory);
    Ok(())
}

fn print_merge_summary(
    stats: &InputStats,
    report: &PipelineReport,
    before: (usize, usize),
    directory: &Directory,
) {
    // Summary goes to stderr; stdout may be carrying the directory.
    eprintln!("📊 Merge summary");
    eprintln!("   Input: {} URL(s) accepted, {} line(s) skipped", stats.accepted, stats.skipped);
    eprintln!(
        "   Feeds: {} processed, {} new channel(s), {} merged, {} failed",
        report.processed,
        report.inserted,
        report.merged,
        report.failures.len()
    );
    eprintln!(
        "   Directory: {} -> {} channel(s), {} -> {} feed(s)",
        before.0,
        directory.len(),
        before.1,
        directory.feed_count()
    );
    for failure in &report.failures {
        debug!("{} [{}]: {}", failure.url, failure.code, failure.cause);
    }
}

#[derive(Debug, Serialize)]
pub struct DirectorySummary {
    pub instance: Instance,
    pub channels: usize,
    pub feeds: usize,
    pub entries: Vec<ChannelSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    pub id: String,
    pub identifier: String,
    pub language: String,
    pub feeds: usize,
}

pub fn summarize(directory: &Directory) -> DirectorySummary {
    let entries: Vec<ChannelSummary> = directory.with_channels(|records| {
        records
            .iter()
            .map(|record| ChannelSummary {
                id: record.id.clone(),
                identifier: record.identifier.clone(),
                language: record.language.clone(),
                feeds: record.feeds.len(),
            })
            .collect()
    });

    DirectorySummary {
        instance: directory.instance(),
        channels: entries.len(),
        feeds: entries.iter().map(|e| e.feeds).sum(),
        entries,
    }
}

/// Print a summary of a directory file
pub fn inspect(path: &Path, json: bool, config: &Config) -> Result<()> {
    let directory = codec::load_file(path, config.settings.instance)?;
    let summary = summarize(&directory);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📋 {}", path.display());
    println!("   Channels: {}", summary.channels);
    println!("   Feeds: {}", summary.feeds);
    for entry in &summary.entries {
        let language = if entry.language.is_empty() { "-" } else { entry.language.as_str() };
        println!(
            "\n📰 {}\n   Identifier: {}\n   Language: {}\n   Feeds: {}",
            entry.id, entry.identifier, language, entry.feeds
        );
    }
    Ok(())
}

/// Generate shell completions
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let cmd_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, cmd_name, &mut std::io::stdout());
}

/// Initialize the tracing subscriber. Logs go to stderr unless file
/// logging is configured; the returned guard must outlive the program's
/// logging.
pub fn init_logging(
    debug: bool,
    verbose: bool,
    logging: &LoggingConfig,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("Invalid log level {:?}: {}", level, e)))?;

    let (writer, guard) = if logging.log_to_file {
        let path = log_file_path(&logging.log_file)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Config(format!("Invalid log file: {}", logging.log_file)))?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (BoxMakeWriter::new(std::io::stderr), None)
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .with_writer(writer);

    let installed = if logging.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    debug!("Logging initialized");
    Ok(guard)
}

/// Relative log paths live under the configuration directory.
fn log_file_path(log_file: &str) -> Result<PathBuf> {
    let path = PathBuf::from(log_file);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(Config::config_dir()?.join(path))
    }
}
