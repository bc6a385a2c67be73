//! Concurrent fetch pipeline.
//!
//! A fixed pool of workers shares one bounded queue of feed URLs. Each
//! worker fetches, parses and normalizes a feed, then hands the record to
//! [`Directory::add`]. A failing URL is logged and counted and never stops
//! the other workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::directory::{AddOutcome, ChannelBuilder, Directory};
use crate::error::{Error, Result};
use crate::feed::fetcher::FeedSource;
use crate::feed::FeedParser;

pub const DEFAULT_WORKERS: usize = 100;

/// Creates a linked cancel switch and token.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

/// The side that requests cancellation.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// The side that observes cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// `Canceller` was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let outcome = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if outcome.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A URL the pipeline could not turn into a channel.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub url: Url,
    pub code: &'static str,
    pub cause: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub processed: usize,
    pub inserted: usize,
    pub merged: usize,
    pub failures: Vec<FetchFailure>,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn succeeded(&self) -> usize {
        self.inserted + self.merged
    }

    fn absorb(&mut self, other: PipelineReport) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.failures.extend(other.failures);
    }
}

/// What the producer did with its input lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub accepted: usize,
    pub skipped: usize,
}

struct Worker {
    source: Arc<dyn FeedSource>,
    directory: Arc<Directory>,
    builder: ChannelBuilder,
    parser: FeedParser,
}

impl Worker {
    async fn process(&self, url: &Url) -> Result<AddOutcome> {
        let fetched = self.source.fetch(url).await?;
        let doc = self
            .parser
            .parse(&fetched.body, fetched.charset.as_deref())?;
        let record = self.builder.build(&doc, url, self.directory.instance())?;
        Ok(self.directory.add(record))
    }

    async fn run(
        self: Arc<Self>,
        id: usize,
        queue: Arc<Mutex<mpsc::Receiver<Url>>>,
        cancel: CancelToken,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Worker {} stopping after cancellation", id);
                    break;
                }
                url = next_url(&queue) => url,
            };
            let Some(url) = next else { break };

            report.processed += 1;
            match self.process(&url).await {
                Ok(AddOutcome::Inserted) => report.inserted += 1,
                Ok(AddOutcome::Merged { .. }) => report.merged += 1,
                Err(e) => {
                    if e.is_per_url() {
                        warn!("Failed to process {}: {}", url, e);
                    } else {
                        error!("Unexpected failure processing {}: {}", url, e);
                    }
                    report.failures.push(FetchFailure {
                        url,
                        code: e.error_code(),
                        cause: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

async fn next_url(queue: &Mutex<mpsc::Receiver<Url>>) -> Option<Url> {
    queue.lock().await.recv().await
}

pub struct FetchPipeline {
    source: Arc<dyn FeedSource>,
    directory: Arc<Directory>,
    builder: ChannelBuilder,
    workers: usize,
}

impl FetchPipeline {
    pub fn new(source: Arc<dyn FeedSource>, directory: Arc<Directory>) -> Self {
        Self {
            source,
            directory,
            builder: ChannelBuilder::default(),
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_builder(mut self, builder: ChannelBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Spawns the workers. They run until the handle is finished or
    /// `cancel` fires.
    pub fn start(self, cancel: CancelToken) -> PipelineHandle {
        // A single hand-off slot: submit waits while every worker is busy.
        let (tx, rx) = mpsc::channel(1);
        let queue = Arc::new(Mutex::new(rx));

        let worker = Arc::new(Worker {
            source: self.source,
            directory: self.directory,
            builder: self.builder,
            parser: FeedParser::new(),
        });

        let workers = (0..self.workers)
            .map(|id| {
                tokio::spawn(Arc::clone(&worker).run(id, Arc::clone(&queue), cancel.clone()))
            })
            .collect();

        debug!("Started {} fetch worker(s)", self.workers);
        PipelineHandle {
            tx,
            workers,
            started: Instant::now(),
        }
    }

    /// Starts the pipeline, feeds it every line of `reader` and waits for
    /// the workers to drain the queue.
    pub async fn run<R>(
        self,
        reader: R,
        cancel: CancelToken,
    ) -> Result<(InputStats, PipelineReport)>
    where
        R: AsyncBufRead + Unpin,
    {
        let handle = self.start(cancel.clone());
        let stats = feed_lines(&handle, reader, &cancel).await;
        let report = handle.finish().await?;
        Ok((stats, report))
    }
}

pub struct PipelineHandle {
    tx: mpsc::Sender<Url>,
    workers: Vec<JoinHandle<PipelineReport>>,
    started: Instant,
}

impl PipelineHandle {
    /// Queues a URL, waiting for a free slot.
    pub async fn submit(&self, url: Url) -> Result<()> {
        self.tx.send(url).await.map_err(|e| {
            Error::Cancelled(format!("pipeline stopped before {} was queued", e.0))
        })
    }

    /// Closes the queue and waits for every worker.
    pub async fn finish(self) -> Result<PipelineReport> {
        drop(self.tx);

        let mut report = PipelineReport::default();
        for joined in futures::future::join_all(self.workers).await {
            let part = joined.map_err(|e| Error::Worker(e.to_string()))?;
            report.absorb(part);
        }
        report.elapsed = self.started.elapsed();

        info!(
            "Processed {} feed(s): {} new, {} merged, {} failed in {:.2?}",
            report.processed,
            report.inserted,
            report.merged,
            report.failures.len(),
            report.elapsed
        );
        Ok(report)
    }
}

/// Validates one line of input as a feed URL. The URL must be absolute
/// with a scheme, a host and a path.
pub fn parse_input_line(line: &str) -> Result<Url> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty line".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| Error::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    // The url crate reports "/" for a bare authority, so look at the raw text.
    let has_path = trimmed
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));

    if !has_host || !has_path {
        return Err(Error::InvalidUrl(format!(
            "{}: expected an absolute URL with host and path",
            trimmed
        )));
    }

    Ok(url)
}

/// Submits every valid line of `reader`. Invalid lines, including lines
/// that are not UTF-8, are skipped. Stops early on cancellation, when the
/// pipeline stops accepting work, or when reading fails; URLs already
/// submitted are still processed.
pub async fn feed_lines<R>(
    handle: &PipelineHandle,
    mut reader: R,
    cancel: &CancelToken,
) -> InputStats
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = InputStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Stopped reading input: {}", e);
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                debug!("Skipping input line that is not UTF-8: {}", e);
                stats.skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let url = match parse_input_line(line) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping input line: {}", e);
                stats.skipped += 1;
                continue;
            }
        };

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            submitted = handle.submit(url) => submitted,
        };
        match submitted {
            Ok(()) => stats.accepted += 1,
            Err(e) => {
                debug!("Input stopped: {}", e);
                break;
            }
        }
    }

    stats
}
