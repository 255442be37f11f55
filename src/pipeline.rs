// pipeline.rs

//! Wiring the collector, parser and shipper together, and shutting them down cleanly.
//!
//! ```text
//! Collector --(RawLine)--> Parser --(LogEvent)--> Shipper --> Index
//! ```
//!
//! The stages are joined by bounded queues, so a slow shipper eventually blocks the collector
//! rather than losing lines. Shutdown flows downstream: cancelling the token stops the collector,
//! which closes the line queue; the parser drains it and closes the event queue; the shipper
//! drains that and stops. A worker that fails cancels the token itself, so the rest of the
//! pipeline drains and stops the same way.

use std::fmt;
use std::future::Future;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::collector::watcher::Watcher;
use crate::collector::{CollectError, Collector};
use crate::parser::{Extractor, ParseStats, Parser};
use crate::shipper::{Index, ShipError, ShipStats, Shipper};

/// The default bound on each of the pipeline's queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// The pipeline's workers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// The file tailing worker.
    Collector,
    /// The line parsing worker.
    Parser,
    /// The index writing worker.
    Shipper,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collector => write!(f, "collector"),
            Self::Parser => write!(f, "parser"),
            Self::Shipper => write!(f, "shipper"),
        }
    }
}

/// Possible error situations that stop the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The collector could not continue tailing the file.
    #[error("collector failed: {0}")]
    Collect(#[from] CollectError),

    /// The shipper halted on a fatal index error.
    #[error("shipper failed: {0}")]
    Ship(#[from] ShipError),

    /// A worker panicked.
    #[error("{stage} worker failed: {source}")]
    Worker {
        /// The worker that failed.
        stage: Stage,
        /// The panic, as reported by the runtime.
        source: JoinError,
    },
}

/// Counters from every stage of a finished pipeline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Summary {
    /// Complete lines read from the file.
    pub lines_read: u64,

    /// Parser counters.
    pub parse: ParseStats,

    /// Shipper counters.
    pub ship: ShipStats,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines read, {} events parsed, {} lines dropped, {} events shipped, {} events dropped, {} events rejected",
            self.lines_read,
            self.parse.parsed,
            self.parse.dropped,
            self.ship.shipped,
            self.ship.dropped,
            self.ship.rejected
        )
    }
}

/// What each worker hands back when it stops.
enum Report {
    Collector(Result<u64, CollectError>),
    Parser(ParseStats),
    Shipper(Result<ShipStats, ShipError>),
}

/// A counting completion barrier over the pipeline's workers.
///
/// Every spawned worker counts as outstanding until it has stopped; [`wait`](Self::wait) only
/// returns once the count reaches zero.
struct WaitGroup {
    workers: Vec<(Stage, JoinHandle<Report>)>,
}

impl WaitGroup {
    fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, stage: Stage, worker: F)
    where
        F: Future<Output = Report> + Send + 'static,
    {
        debug!("Starting {}", stage);
        self.workers.push((stage, tokio::spawn(worker)));
    }

    fn spawn_blocking<F>(&mut self, stage: Stage, worker: F)
    where
        F: FnOnce() -> Report + Send + 'static,
    {
        debug!("Starting {}", stage);
        self.workers
            .push((stage, tokio::task::spawn_blocking(worker)));
    }

    async fn wait(self) -> Vec<(Stage, Result<Report, JoinError>)> {
        let mut remaining = self.workers.len();
        let mut reports = Vec::with_capacity(remaining);

        for (stage, handle) in self.workers {
            let report = handle.await;
            remaining -= 1;
            debug!("{} stopped ({} workers remaining)", stage, remaining);
            reports.push((stage, report));
        }

        reports
    }
}

/// The three pipeline stages, ready to run.
pub struct Pipeline<W: Watcher, E: Extractor, I: Index> {
    collector: Collector<W>,
    parser: Parser<E>,
    shipper: Shipper<I>,
    queue_capacity: usize,
}

impl<W, E, I> Pipeline<W, E, I>
where
    W: Watcher + Send + 'static,
    E: Extractor + 'static,
    I: Index + 'static,
{
    /// Assemble a pipeline from its stages.
    ///
    /// `shipper` should already be connected, so that an unreachable backend is reported before
    /// any worker starts.
    pub fn new(collector: Collector<W>, parser: Parser<E>, shipper: Shipper<I>) -> Self {
        Self {
            collector,
            parser,
            shipper,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the bound on each queue (at least 1).
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Run every stage until `shutdown` is cancelled or a stage fails, then drain and stop.
    ///
    /// This only returns once all three workers have stopped.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`Error`] reported by a worker. The remaining workers will still
    /// have drained their queues.
    pub async fn run(self, shutdown: CancellationToken) -> Result<Summary, Error> {
        let (line_tx, line_rx) = mpsc::channel(self.queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.queue_capacity);

        let mut workers = WaitGroup::new();

        let collector = self.collector;
        let token = shutdown.clone();
        workers.spawn_blocking(Stage::Collector, move || {
            let guard = token.clone().drop_guard();
            let result = collector.run(line_tx, token);
            if result.is_ok() {
                guard.disarm();
            }
            Report::Collector(result)
        });

        let parser = self.parser;
        let token = shutdown.clone();
        workers.spawn(Stage::Parser, async move {
            let guard = token.drop_guard();
            let stats = parser.run(line_rx, event_tx).await;
            guard.disarm();
            Report::Parser(stats)
        });

        let shipper = self.shipper;
        let token = shutdown.clone();
        workers.spawn(Stage::Shipper, async move {
            let guard = token.drop_guard();
            let result = shipper.run(event_rx).await;
            if result.is_ok() {
                guard.disarm();
            }
            Report::Shipper(result)
        });

        info!("Pipeline started");

        let mut summary = Summary::default();
        let mut first_error = None;
        for (stage, report) in workers.wait().await {
            let error = match report {
                Ok(Report::Collector(Ok(lines_read))) => {
                    summary.lines_read = lines_read;
                    continue;
                }
                Ok(Report::Parser(parse)) => {
                    summary.parse = parse;
                    continue;
                }
                Ok(Report::Shipper(Ok(ship))) => {
                    summary.ship = ship;
                    continue;
                }
                Ok(Report::Collector(Err(error))) => Error::from(error),
                Ok(Report::Shipper(Err(error))) => Error::from(error),
                Err(source) => Error::Worker { stage, source },
            };
            first_error.get_or_insert(error);
        }

        info!("Pipeline stopped: {}", summary);

        match first_error {
            Some(error) => Err(error),
            None => Ok(summary),
        }
    }
}
