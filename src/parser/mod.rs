// parser/mod.rs

//! Turning [`RawLine`]s into [`LogEvent`]s.
//!
//! Extraction is a pure [`Extractor`] strategy, so the line format can be changed without touching
//! the pipeline. [`FixedWidth`] is the default; [`Pattern`] accepts a regular expression.

mod fixed_width;
mod pattern;

use std::fmt;
use std::str::FromStr;

use log::{debug, trace, warn};
use tokio::sync::mpsc;

use crate::{LogEvent, RawLine};

pub use fixed_width::{FixedWidth, MIN_LINE_WIDTH, TIMESTAMP_WIDTH};
pub use pattern::{Pattern, PatternError, GROUP_NAMES};

/// A strategy for extracting a [`LogEvent`] from a single line.
///
/// Implementations must be pure: the same line always yields the same result.
pub trait Extractor: Send + Sync {
    /// Extract an event from `line`, or return `None` if the line carries no event.
    ///
    /// A `None` is not an error; the parser drops the line according to its [`DropPolicy`].
    fn extract(&self, line: &str) -> Option<LogEvent>;
}

impl<E: Extractor + ?Sized> Extractor for Box<E> {
    fn extract(&self, line: &str) -> Option<LogEvent> {
        (**self).extract(line)
    }
}

/// How loudly to report lines that yield no event.
///
/// Dropped lines are always counted; this only controls logging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropPolicy {
    /// Note each dropped line at `debug` level.
    Quiet,

    /// Log each dropped line at `warn` level.
    Warn,
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self::Quiet
    }
}

impl FromStr for DropPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "quiet" => Ok(Self::Quiet),
            "warn" => Ok(Self::Warn),
            _ => Err(format!("unrecognised drop policy: {}", input)),
        }
    }
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quiet => write!(f, "quiet"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

/// Counters reported by [`Parser::run`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ParseStats {
    /// Events emitted downstream.
    pub parsed: u64,

    /// Lines that yielded no event.
    pub dropped: u64,
}

/// The parsing stage of the pipeline.
pub struct Parser<E: Extractor> {
    extractor: E,
    drop_policy: DropPolicy,
    stats: ParseStats,
}

impl<E: Extractor> Parser<E> {
    /// Construct a parser using `extractor`, reporting dropped lines per `drop_policy`.
    pub fn new(extractor: E, drop_policy: DropPolicy) -> Self {
        Self {
            extractor,
            drop_policy,
            stats: ParseStats::default(),
        }
    }

    /// Parse a single line, counting and logging it if it is dropped.
    pub fn parse(&mut self, line: &str) -> Option<LogEvent> {
        match self.extractor.extract(line) {
            Some(event) => {
                trace!("Parsed {:?} into {:?}", line, event);
                self.stats.parsed += 1;
                Some(event)
            }
            None => {
                self.stats.dropped += 1;
                match self.drop_policy {
                    DropPolicy::Quiet => debug!("Dropping line with no event: {:?}", line),
                    DropPolicy::Warn => warn!("Dropping line with no event: {:?}", line),
                }
                None
            }
        }
    }

    /// Parse every line from `lines` in order, sending each event to `events`.
    ///
    /// Returns once `lines` is closed and drained, or as soon as `events` is closed (which only
    /// happens if the shipper has halted). `events` is dropped on return, which lets the shipper
    /// drain and stop in turn.
    pub async fn run(
        mut self,
        mut lines: mpsc::Receiver<RawLine>,
        events: mpsc::Sender<LogEvent>,
    ) -> ParseStats {
        while let Some(line) = lines.recv().await {
            let event = match self.parse(&line) {
                Some(event) => event,
                None => continue,
            };
            if events.send(event).await.is_err() {
                debug!("Event queue closed, stopping parser");
                break;
            }
        }

        debug!(
            "Parser stopped after {} events ({} lines dropped)",
            self.stats.parsed, self.stats.dropped
        );
        self.stats
    }
}
