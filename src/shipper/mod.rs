// shipper/mod.rs

//! Delivering [`LogEvent`]s to a search index.
//!
//! The [`Shipper`] writes one event at a time through an [`Index`], retrying transient failures
//! with bounded exponential backoff. Failures are classified by the [`Index`] implementation
//! ([`IndexError`]), never by inspecting error messages.
//!
//! The shipper moves through these states:
//!
//! ```text
//! Idle -> Connected -> {Shipping, Retrying} -> {Shipping, Halted}
//! ```
//!
//! `Halted` is reached when a fatal error occurs, or when the event queue closes and has been
//! drained.

pub mod elasticsearch;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::LogEvent;

/// Acknowledgement of a successfully indexed document.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ack {
    /// The identifier the backend assigned to the document, if it reported one.
    pub id: Option<String>,
}

/// The classes of failure an [`Index`] can report.
///
/// The class decides what the [`Shipper`] does next, so implementations must classify at the
/// point where they still know what went wrong (e.g. the HTTP status code).
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// A failure that may succeed if retried (e.g. a dropped connection or an overloaded node).
    #[error("transient index failure: {0}")]
    Transient(String),

    /// The backend refused this particular document. Retrying it cannot succeed, but other
    /// documents may.
    #[error("document rejected: {0}")]
    Rejected(String),

    /// A failure that will affect every subsequent write (e.g. revoked credentials).
    #[error("fatal index failure: {0}")]
    Fatal(String),
}

/// The external index that events are shipped to.
#[async_trait]
pub trait Index: Send + Sync {
    /// Check that the backend is reachable and accepts our credentials.
    async fn health_check(&self) -> Result<(), IndexError>;

    /// Write a single `document`.
    async fn index(&self, document: &serde_json::Value) -> Result<Ack, IndexError>;
}

/// How transient failures are retried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// How many times to retry an event after its first attempt fails.
    pub max_retries: u32,

    /// The delay before the first retry. Each further retry doubles the delay.
    pub initial_backoff: Duration,

    /// The longest delay between two attempts.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The delay before retry number `retry` (starting from 1).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// The states of a [`Shipper`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Not yet checked against the backend.
    Idle,

    /// The health check passed; nothing has been shipped yet.
    Connected,

    /// Shipping events normally.
    Shipping,

    /// Waiting to retry the current event after a transient failure.
    Retrying {
        /// The retry about to be made (starting from 1).
        retry: u32,
    },

    /// No further events will be shipped.
    Halted,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connected => write!(f, "Connected"),
            Self::Shipping => write!(f, "Shipping"),
            Self::Retrying { retry } => write!(f, "Retrying({})", retry),
            Self::Halted => write!(f, "Halted"),
        }
    }
}

/// Possible error situations that stop a [`Shipper`].
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    /// The startup health check failed, so the shipper never started.
    #[error("index health check failed: {0}")]
    Connect(#[source] IndexError),

    /// A fatal error occurred while shipping, and the shipper halted.
    #[error("shipper halted: {0}")]
    Halted(#[source] IndexError),
}

/// Counters reported by [`Shipper::run`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShipStats {
    /// Events the backend acknowledged.
    pub shipped: u64,

    /// Events given up on after exhausting retries.
    pub dropped: u64,

    /// Events the backend refused outright.
    pub rejected: u64,
}

/// The shipping stage of the pipeline.
pub struct Shipper<I: Index> {
    index: I,
    retry_policy: RetryPolicy,
    state: State,
    stats: ShipStats,
}

impl<I: Index> Shipper<I> {
    /// Check that `index` is healthy and return a connected shipper.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::Connect`] if the health check fails for any reason.
    pub async fn connect(index: I, retry_policy: RetryPolicy) -> Result<Self, ShipError> {
        let mut shipper = Self {
            index,
            retry_policy,
            state: State::Idle,
            stats: ShipStats::default(),
        };

        shipper.index.health_check().await.map_err(ShipError::Connect)?;
        shipper.transition(State::Connected);

        Ok(shipper)
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The counters so far.
    #[must_use]
    pub fn stats(&self) -> ShipStats {
        self.stats
    }

    /// Ship a single event, retrying transient failures per the [`RetryPolicy`].
    ///
    /// Events that exhaust their retries, or that the backend rejects, are logged, counted and
    /// dropped; this still returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::Halted`] on a fatal index error. The shipper is then `Halted` and
    /// must not be used further.
    pub async fn ship(&mut self, event: &LogEvent) -> Result<(), ShipError> {
        let document = match serde_json::to_value(event) {
            Ok(document) => document,
            Err(error) => {
                error!("Failed to serialize {:?}, dropping: {}", event, error);
                self.stats.rejected += 1;
                return Ok(());
            }
        };

        let mut retry = 0;
        loop {
            match self.index.index(&document).await {
                Ok(ack) => {
                    self.transition(State::Shipping);
                    self.stats.shipped += 1;
                    debug!("Indexed document {:?}", ack.id);
                    info!("Shipped: {}", event.message);
                    return Ok(());
                }
                Err(IndexError::Transient(cause)) if retry < self.retry_policy.max_retries => {
                    retry += 1;
                    let backoff = self.retry_policy.backoff(retry);
                    warn!(
                        "Failed to ship event (retry {}/{} in {:?}): {}",
                        retry, self.retry_policy.max_retries, backoff, cause
                    );
                    self.transition(State::Retrying { retry });
                    tokio::time::sleep(backoff).await;
                }
                Err(IndexError::Transient(cause)) => {
                    error!(
                        "Dropping event after {} attempts: {}: {:?}",
                        retry + 1,
                        cause,
                        event
                    );
                    self.stats.dropped += 1;
                    self.transition(State::Shipping);
                    return Ok(());
                }
                Err(IndexError::Rejected(cause)) => {
                    error!("Dropping event rejected by index: {}: {:?}", cause, event);
                    self.stats.rejected += 1;
                    self.transition(State::Shipping);
                    return Ok(());
                }
                Err(error @ IndexError::Fatal(_)) => {
                    self.transition(State::Halted);
                    return Err(ShipError::Halted(error));
                }
            }
        }
    }

    /// Ship every event from `events` in order until the queue is closed and drained.
    ///
    /// Returning drops `events`, which stops the parser if the shipper halted early.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::Halted`] on a fatal index error.
    pub async fn run(mut self, mut events: mpsc::Receiver<LogEvent>) -> Result<ShipStats, ShipError> {
        while let Some(event) = events.recv().await {
            self.ship(&event).await?;
        }

        self.transition(State::Halted);
        debug!(
            "Shipper stopped after {} events ({} dropped, {} rejected)",
            self.stats.shipped, self.stats.dropped, self.stats.rejected
        );
        Ok(self.stats)
    }

    fn transition(&mut self, state: State) {
        if self.state != state {
            debug!("Shipper {} -> {}", self.state, state);
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::test::{self, RecordingIndex};
    use crate::LogEvent;

    use super::{IndexError, RetryPolicy, ShipError, ShipStats, Shipper, State};

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new("2023-10-25 12:34:56", "INFO", message)
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn connect_runs_health_check() -> test::Result {
        let index = RecordingIndex::new();
        let shipper = Shipper::connect(index.clone(), fast_retries(0)).await?;

        assert_eq!(shipper.state(), State::Connected);
        assert_eq!(index.health_checks(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn connect_fails_when_unhealthy() {
        let index = RecordingIndex::unhealthy(IndexError::Fatal("401 Unauthorized".to_string()));

        let error = Shipper::connect(index, fast_retries(0))
            .await
            .err()
            .expect("expected connect to fail");
        assert!(matches!(error, ShipError::Connect(IndexError::Fatal(_))));
    }

    #[tokio::test]
    async fn ships_serialized_document() -> test::Result {
        let index = RecordingIndex::new();
        let mut shipper = Shipper::connect(index.clone(), fast_retries(0)).await?;

        shipper.ship(&event(" hello")).await?;

        assert_eq!(shipper.state(), State::Shipping);
        assert_eq!(
            index.documents(),
            vec![serde_json::json!({
                "TimeStamp": "2023-10-25 12:34:56",
                "Level": "INFO",
                "Message": " hello",
            })]
        );

        Ok(())
    }

    #[tokio::test]
    async fn retries_up_to_limit_then_drops_and_continues() -> test::Result {
        let index = RecordingIndex::new();
        for _ in 0..4 {
            index.push_response(Err(IndexError::Transient("connection reset".to_string())));
        }
        let mut shipper = Shipper::connect(index.clone(), fast_retries(3)).await?;

        shipper.ship(&event(" lost")).await?;
        assert_eq!(index.attempts(), 4);

        shipper.ship(&event(" kept")).await?;
        assert_eq!(index.attempts(), 5);

        assert_eq!(
            shipper.stats(),
            ShipStats {
                shipped: 1,
                dropped: 1,
                rejected: 0
            }
        );
        assert_eq!(index.messages(), vec![" kept"]);

        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_limit() -> test::Result {
        let index = RecordingIndex::new();
        for _ in 0..3 {
            index.push_response(Err(IndexError::Transient("503".to_string())));
        }
        let mut shipper = Shipper::connect(index.clone(), fast_retries(3)).await?;

        shipper.ship(&event(" eventually")).await?;

        assert_eq!(index.attempts(), 4);
        assert_eq!(shipper.stats().shipped, 1);
        assert_eq!(index.messages(), vec![" eventually"]);

        Ok(())
    }

    #[tokio::test]
    async fn rejected_documents_are_not_retried() -> test::Result {
        let index = RecordingIndex::new();
        index.push_response(Err(IndexError::Rejected("mapper_parsing_exception".to_string())));
        let mut shipper = Shipper::connect(index.clone(), fast_retries(3)).await?;

        shipper.ship(&event(" bad")).await?;
        shipper.ship(&event(" good")).await?;

        assert_eq!(index.attempts(), 2);
        assert_eq!(
            shipper.stats(),
            ShipStats {
                shipped: 1,
                dropped: 0,
                rejected: 1
            }
        );

        Ok(())
    }

    #[tokio::test]
    async fn fatal_error_halts() -> test::Result {
        let index = RecordingIndex::new();
        index.push_response(Err(IndexError::Transient("timeout".to_string())));
        index.push_response(Err(IndexError::Fatal("403 Forbidden".to_string())));
        let mut shipper = Shipper::connect(index.clone(), fast_retries(3)).await?;

        let error = shipper.ship(&event(" denied")).await.err().expect("expected halt");

        assert!(matches!(error, ShipError::Halted(IndexError::Fatal(_))));
        assert_eq!(shipper.state(), State::Halted);
        assert_eq!(index.attempts(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn run_drains_queue_then_halts() -> test::Result {
        let index = RecordingIndex::new();
        let shipper = Shipper::connect(index.clone(), fast_retries(0)).await?;

        let (tx, rx) = mpsc::channel(10);
        for message in &[" one", " two", " three"] {
            tx.send(event(message)).await?;
        }
        drop(tx);

        let stats = shipper.run(rx).await?;

        assert_eq!(stats.shipped, 3);
        assert_eq!(index.messages(), vec![" one", " two", " three"]);

        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_fatal_error() -> test::Result {
        let index = RecordingIndex::new();
        index.push_response(Ok(Default::default()));
        index.push_response(Err(IndexError::Fatal("index deleted".to_string())));
        let shipper = Shipper::connect(index.clone(), fast_retries(0)).await?;

        let (tx, rx) = mpsc::channel(10);
        for message in &[" one", " two", " three"] {
            tx.send(event(message)).await?;
        }

        let result = shipper.run(rx).await;

        assert!(matches!(result, Err(ShipError::Halted(_))));
        assert_eq!(index.attempts(), 2);
        assert!(tx.is_closed());

        Ok(())
    }
}
