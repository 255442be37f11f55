// loadgen/src/lib.rs
use std::convert::TryFrom;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use smol::future::Future;
use smol::stream::{Stream, StreamExt};
use smol::Timer;

use log_shipper::LogEvent;

const LEVELS: [&str; 4] = ["INFO", "DEBUG", "WARN", "ERROR"];

type LineStream = Pin<Box<dyn Stream<Item = io::Result<()>>>>;

/// Emits lines from a number of timed streams.
pub struct Generator {
    streams: Vec<LineStream>,
}

impl Generator {
    /// Spread `line_count` emissions over `stream_count` streams for `duration`.
    ///
    /// `emit` is called with the stream number and that stream's sequence number for each line.
    /// Streams that are assigned no lines are skipped. `duration` must not be zero.
    pub fn new<E>(
        duration: Duration,
        stream_count: u32,
        line_count: u32,
        distribution: Distribution,
        emit: E,
    ) -> Self
    where
        E: Fn(u32, u32) -> io::Result<()> + 'static,
    {
        let mut streams = Vec::new();
        let emit: Rc<dyn Fn(u32, u32) -> io::Result<()>> = Rc::new(emit);

        for (stream, stream_lines) in distribution
            .distribute(line_count, stream_count)
            .into_iter()
            .enumerate()
        {
            if stream_lines == 0 {
                continue;
            }

            let lines_per_second = f64::from(stream_lines) / duration.as_secs_f64();
            let interval = Duration::from_secs_f64(1.0 / lines_per_second);
            let emit = Rc::clone(&emit);

            // Cast is OK because there are at most `stream_count` streams.
            #[allow(clippy::cast_possible_truncation)]
            let stream = stream as u32;

            let mut sequence = 0;
            let emitter = Timer::interval(interval)
                .map(move |_| {
                    sequence += 1;
                    emit(stream, sequence)
                })
                .take(stream_lines as usize);

            streams.push(Box::pin(emitter) as LineStream);
        }

        Generator { streams }
    }

    /// Run every stream to completion, stopping at the first failed emission.
    pub async fn run(self) -> io::Result<()> {
        GeneratorRun {
            streams: self.streams,
        }
        .await
    }
}

struct GeneratorRun {
    streams: Vec<LineStream>,
}

impl Future for GeneratorRun {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut poll = Poll::Ready(Ok(()));
        for stream in &mut self.streams {
            match stream.poll_next(cx) {
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Err(error)),
                Poll::Ready(Some(Ok(()))) | Poll::Pending => poll = Poll::Pending,
                Poll::Ready(None) => {}
            }
        }
        poll
    }
}

/// How lines are shared between streams.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Distribution {
    Uniform,
    Linear,
}

impl FromStr for Distribution {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "uniform" => Ok(Self::Uniform),
            "linear" => Ok(Self::Linear),
            _ => Err(format!("unrecognised distribution: {}", input)),
        }
    }
}

impl Distribution {
    fn distribute(self, line_count: u32, stream_count: u32) -> Vec<u32> {
        let line_count_f64 = f64::from(line_count);
        let stream_count_f64 = f64::from(stream_count);

        match self {
            Self::Uniform => {
                // Cast is OK because u32 / u32 fits in u32, we just want it rounded.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let per_stream = (line_count_f64 / stream_count_f64).round() as u32;

                vec![per_stream; stream_count as usize]
            }
            Self::Linear => {
                // The height of a triangle with `base = stream_count + 1` and `area = line_count`.
                let max = 2.0 * line_count_f64 / (1.0 + stream_count_f64);
                let inc = max / stream_count_f64;

                (1..=stream_count)
                    .map(|i| {
                        // Cast is OK because the value is rounded, non-negative, and at most `max`.
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let stream_lines = (f64::from(i) * inc).round() as u32;
                        stream_lines
                    })
                    .filter(|lines| *lines != 0)
                    .collect()
            }
        }
    }
}

/// The number of lines to write in total for an average of `lines_per_second` over `seconds`.
///
/// Returns `None` if `seconds` is zero or the total doesn't fit in a `u32`.
#[must_use]
pub fn total_lines(lines_per_second: u32, seconds: u64) -> Option<u32> {
    if seconds == 0 {
        return None;
    }
    u64::from(lines_per_second)
        .checked_mul(seconds)
        .and_then(|total| u32::try_from(total).ok())
}

/// Render the line for `sequence` on `stream`, in the format the shipper parses by default.
#[must_use]
pub fn render_line(timestamp: &str, stream: u32, sequence: u32) -> String {
    let level = LEVELS[sequence as usize % LEVELS.len()];
    LogEvent::new(
        timestamp,
        level,
        format!(" stream {} line {}", stream, sequence),
    )
    .to_string()
}
