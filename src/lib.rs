// lib.rs

//! The elements that drive the `log-shipper` binary.
//!
//! A running shipper is a [`pipeline`] of three workers joined by bounded queues: a
//! [`collector`] tails the log file, a [`parser`] turns each line into a [`LogEvent`], and a
//! [`shipper`] writes each event to the search backend.

#![warn(
    explicit_outlives_requirements,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    rustdoc::private_doc_tests,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_lifetimes,
    variant_size_differences,
    clippy::cargo,
    clippy::pedantic
)]
#![allow(clippy::cargo_common_metadata)]

pub mod collector;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod shipper;


use std::fmt;

/// A single line read from the tailed file, without its line terminator.
pub type RawLine = String;

/// A structured log event extracted from exactly one [`RawLine`].
///
/// This serializes to the document shape stored in the index:
/// `{"TimeStamp": "...", "Level": "...", "Message": "..."}`.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LogEvent {
    /// The fixed-width date-time prefix of the line.
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,

    /// The text between the first `[` and the following `]`, or empty.
    #[serde(rename = "Level")]
    pub level: String,

    /// Everything after the closing `]`, or empty.
    #[serde(rename = "Message")]
    pub message: String,
}

impl LogEvent {
    /// Construct an event from its three fields.
    pub fn new(
        timestamp: impl Into<String>,
        level: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            level: level.into(),
            message: message.into(),
        }
    }
}

/// Renders the event back into the canonical line format, `<timestamp> [<level>]<message>`.
///
/// Lines rendered this way are parsed back into the same event by
/// [`FixedWidth`](parser::FixedWidth) as long as the timestamp is 19 characters wide.
impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]{}", self.timestamp, self.level, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::LogEvent;

    #[test]
    fn serializes_document_field_names() {
        let event = LogEvent::new("2023-10-25 12:34:56", "INFO", " hello");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "TimeStamp": "2023-10-25 12:34:56",
                "Level": "INFO",
                "Message": " hello",
            })
        );
    }

    #[test]
    fn displays_canonical_line() {
        let event = LogEvent::new("2023-10-25 12:34:56", "WARN", " disk at 91%");
        assert_eq!(event.to_string(), "2023-10-25 12:34:56 [WARN] disk at 91%");
    }
}
