// collector/mod.rs

//! Log collection for `log-shipper`: turning appends to a file into a stream of lines.
//!
//! [`file::Collector`] tails a single file using a platform [`watcher`], holding back partial
//! lines until their terminating newline has been written.

pub mod file;
pub mod watcher;

pub use file::{CollectError, Collector};
