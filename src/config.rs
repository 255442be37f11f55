// config.rs

//! Command-line arguments, and validating them into a [`Config`].

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use structopt::StructOpt;

use crate::parser::{DropPolicy, Extractor, FixedWidth, Pattern, PatternError};
use crate::shipper::elasticsearch::Credentials;
use crate::shipper::RetryPolicy;

/// Longest index name Elasticsearch accepts, in bytes.
const MAX_INDEX_NAME_LEN: usize = 255;

/// Characters Elasticsearch forbids anywhere in an index name.
const FORBIDDEN_INDEX_CHARS: &[char] = &[
    '\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ':', ' ',
];

/// Ship lines appended to a log file into Elasticsearch.
#[derive(Debug, StructOpt)]
#[structopt(name = "log-shipper")]
pub struct Args {
    /// The log file to tail.
    #[structopt(long, env = "LOG_SHIPPER_FILE", parse(from_os_str))]
    pub file: PathBuf,

    /// Base URL of an Elasticsearch node. May be repeated, or given as a comma-separated list.
    #[structopt(
        long = "address",
        env = "LOG_SHIPPER_ADDRESSES",
        default_value = "http://localhost:9200"
    )]
    pub addresses: Vec<String>,

    /// User name for basic authentication.
    #[structopt(long, env = "LOG_SHIPPER_USERNAME")]
    pub username: Option<String>,

    /// Password for basic authentication.
    #[structopt(long, env = "LOG_SHIPPER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// The index to write events to.
    #[structopt(long, env = "LOG_SHIPPER_INDEX", default_value = "logs")]
    pub index: String,

    /// The bound on each internal queue.
    #[structopt(long, default_value = "100")]
    pub queue_capacity: usize,

    /// How many times to retry an event after a transient failure.
    #[structopt(long, default_value = "3")]
    pub max_retries: u32,

    /// The delay before the first retry, in milliseconds.
    #[structopt(long, default_value = "100")]
    pub retry_backoff_ms: u64,

    /// The longest delay between retries, in milliseconds.
    #[structopt(long, default_value = "10000")]
    pub max_retry_backoff_ms: u64,

    /// How long to wait for each request to Elasticsearch, in seconds.
    #[structopt(long, default_value = "10")]
    pub request_timeout_secs: u64,

    /// How to report lines that carry no event: `quiet` or `warn`.
    #[structopt(long, default_value = "quiet")]
    pub dropped_lines: DropPolicy,

    /// A regular expression with named groups `timestamp`, `level` and/or `message`, used instead
    /// of the fixed-width line format.
    #[structopt(long)]
    pub pattern: Option<String>,

    /// Create the log file if it does not exist.
    #[structopt(long)]
    pub create: bool,
}

/// Possible error situations when validating [`Args`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `--queue-capacity` was zero.
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    /// No `--address` was given.
    #[error("at least one address is required")]
    NoAddresses,

    /// An `--address` could not be parsed as a URL.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The address as given.
        address: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// An `--address` was a URL with a scheme other than `http` or `https`.
    #[error("address {0} must use http or https")]
    UnsupportedScheme(Url),

    /// Only one of `--username` and `--password` was given.
    #[error("username and password must be given together")]
    PartialCredentials,

    /// `--index` is not a valid Elasticsearch index name.
    #[error("invalid index name {name:?}: {reason}")]
    InvalidIndex {
        /// The name as given.
        name: String,
        /// The rule it breaks.
        reason: &'static str,
    },

    /// `--pattern` did not compile.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// `--retry-backoff-ms` was greater than `--max-retry-backoff-ms`.
    #[error("initial retry backoff ({initial:?}) exceeds the maximum ({max:?})")]
    Backoff {
        /// The initial backoff.
        initial: Duration,
        /// The cap.
        max: Duration,
    },

    /// `--file` could not be inspected or created.
    #[error("cannot use log file {path}: {source}")]
    File {
        /// The file as given.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// `--file` exists but is not a regular file.
    #[error("log file {0} is not a regular file")]
    NotAFile(PathBuf),
}

/// Validated settings for a run of the shipper.
#[derive(Debug)]
pub struct Config {
    /// The log file to tail. It exists and is a regular file.
    pub file: PathBuf,

    /// Elasticsearch base URLs, in the order given.
    pub addresses: Vec<Url>,

    /// Basic-auth credentials, if configured.
    pub credentials: Option<Credentials>,

    /// The index to write events to.
    pub index: String,

    /// The bound on each internal queue.
    pub queue_capacity: usize,

    /// How transient failures are retried.
    pub retry_policy: RetryPolicy,

    /// Timeout for each request to Elasticsearch.
    pub request_timeout: Duration,

    /// How to report lines that carry no event.
    pub drop_policy: DropPolicy,

    /// A custom line format, if configured.
    pub pattern: Option<Pattern>,
}

impl Config {
    /// Validate `args`, creating the log file first if `--create` was given.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        let addresses = parse_addresses(&args.addresses)?;

        let credentials = match (args.username, args.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        validate_index_name(&args.index)?;

        let pattern = args.pattern.as_deref().map(Pattern::new).transpose()?;

        let retry_policy = RetryPolicy {
            max_retries: args.max_retries,
            initial_backoff: Duration::from_millis(args.retry_backoff_ms),
            max_backoff: Duration::from_millis(args.max_retry_backoff_ms),
        };
        if retry_policy.initial_backoff > retry_policy.max_backoff {
            return Err(ConfigError::Backoff {
                initial: retry_policy.initial_backoff,
                max: retry_policy.max_backoff,
            });
        }

        check_file(&args.file, args.create)?;

        Ok(Self {
            file: args.file,
            addresses,
            credentials,
            index: args.index,
            queue_capacity: args.queue_capacity,
            retry_policy,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            drop_policy: args.dropped_lines,
            pattern,
        })
    }

    /// The extractor for the configured line format.
    #[must_use]
    pub fn extractor(&self) -> Box<dyn Extractor> {
        match &self.pattern {
            Some(pattern) => Box::new(pattern.clone()),
            None => Box::new(FixedWidth),
        }
    }
}

fn parse_addresses(addresses: &[String]) -> Result<Vec<Url>, ConfigError> {
    let addresses = addresses
        .iter()
        .flat_map(|address| address.split(','))
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(|address| {
            let url = Url::parse(address).map_err(|error| ConfigError::InvalidAddress {
                address: address.to_string(),
                reason: error.to_string(),
            })?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                _ => Err(ConfigError::UnsupportedScheme(url)),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    if addresses.is_empty() {
        return Err(ConfigError::NoAddresses);
    }
    Ok(addresses)
}

fn validate_index_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be `.` or `..`")
    } else if name.starts_with(&['-', '_', '+'][..]) {
        Some("must not start with `-`, `_` or `+`")
    } else if name.chars().any(char::is_uppercase) {
        Some("must be lowercase")
    } else if name.contains(FORBIDDEN_INDEX_CHARS) {
        Some(r#"must not contain spaces or any of `\ / * ? " < > | , # :`"#)
    } else if name.len() > MAX_INDEX_NAME_LEN {
        Some("must be at most 255 bytes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidIndex {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn check_file(path: &Path, create: bool) -> Result<(), ConfigError> {
    let file_error = |source| ConfigError::File {
        path: path.to_path_buf(),
        source,
    };

    if create {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(file_error)?;
    }

    let metadata = fs::metadata(path).map_err(file_error)?;
    if !metadata.is_file() {
        return Err(ConfigError::NotAFile(path.to_path_buf()));
    }
    Ok(())
}
