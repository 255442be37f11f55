// collector/file.rs

//! A log collector that tails a single file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::RawLine;

use super::watcher::{Event, EventKind, Watcher};

/// How long [`Collector::run`] waits for notifications before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Possible error situations when tailing a file.
///
/// All of these are fatal to the collector: none of them can be recovered by waiting for more
/// events.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The file could not be opened or watched when the collector was initialized.
    #[error("failed to open {}: {}", .path.display(), .source)]
    Open {
        /// The path we tried to open.
        path: PathBuf,
        /// The underlying cause.
        source: io::Error,
    },

    /// Reading from the file, or inspecting it, failed.
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read {
        /// The tailed path.
        path: PathBuf,
        /// The underlying cause.
        source: io::Error,
    },

    /// Reading notifications from the watcher failed.
    #[error("failed to read file notifications for {}: {}", .path.display(), .source)]
    Watch {
        /// The tailed path.
        path: PathBuf,
        /// The underlying cause.
        source: io::Error,
    },

    /// The file was deleted or renamed. Following a replacement file is not supported.
    #[error("{} was removed or renamed", .path.display())]
    Removed {
        /// The tailed path.
        path: PathBuf,
    },

    /// The file shrank below the collector's read position.
    #[error("{} was truncated to {len} bytes (read position was {position})", .path.display())]
    Truncated {
        /// The tailed path.
        path: PathBuf,
        /// How far the collector had read.
        position: u64,
        /// The new length of the file.
        len: u64,
    },
}

/// Tails a single file, producing each complete line appended after initialization.
///
/// The collector exclusively owns the open file, the read cursor and the buffer holding any
/// unterminated tail of the file.
pub struct Collector<W: Watcher> {
    path: PathBuf,
    descriptor: W::Descriptor,
    reader: BufReader<File>,
    line_buf: Vec<u8>,
    watcher: W,
}

impl<W: Watcher> Collector<W> {
    /// Start tailing the file at `path`.
    ///
    /// The read position starts at the current end of the file, so existing content is never
    /// replayed. The file is opened before the watch is registered: anything appended in between
    /// is picked up with the next notification.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::Open`] if the file cannot be opened or watched.
    pub fn initialize(path: &Path, mut watcher: W) -> Result<Self, CollectError> {
        let open_error = |source| CollectError::Open {
            path: path.to_path_buf(),
            source,
        };

        let path = fs::canonicalize(path).map_err(open_error)?;
        debug!("Initialising watch on {:?}", path);

        let mut reader = BufReader::new(File::open(&path).map_err(open_error)?);
        let position = reader.seek(io::SeekFrom::End(0)).map_err(open_error)?;
        let descriptor = watcher.watch_file(&path).map_err(open_error)?;

        debug!("Starting {} at offset {}", path.display(), position);

        Ok(Self {
            path,
            descriptor,
            reader,
            line_buf: Vec::new(),
            watcher,
        })
    }

    /// The canonical path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait up to `timeout` for the file to change, then return every newly completed line.
    ///
    /// Returns `Ok(None)` once the watcher's notification source has closed.
    ///
    /// # Errors
    ///
    /// Any failure to read notifications or the file, and any sign that the file was removed or
    /// truncated, is returned as a [`CollectError`].
    pub fn collect_lines(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Vec<RawLine>>, CollectError> {
        let watcher_events = match self.watcher.read_events_timeout(timeout) {
            Ok(Some(events)) => events,
            Ok(None) => return Ok(None),
            Err(source) => {
                return Err(CollectError::Watch {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut changed = false;
        for watcher_event in watcher_events {
            trace!("Received watcher event: {:?}", watcher_event);

            if watcher_event.descriptor() != &self.descriptor {
                warn!(
                    "Received event for unregistered watch descriptor: {:?}",
                    watcher_event
                );
                continue;
            }

            match watcher_event.kind() {
                EventKind::Write => changed = true,
                EventKind::Removed => {
                    return Err(CollectError::Removed {
                        path: self.path.clone(),
                    })
                }
            }
        }

        if !changed {
            return Ok(Some(Vec::new()));
        }

        self.check_file()?;
        self.read_lines().map(Some).map_err(|source| CollectError::Read {
            path: self.path.clone(),
            source,
        })
    }

    /// Run the collector until `shutdown` is cancelled, the line queue closes, or the watcher
    /// closes, sending each line to `lines` in file order.
    ///
    /// This blocks the calling thread, including while `lines` is full.
    ///
    /// # Errors
    ///
    /// Any [`CollectError`] from [`collect_lines`](Self::collect_lines) stops the collector and is
    /// returned.
    pub fn run(
        mut self,
        lines: mpsc::Sender<RawLine>,
        shutdown: CancellationToken,
    ) -> Result<u64, CollectError> {
        info!("Tailing {}", self.path.display());

        let mut sent = 0;
        while !shutdown.is_cancelled() {
            let batch = match self.collect_lines(POLL_INTERVAL)? {
                Some(batch) => batch,
                None => {
                    info!("Watcher for {} closed", self.path.display());
                    break;
                }
            };

            for line in batch {
                trace!("Read line: {:?}", line);
                if lines.blocking_send(line).is_err() {
                    debug!("Line queue closed, stopping collector");
                    return Ok(sent);
                }
                sent += 1;
            }
        }

        debug!("Stopped tailing {} after {} lines", self.path.display(), sent);
        Ok(sent)
    }

    /// Check that `path` still refers to the file we have open, and that it hasn't shrunk.
    fn check_file(&mut self) -> Result<(), CollectError> {
        let read_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CollectError::Read { path, source }
        };

        let current = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(CollectError::Removed {
                    path: self.path.clone(),
                })
            }
            Err(error) => return Err(read_error(&self.path)(error)),
        };
        let open = self
            .reader
            .get_ref()
            .metadata()
            .map_err(read_error(&self.path))?;

        if (current.dev(), current.ino()) != (open.dev(), open.ino()) {
            return Err(CollectError::Removed {
                path: self.path.clone(),
            });
        }

        let position = self
            .reader
            .stream_position()
            .map_err(read_error(&self.path))?;
        if open.len() < position {
            return Err(CollectError::Truncated {
                path: self.path.clone(),
                position,
                len: open.len(),
            });
        }

        Ok(())
    }

    /// Read up to the end of the file, returning the complete lines.
    ///
    /// A trailing partial line is kept in `line_buf` and completed by a later call.
    fn read_lines(&mut self) -> io::Result<Vec<RawLine>> {
        let mut lines = Vec::new();
        while self.reader.read_until(b'\n', &mut self.line_buf)? != 0 {
            if self.line_buf.ends_with(b"\n") {
                self.line_buf.pop();
                if self.line_buf.ends_with(b"\r") {
                    self.line_buf.pop();
                }
                lines.push(String::from_utf8_lossy(&self.line_buf).into_owned());
                self.line_buf.clear();
            }
        }
        Ok(lines)
    }
}
