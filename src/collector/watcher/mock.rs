// src/collector/watcher/mock.rs
//! Mock [`Watcher`](crate::collector::watcher::Watcher) implementation.
use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::collector::watcher::{self, EventKind};

/// The watch descriptor type for [`Watcher`].
///
/// This is the most trivial way that we can represent a unique call to
/// [`watch_file`](Watcher::watch_file). We can do this thanks to the callee responsibilities (and
/// in this implementation, assertions) on that method.
type Descriptor = PathBuf;

impl watcher::Descriptor for Descriptor {}

/// The event type for [`Watcher`].
#[derive(Debug)]
pub(crate) struct Event {
    path: PathBuf,
    kind: EventKind,
}

impl watcher::Event<Descriptor> for Event {
    fn descriptor(&self) -> &Descriptor {
        &self.path
    }

    fn kind(&self) -> EventKind {
        self.kind
    }
}

/// A mock [`Watcher`](crate::collector::watcher::Watcher) implementation.
///
/// This watches no actual files, but rather asserts invariants and offers assertions on how the
/// watcher is used.
pub(crate) struct Watcher {
    mock: Rc<RefCell<Mock>>,
}

/// The inner-type of [`Watcher`] that maintains the list of watched paths and pushed events.
struct Mock {
    watched_paths: Vec<PathBuf>,
    pending_events: Vec<Event>,
    closed: bool,
}

impl Watcher {
    /// Create a new instance.
    pub(crate) fn new() -> Self {
        Self {
            mock: Rc::new(RefCell::new(Mock {
                watched_paths: Vec::new(),
                pending_events: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Simulate a write to a watched file.
    ///
    /// The given `text` is appended to the watched file at `path`, and an event for the file is
    /// pushed for later collection by [`read_events`] or [`read_events_timeout`].
    ///
    /// # Panics
    ///
    /// This will panic if the given `path` is not in `watched_paths`.
    pub(crate) fn simulate_write(&mut self, path: &Path, text: &str) -> io::Result<()> {
        use std::io::Write;

        self.assert_watched(path);

        write!(OpenOptions::new().append(true).open(path)?, "{}", text)?;
        self.push_event(path, EventKind::Write);

        Ok(())
    }

    /// Simulate a watched file being deleted.
    ///
    /// # Panics
    ///
    /// This will panic if the given `path` is not in `watched_paths`.
    pub(crate) fn simulate_remove(&mut self, path: &Path) -> io::Result<()> {
        self.assert_watched(path);

        fs::remove_file(path)?;
        self.push_event(path, EventKind::Removed);

        Ok(())
    }

    /// Push an event for `path` without touching the file system.
    pub(crate) fn push_event(&mut self, path: &Path, kind: EventKind) {
        self.mock.borrow_mut().pending_events.push(Event {
            path: path.to_path_buf(),
            kind,
        });
    }

    /// Close the simulated notification source.
    ///
    /// Events already pushed are still delivered; after that, [`read_events_timeout`] returns
    /// `None`.
    pub(crate) fn simulate_close(&mut self) {
        self.mock.borrow_mut().closed = true;
    }

    fn assert_watched(&self, path: &Path) {
        assert!(
            self.mock
                .borrow()
                .watched_paths
                .iter()
                .any(|watched| watched == path),
            "Can't simulate change in unwatched path: {:?}",
            path
        );
    }
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        Self {
            mock: Rc::clone(&self.mock),
        }
    }
}

impl watcher::Watcher for Watcher {
    type Descriptor = PathBuf;
    type Event = Event;

    fn new() -> io::Result<Self> {
        Ok(Self::new())
    }

    /// Watch a file for writes.
    ///
    /// This records that `path` has been watched, and returns it as the [`Descriptor`] (opaque to
    /// callers).
    ///
    /// Additionally, assertions are in place to validate the callee responsibilities of the trait
    /// method:
    ///
    /// - `path` points to a file.
    /// - `path` is canonical.
    /// - `path` has not already been watched.
    fn watch_file(&mut self, path: &Path) -> io::Result<Self::Descriptor> {
        let watched_paths = &mut self.mock.borrow_mut().watched_paths;
        let canonical_path = path.canonicalize()?;

        assert!(path.is_file(), "called watch_file with non-file path {:?}", path);
        assert_eq!(
            path, canonical_path,
            "called watch_file with link {:?} to {:?}",
            path, canonical_path
        );
        assert!(
            !watched_paths.contains(&canonical_path),
            "called watch_file with duplicate path {:?}",
            path
        );

        watched_paths.push(canonical_path.clone());
        Ok(canonical_path)
    }

    /// Read some events about the registered files.
    ///
    /// This pops whatever [`Event`]s have been supplied through the `simulate_*` methods.
    fn read_events(&mut self) -> io::Result<Vec<Self::Event>> {
        let pending_events = &mut self.mock.borrow_mut().pending_events;
        Ok(std::mem::take(pending_events))
    }

    /// Read some events about the registered files.
    ///
    /// This never waits: blocking in a test is more likely to be a bug with usage of the mock, so
    /// an empty batch is returned immediately when nothing is pending.
    fn read_events_timeout(&mut self, _timeout: Duration) -> io::Result<Option<Vec<Self::Event>>> {
        let events = self.read_events()?;
        if events.is_empty() && self.mock.borrow().closed {
            return Ok(None);
        }
        Ok(Some(events))
    }
}
