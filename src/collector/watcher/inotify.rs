// src/collector/watcher/inotify.rs
//! [`Watcher`] implementation for linux, based on `inotify`.
use std::convert::TryFrom;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

use crate::collector::watcher::{self, EventKind};

const INOTIFY_BUFFER_SIZE: usize = 1024;

type Descriptor = WatchDescriptor;

impl watcher::Descriptor for Descriptor {}

#[derive(Debug)]
pub struct Event {
    descriptor: WatchDescriptor,
    kind: EventKind,
}

impl watcher::Event<Descriptor> for Event {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn kind(&self) -> EventKind {
        self.kind
    }
}

impl<S> From<inotify::Event<S>> for Event {
    fn from(inotify_event: inotify::Event<S>) -> Self {
        let removed = EventMask::DELETE_SELF | EventMask::MOVE_SELF | EventMask::IGNORED;
        let kind = if inotify_event.mask.intersects(removed) {
            EventKind::Removed
        } else {
            EventKind::Write
        };
        Self {
            descriptor: inotify_event.wd,
            kind,
        }
    }
}

pub struct Watcher {
    inner: Inotify,
    buffer: [u8; INOTIFY_BUFFER_SIZE],
}

impl Watcher {
    /// Wait for the inotify descriptor to become readable.
    ///
    /// Returns `false` if `timeout` elapsed (or the wait was interrupted by a signal) first.
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: `pollfd` is a single, initialised `pollfd` that outlives the call, and `nfds` is 1.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

        if ready < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(error);
        }
        Ok(ready > 0)
    }
}

impl watcher::Watcher for Watcher {
    type Descriptor = Descriptor;

    type Event = Event;

    fn new() -> io::Result<Self> {
        let inner = Inotify::init()?;
        Ok(Watcher {
            inner,
            buffer: [0; INOTIFY_BUFFER_SIZE],
        })
    }

    /// Watch a file for writes and removal.
    ///
    /// Unlinking a file that is still open does not produce `IN_DELETE_SELF` until the last
    /// descriptor is closed, so `IN_ATTRIB` (which fires on link count changes) is also watched and
    /// reported as a [`EventKind::Write`].
    ///
    /// # Callee responsibilities
    ///
    /// It is the caller's responsibility to ensure that:
    ///
    /// - `path` points to a file.
    /// - `path` is canonical (symlinks are not dereferenced).
    /// - The inode behind `path` has not already been watched. `inotify` merges duplicate
    ///   watches for the same path, and returns the `Descriptor` of the original watch.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to register the watch.
    fn watch_file(&mut self, path: &Path) -> io::Result<Self::Descriptor> {
        let descriptor = self.inner.add_watch(
            path,
            WatchMask::MODIFY
                | WatchMask::ATTRIB
                | WatchMask::DELETE_SELF
                | WatchMask::MOVE_SELF
                | WatchMask::DONT_FOLLOW,
        )?;
        Ok(descriptor)
    }

    fn read_events(&mut self) -> io::Result<Vec<Self::Event>> {
        let inotify_events = self.inner.read_events(&mut self.buffer)?;
        Ok(inotify_events.map(Event::from).collect())
    }

    fn read_events_timeout(&mut self, timeout: Duration) -> io::Result<Option<Vec<Self::Event>>> {
        if !self.poll_readable(timeout)? {
            return Ok(Some(Vec::new()));
        }
        match self.read_events() {
            Ok(events) => Ok(Some(events)),
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(error) => Err(error),
        }
    }
}
