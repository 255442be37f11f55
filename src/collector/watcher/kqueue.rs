// src/collector/watcher/kqueue.rs
//! [`Watcher`] implementation for `MacOS`, based on `kqueue`.
use std::fs::File;
use std::io;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use kqueue::{self, EventData, EventFilter, FilterFlag, Ident, Vnode};
use log::warn;

use crate::collector::watcher::{self, EventKind};

type Descriptor = RawFd;

impl watcher::Descriptor for Descriptor {}

#[derive(Debug)]
pub struct Event {
    descriptor: RawFd,
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

impl Event {
    /// Convert a [`kqueue::Event`] for one of our vnode filters.
    ///
    /// Returns `None` (after logging) if the event's flags don't correspond with the filters
    /// supplied in [`Watcher::watch_file`].
    fn from_kqueue(kq_event: &kqueue::Event) -> Option<Self> {
        let (fd, kind) = match (&kq_event.ident, &kq_event.data) {
            (Ident::Fd(fd), EventData::Vnode(Vnode::Write))
            | (Ident::Fd(fd), EventData::Vnode(Vnode::Extend))
            | (Ident::Fd(fd), EventData::Vnode(Vnode::Attrib)) => (*fd, EventKind::Write),
            (Ident::Fd(fd), EventData::Vnode(Vnode::Delete))
            | (Ident::Fd(fd), EventData::Vnode(Vnode::Rename))
            | (Ident::Fd(fd), EventData::Vnode(Vnode::Revoke)) => (*fd, EventKind::Removed),
            _ => {
                warn!("kqueue returned an unexpected event: {:?}", kq_event);
                return None;
            }
        };
        Some(Self {
            descriptor: fd,
            kind,
        })
    }
}

pub struct Watcher {
    inner: kqueue::Watcher,
}

impl watcher::Watcher for Watcher {
    type Descriptor = Descriptor;
    type Event = Event;

    fn new() -> io::Result<Self> {
        let inner = kqueue::Watcher::new()?;
        Ok(Watcher { inner })
    }

    /// Watch a file for writes and removal.
    ///
    /// `kqueue` reports vnode changes against an open descriptor, so the file is opened and the
    /// descriptor is held for the lifetime of the watcher.
    ///
    /// # Callee responsibilities
    ///
    /// It is the caller's responsibility to ensure that:
    ///
    /// - `path` points to a file.
    /// - `path` is canonical (symlinks are not dereferenced).
    /// - The inode behind `path` has not already been watched. `kqueue` will happily register
    ///   duplicate watches for the same path, and emit duplicate events.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to register the watch.
    fn watch_file(&mut self, path: &Path) -> io::Result<Self::Descriptor> {
        let file = File::open(path)?;
        let fd = file.into_raw_fd();

        self.inner.add_fd(
            fd,
            EventFilter::EVFILT_VNODE,
            FilterFlag::NOTE_WRITE
                | FilterFlag::NOTE_EXTEND
                | FilterFlag::NOTE_ATTRIB
                | FilterFlag::NOTE_DELETE
                | FilterFlag::NOTE_RENAME
                | FilterFlag::NOTE_REVOKE,
        )?;
        self.inner.watch()?;

        Ok(fd)
    }

    fn read_events(&mut self) -> io::Result<Vec<Self::Event>> {
        let kq_event = self.inner.poll(Some(Duration::new(0, 0)));
        Ok(kq_event.iter().filter_map(Event::from_kqueue).collect())
    }

    fn read_events_timeout(&mut self, timeout: Duration) -> io::Result<Option<Vec<Self::Event>>> {
        let kq_event = self.inner.poll(Some(timeout));
        Ok(Some(kq_event.iter().filter_map(Event::from_kqueue).collect()))
    }
}
