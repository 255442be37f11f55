// src/collector/watcher/mod.rs
//! Platform-agnostic file watcher.
//!
//! The [`Watcher`] trait defines a platform-agnostic interface for a file watcher, and
//! [`PlatformWatcher`] is the implementation of `Watcher` for the target platform.
//!
//! The [`Watcher`] interface leaves a lot of behaviour 'implementation defined'. See the caveats in
//! the [`Watcher`] documentation for more details.

#[cfg(target_os = "linux")]
mod inotify;
#[cfg(target_os = "macos")]
mod kqueue;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt::Debug;
use std::hash::Hash;
use std::io;
use std::path::Path;
use std::time::Duration;

#[cfg(target_os = "linux")]
use self::inotify as imp;

#[cfg(target_os = "macos")]
use self::kqueue as imp;

/// The [`Watcher`] implementation for the target platform.
pub type PlatformWatcher = imp::Watcher;

/// A platform-agnostic description of a watched file descriptor.
///
/// The [`Watcher`] API depends on being able to use `Descriptor`s as identifiers to correlate calls
/// to `watch_file` with events emitted by the `Watcher`. This trait is thus just a collection of
/// other traits that allow use as an identifier.
pub trait Descriptor: Clone + Debug + Eq + Hash + PartialEq + Send {}

/// What happened to a watched file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// The file was written to, or its metadata changed in a way that may affect reading it.
    Write,

    /// The file was deleted or moved away from the watched path.
    Removed,
}

/// A platform-agnostic interface to file system events.
///
/// Clients can use the `Descriptor` to correlate events with the corresponding `watch_file` call.
pub trait Event<D: Descriptor>: Debug {
    /// The descriptor of the watch that produced this event.
    fn descriptor(&self) -> &D;

    /// The kind of change the event reports.
    fn kind(&self) -> EventKind;
}

/// A platform-agnostic file watching API.
///
/// This API is intended to drive a tailing log collector: it generates events when new content is
/// written to a file, and when that file disappears from its path (see [`Self::watch_file`]).
///
/// The API is necessarily very 'lowest common denominator', and leaves a lot of behaviour
/// implementation-defined. In particular, a removal may be reported as a [`EventKind::Write`]
/// (e.g. a link count change), so callers should verify the file themselves whenever an event
/// arrives.
pub trait Watcher {
    /// An opaque reference to a watched file.
    ///
    /// Instances of this type are returned by [`watch_file`](Self::watch_file). They are also
    /// included in [`Event`]s emitted by the watcher, and so can be used by callers to correlate
    /// events to watched files.
    type Descriptor: Descriptor;

    /// The type of events emitted by this watcher.
    type Event: Event<Self::Descriptor>;

    /// Construct a new instance of the `Watcher`.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to create the watcher.
    fn new() -> io::Result<Self>
    where
        Self: Sized;

    /// Watch a file for writes and removal.
    ///
    /// Calling this function should cause the target `Watcher` to emit [`Event`]s whenever the file
    /// at the given `path` is written to, deleted, or renamed.
    ///
    /// # Callee responsibilities
    ///
    /// It is the caller's responsibility to ensure that:
    ///
    /// - `path` points to a file.
    /// - `path` is canonical (e.g. implementations may not resolve symlinks, and may watch the
    ///   symlink itself).
    /// - `path` has not already been watched.
    ///
    /// The behaviour if any of these points are violated is implementation defined, and so specific
    /// behaviour should not be relied upon.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to register the watch.
    fn watch_file(&mut self, path: &Path) -> io::Result<Self::Descriptor>;

    /// Read some events about the registered files.
    ///
    /// This must never block, and should just return an empty `Vec` if no events are ready.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to read events.
    fn read_events(&mut self) -> io::Result<Vec<Self::Event>>;

    /// Wait up to `timeout` for events about the registered files.
    ///
    /// Returns `Ok(Some(events))` as soon as events are ready, `Ok(Some(vec![]))` if `timeout`
    /// elapses first, and `Ok(None)` if the underlying notification source has been closed and no
    /// further events will ever arrive.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` caused when attempting to read events.
    fn read_events_timeout(&mut self, timeout: Duration) -> io::Result<Option<Vec<Self::Event>>>;
}
