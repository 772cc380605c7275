//! Raw inotify sessions.
//!
//! A session owns one kernel monitoring handle and exposes the four basic
//! operations the enhanced watcher is built on. Methods take `&self` so a
//! session can be shared between a dispatcher thread waiting for events
//! and foreground threads adding or removing watches.

mod kernel;
#[cfg(test)]
pub(crate) mod scripted;

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use crate::mask::EventMask;
use crate::watcher::{WatchId, WatchResult};

pub use kernel::KernelSession;

/// One unprocessed notification as read from the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: WatchId,
    pub mask: EventMask,
    pub cookie: u32,
    /// Child name, empty if the event concerns the watched target.
    pub name: OsString,
}

impl RawEvent {
    pub fn new(wd: WatchId, mask: EventMask, cookie: u32, name: impl Into<OsString>) -> Self {
        Self {
            wd,
            mask,
            cookie,
            name: name.into(),
        }
    }
}

/// Contract of a raw monitoring session.
pub trait RawSession: Send + Sync {
    /// Add a watch or modify the existing watch on the same inode.
    ///
    /// Fails with `WatchError::AddWatch` carrying the OS error.
    fn add_watch(&self, path: &Path, mask: EventMask) -> WatchResult<WatchId>;

    /// Remove a watch. The kernel confirms with an `IGNORED` event.
    ///
    /// Fails with `WatchError::RemoveWatch` if the descriptor is unknown.
    fn remove_watch(&self, id: WatchId) -> WatchResult<()>;

    /// Read pending events.
    ///
    /// `None` blocks until at least one event arrives, a zero timeout
    /// polls, and a positive timeout waits at most that long. Fails with
    /// `WatchError::SessionClosed` if the session was closed, including
    /// while waiting.
    fn get_events(&self, timeout: Option<Duration>) -> WatchResult<Vec<RawEvent>>;

    /// Release the handle. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
