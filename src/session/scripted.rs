//! In-memory session for unit tests.
//!
//! Behaves like the kernel for watch bookkeeping (one descriptor per
//! inode, `IGNORED` queued on removal) while events are pushed by hand.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{RawEvent, RawSession};
use crate::mask::EventMask;
use crate::watcher::{WatchError, WatchId, WatchResult};

#[derive(Debug, Default)]
struct State {
    next_id: i32,
    /// (dev, ino) -> descriptor
    inodes: HashMap<(u64, u64), WatchId>,
    queue: VecDeque<RawEvent>,
    added: Vec<(PathBuf, EventMask)>,
    removed: Vec<WatchId>,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedSession {
    state: Mutex<State>,
    fail_removals: AtomicBool,
    /// Hand out the lowest free descriptor instead of a fresh one.
    reuse_descriptors: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue an event as if the kernel produced it.
    pub(crate) fn push(&self, wd: WatchId, mask: EventMask, cookie: u32, name: &str) {
        self.state
            .lock()
            .queue
            .push_back(RawEvent::new(wd, mask, cookie, name));
    }

    /// Make every later `remove_watch` fail.
    pub(crate) fn fail_removals(&self) {
        self.fail_removals.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reuse_descriptors(&self) {
        self.reuse_descriptors.store(true, Ordering::SeqCst);
    }

    pub(crate) fn added(&self) -> Vec<(PathBuf, EventMask)> {
        self.state.lock().added.clone()
    }

    pub(crate) fn removed(&self) -> Vec<WatchId> {
        self.state.lock().removed.clone()
    }

    pub(crate) fn active(&self) -> usize {
        self.state.lock().inodes.len()
    }
}

impl RawSession for ScriptedSession {
    fn add_watch(&self, path: &Path, mask: EventMask) -> WatchResult<WatchId> {
        if self.is_closed() {
            return Err(WatchError::SessionClosed);
        }

        let metadata = if mask.follows_symlinks() {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        }
        .map_err(|source| WatchError::AddWatch {
            path: path.to_path_buf(),
            source,
        })?;

        let mut state = self.state.lock();
        state.added.push((path.to_path_buf(), mask));

        let key = (metadata.dev(), metadata.ino());
        if let Some(id) = state.inodes.get(&key) {
            return Ok(*id);
        }

        let id = if self.reuse_descriptors.load(Ordering::SeqCst) {
            (1..)
                .map(WatchId::new)
                .find(|id| !state.inodes.values().any(|taken| taken == id))
                .unwrap_or(WatchId::NONE)
        } else {
            state.next_id += 1;
            WatchId::new(state.next_id)
        };
        state.inodes.insert(key, id);
        Ok(id)
    }

    fn remove_watch(&self, id: WatchId) -> WatchResult<()> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(WatchError::RemoveWatch {
                id,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        let mut state = self.state.lock();
        let before = state.inodes.len();
        state.inodes.retain(|_, wd| *wd != id);
        if state.inodes.len() == before {
            return Err(WatchError::RemoveWatch {
                id,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        state.removed.push(id);
        state
            .queue
            .push_back(RawEvent::new(id, EventMask::IGNORED, 0, ""));
        Ok(())
    }

    fn get_events(&self, timeout: Option<Duration>) -> WatchResult<Vec<RawEvent>> {
        if self.is_closed() {
            return Err(WatchError::SessionClosed);
        }

        let events: Vec<RawEvent> = self.state.lock().queue.drain(..).collect();
        if events.is_empty() {
            // Stand-in for waiting, capped to keep tests fast
            let wait = timeout.unwrap_or(Duration::from_millis(10));
            std::thread::sleep(wait.min(Duration::from_millis(20)));
        }
        Ok(events)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
