//! Enhanced watcher: watch bookkeeping and event correlation.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use walkdir::WalkDir;

use crate::mask::{EventMask, WatchOptions};
use crate::session::{KernelSession, RawEvent, RawSession};

use super::error::{WatchError, WatchResult};
use super::registry::WatchRegistry;
use super::watch::{Event, WalkOrder, Watch, WatchEvent, WatchId, WatchState, armed_mask};

/// Consecutive auto-add failures on one parent before warning.
pub const DEFAULT_AUTO_ADD_WARN_AFTER: u32 = 3;

/// Inotify watcher that keeps track of its watches.
///
/// On top of a raw session this:
/// - associates events with the watch that produced them
/// - adds watches recursively
/// - adds watches to directories created under a watch (`AUTO_ADD`)
/// - removes watches whose target was moved (`REMOVE_MOVED`)
/// - forgets a watch only once the kernel confirms its removal
///
/// Option-driven work happens while events are processed, so it only
/// takes effect through `poll_events`, `process_batch` or `events`.
///
/// A watch on a symlink (without `DONT_FOLLOW`) is placed on the target
/// inode, so deleting the symlink does not remove the watch. Directories
/// created afterwards are then resolved against the watch's inode path.
pub struct EnhancedWatcher<S: RawSession = KernelSession> {
    session: Arc<S>,
    registry: WatchRegistry,
    /// Consecutive auto-add failures per parent watch.
    auto_add_failures: HashMap<WatchId, u32>,
    auto_add_warn_after: u32,
}

impl EnhancedWatcher<KernelSession> {
    /// Open a watcher on a new kernel session.
    pub fn open() -> WatchResult<Self> {
        Ok(Self::with_session(KernelSession::open()?))
    }
}

impl<S: RawSession> EnhancedWatcher<S> {
    pub fn with_session(session: S) -> Self {
        Self::with_shared_session(Arc::new(session))
    }

    /// Create a watcher on a session that other threads may wait on.
    pub fn with_shared_session(session: Arc<S>) -> Self {
        Self {
            session,
            registry: WatchRegistry::new(),
            auto_add_failures: HashMap::new(),
            auto_add_warn_after: DEFAULT_AUTO_ADD_WARN_AFTER,
        }
    }

    /// Set how many consecutive auto-add failures on one watch are
    /// tolerated quietly before a warning is logged.
    pub fn auto_add_warn_after(mut self, failures: u32) -> Self {
        self.auto_add_warn_after = failures.max(1);
        self
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Add a watch, or modify the watch already on the same inode.
    ///
    /// `mask` is what the caller wants delivered. Options add the bits
    /// they need to the kernel mask without widening delivery.
    pub fn add_watch(
        &mut self,
        path: impl AsRef<Path>,
        mask: EventMask,
        options: WatchOptions,
    ) -> WatchResult<Arc<Watch>> {
        let path = path.as_ref();
        let armed = armed_mask(mask, options);
        let id = self.session.add_watch(path, armed)?;

        let inode_path = if armed.follows_symlinks() {
            fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
        } else {
            path.to_path_buf()
        };

        let (watch, superseded) = self
            .registry
            .replace(Watch::new(id, path, inode_path, mask, options));

        for old in superseded {
            crate::debug_event!("watcher", "superseded", "{old} by {watch}");
        }
        crate::debug_event!("watcher", "added", "{watch}");

        Ok(watch)
    }

    /// Add watches to every directory under `path`.
    ///
    /// Symlinks are followed unless `mask` has `DONT_FOLLOW`. Fails only if
    /// `path` itself cannot be watched. A directory that fails further down
    /// (usually removed mid-walk) is skipped along with its children, and
    /// watches already added stay in place.
    pub fn add_watches_recursive(
        &mut self,
        path: impl AsRef<Path>,
        mask: EventMask,
        options: WatchOptions,
        order: WalkOrder,
    ) -> WatchResult<Vec<Arc<Watch>>> {
        let root = path.as_ref();
        let mut walker = WalkDir::new(root)
            .follow_links(mask.follows_symlinks())
            .contents_first(order == WalkOrder::BottomUp)
            .into_iter();

        let mut watches = Vec::new();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(WatchError::AddWatch {
                        path: root.to_path_buf(),
                        source: err
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::other("filesystem loop")),
                    });
                }
                Err(err) => {
                    crate::debug_event!("watcher", "walk skipped", "{err}");
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            match self.add_watch(entry.path(), mask, options) {
                Ok(watch) => watches.push(watch),
                Err(err) if entry.depth() == 0 || err.is_session() => return Err(err),
                Err(err) => {
                    crate::debug_event!("watcher", "subtree skipped", "{err}");
                    if order == WalkOrder::TopDown {
                        walker.skip_current_dir();
                    }
                }
            }
        }

        Ok(watches)
    }

    /// Watch with the given descriptor.
    pub fn get_watch(&self, id: WatchId) -> WatchResult<Arc<Watch>> {
        self.registry.get(id)
    }

    /// Watch on a path, matching the inode path before the requested path.
    pub fn get_watch_by_path(&self, path: impl AsRef<Path>) -> WatchResult<Arc<Watch>> {
        self.registry.get_by_path(path.as_ref())
    }

    /// Snapshot of all current watches.
    pub fn list_watches(&self) -> Vec<Arc<Watch>> {
        self.registry.all()
    }

    pub fn watch_state(&self, id: WatchId) -> WatchResult<WatchState> {
        self.registry.state(id)
    }

    /// Ask the kernel to remove a watch.
    ///
    /// The watch stays registered, in `PendingRemoval`, until its `IGNORED`
    /// confirmation is processed. Removing a watch that is already pending
    /// is a no-op. A retired watch fails with `NotFound`, even when the
    /// kernel has handed its descriptor to a newer watch.
    pub fn remove_watch(&mut self, watch: &Watch) -> WatchResult<()> {
        let id = watch.id();
        let previous = self.registry.mark_pending(watch)?;
        if previous == WatchState::PendingRemoval {
            crate::debug_event!("watcher", "removal already pending", "{id}");
            return Ok(());
        }

        if let Err(err) = self.session.remove_watch(id) {
            self.registry.restore_state(id, previous);
            return Err(err);
        }

        crate::debug_event!("watcher", "removal requested", "{watch}");
        Ok(())
    }

    /// Read one batch of events and correlate it with the registered
    /// watches.
    ///
    /// Blocks like `RawSession::get_events`.
    pub fn poll_events(&mut self, timeout: Option<Duration>) -> WatchResult<Vec<WatchEvent>> {
        let batch = self.session.get_events(timeout)?;
        self.process_batch(batch)
    }

    /// Correlate a batch of raw events, in delivery order.
    ///
    /// Fails with `UnknownDescriptor` if an event names a descriptor that
    /// was never registered; the rest of the batch is not delivered.
    pub fn process_batch(&mut self, batch: Vec<RawEvent>) -> WatchResult<Vec<WatchEvent>> {
        let mut events = Vec::with_capacity(batch.len());

        for raw in batch {
            let event = Event::from(raw);

            if event.is_overflow() {
                tracing::warn!("[watcher] event queue overflowed, events were lost");
                events.push(WatchEvent { watch: None, event });
                continue;
            }

            let watch = self
                .registry
                .get(event.wd())
                .map_err(|_| WatchError::UnknownDescriptor { id: event.wd() })?;
            let mask = event.mask();

            if mask.contains(EventMask::IGNORED) {
                self.retire(watch.id());
            }

            if watch.options().contains(WatchOptions::REMOVE_MOVED)
                && mask.contains(EventMask::MOVE_SELF)
            {
                self.remove_moved(&watch);
            }

            if watch.options().contains(WatchOptions::AUTO_ADD)
                && mask.intersects(EventMask::CREATE | EventMask::MOVED_TO)
            {
                self.auto_add(&watch, &event);
            }

            if watch.wants(mask) {
                events.push(WatchEvent {
                    watch: Some(watch),
                    event,
                });
            }
        }

        Ok(events)
    }

    /// Endless iterator over correlated events.
    ///
    /// Each underlying read uses `timeout`. The iterator ends after
    /// yielding the first error.
    pub fn events(&mut self, timeout: Option<Duration>) -> Events<'_, S> {
        Events {
            watcher: self,
            timeout,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Close the session. The watcher must not be used afterwards.
    pub fn close(&self) {
        self.session.close();
    }

    fn retire(&mut self, id: WatchId) {
        self.auto_add_failures.remove(&id);
        if let Ok(watch) = self.registry.remove(id) {
            crate::debug_event!("watcher", "retired", "{watch}");
        }
    }

    fn remove_moved(&mut self, watch: &Watch) {
        match self.remove_watch(watch) {
            Ok(()) => crate::log_event!("watcher", "removing moved", "{}", watch.path().display()),
            // Target may already be gone
            Err(err) => crate::debug_event!("watcher", "remove moved failed", "{err}"),
        }
    }

    fn auto_add(&mut self, parent: &Watch, event: &Event) {
        let path = parent.path().join(event.name());
        let inode_path = parent.inode_path().join(event.name());

        let is_dir =
            event.mask().is_dir() || (parent.mask().follows_symlinks() && path.is_dir());
        if !is_dir {
            return;
        }

        let mask = parent.mask();
        let options = parent.options();
        let result = match self.add_watches_recursive(&path, mask, options, WalkOrder::TopDown) {
            Err(err) if inode_path != path => {
                crate::debug_event!("watcher", "auto-add retry", "{err}");
                self.add_watches_recursive(&inode_path, mask, options, WalkOrder::TopDown)
            }
            result => result,
        };

        match result {
            Ok(watches) => {
                self.auto_add_failures.remove(&parent.id());
                crate::log_event!(
                    "watcher",
                    "auto-added",
                    "{} watches under {}",
                    watches.len(),
                    path.display()
                );
            }
            Err(err) => {
                let failures = self.auto_add_failures.entry(parent.id()).or_insert(0);
                *failures += 1;
                if *failures == self.auto_add_warn_after {
                    tracing::warn!(
                        "[watcher] auto-add under {} failed {failures} times in a row: {err}",
                        parent.path().display()
                    );
                } else {
                    crate::debug_event!("watcher", "auto-add failed", "{err}");
                }
            }
        }
    }
}

impl<S: RawSession> Drop for EnhancedWatcher<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Iterator returned by [`EnhancedWatcher::events`].
pub struct Events<'a, S: RawSession> {
    watcher: &'a mut EnhancedWatcher<S>,
    timeout: Option<Duration>,
    pending: VecDeque<WatchEvent>,
    done: bool,
}

impl<S: RawSession> Iterator for Events<'_, S> {
    type Item = WatchResult<WatchEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match self.watcher.poll_events(self.timeout) {
                Ok(batch) => self.pending.extend(batch),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
