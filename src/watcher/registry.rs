//! Registry of active watches, indexed by descriptor and by path.
//!
//! A watch is reachable through three keys: its descriptor, the path it
//! was requested on and the resolved inode path. Path indices store the
//! descriptor, so a record is stored once and retiring it is a single
//! removal plus index cleanup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Weak};

use super::error::{WatchError, WatchResult};
use super::watch::{Watch, WatchId, WatchState};

#[derive(Debug)]
struct Entry {
    watch: Arc<Watch>,
    state: WatchState,
    /// Records this one replaced when the kernel modified the same watch.
    earlier: Vec<Weak<Watch>>,
}

impl Entry {
    /// Whether `watch` is this record, or one it replaced, rather than a
    /// retired watch whose descriptor the kernel handed out again.
    fn holds(&self, watch: &Watch) -> bool {
        ptr::eq(Arc::as_ptr(&self.watch), watch)
            || self
                .earlier
                .iter()
                .any(|earlier| earlier.strong_count() > 0 && ptr::eq(earlier.as_ptr(), watch))
    }
}

/// Registry for watches with descriptor and path lookup.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    /// Records by descriptor.
    watches: HashMap<WatchId, Entry>,
    /// Requested path -> descriptor.
    paths: HashMap<PathBuf, WatchId>,
    /// Resolved inode path -> descriptor.
    inode_paths: HashMap<PathBuf, WatchId>,
}

impl WatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new watch.
    ///
    /// Fails with `DuplicateWatch` if the descriptor, requested path or
    /// inode path is already taken.
    pub fn insert(&mut self, watch: Watch) -> WatchResult<Arc<Watch>> {
        if self.watches.contains_key(&watch.id())
            || self.paths.contains_key(watch.path())
            || self.inode_paths.contains_key(watch.inode_path())
        {
            return Err(WatchError::DuplicateWatch {
                id: watch.id(),
                path: watch.path().to_path_buf(),
            });
        }

        Ok(self.index(watch))
    }

    /// Insert a watch, replacing whatever holds its keys.
    ///
    /// A record with the same descriptor is replaced (the kernel modified
    /// an existing watch). Records with a different descriptor holding
    /// either path are marked `Superseded` and unindexed from their paths
    /// but stay reachable by descriptor. Returns the new record and the
    /// descriptors that were superseded.
    pub fn replace(&mut self, watch: Watch) -> (Arc<Watch>, Vec<WatchId>) {
        let mut earlier = Vec::new();
        if let Some(entry) = self.unindex(watch.id()) {
            earlier = entry.earlier;
            earlier.retain(|record| record.strong_count() > 0);
            earlier.push(Arc::downgrade(&entry.watch));
        }

        let mut superseded = Vec::new();
        for other in [
            self.paths.get(watch.path()).copied(),
            self.inode_paths.get(watch.inode_path()).copied(),
        ]
        .into_iter()
        .flatten()
        {
            if !superseded.contains(&other) {
                self.detach(other);
                superseded.push(other);
            }
        }

        let watch = self.index(watch);
        if let Some(entry) = self.watches.get_mut(&watch.id()) {
            entry.earlier = earlier;
        }
        (watch, superseded)
    }

    /// Look up a watch by descriptor.
    pub fn get(&self, id: WatchId) -> WatchResult<Arc<Watch>> {
        self.watches
            .get(&id)
            .map(|entry| entry.watch.clone())
            .ok_or_else(|| WatchError::not_found(format!("descriptor {id}")))
    }

    /// Look up a watch by path.
    ///
    /// The resolved inode path wins over the requested path when both
    /// match different watches.
    pub fn get_by_path(&self, path: &Path) -> WatchResult<Arc<Watch>> {
        self.inode_paths
            .get(path)
            .or_else(|| self.paths.get(path))
            .and_then(|id| self.watches.get(id))
            .map(|entry| entry.watch.clone())
            .ok_or_else(|| WatchError::not_found(path.display()))
    }

    /// Lifecycle state of a watch.
    pub fn state(&self, id: WatchId) -> WatchResult<WatchState> {
        self.watches
            .get(&id)
            .map(|entry| entry.state)
            .ok_or_else(|| WatchError::not_found(format!("descriptor {id}")))
    }

    /// Record that removal was requested for a watch.
    ///
    /// `watch` must be a record handed out by this registry. A retired
    /// record whose descriptor now belongs to a newer watch is `NotFound`.
    /// Returns the previous state.
    pub fn mark_pending(&mut self, watch: &Watch) -> WatchResult<WatchState> {
        let id = watch.id();
        let entry = self
            .watches
            .get_mut(&id)
            .filter(|entry| entry.holds(watch))
            .ok_or_else(|| WatchError::not_found(format!("descriptor {id}")))?;
        let previous = entry.state;
        entry.state = WatchState::PendingRemoval;
        Ok(previous)
    }

    /// Undo `mark_pending` after a failed removal request.
    pub(crate) fn restore_state(&mut self, id: WatchId, state: WatchState) {
        if let Some(entry) = self.watches.get_mut(&id) {
            entry.state = state;
        }
    }

    /// Remove a watch from all indices.
    pub fn remove(&mut self, id: WatchId) -> WatchResult<Arc<Watch>> {
        self.unindex(id)
            .map(|entry| entry.watch)
            .ok_or_else(|| WatchError::not_found(format!("descriptor {id}")))
    }

    /// Snapshot of all registered watches, in no particular order.
    pub fn all(&self) -> Vec<Arc<Watch>> {
        self.watches.values().map(|e| e.watch.clone()).collect()
    }

    /// Snapshot of watches in the given state.
    pub fn in_state(&self, state: WatchState) -> Vec<Arc<Watch>> {
        self.watches
            .values()
            .filter(|e| e.state == state)
            .map(|e| e.watch.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    fn index(&mut self, watch: Watch) -> Arc<Watch> {
        let watch = Arc::new(watch);
        self.paths.insert(watch.path().to_path_buf(), watch.id());
        self.inode_paths
            .insert(watch.inode_path().to_path_buf(), watch.id());
        self.watches.insert(
            watch.id(),
            Entry {
                watch: watch.clone(),
                state: WatchState::Active,
                earlier: Vec::new(),
            },
        );
        watch
    }

    /// Drop path index entries that still point at `id`.
    fn detach(&mut self, id: WatchId) {
        let Some(entry) = self.watches.get_mut(&id) else {
            return;
        };
        if entry.state == WatchState::Active {
            entry.state = WatchState::Superseded;
        }
        let watch = entry.watch.clone();
        if self.paths.get(watch.path()) == Some(&id) {
            self.paths.remove(watch.path());
        }
        if self.inode_paths.get(watch.inode_path()) == Some(&id) {
            self.inode_paths.remove(watch.inode_path());
        }
    }

    fn unindex(&mut self, id: WatchId) -> Option<Entry> {
        self.detach(id);
        self.watches.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{EventMask, WatchOptions};

    fn watch(id: i32, path: &str, inode_path: &str) -> Watch {
        Watch::new(
            WatchId::new(id),
            path,
            inode_path,
            EventMask::ALL_EVENTS,
            WatchOptions::empty(),
        )
    }

    #[test]
    fn test_registry_basic() {
        let mut registry = WatchRegistry::new();

        registry.insert(watch(1, "/project/src", "/project/src")).unwrap();
        registry.insert(watch(2, "/link/tests", "/project/tests")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(WatchId::new(1)).unwrap().path(), Path::new("/project/src"));
        assert_eq!(
            registry.get_by_path(Path::new("/project/tests")).unwrap().id(),
            WatchId::new(2)
        );
        assert_eq!(
            registry.get_by_path(Path::new("/link/tests")).unwrap().id(),
            WatchId::new(2)
        );
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = WatchRegistry::new();
        registry.insert(watch(1, "/a", "/a")).unwrap();

        for dup in [watch(1, "/b", "/b"), watch(2, "/a", "/c"), watch(3, "/d", "/a")] {
            let err = registry.insert(dup).unwrap_err();
            assert!(matches!(err, WatchError::DuplicateWatch { .. }));
        }

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_prefers_inode_path() {
        let mut registry = WatchRegistry::new();

        // Watch 1 was requested on a symlink /link that resolves to /real.
        registry.insert(watch(1, "/link", "/real")).unwrap();
        // Watch 2 was requested on a path that /link's target now shadows.
        registry.insert(watch(2, "/real2", "/link")).unwrap();

        assert_eq!(
            registry.get_by_path(Path::new("/link")).unwrap().id(),
            WatchId::new(2)
        );
    }

    #[test]
    fn test_lookup_missing() {
        let registry = WatchRegistry::new();

        assert!(matches!(
            registry.get(WatchId::new(7)),
            Err(WatchError::NotFound { .. })
        ));
        assert!(matches!(
            registry.get_by_path(Path::new("/nowhere")),
            Err(WatchError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_clears_all_indices() {
        let mut registry = WatchRegistry::new();
        registry.insert(watch(1, "/link", "/real")).unwrap();

        let removed = registry.remove(WatchId::new(1)).unwrap();
        assert_eq!(removed.id(), WatchId::new(1));

        assert!(registry.is_empty());
        assert!(registry.get_by_path(Path::new("/link")).is_err());
        assert!(registry.get_by_path(Path::new("/real")).is_err());
        assert!(registry.remove(WatchId::new(1)).is_err());

        // All keys are free again
        registry.insert(watch(1, "/link", "/real")).unwrap();
    }

    #[test]
    fn test_replace_same_descriptor_modifies() {
        let mut registry = WatchRegistry::new();
        registry.insert(watch(1, "/a", "/a")).unwrap();

        // Same inode added again through a symlink
        let (new, superseded) = registry.replace(watch(1, "/link-to-a", "/a"));

        assert!(superseded.is_empty());
        assert_eq!(new.path(), Path::new("/link-to-a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_path(Path::new("/link-to-a")).is_ok());
        // Old requested path no longer indexed, inode path still is
        assert!(!registry.paths.contains_key(Path::new("/a")));
        assert!(registry.get_by_path(Path::new("/a")).is_ok());
    }

    #[test]
    fn test_replace_supersedes_stale_path() {
        let mut registry = WatchRegistry::new();
        registry.insert(watch(1, "/a/b", "/a/b")).unwrap();

        // /a/b was renamed away and a new directory created in its place
        let (_, superseded) = registry.replace(watch(2, "/a/b", "/a/b"));
        assert_eq!(superseded, vec![WatchId::new(1)]);

        assert_eq!(
            registry.get_by_path(Path::new("/a/b")).unwrap().id(),
            WatchId::new(2)
        );
        assert_eq!(registry.state(WatchId::new(1)).unwrap(), WatchState::Superseded);
        assert!(registry.get(WatchId::new(1)).is_ok());

        // Retiring the superseded watch leaves the new one indexed
        registry.remove(WatchId::new(1)).unwrap();
        assert_eq!(
            registry.get_by_path(Path::new("/a/b")).unwrap().id(),
            WatchId::new(2)
        );
    }

    #[test]
    fn test_pending_state() {
        let mut registry = WatchRegistry::new();
        let record = registry.insert(watch(1, "/a", "/a")).unwrap();

        assert_eq!(registry.mark_pending(&record).unwrap(), WatchState::Active);
        assert_eq!(
            registry.mark_pending(&record).unwrap(),
            WatchState::PendingRemoval
        );
        assert_eq!(registry.in_state(WatchState::PendingRemoval).len(), 1);
        assert!(registry.in_state(WatchState::Active).is_empty());
    }

    #[test]
    fn test_pending_rejects_retired_record() {
        let mut registry = WatchRegistry::new();
        let retired = registry.insert(watch(1, "/a", "/a")).unwrap();
        registry.remove(WatchId::new(1)).unwrap();

        // Same descriptor, handed out again for another directory
        let current = registry.insert(watch(1, "/b", "/b")).unwrap();

        assert!(matches!(
            registry.mark_pending(&retired),
            Err(WatchError::NotFound { .. })
        ));
        assert_eq!(registry.state(WatchId::new(1)).unwrap(), WatchState::Active);
        assert_eq!(registry.mark_pending(&current).unwrap(), WatchState::Active);
    }

    #[test]
    fn test_pending_accepts_modified_record() {
        let mut registry = WatchRegistry::new();
        let first = registry.insert(watch(1, "/a", "/a")).unwrap();
        let (second, _) = registry.replace(watch(1, "/a", "/a"));

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.mark_pending(&first).unwrap(), WatchState::Active);
        assert_eq!(registry.state(WatchId::new(1)).unwrap(), WatchState::PendingRemoval);
    }

    #[test]
    fn test_snapshot_is_not_live() {
        let mut registry = WatchRegistry::new();
        registry.insert(watch(1, "/a", "/a")).unwrap();
        registry.insert(watch(2, "/b", "/b")).unwrap();

        let snapshot = registry.all();
        for watch in &snapshot {
            registry.remove(watch.id()).unwrap();
        }

        assert_eq!(snapshot.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_active_keys_stay_unique() {
        let mut registry = WatchRegistry::new();
        let ops = [
            (1, "/a", "/a"),
            (2, "/b", "/a"),
            (1, "/c", "/c"),
            (3, "/c", "/d"),
            (2, "/d", "/e"),
        ];
        for (id, path, inode_path) in ops {
            registry.replace(watch(id, path, inode_path));

            let active = registry.in_state(WatchState::Active);
            let mut paths: Vec<_> = active.iter().map(|w| w.path().to_path_buf()).collect();
            let mut inodes: Vec<_> = active.iter().map(|w| w.inode_path().to_path_buf()).collect();
            paths.sort();
            paths.dedup();
            inodes.sort();
            inodes.dedup();
            assert_eq!(paths.len(), active.len());
            assert_eq!(inodes.len(), active.len());
        }
    }
}
