//! Watch records, events and correlated pairs.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::mask::{EventMask, WatchOptions};
use crate::session::RawEvent;

/// Kernel watch descriptor.
///
/// Unique among currently active watches only: the kernel may hand out a
/// retired descriptor again for a later watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(i32);

impl WatchId {
    /// Descriptor carried by events not attributable to any watch.
    pub const NONE: WatchId = WatchId(-1);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Delivering events.
    Active,
    /// Removal requested, kernel confirmation (`IGNORED`) not yet seen.
    PendingRemoval,
    /// Its paths were claimed by a newer watch; still matched by id.
    Superseded,
}

/// Order in which a subtree is walked when adding watches recursively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkOrder {
    /// Parent before children. The parent sees `OPEN`/`CLOSE_NOWRITE`
    /// from the directory scan.
    #[default]
    TopDown,
    /// Children before parent.
    BottomUp,
}

/// One registration of a path with the kernel.
///
/// Immutable once created. To modify a watch, add it again with the new
/// mask and options.
///
/// `path` and `inode_path` stop being accurate once the target (or one of
/// its ancestors) is moved, since the destination of a move is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    id: WatchId,
    path: PathBuf,
    inode_path: PathBuf,
    mask: EventMask,
    options: WatchOptions,
}

impl Watch {
    pub fn new(
        id: WatchId,
        path: impl Into<PathBuf>,
        inode_path: impl Into<PathBuf>,
        mask: EventMask,
        options: WatchOptions,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            inode_path: inode_path.into(),
            mask,
            options,
        }
    }

    /// Watch descriptor.
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Path the watch was requested on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the watched inode after symlink resolution.
    pub fn inode_path(&self) -> &Path {
        &self.inode_path
    }

    /// Events the caller asked for.
    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn options(&self) -> WatchOptions {
        self.options
    }

    /// Mask armed with the kernel: the requested mask plus the bits the
    /// enabled options need to observe.
    pub fn armed_mask(&self) -> EventMask {
        armed_mask(self.mask, self.options)
    }

    /// Whether an event should reach the consumer.
    ///
    /// Qualifier bits are ignored on the event side, so `ISDIR` alone
    /// never makes a bookkeeping-only event visible.
    pub fn wants(&self, event: EventMask) -> bool {
        self.mask.intersects(event.difference(EventMask::QUALIFIERS))
    }
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, '{}', '{}', {}, options=0x{:02x})",
            self.id,
            self.path.display(),
            self.inode_path.display(),
            self.mask,
            self.options.bits()
        )
    }
}

pub(crate) fn armed_mask(mask: EventMask, options: WatchOptions) -> EventMask {
    let mut armed = mask;
    if options.contains(WatchOptions::AUTO_ADD) {
        armed |= EventMask::CREATE | EventMask::MOVED_TO;
    }
    if options.contains(WatchOptions::REMOVE_MOVED) {
        armed |= EventMask::MOVE_SELF;
    }
    armed
}

/// One kernel notification. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    wd: WatchId,
    mask: EventMask,
    cookie: u32,
    name: OsString,
}

impl Event {
    pub fn new(wd: WatchId, mask: EventMask, cookie: u32, name: impl Into<OsString>) -> Self {
        Self {
            wd,
            mask,
            cookie,
            name: name.into(),
        }
    }

    /// Descriptor the event arrived tagged with.
    pub fn wd(&self) -> WatchId {
        self.wd
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// Pairs the `MOVED_FROM` and `MOVED_TO` halves of a rename.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Child name, empty when the event concerns the watched target itself.
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn is_overflow(&self) -> bool {
        self.wd == WatchId::NONE && self.mask.contains(EventMask::Q_OVERFLOW)
    }
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        Event::new(raw.wd, raw.mask, raw.cookie, raw.name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, 0x{:08x}, {}, '{}')",
            self.wd,
            self.mask.bits(),
            self.cookie,
            self.name.to_string_lossy()
        )
    }
}

/// An event matched to the watch that produced it.
///
/// `watch` is `None` only for queue overflow notifications.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub watch: Option<Arc<Watch>>,
    pub event: Event,
}

impl WatchEvent {
    /// Full path the event concerns, based on the watch's requested path.
    pub fn path(&self) -> Option<PathBuf> {
        let watch = self.watch.as_ref()?;
        if self.event.name().is_empty() {
            Some(watch.path().to_path_buf())
        } else {
            Some(watch.path().join(self.event.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armed_mask_adds_bookkeeping_bits() {
        let watch = Watch::new(
            WatchId::new(1),
            "/tmp/x",
            "/tmp/x",
            EventMask::DELETE,
            WatchOptions::AUTO_ADD | WatchOptions::REMOVE_MOVED,
        );

        let armed = watch.armed_mask();
        assert!(armed.contains(EventMask::DELETE));
        assert!(armed.contains(EventMask::CREATE | EventMask::MOVED_TO));
        assert!(armed.contains(EventMask::MOVE_SELF));
        assert_eq!(watch.mask(), EventMask::DELETE);
    }

    #[test]
    fn test_wants_ignores_qualifiers() {
        let watch = Watch::new(
            WatchId::new(1),
            "/tmp/x",
            "/tmp/x",
            EventMask::DELETE | EventMask::ISDIR,
            WatchOptions::AUTO_ADD,
        );

        assert!(watch.wants(EventMask::DELETE | EventMask::ISDIR));
        assert!(!watch.wants(EventMask::CREATE | EventMask::ISDIR));
        assert!(!watch.wants(EventMask::CREATE));
    }

    #[test]
    fn test_overflow_event() {
        let event = Event::new(WatchId::NONE, EventMask::Q_OVERFLOW, 0, "");
        assert!(event.is_overflow());

        let event = Event::new(WatchId::new(3), EventMask::Q_OVERFLOW, 0, "");
        assert!(!event.is_overflow());
    }

    #[test]
    fn test_event_path_joins_name() {
        let watch = Arc::new(Watch::new(
            WatchId::new(1),
            "/tmp/x",
            "/tmp/x",
            EventMask::CREATE,
            WatchOptions::empty(),
        ));
        let pair = WatchEvent {
            watch: Some(watch.clone()),
            event: Event::new(WatchId::new(1), EventMask::CREATE, 0, "a"),
        };
        assert_eq!(pair.path(), Some(PathBuf::from("/tmp/x/a")));

        let pair = WatchEvent {
            watch: Some(watch),
            event: Event::new(WatchId::new(1), EventMask::MOVE_SELF, 0, ""),
        };
        assert_eq!(pair.path(), Some(PathBuf::from("/tmp/x")));
    }
}
