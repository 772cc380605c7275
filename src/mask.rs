//! Event mask vocabulary and enhanced watch options.
//!
//! `EventMask` mirrors the inotify(7) bit values one-to-one so masks pass
//! through to the kernel untouched. `WatchOptions` holds the bookkeeping
//! features layered on top by the enhanced watcher; they are never armed
//! with the kernel and never appear in a delivered event.

use bitflags::bitflags;

use crate::watcher::{WatchError, WatchResult};

bitflags! {
    /// Inotify event and request bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// File was accessed.
        const ACCESS = 0x0000_0001;
        /// File was modified.
        const MODIFY = 0x0000_0002;
        /// Metadata changed.
        const ATTRIB = 0x0000_0004;
        /// Writable file was closed.
        const CLOSE_WRITE = 0x0000_0008;
        /// Unwritable file was closed.
        const CLOSE_NOWRITE = 0x0000_0010;
        /// File was opened.
        const OPEN = 0x0000_0020;
        /// File was moved out of a watched directory.
        const MOVED_FROM = 0x0000_0040;
        /// File was moved into a watched directory.
        const MOVED_TO = 0x0000_0080;
        /// Subfile was created.
        const CREATE = 0x0000_0100;
        /// Subfile was deleted.
        const DELETE = 0x0000_0200;
        /// Watched target itself was deleted.
        const DELETE_SELF = 0x0000_0400;
        /// Watched target itself was moved.
        const MOVE_SELF = 0x0000_0800;
        /// Backing filesystem was unmounted.
        const UNMOUNT = 0x0000_2000;
        /// Event queue overflowed.
        const Q_OVERFLOW = 0x0000_4000;
        /// Watch was removed by the kernel.
        const IGNORED = 0x0000_8000;
        /// Only watch the path if it is a directory.
        const ONLYDIR = 0x0100_0000;
        /// Do not follow a symlink.
        const DONT_FOLLOW = 0x0200_0000;
        /// Exclude events on unlinked objects.
        const EXCL_UNLINK = 0x0400_0000;
        /// Add to the mask of an existing watch.
        const MASK_ADD = 0x2000_0000;
        /// Event occurred against a directory.
        const ISDIR = 0x4000_0000;
        /// Only send the event once.
        const ONESHOT = 0x8000_0000;

        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
        const ALL_EVENTS = 0x0000_0fff;
    }
}

bitflags! {
    /// Bookkeeping features of the enhanced watcher, toggled per watch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatchOptions: u8 {
        /// Watch directories created (or moved) under the watched path.
        const AUTO_ADD = 0x01;
        /// Remove the watch when its own target is moved.
        const REMOVE_MOVED = 0x02;
    }
}

impl EventMask {
    /// Bits that qualify another event instead of describing one.
    pub const QUALIFIERS: EventMask = EventMask::ISDIR;

    /// Whether symlinks are followed when arming with this mask.
    pub fn follows_symlinks(&self) -> bool {
        !self.contains(EventMask::DONT_FOLLOW)
    }

    /// Whether the event describes a directory.
    pub fn is_dir(&self) -> bool {
        self.contains(EventMask::ISDIR)
    }

    /// Parse a comma or pipe separated list of mask names.
    ///
    /// Names are case-insensitive and accept `-` for `_`, so `moved-to`,
    /// `MOVED_TO` and `moved_to` are equivalent. `all` selects
    /// `ALL_EVENTS`; an empty string parses to an empty mask.
    pub fn parse(list: &str) -> WatchResult<Self> {
        parse_names(list, |name| match name {
            "ALL" => Some(EventMask::ALL_EVENTS),
            "MOVED" => Some(EventMask::MOVE),
            "OVERFLOW" => Some(EventMask::Q_OVERFLOW),
            _ => EventMask::from_name(name),
        })
    }

    /// Parse a list of names, e.g. from configuration.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> WatchResult<Self> {
        let mut mask = EventMask::empty();
        for name in names {
            mask |= Self::parse(name.as_ref())?;
        }
        Ok(mask)
    }

    /// Names of the set bits, composites excluded.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names()
            .filter(|(_, bit)| bit.bits().count_ones() == 1)
            .map(|(name, _)| name)
            .collect()
    }
}

impl std::fmt::Display for EventMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "0x{:08x}", self.bits())
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

impl WatchOptions {
    /// Parse a comma or pipe separated list of option names.
    pub fn parse(list: &str) -> WatchResult<Self> {
        parse_names(list, WatchOptions::from_name)
    }
}

fn parse_names<T, F>(list: &str, lookup: F) -> WatchResult<T>
where
    T: bitflags::Flags,
    F: Fn(&str) -> Option<T>,
{
    let mut flags = T::empty();
    for raw in list.split([',', '|']) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let name = raw.to_ascii_uppercase().replace('-', "_");
        let flag = lookup(&name).ok_or_else(|| WatchError::InvalidMask {
            name: raw.to_string(),
        })?;
        flags.insert(flag);
    }
    Ok(flags)
}
