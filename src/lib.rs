//! Inotify watch manager.
//!
//! Keeps track of what is being watched and why, turning raw
//! `(descriptor, mask, cookie, name)` notifications into events paired
//! with the watch that produced them.
//!
//! ```no_run
//! use inwatch::{EnhancedWatcher, EventMask, WatchOptions};
//!
//! let mut watcher = EnhancedWatcher::open()?;
//! watcher.add_watch("/tmp/x", EventMask::CREATE, WatchOptions::AUTO_ADD)?;
//! for event in watcher.events(None) {
//!     let event = event?;
//!     println!("{}", event.path().unwrap_or_default().display());
//! }
//! # Ok::<(), inwatch::WatchError>(())
//! ```

pub mod cli;
pub mod config;
pub mod logging;
pub mod mask;
pub mod session;
pub mod watcher;

pub use config::Settings;
pub use mask::{EventMask, WatchOptions};
pub use session::{KernelSession, RawEvent, RawSession};
pub use watcher::{
    EnhancedWatcher, Event, ThreadedWatcher, WalkOrder, Watch, WatchError, WatchEvent, WatchId,
    WatchRegistry, WatchResult, WatchState,
};
