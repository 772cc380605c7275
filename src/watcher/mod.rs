//! Enhanced watch management on top of a raw inotify session.
//!
//! # Architecture
//!
//! ```text
//! ThreadedWatcher          background loop, one lock, user callback
//!   EnhancedWatcher        correlation, recursive add, auto-add, auto-remove
//!     WatchRegistry        watches by descriptor, requested and inode path
//!     RawSession           kernel add/remove/read (KernelSession)
//! ```
//!
//! A removed watch stays registered until the kernel confirms removal with
//! an `IGNORED` event, so late events still find their watch.

mod enhanced;
mod error;
mod registry;
mod threaded;
mod watch;

pub use enhanced::{DEFAULT_AUTO_ADD_WARN_AFTER, EnhancedWatcher, Events};
pub use error::{WatchError, WatchResult};
pub use registry::WatchRegistry;
pub use threaded::{DEFAULT_POLL_INTERVAL, ThreadedWatcher};
pub use watch::{Event, WalkOrder, Watch, WatchEvent, WatchId, WatchState};
