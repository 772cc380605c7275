//! Error types for the watch management layer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::WatchId;

/// Errors from session, registry and watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The monitoring session is unusable.
    #[error("Inotify session failed: {source}")]
    Session {
        #[source]
        source: io::Error,
    },

    #[error("Inotify session is closed")]
    SessionClosed,

    #[error("Cannot watch path {path}: {source}")]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot remove watch {id}: {source}")]
    RemoveWatch {
        id: WatchId,
        #[source]
        source: io::Error,
    },

    #[error("No watch for {key}")]
    NotFound { key: String },

    #[error("Watch {id} on {path} collides with an existing watch")]
    DuplicateWatch { id: WatchId, path: PathBuf },

    /// An event arrived for a descriptor that was never registered.
    #[error("Event for unknown watch descriptor {id}")]
    UnknownDescriptor { id: WatchId },

    #[error("Watcher thread already started")]
    AlreadyStarted,

    #[error("Unknown event or option name '{name}'")]
    InvalidMask { name: String },
}

impl WatchError {
    /// Whether the error means the whole session is dead.
    pub fn is_session(&self) -> bool {
        matches!(self, WatchError::Session { .. } | WatchError::SessionClosed)
    }

    /// Whether the watcher cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        self.is_session() || matches!(self, WatchError::UnknownDescriptor { .. })
    }

    pub(crate) fn not_found(key: impl std::fmt::Display) -> Self {
        WatchError::NotFound {
            key: key.to_string(),
        }
    }
}

/// Result alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;
