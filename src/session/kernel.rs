//! Inotify session backed by the Linux kernel.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use inotify::{Inotify, WatchDescriptor, WatchMask, Watches};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use parking_lot::{Mutex, RwLock};

use super::{RawEvent, RawSession};
use crate::mask::EventMask;
use crate::watcher::{WatchError, WatchId, WatchResult};

/// Large enough for a batch of events, and always for one event with a
/// maximal name.
const BUFFER_LEN: usize = 4096;

/// Everything released on close.
struct Handle {
    inotify: Mutex<Inotify>,
    watches: Watches,
    /// Descriptors handed out by the kernel, needed again for removal.
    descriptors: Mutex<HashMap<WatchId, WatchDescriptor>>,
    fd: RawFd,
}

/// Inotify instance owned by one watcher.
///
/// Closing wakes any thread blocked in `get_events` through a socket pair
/// before the inotify descriptor is released.
pub struct KernelSession {
    /// `None` once closed.
    handle: RwLock<Option<Handle>>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
    closed: AtomicBool,
}

impl fmt::Debug for KernelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSession")
            .field("fd", &self.handle.read().as_ref().map(|handle| handle.fd))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl KernelSession {
    /// Open a new inotify instance.
    pub fn open() -> WatchResult<Self> {
        let inotify = Inotify::init().map_err(|source| WatchError::Session { source })?;
        let (wake_rx, wake_tx) =
            UnixStream::pair().map_err(|source| WatchError::Session { source })?;

        let fd = inotify.as_raw_fd();
        crate::debug_event!("session", "opened", "fd {fd}");

        Ok(Self {
            handle: RwLock::new(Some(Handle {
                watches: inotify.watches(),
                inotify: Mutex::new(inotify),
                descriptors: Mutex::new(HashMap::new()),
                fd,
            })),
            wake_rx,
            wake_tx,
            closed: AtomicBool::new(false),
        })
    }

    fn wait(&self, fd: RawFd, timeout: Option<Duration>) -> WatchResult<bool> {
        let timeout_ms = match timeout {
            None => -1,
            Some(timeout) => timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32,
        };

        let mut fds = [
            PollFd::new(fd, PollFlags::POLLIN),
            PollFd::new(self.wake_rx.as_raw_fd(), PollFlags::POLLIN),
        ];

        loop {
            match poll(&mut fds, timeout_ms) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(WatchError::Session {
                        source: io::Error::from_raw_os_error(errno as i32),
                    });
                }
            }
        }

        let woken = fds[1].revents().is_some_and(|revents| !revents.is_empty());
        if woken || self.is_closed() {
            return Err(WatchError::SessionClosed);
        }

        Ok(fds[0]
            .revents()
            .is_some_and(|revents| revents.contains(PollFlags::POLLIN)))
    }
}

impl RawSession for KernelSession {
    fn add_watch(&self, path: &Path, mask: EventMask) -> WatchResult<WatchId> {
        let guard = self.handle.read();
        let handle = guard.as_ref().ok_or(WatchError::SessionClosed)?;

        let descriptor = handle
            .watches
            .clone()
            .add(path, WatchMask::from_bits_truncate(mask.bits()))
            .map_err(|source| WatchError::AddWatch {
                path: path.to_path_buf(),
                source,
            })?;

        let id = WatchId::new(descriptor.get_watch_descriptor_id());
        handle.descriptors.lock().insert(id, descriptor);
        Ok(id)
    }

    fn remove_watch(&self, id: WatchId) -> WatchResult<()> {
        let guard = self.handle.read();
        let handle = guard.as_ref().ok_or(WatchError::SessionClosed)?;

        let mut descriptors = handle.descriptors.lock();
        let descriptor = descriptors
            .get(&id)
            .cloned()
            .ok_or_else(|| WatchError::RemoveWatch {
                id,
                source: io::Error::from_raw_os_error(Errno::EINVAL as i32),
            })?;

        handle
            .watches
            .clone()
            .remove(descriptor)
            .map_err(|source| WatchError::RemoveWatch { id, source })?;

        descriptors.remove(&id);
        Ok(())
    }

    fn get_events(&self, timeout: Option<Duration>) -> WatchResult<Vec<RawEvent>> {
        let guard = self.handle.read();
        let handle = guard.as_ref().ok_or(WatchError::SessionClosed)?;

        if !self.wait(handle.fd, timeout)? {
            return Ok(Vec::new());
        }

        let mut buffer = [0u8; BUFFER_LEN];
        let mut inotify = handle.inotify.lock();
        let events = match inotify.read_events(&mut buffer) {
            Ok(events) => events,
            // Another reader drained the queue first
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(source) => return Err(WatchError::Session { source }),
        };

        Ok(events
            .map(|event| {
                RawEvent::new(
                    WatchId::new(event.wd.get_watch_descriptor_id()),
                    EventMask::from_bits_retain(event.mask.bits()),
                    event.cookie,
                    event.name.unwrap_or_default(),
                )
            })
            .collect())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = (&self.wake_tx).write_all(&[1]) {
            crate::debug_event!("session", "wake failed", "{err}");
        }

        // Woken waiters release their read guards promptly.
        if let Some(handle) = self.handle.write().take() {
            crate::debug_event!("session", "closed", "fd {}", handle.fd);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
