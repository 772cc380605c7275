//! Background dispatch of correlated events.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;

use crate::mask::{EventMask, WatchOptions};
use crate::session::{KernelSession, RawSession};

use super::enhanced::EnhancedWatcher;
use super::error::{WatchError, WatchResult};
use super::watch::{WalkOrder, Watch, WatchEvent, WatchId, WatchState};

/// Default wait per loop iteration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Callback = Box<dyn FnMut(WatchEvent) + Send>;

/// Runs an [`EnhancedWatcher`] on a background thread.
///
/// The thread waits on the session without holding the watcher lock, then
/// takes it once per batch. Registry operations from other threads take
/// the same lock, so they never observe a half-processed batch.
///
/// The callback runs on the background thread, outside the lock, in
/// delivery order. It may call back into the `ThreadedWatcher`.
pub struct ThreadedWatcher<S: RawSession + 'static = KernelSession> {
    watcher: Arc<Mutex<EnhancedWatcher<S>>>,
    session: Arc<S>,
    running: Arc<AtomicBool>,
    /// Taken by `start`.
    callback: Mutex<Option<Callback>>,
    poll_interval: Duration,
    /// Platform default when `None`.
    stack_size: Option<usize>,
}

impl ThreadedWatcher<KernelSession> {
    /// Create a dispatcher on a new kernel session.
    pub fn new<F>(callback: F) -> WatchResult<Self>
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        Ok(Self::with_watcher(EnhancedWatcher::open()?, callback))
    }

    /// Create a dispatcher that sends events into a channel.
    ///
    /// Events are dropped once the receiver is gone.
    pub fn channel() -> WatchResult<(Self, Receiver<WatchEvent>)> {
        Ok(Self::channel_with(EnhancedWatcher::open()?))
    }
}

impl<S: RawSession + 'static> ThreadedWatcher<S> {
    pub fn with_session<F>(session: S, callback: F) -> Self
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        Self::with_watcher(EnhancedWatcher::with_session(session), callback)
    }

    /// Wrap an existing watcher, keeping its watches.
    pub fn with_watcher<F>(watcher: EnhancedWatcher<S>, callback: F) -> Self
    where
        F: FnMut(WatchEvent) + Send + 'static,
    {
        Self {
            session: watcher.session().clone(),
            watcher: Arc::new(Mutex::new(watcher)),
            running: Arc::new(AtomicBool::new(false)),
            callback: Mutex::new(Some(Box::new(callback))),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stack_size: None,
        }
    }

    pub fn channel_with(watcher: EnhancedWatcher<S>) -> (Self, Receiver<WatchEvent>) {
        let (tx, rx) = unbounded();
        let dispatcher = Self::with_watcher(watcher, move |event| {
            let _ = tx.send(event);
        });
        (dispatcher, rx)
    }

    /// Set how long each wait on the session may block.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start the background thread.
    ///
    /// Can be called once; later calls fail with `AlreadyStarted`. A
    /// dispatcher cannot be started after [`stop`](Self::stop), which
    /// closes the session, and fails with `SessionClosed`. The thread ends
    /// with `Ok` after `stop` and with the error that ended it otherwise.
    pub fn start(&self) -> WatchResult<JoinHandle<WatchResult<()>>> {
        if self.session.is_closed() {
            return Err(WatchError::SessionClosed);
        }

        let mut callback = self
            .callback
            .lock()
            .take()
            .ok_or(WatchError::AlreadyStarted)?;

        self.running.store(true, Ordering::SeqCst);

        let watcher = self.watcher.clone();
        let session = self.session.clone();
        let running = self.running.clone();
        let interval = self.poll_interval;

        let mut builder = thread::Builder::new().name("inwatch-dispatch".to_string());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder
            .spawn(move || {
                let result = dispatch(&watcher, &*session, &running, interval, &mut callback);
                running.store(false, Ordering::SeqCst);
                result
            })
            .map_err(|source| {
                self.running.store(false, Ordering::SeqCst);
                WatchError::Session { source }
            })?;

        crate::log_event!("dispatcher", "started");
        Ok(handle)
    }

    /// Close the session and ask the thread to exit.
    ///
    /// Join the handle returned by `start` to wait for it. The watcher is
    /// unusable afterwards and cannot be started again.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            crate::log_event!("dispatcher", "stopping");
        }
        self.session.close();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn add_watch(
        &self,
        path: impl AsRef<Path>,
        mask: EventMask,
        options: WatchOptions,
    ) -> WatchResult<Arc<Watch>> {
        self.watcher.lock().add_watch(path, mask, options)
    }

    pub fn add_watches_recursive(
        &self,
        path: impl AsRef<Path>,
        mask: EventMask,
        options: WatchOptions,
        order: WalkOrder,
    ) -> WatchResult<Vec<Arc<Watch>>> {
        self.watcher.lock().add_watches_recursive(path, mask, options, order)
    }

    pub fn remove_watch(&self, watch: &Watch) -> WatchResult<()> {
        self.watcher.lock().remove_watch(watch)
    }

    pub fn get_watch(&self, id: WatchId) -> WatchResult<Arc<Watch>> {
        self.watcher.lock().get_watch(id)
    }

    pub fn get_watch_by_path(&self, path: impl AsRef<Path>) -> WatchResult<Arc<Watch>> {
        self.watcher.lock().get_watch_by_path(path)
    }

    pub fn list_watches(&self) -> Vec<Arc<Watch>> {
        self.watcher.lock().list_watches()
    }

    pub fn watch_state(&self, id: WatchId) -> WatchResult<WatchState> {
        self.watcher.lock().watch_state(id)
    }
}

impl<S: RawSession + 'static> Drop for ThreadedWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch<S: RawSession>(
    watcher: &Mutex<EnhancedWatcher<S>>,
    session: &S,
    running: &AtomicBool,
    interval: Duration,
    callback: &mut Callback,
) -> WatchResult<()> {
    while running.load(Ordering::SeqCst) {
        let batch = match session.get_events(Some(interval)) {
            Ok(batch) => batch,
            Err(WatchError::SessionClosed) if !running.load(Ordering::SeqCst) => break,
            Err(err) => {
                tracing::error!("[dispatcher] session failed: {err}");
                return Err(err);
            }
        };
        if batch.is_empty() {
            continue;
        }

        let events = watcher.lock().process_batch(batch);
        match events {
            Ok(events) => {
                for event in events {
                    callback(event);
                }
            }
            Err(err) => {
                tracing::error!("[dispatcher] stopping on inconsistent event: {err}");
                return Err(err);
            }
        }
    }

    crate::log_event!("dispatcher", "stopped");
    Ok(())
}
