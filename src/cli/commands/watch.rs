//! Watch command: register paths and print correlated events.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::cli::args::WatchArgs;
use crate::config::{Settings, WatchConfig};
use crate::session::RawSession;
use crate::watcher::{EnhancedWatcher, ThreadedWatcher, WatchEvent};

/// Apply command line overrides on top of the configured watch section.
pub fn effective_config(args: &WatchArgs, settings: &Settings) -> WatchConfig {
    let mut config = settings.watch.clone();
    if let Some(events) = &args.events {
        config.events = vec![events.clone()];
    }
    config.recursive |= args.recursive;
    config.auto_add |= args.auto_add;
    config.remove_moved |= args.remove_moved;
    if args.no_follow {
        config.follow_symlinks = false;
    }
    if args.bottom_up {
        config.top_down = false;
    }
    config
}

/// One output line: descriptor, event names, cookie and path.
pub fn format_event(event: &WatchEvent) -> String {
    let path = event
        .path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}",
        event.event.wd(),
        event.event.mask(),
        event.event.cookie(),
        path
    )
}

pub fn run_watch(args: &WatchArgs, settings: &Settings) -> Result<()> {
    let config = effective_config(args, settings);
    let deadline = args.timeout.and_then(deadline_after);

    let watcher = EnhancedWatcher::open()
        .context("Failed to open inotify session")?
        .auto_add_warn_after(settings.dispatcher.auto_add_warn_after);

    if args.threaded {
        run_threaded(watcher, args, &config, settings, deadline)
    } else {
        run_foreground(watcher, args, &config, deadline)
    }
}

fn register<S: RawSession>(
    watcher: &mut EnhancedWatcher<S>,
    args: &WatchArgs,
    config: &WatchConfig,
) -> Result<usize> {
    let mask = config.mask()?;
    let options = config.options();
    let mut count = 0;

    for path in &args.paths {
        if config.recursive {
            count += watcher
                .add_watches_recursive(path, mask, options, config.order())
                .with_context(|| format!("Failed to watch {}", path.display()))?
                .len();
        } else {
            watcher
                .add_watch(path, mask, options)
                .with_context(|| format!("Failed to watch {}", path.display()))?;
            count += 1;
        }
    }

    crate::log_event!("cli", "watching", "{count} watches");
    Ok(count)
}

/// `None` when the deadline lies beyond what `Instant` can represent.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn remaining(deadline: Option<Instant>) -> Option<Option<Duration>> {
    match deadline {
        None => Some(None),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            (!left.is_zero()).then_some(Some(left))
        }
    }
}

fn run_foreground<S: RawSession>(
    mut watcher: EnhancedWatcher<S>,
    args: &WatchArgs,
    config: &WatchConfig,
    deadline: Option<Instant>,
) -> Result<()> {
    register(&mut watcher, args, config)?;
    let mut out = io::stdout().lock();

    while let Some(timeout) = remaining(deadline) {
        for event in watcher.poll_events(timeout)? {
            writeln!(out, "{}", format_event(&event))?;
        }
        out.flush()?;
    }

    Ok(())
}

fn run_threaded<S: RawSession + 'static>(
    mut watcher: EnhancedWatcher<S>,
    args: &WatchArgs,
    config: &WatchConfig,
    settings: &Settings,
    deadline: Option<Instant>,
) -> Result<()> {
    register(&mut watcher, args, config)?;

    let (dispatcher, events) = ThreadedWatcher::channel_with(watcher);
    let dispatcher = dispatcher.poll_interval(settings.dispatcher.poll_interval());
    let handle = dispatcher.start()?;
    let mut out = io::stdout().lock();

    while let Some(timeout) = remaining(deadline) {
        let received = match timeout {
            Some(timeout) => events.recv_timeout(timeout).ok(),
            None => events.recv().ok(),
        };
        match received {
            Some(event) => {
                writeln!(out, "{}", format_event(&event))?;
                out.flush()?;
            }
            // Loop ended on its own
            None if !dispatcher.is_running() => break,
            None => {}
        }
    }

    dispatcher.stop();
    match handle.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Dispatcher thread panicked"),
    }
    Ok(())
}
