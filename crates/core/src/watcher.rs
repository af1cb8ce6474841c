//! Polling directory watcher.
//!
//! Each open view owns one [`DirectoryWatcher`]. The watcher runs a dedicated
//! thread that rebuilds the [`EntryCatalog`] of its target every interval and
//! publishes it to subscribers only when it differs from the last published
//! one.
//!
//! # Architecture
//!
//! - [`WatchTarget`] is the synchronous state machine: location, hidden-file
//!   policy, last published catalog. [`WatchTarget::poll`] returns the events a
//!   cycle produced, which keeps it testable without threads.
//! - [`DirectoryWatcher`] owns the thread. Requests (`retarget`,
//!   `set_show_hidden`, `poll_now`, `subscribe`) travel over an mpsc channel
//!   and are drained as one batch between polls, so a policy change is never
//!   applied halfway through a scan. Polls can't overlap: ticks that elapse
//!   while a poll runs are skipped.
//! - Every subscriber gets its own channel fed from the watcher thread, so a
//!   subscriber never sees an older catalog after a newer one.
//!
//! ```no_run
//! use std::time::Duration;
//! use wayfinder_core::location::Location;
//! use wayfinder_core::watcher::{DirectoryWatcher, WatchEvent, WatchOptions};
//!
//! let watcher = DirectoryWatcher::spawn(Location::new("/tmp")?, WatchOptions::default())?;
//! let events = watcher.subscribe();
//!
//! while let Ok(event) = events.recv_timeout(Duration::from_secs(1)) {
//!     if let WatchEvent::CatalogChanged { catalog, .. } = event {
//!         println!("{} entries", catalog.len());
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::catalog::EntryCatalog;
use crate::error::Error;
use crate::location::Location;
use crate::settings::WatcherSettings;
use anyhow::Context;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

static TARGET_IDS: AtomicU64 = AtomicU64::new(1);

/// Identifies the watch target an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> TargetId {
        TargetId(TARGET_IDS.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

/// What a poll cycle tells its subscribers.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A new catalog replaced the previous one.
    CatalogChanged {
        target: TargetId,
        catalog: Arc<EntryCatalog>,
    },
    /// The listing failed; the previous catalog stays authoritative.
    PollFailed { target: TargetId, error: Error },
    /// A cycle finished, whether or not anything changed.
    PollCompleted { target: TargetId },
}

impl WatchEvent {
    pub fn target(&self) -> TargetId {
        match self {
            WatchEvent::CatalogChanged { target, .. }
            | WatchEvent::PollFailed { target, .. }
            | WatchEvent::PollCompleted { target } => *target,
        }
    }

    /// Forwards the event to the matching [`CatalogObserver`] callback.
    pub fn dispatch<O: CatalogObserver + ?Sized>(&self, observer: &mut O) {
        match self {
            WatchEvent::CatalogChanged { target, catalog } => {
                observer.on_catalog_changed(*target, catalog)
            }
            WatchEvent::PollFailed { target, error } => observer.on_poll_error(*target, error),
            WatchEvent::PollCompleted { target } => observer.on_poll_completed(*target),
        }
    }
}

/// Rendering-layer callbacks for watcher events.
pub trait CatalogObserver {
    fn on_catalog_changed(&mut self, target: TargetId, catalog: &Arc<EntryCatalog>);

    fn on_poll_error(&mut self, _target: TargetId, _error: &Error) {}

    /// Called after every cycle, e.g. to stop a busy indicator.
    fn on_poll_completed(&mut self, _target: TargetId) {}
}

/// Watcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub interval: Duration,
    pub show_hidden: bool,
    /// Upper bound for a single listing. `None` lists inline with no bound.
    pub poll_timeout: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            interval: DEFAULT_POLL_INTERVAL,
            show_hidden: false,
            poll_timeout: None,
        }
    }
}

impl From<&WatcherSettings> for WatchOptions {
    fn from(settings: &WatcherSettings) -> Self {
        WatchOptions {
            interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            show_hidden: settings.show_hidden,
            poll_timeout: (settings.poll_timeout_ms > 0)
                .then(|| Duration::from_millis(settings.poll_timeout_ms)),
        }
    }
}

/// A location, its hidden-file policy and the last catalog published for it.
#[derive(Debug)]
pub struct WatchTarget {
    id: TargetId,
    location: Location,
    show_hidden: bool,
    catalog: Option<Arc<EntryCatalog>>,
    last_error: Option<Error>,
}

impl WatchTarget {
    pub fn new(location: Location, show_hidden: bool) -> WatchTarget {
        WatchTarget {
            id: TargetId::next(),
            location,
            show_hidden,
            catalog: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    /// The last published catalog, `None` before the first successful poll
    /// after construction or a retarget.
    pub fn catalog(&self) -> Option<&Arc<EntryCatalog>> {
        self.catalog.as_ref()
    }

    /// The error of the latest poll, if that poll failed.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Points the target at `location` and drops the cached catalog, so the
    /// next poll publishes even if the listing is identical.
    pub fn retarget(&mut self, location: Location) {
        self.location = location;
        self.catalog = None;
        self.last_error = None;
    }

    pub fn set_show_hidden(&mut self, show_hidden: bool) {
        self.show_hidden = show_hidden;
    }

    /// Runs one cycle and returns the events it produced, in delivery order.
    ///
    /// A [`WatchEvent::CatalogChanged`] is produced when `force` is set or the
    /// new catalog differs from the cached one; a failed listing yields
    /// [`WatchEvent::PollFailed`] instead. [`WatchEvent::PollCompleted`] always
    /// comes last.
    pub fn poll(&mut self, force: bool) -> Vec<WatchEvent> {
        let result = EntryCatalog::build(&self.location, self.show_hidden);
        self.apply(result, force)
    }

    fn apply(&mut self, result: Result<EntryCatalog, Error>, force: bool) -> Vec<WatchEvent> {
        let mut events = Vec::with_capacity(2);

        match result {
            Ok(catalog) => {
                self.last_error = None;
                let changed = self
                    .catalog
                    .as_deref()
                    .map_or(true, |previous| *previous != catalog);
                if force || changed {
                    tracing::debug!(
                        target_id = %self.id,
                        location = %self.location,
                        entries = catalog.len(),
                        force,
                        "catalog changed"
                    );
                    let catalog = Arc::new(catalog);
                    self.catalog = Some(Arc::clone(&catalog));
                    events.push(WatchEvent::CatalogChanged {
                        target: self.id,
                        catalog,
                    });
                }
            }
            Err(error) => {
                tracing::warn!(target_id = %self.id, error = %error, "poll failed");
                self.last_error = Some(error.clone());
                events.push(WatchEvent::PollFailed {
                    target: self.id,
                    error,
                });
            }
        }

        events.push(WatchEvent::PollCompleted { target: self.id });
        events
    }
}

/// Produces the catalog of a location under a hidden-file policy.
type Lister = Arc<dyn Fn(&Location, bool) -> Result<EntryCatalog, Error> + Send + Sync>;

enum Command {
    Retarget(Location),
    SetShowHidden(bool),
    PollNow,
    Subscribe(Sender<WatchEvent>),
    Shutdown,
}

/// Handle to a watcher thread. Dropping it stops the thread.
pub struct DirectoryWatcher {
    id: TargetId,
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Starts watching `location`. The first poll runs immediately.
    ///
    /// Intervals shorter than a millisecond are raised to one.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher thread can't be spawned.
    pub fn spawn(location: Location, options: WatchOptions) -> Result<DirectoryWatcher, anyhow::Error> {
        DirectoryWatcher::spawn_with(location, options, Arc::new(EntryCatalog::build))
    }

    fn spawn_with(
        location: Location,
        mut options: WatchOptions,
        list: Lister,
    ) -> Result<DirectoryWatcher, anyhow::Error> {
        options.interval = options.interval.max(MIN_POLL_INTERVAL);
        let target = WatchTarget::new(location, options.show_hidden);
        let id = target.id();
        let (commands, receiver) = mpsc::channel();

        let worker = Worker {
            target,
            options,
            list,
            commands: receiver,
            subscribers: Vec::new(),
            stuck_scan: None,
            force_pending: true,
        };

        let handle = thread::Builder::new()
            .name(format!("watcher-{}", id.0))
            .spawn(move || worker.run())
            .context("can't spawn watcher thread")?;

        Ok(DirectoryWatcher {
            id,
            commands,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Registers a new subscriber.
    ///
    /// If a catalog has already been published, it's replayed to the new
    /// subscriber first so late views start from the current listing. When
    /// the latest poll failed, its error follows.
    pub fn subscribe(&self) -> Receiver<WatchEvent> {
        let (sender, receiver) = mpsc::channel();
        self.commands.send(Command::Subscribe(sender)).ok();
        receiver
    }

    /// Switches to `location` and forces a republish.
    pub fn retarget(&self, location: Location) {
        self.commands.send(Command::Retarget(location)).ok();
    }

    /// Changes the hidden-file policy and polls right away.
    pub fn set_show_hidden(&self, show_hidden: bool) {
        self.commands.send(Command::SetShowHidden(show_hidden)).ok();
    }

    /// Requests an out-of-cycle poll.
    pub fn poll_now(&self) {
        self.commands.send(Command::PollNow).ok();
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.commands.send(Command::Shutdown).ok();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target_id = %self.id, "watcher thread panicked");
            }
        }
    }
}

enum Batch {
    Idle,
    Poll,
    Shutdown,
}

struct Worker {
    target: WatchTarget,
    options: WatchOptions,
    list: Lister,
    commands: Receiver<Command>,
    subscribers: Vec<Sender<WatchEvent>>,
    stuck_scan: Option<JoinHandle<()>>,
    force_pending: bool,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(
            target_id = %self.target.id(),
            location = %self.target.location(),
            interval_ms = self.options.interval.as_millis() as u64,
            "watcher started"
        );

        self.poll();
        let mut next_tick = Instant::now() + self.options.interval;

        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(timeout) {
                Ok(command) => {
                    let mut batch = vec![command];
                    batch.extend(self.commands.try_iter());
                    match self.apply_batch(batch) {
                        Batch::Idle => {}
                        Batch::Poll => self.poll(),
                        Batch::Shutdown => break,
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.poll();
                    next_tick = next_deadline(next_tick, self.options.interval, Instant::now());
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!(target_id = %self.target.id(), "watcher stopped");
    }

    fn apply_batch(&mut self, batch: Vec<Command>) -> Batch {
        let mut outcome = Batch::Idle;

        for command in batch {
            match command {
                Command::Retarget(location) => {
                    tracing::debug!(target_id = %self.target.id(), location = %location, "retarget");
                    self.target.retarget(location);
                    self.force_pending = true;
                    outcome = Batch::Poll;
                }
                Command::SetShowHidden(show_hidden) => {
                    self.target.set_show_hidden(show_hidden);
                    outcome = Batch::Poll;
                }
                Command::PollNow => outcome = Batch::Poll,
                Command::Subscribe(sender) => {
                    if let Some(catalog) = self.target.catalog() {
                        let replay = WatchEvent::CatalogChanged {
                            target: self.target.id(),
                            catalog: Arc::clone(catalog),
                        };
                        if sender.send(replay).is_err() {
                            continue;
                        }
                    }
                    if let Some(error) = self.target.last_error() {
                        let replay = WatchEvent::PollFailed {
                            target: self.target.id(),
                            error: error.clone(),
                        };
                        if sender.send(replay).is_err() {
                            continue;
                        }
                    }
                    self.subscribers.push(sender);
                }
                Command::Shutdown => return Batch::Shutdown,
            }
        }

        outcome
    }

    fn poll(&mut self) {
        let result = match self.options.poll_timeout {
            None => (self.list)(self.target.location(), self.target.show_hidden()),
            Some(timeout) => match self.scan_with_timeout(timeout) {
                Some(result) => result,
                None => return,
            },
        };

        let force = std::mem::take(&mut self.force_pending);
        let events = self.target.apply(result, force);
        self.publish(events);
    }

    /// Lists the target on a helper thread bounded by `timeout`.
    ///
    /// Returns `None` when an earlier listing is still stuck, in which case
    /// the cycle is skipped.
    fn scan_with_timeout(&mut self, timeout: Duration) -> Option<Result<EntryCatalog, Error>> {
        if let Some(stuck) = &self.stuck_scan {
            if !stuck.is_finished() {
                tracing::trace!(target_id = %self.target.id(), "previous listing still running, skipping poll");
                return None;
            }
        }
        self.stuck_scan = None;

        let location = self.target.location().clone();
        let show_hidden = self.target.show_hidden();
        let (sender, receiver) = mpsc::channel();

        let scan_location = location.clone();
        let list = Arc::clone(&self.list);
        let spawned = thread::Builder::new()
            .name(format!("scan-{}", self.target.id().0))
            .spawn(move || {
                sender.send(list(&scan_location, show_hidden)).ok();
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(error = %err, "can't spawn scan thread, listing inline");
                return Some((self.list)(&location, show_hidden));
            }
        };

        match receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(_) => {
                self.stuck_scan = Some(handle);
                let err = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("listing timed out after {} ms", timeout.as_millis()),
                );
                Some(Err(Error::not_readable(location.as_path(), &err)))
            }
        }
    }

    fn publish(&mut self, events: Vec<WatchEvent>) {
        for event in events {
            self.subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }
}

/// Computes the next tick after `previous`, skipping ticks that already
/// elapsed while a poll was running. A zero interval ticks at `now`.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if interval.is_zero() {
        return next.max(now);
    }
    if next > now {
        return next;
    }

    let behind = now.duration_since(next).as_nanos() / interval.as_nanos();
    let skipped = u32::try_from(behind + 1).unwrap_or(u32::MAX);
    tracing::trace!(skipped, "poll overran its interval, skipping ticks");

    next + interval.saturating_mul(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);
    const TICK: Duration = Duration::from_millis(5);

    fn idle_options() -> WatchOptions {
        WatchOptions {
            interval: Duration::from_secs(30),
            ..WatchOptions::default()
        }
    }

    /// Lists normally once `stall` is cleared, counting every call.
    fn stalling_lister(stall: Arc<AtomicBool>, calls: Arc<AtomicUsize>) -> Lister {
        Arc::new(move |location: &Location, show_hidden: bool| {
            calls.fetch_add(1, Ordering::SeqCst);
            while stall.load(Ordering::SeqCst) {
                thread::sleep(TICK);
            }
            EntryCatalog::build(location, show_hidden)
        })
    }

    fn wait_for_error(events: &Receiver<WatchEvent>) -> Option<Error> {
        let deadline = Instant::now() + WAIT;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(remaining) {
                Ok(WatchEvent::PollFailed { error, .. }) => return Some(error),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    fn fast_options() -> WatchOptions {
        WatchOptions {
            interval: Duration::from_millis(20),
            ..WatchOptions::default()
        }
    }

    fn changed_count(events: &[WatchEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, WatchEvent::CatalogChanged { .. }))
            .count()
    }

    fn wait_for_catalog<F>(events: &Receiver<WatchEvent>, mut accept: F) -> Option<Arc<EntryCatalog>>
    where
        F: FnMut(&EntryCatalog) -> bool,
    {
        let deadline = Instant::now() + WAIT;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(remaining) {
                Ok(WatchEvent::CatalogChanged { catalog, .. }) if accept(&catalog) => {
                    return Some(catalog)
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn test_poll_twice_without_changes_publishes_once() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"")?;
        let mut target = WatchTarget::new(Location::new(dir.path())?, false);

        let first = target.poll(false);
        assert_eq!(changed_count(&first), 1);
        assert!(matches!(first.last(), Some(WatchEvent::PollCompleted { .. })));

        let second = target.poll(false);
        assert_eq!(changed_count(&second), 0);
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], WatchEvent::PollCompleted { .. }));
        Ok(())
    }

    #[test]
    fn test_poll_publishes_after_directory_change() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let mut target = WatchTarget::new(Location::new(dir.path())?, false);
        target.poll(false);

        fs::create_dir(dir.path().join("new"))?;
        let events = target.poll(false);

        assert_eq!(changed_count(&events), 1);
        assert_eq!(target.catalog().map(|c| c.len()), Some(1));
        Ok(())
    }

    #[test]
    fn test_forced_poll_republishes_identical_catalog() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let mut target = WatchTarget::new(Location::new(dir.path())?, false);
        target.poll(false);

        assert_eq!(changed_count(&target.poll(true)), 1);
        Ok(())
    }

    #[test]
    fn test_show_hidden_toggle_publishes_only_when_visible_set_differs() -> Result<(), anyhow::Error> {
        let plain = TempDir::new()?;
        fs::write(plain.path().join("visible"), b"")?;
        let mut target = WatchTarget::new(Location::new(plain.path())?, false);
        target.poll(false);
        target.set_show_hidden(true);
        assert_eq!(changed_count(&target.poll(false)), 0);

        let dotted = TempDir::new()?;
        fs::write(dotted.path().join("visible"), b"")?;
        fs::write(dotted.path().join(".secret"), b"")?;
        let mut target = WatchTarget::new(Location::new(dotted.path())?, false);
        target.poll(false);
        target.set_show_hidden(true);
        let events = target.poll(false);
        assert_eq!(changed_count(&events), 1);
        assert_eq!(target.catalog().map(|c| c.len()), Some(2));
        assert_eq!(target.catalog().map(|c| c.show_hidden()), Some(true));
        Ok(())
    }

    #[test]
    fn test_retarget_clears_cache_and_republishes() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let location = Location::new(dir.path())?;
        let mut target = WatchTarget::new(location.clone(), false);
        target.poll(false);

        target.retarget(location);
        assert!(target.catalog().is_none());
        assert_eq!(changed_count(&target.poll(false)), 1);
        Ok(())
    }

    #[test]
    fn test_failed_poll_keeps_last_good_catalog() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let watched = dir.path().join("watched");
        fs::create_dir(&watched)?;
        fs::write(watched.join("keep.txt"), b"")?;
        let mut target = WatchTarget::new(Location::new(&watched)?, false);
        target.poll(false);

        fs::remove_dir_all(&watched)?;
        let events = target.poll(false);

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WatchEvent::PollFailed { .. }));
        assert!(matches!(events[1], WatchEvent::PollCompleted { .. }));
        assert_eq!(target.catalog().map(|c| c.len()), Some(1));
        assert_eq!(target.last_error().map(Error::kind), Some(ErrorKind::NotReadable));

        fs::create_dir(&watched)?;
        target.poll(false);
        assert!(target.last_error().is_none());
        Ok(())
    }

    #[derive(Default)]
    struct Recorder {
        changed: Vec<usize>,
        errors: usize,
        completed: usize,
    }

    impl CatalogObserver for Recorder {
        fn on_catalog_changed(&mut self, _target: TargetId, catalog: &Arc<EntryCatalog>) {
            self.changed.push(catalog.len());
        }

        fn on_poll_error(&mut self, _target: TargetId, _error: &Error) {
            self.errors += 1;
        }

        fn on_poll_completed(&mut self, _target: TargetId) {
            self.completed += 1;
        }
    }

    #[test]
    fn test_dispatch_routes_events_to_observer() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("one"), b"")?;
        let mut target = WatchTarget::new(Location::new(dir.path())?, false);
        let mut recorder = Recorder::default();

        for event in target.poll(false).iter().chain(target.poll(false).iter()) {
            assert_eq!(event.target(), target.id());
            event.dispatch(&mut recorder);
        }

        assert_eq!(recorder.changed, vec![1]);
        assert_eq!(recorder.errors, 0);
        assert_eq!(recorder.completed, 2);
        Ok(())
    }

    #[test]
    fn test_next_deadline_skips_elapsed_ticks() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);

        assert_eq!(
            next_deadline(start, interval, start + Duration::from_millis(10)),
            start + interval
        );
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_millis(350)),
            start + Duration::from_millis(400)
        );
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_millis(400)),
            start + Duration::from_millis(500)
        );
    }

    #[test]
    fn test_next_deadline_with_zero_interval_returns() {
        let start = Instant::now();
        let now = start + Duration::from_millis(30);

        assert_eq!(next_deadline(start, Duration::ZERO, now), now);
        assert_eq!(next_deadline(now, Duration::ZERO, start), now);
    }

    #[test]
    fn test_watcher_with_zero_interval_still_shuts_down() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let options = WatchOptions {
            interval: Duration::ZERO,
            ..WatchOptions::default()
        };
        let watcher = DirectoryWatcher::spawn(Location::new(dir.path())?, options)?;
        let events = watcher.subscribe();
        assert!(wait_for_catalog(&events, |_| true).is_some());

        let (done, dropped) = mpsc::channel();
        thread::spawn(move || {
            drop(watcher);
            done.send(()).ok();
        });
        assert!(dropped.recv_timeout(WAIT).is_ok());
        Ok(())
    }

    #[test]
    fn test_options_from_settings() {
        let settings = WatcherSettings {
            poll_interval_ms: 250,
            show_hidden: true,
            poll_timeout_ms: 0,
        };
        let options = WatchOptions::from(&settings);
        assert_eq!(options.interval, Duration::from_millis(250));
        assert!(options.show_hidden);
        assert_eq!(options.poll_timeout, None);

        let settings = WatcherSettings {
            poll_timeout_ms: 2000,
            ..settings
        };
        assert_eq!(
            WatchOptions::from(&settings).poll_timeout,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_watcher_thread_publishes_changes() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let watcher = DirectoryWatcher::spawn(Location::new(dir.path())?, fast_options())?;
        let events = watcher.subscribe();

        assert!(wait_for_catalog(&events, |catalog| catalog.is_empty()).is_some());

        fs::write(dir.path().join("arrived.txt"), b"")?;
        let catalog = wait_for_catalog(&events, |catalog| catalog.len() == 1)
            .expect("watcher should publish the new file");
        assert_eq!(catalog.entries()[0].name(), "arrived.txt");
        Ok(())
    }

    #[test]
    fn test_watcher_retarget_and_show_hidden() -> Result<(), anyhow::Error> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        fs::write(second.path().join("visible"), b"")?;
        fs::write(second.path().join(".hidden"), b"")?;
        let second_location = Location::new(second.path())?;

        let watcher = DirectoryWatcher::spawn(Location::new(first.path())?, fast_options())?;
        let events = watcher.subscribe();
        assert!(wait_for_catalog(&events, |_| true).is_some());

        watcher.retarget(second_location.clone());
        let catalog = wait_for_catalog(&events, |catalog| catalog.target() == &second_location)
            .expect("retarget should publish the new location");
        assert_eq!(catalog.len(), 1);

        watcher.set_show_hidden(true);
        let catalog = wait_for_catalog(&events, |catalog| catalog.show_hidden())
            .expect("hidden entries should be published");
        assert_eq!(catalog.len(), 2);
        Ok(())
    }

    #[test]
    fn test_late_subscriber_receives_current_catalog() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("present"), b"")?;
        let watcher = DirectoryWatcher::spawn(Location::new(dir.path())?, fast_options())?;

        let early = watcher.subscribe();
        assert!(wait_for_catalog(&early, |catalog| catalog.len() == 1).is_some());

        let late = watcher.subscribe();
        let replayed = late.recv_timeout(WAIT)?;
        assert!(matches!(
            replayed,
            WatchEvent::CatalogChanged { ref catalog, .. } if catalog.len() == 1
        ));
        assert_eq!(replayed.target(), watcher.id());
        Ok(())
    }

    #[test]
    fn test_watcher_with_poll_timeout_lists_normally() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("x"), b"")?;
        let options = WatchOptions {
            poll_timeout: Some(Duration::from_secs(2)),
            ..fast_options()
        };
        let watcher = DirectoryWatcher::spawn(Location::new(dir.path())?, options)?;
        let events = watcher.subscribe();

        assert!(wait_for_catalog(&events, |catalog| catalog.len() == 1).is_some());
        Ok(())
    }

    #[test]
    fn test_stuck_listing_times_out_and_skips_ticks() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let stall = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let options = WatchOptions {
            poll_timeout: Some(Duration::from_millis(50)),
            ..fast_options()
        };
        let watcher = DirectoryWatcher::spawn_with(
            Location::new(dir.path())?,
            options,
            stalling_lister(Arc::clone(&stall), Arc::clone(&calls)),
        )?;
        let events = watcher.subscribe();

        let error = wait_for_error(&events).expect("a stuck listing should time out");
        assert!(matches!(
            error,
            Error::NotReadable {
                kind: io::ErrorKind::TimedOut,
                ..
            }
        ));

        thread::sleep(Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        stall.store(false, Ordering::SeqCst);
        assert!(wait_for_catalog(&events, |catalog| catalog.is_empty()).is_some());
        assert!(calls.load(Ordering::SeqCst) >= 2);
        Ok(())
    }

    #[test]
    fn test_late_subscriber_receives_last_failure() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let missing = Location::new(dir.path().join("missing"))?;
        let watcher = DirectoryWatcher::spawn(missing, idle_options())?;

        let events = watcher.subscribe();
        let event = events.recv_timeout(WAIT)?;

        assert!(matches!(
            event,
            WatchEvent::PollFailed { ref error, .. } if error.kind() == ErrorKind::NotReadable
        ));
        Ok(())
    }

    #[test]
    fn test_queued_retarget_and_policy_apply_in_one_poll() -> Result<(), anyhow::Error> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        fs::write(second.path().join("visible"), b"")?;
        fs::write(second.path().join(".hidden"), b"")?;
        let second_location = Location::new(second.path())?;

        let stall = Arc::new(AtomicBool::new(true));
        let listings = Arc::new(Mutex::new(Vec::new()));
        let lister: Lister = {
            let stall = Arc::clone(&stall);
            let listings = Arc::clone(&listings);
            Arc::new(move |location: &Location, show_hidden: bool| {
                listings.lock().unwrap().push((location.clone(), show_hidden));
                while stall.load(Ordering::SeqCst) {
                    thread::sleep(TICK);
                }
                EntryCatalog::build(location, show_hidden)
            })
        };

        let watcher = DirectoryWatcher::spawn_with(Location::new(first.path())?, idle_options(), lister)?;
        let events = watcher.subscribe();

        let deadline = Instant::now() + WAIT;
        while listings.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(TICK);
        }

        watcher.retarget(second_location.clone());
        watcher.set_show_hidden(true);
        stall.store(false, Ordering::SeqCst);

        let catalog = wait_for_catalog(&events, |catalog| catalog.target() == &second_location)
            .expect("the queued retarget should publish");
        assert!(catalog.show_hidden());
        assert_eq!(catalog.len(), 2);

        let listings = listings.lock().unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[1], (second_location, true));
        Ok(())
    }

    #[test]
    fn test_subscriber_sees_catalogs_in_publication_order() -> Result<(), anyhow::Error> {
        let dir = TempDir::new()?;
        let options = WatchOptions {
            interval: Duration::from_millis(2),
            ..WatchOptions::default()
        };
        let watcher = DirectoryWatcher::spawn(Location::new(dir.path())?, options)?;
        let events = watcher.subscribe();

        for index in 0..20 {
            fs::write(dir.path().join(format!("file{}", index)), b"")?;
            thread::sleep(Duration::from_millis(3));
        }

        let mut sizes = Vec::new();
        while let Some(catalog) = wait_for_catalog(&events, |_| true) {
            sizes.push(catalog.len());
            if catalog.len() == 20 {
                break;
            }
        }

        assert_eq!(sizes.last(), Some(&20));
        assert!(sizes.windows(2).all(|pair| pair[0] < pair[1]));
        Ok(())
    }
}
