//! Rename watching for configured roots.
//!
//! Each configured root gets one [`WatchTask`]. A task binds an
//! [`EventSource`] to its root, forwards every rename event it receives into
//! the shared event queue, and rebinds whenever the binding reports an error.
//! By default a root that cannot be bound at all is fatal for its task, while
//! a broken binding is rebound indefinitely; see [`RetryPolicy`].
//!
//! # Architecture
//!
//! The production source, [`NotifySource`], uses the [`notify`] crate. Its
//! callback runs on the backend's own thread, so it only classifies the raw
//! event and pushes it through a per-binding channel with `blocking_send`.
//! A full channel therefore slows the backend down instead of dropping
//! events. The async task on the other end owns all queue interaction.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use housekeeper::queue::event_queue;
//! use housekeeper::watcher::{NotifySource, RetryPolicy, WatchTask};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (producer, mut consumer) = event_queue(8192);
//!     let task = WatchTask::new(
//!         PathBuf::from("/srv/reports"),
//!         Arc::new(NotifySource::default()),
//!         producer,
//!         RetryPolicy::default(),
//!     );
//!     tokio::spawn(task.run());
//!
//!     while let Some(event) = consumer.next().await {
//!         println!("renamed: {}", event.path.display());
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::queue::EventProducer;
use crate::types::{FileEvent, FileEventKind};

/// Capacity of the channel between one binding and its watch task.
const BINDING_BUFFER: usize = 1024;

/// Jitter factor (±25%) applied to bind retry delays.
const JITTER_FACTOR: f64 = 0.25;

/// Default delay between bind attempts.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur while watching a root.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The OS watch primitive refused the binding.
    #[error("failed to bind watch: {0}")]
    Bind(#[from] notify::Error),

    /// The root does not exist or is inaccessible.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// An established binding reported an error and must be rebound.
    #[error("watch stream error: {0}")]
    Stream(String),

    /// The retry policy ran out of bind attempts.
    #[error("gave up watching {root} after {attempts} failed bind attempts: {last}")]
    BindExhausted {
        root: PathBuf,
        attempts: u32,
        #[source]
        last: Box<WatchError>,
    },

    /// The event queue consumer is gone.
    #[error("failed to send event: queue closed")]
    ChannelClosed,
}

/// What a binding pushes to its watch task: an event or a stream error.
pub type SourceItem = std::result::Result<FileEvent, WatchError>;

/// A filesystem change notifier that can be bound to a root.
///
/// While the returned binding is alive the source pushes items into `sink`.
/// Dropping the binding stops delivery. A source that drops `sink` while the
/// binding is alive signals that it will produce nothing more.
pub trait EventSource: Send + Sync + 'static {
    /// Handle that keeps the watch alive.
    type Binding: Send + 'static;

    /// Registers interest in rename events under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be established.
    fn bind(
        &self,
        root: &Path,
        sink: mpsc::Sender<SourceItem>,
    ) -> std::result::Result<Self::Binding, WatchError>;
}

/// How a watch task retries a failed bind.
///
/// The first bind of a root gets `initial_attempts` tries; running out of
/// them is fatal for the task. Once a binding has been established, a broken
/// binding is rebound with up to `max_rebinds` consecutive failures, `None`
/// meaning forever. A successful bind resets the failure count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Base delay between attempts.
    pub interval: Duration,

    /// Attempts allowed before the first successful bind.
    pub initial_attempts: u32,

    /// Consecutive failed rebinds allowed after a binding broke.
    pub max_rebinds: Option<u32>,

    /// Random spread applied to `interval`, as a fraction of it.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Creates a policy with the default ±25% jitter.
    #[must_use]
    pub fn new(interval: Duration, initial_attempts: u32, max_rebinds: Option<u32>) -> Self {
        Self {
            interval,
            initial_attempts,
            max_rebinds,
            jitter: JITTER_FACTOR,
        }
    }

    /// Fails on the first unsuccessful bind, rebinds forever without waiting.
    ///
    /// A binding that keeps breaking keeps its task spinning; prefer a
    /// non-zero interval outside tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            interval: Duration::ZERO,
            initial_attempts: 1,
            max_rebinds: None,
            jitter: 0.0,
        }
    }

    /// Returns true if another attempt may follow `failures` consecutive
    /// failures. `established` is whether the root has been bound before.
    #[must_use]
    pub fn allows_retry(&self, established: bool, failures: u32) -> bool {
        if established {
            self.max_rebinds.is_none_or(|max| failures < max)
        } else {
            failures < self.initial_attempts
        }
    }

    /// Delay before the next attempt, with jitter applied.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.interval.is_zero() || self.jitter <= 0.0 {
            return self.interval;
        }
        let mut rng = rand::rng();
        let jitter_range = self.interval.as_secs_f64() * self.jitter;
        let jitter = rng.random_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((self.interval.as_secs_f64() + jitter).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL, 1, None)
    }
}

/// Watches one root and feeds its rename events into the event queue.
#[derive(Debug)]
pub struct WatchTask<S> {
    root: PathBuf,
    source: Arc<S>,
    queue: EventProducer,
    retry: RetryPolicy,
}

impl<S: EventSource> WatchTask<S> {
    #[must_use]
    pub fn new(root: PathBuf, source: Arc<S>, queue: EventProducer, retry: RetryPolicy) -> Self {
        Self {
            root,
            source,
            queue,
            retry,
        }
    }

    /// Returns the root this task watches.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the bind/forward/rebind loop.
    ///
    /// Returns `Ok(())` only if the source closes its stream. Under normal
    /// operation the task runs until it is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::BindExhausted`] when the retry policy gives up,
    /// which with the default policy means the first bind failed, or
    /// [`WatchError::ChannelClosed`] when the queue consumer is gone.
    pub async fn run(self) -> std::result::Result<(), WatchError> {
        let mut failures: u32 = 0;
        let mut established = false;

        loop {
            let (tx, mut rx) = mpsc::channel::<SourceItem>(BINDING_BUFFER);

            let binding = match self.source.bind(&self.root, tx) {
                Ok(binding) => {
                    failures = 0;
                    established = true;
                    info!(root = %self.root.display(), "Watching for rename events");
                    binding
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if !self.retry.allows_retry(established, failures) {
                        error!(
                            root = %self.root.display(),
                            attempts = failures,
                            established,
                            error = %e,
                            "Giving up on watch root"
                        );
                        return Err(WatchError::BindExhausted {
                            root: self.root,
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.retry.next_delay();
                    warn!(
                        root = %self.root.display(),
                        attempt = failures,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Failed to bind watch, retrying"
                    );
                    sleep(delay).await;
                    continue;
                }
            };

            let stream_error = loop {
                match rx.recv().await {
                    Some(Ok(event)) => self.forward(event).await?,
                    Some(Err(e)) => break e,
                    None => {
                        info!(root = %self.root.display(), "Event source closed, watch ending");
                        return Ok(());
                    }
                }
            };

            // Unbind first, then hand over whatever the old binding had
            // already delivered.
            drop(binding);
            while let Ok(item) = rx.try_recv() {
                if let Ok(event) = item {
                    self.forward(event).await?;
                }
            }

            warn!(
                root = %self.root.display(),
                error = %stream_error,
                "Watch binding failed, rebinding"
            );
        }
    }

    async fn forward(&self, event: FileEvent) -> std::result::Result<(), WatchError> {
        if !event.kind.is_rename() {
            trace!(kind = ?event.kind, path = %event.path.display(), "Ignoring event kind");
            return Ok(());
        }

        debug!(
            root = %self.root.display(),
            path = %event.path.display(),
            "Rename detected"
        );
        self.queue
            .push(event)
            .await
            .map_err(|_| WatchError::ChannelClosed)
    }
}

/// [`EventSource`] backed by the platform's recommended [`notify`] watcher.
///
/// Watches are recursive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySource;

impl EventSource for NotifySource {
    type Binding = RecommendedWatcher;

    fn bind(
        &self,
        root: &Path,
        sink: mpsc::Sender<SourceItem>,
    ) -> std::result::Result<RecommendedWatcher, WatchError> {
        if !root.exists() {
            return Err(WatchError::DirectoryNotFound(root.to_path_buf()));
        }

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                handle_notify_event(res, &sink);
            },
            Config::default(),
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;

        debug!(root = %root.display(), "Started recursive rename watch");

        Ok(watcher)
    }
}

/// Maps a notify event kind onto the categories the daemon distinguishes.
///
/// Backends that can pair the halves of a rename report it up to three
/// times (`From`, `To`, `Both`). Only the old-path half counts, plus `Any`
/// from backends that cannot tell the halves apart.
fn classify(kind: &EventKind) -> FileEventKind {
    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Any)) => {
            FileEventKind::Rename
        }
        EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Other,
        EventKind::Create(_) => FileEventKind::Create,
        EventKind::Modify(_) => FileEventKind::Modify,
        EventKind::Remove(_) => FileEventKind::Remove,
        _ => FileEventKind::Other,
    }
}

/// Runs on the notify backend thread. Each rename yields one event.
fn handle_notify_event(res: notify::Result<Event>, sink: &mpsc::Sender<SourceItem>) {
    let item: SourceItem = match res {
        Ok(event) => {
            let kind = classify(&event.kind);
            if !kind.is_rename() {
                trace!(kind = ?event.kind, "Ignoring notify event");
                return;
            }
            let Some(path) = event.paths.into_iter().next() else {
                trace!("Rename event without a path");
                return;
            };
            Ok(FileEvent::new(path, kind))
        }
        Err(e) => {
            error!(error = %e, "File watcher error");
            Err(WatchError::Stream(e.to_string()))
        }
    };

    if sink.blocking_send(item).is_err() {
        debug!("Watch task no longer listening, dropping notify event");
    }
}
