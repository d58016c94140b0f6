//! The monitoring daemon: watch tasks, event queue and dispatcher wired
//! together.
//!
//! One [`WatchTask`] is spawned per root and one [`EventDispatcher`] drains
//! the shared queue. The daemon then waits for the first of:
//!
//! - the shutdown future resolving (normal termination),
//! - the dispatcher failing (fatal),
//! - a watch task failing (fatal, unless roots are isolated and the failure
//!   is a bind that ran out of retries),
//! - isolation dropping the last root (fatal),
//! - the dispatcher finishing because every watch task has ended.
//!
//! Remaining tasks are aborted before returning.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatcher::EventDispatcher;
use crate::error::{HousekeeperError, Result};
use crate::mailer::MailTransport;
use crate::queue::event_queue;
use crate::watcher::{EventSource, RetryPolicy, WatchError, WatchTask};

/// Daemon settings, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub watched_roots: Vec<PathBuf>,
    pub from_address: String,
    pub to_address: String,
    pub queue_capacity: usize,
    pub bind_retry: RetryPolicy,
    pub isolate_roots: bool,
}

impl DaemonSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            watched_roots: config.watched_roots.clone(),
            from_address: config.mail.from_address.clone(),
            to_address: config.mail.to_address.clone(),
            queue_capacity: config.queue_capacity,
            bind_retry: config.bind_retry,
            isolate_roots: config.isolate_roots,
        }
    }
}

/// Runs the daemon until `shutdown` resolves or a fatal error occurs.
///
/// # Errors
///
/// Returns the first fatal watch or dispatch error, or
/// [`HousekeeperError::Task`] if a task panicked.
pub async fn run<S, T, F>(
    settings: DaemonSettings,
    source: Arc<S>,
    transport: T,
    shutdown: F,
) -> Result<()>
where
    S: EventSource,
    T: MailTransport + 'static,
    F: Future<Output = ()>,
{
    if settings.watched_roots.is_empty() {
        warn!("No watched roots configured, nothing to monitor");
        return Ok(());
    }

    let (producer, consumer) = event_queue(settings.queue_capacity);
    let stats = consumer.stats();

    let mut watchers = JoinSet::new();
    for root in &settings.watched_roots {
        let task = WatchTask::new(
            root.clone(),
            Arc::clone(&source),
            producer.clone(),
            settings.bind_retry,
        );
        let root = root.clone();
        watchers.spawn(async move { (root, task.run().await) });
    }
    // Only the watch tasks hold producers now: the queue closes when the
    // last of them ends.
    drop(producer);

    let mut dispatcher = tokio::spawn(
        EventDispatcher::new(
            consumer,
            transport,
            settings.from_address.clone(),
            settings.to_address.clone(),
        )
        .run(),
    );

    info!(
        roots = settings.watched_roots.len(),
        queue_capacity = settings.queue_capacity,
        "Daemon running"
    );

    tokio::pin!(shutdown);

    let mut dropped = 0;
    let outcome = loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received");
                break Ok(());
            }

            joined = &mut dispatcher => {
                break match joined {
                    Ok(Ok(delivered)) => {
                        // No producer is left, so every watch task has
                        // returned; settle the ones not yet joined.
                        let mut finished = Ok(());
                        while let Some(joined) = watchers.join_next().await {
                            if let Some(result) = settle_watch_task(joined, &settings, &mut dropped) {
                                finished = result;
                                break;
                            }
                        }
                        if finished.is_ok() {
                            info!(delivered, "All watch tasks ended, daemon stopping");
                        }
                        finished
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "Dispatcher failed");
                        Err(e.into())
                    }
                    Err(e) => Err(task_failure("dispatcher", &e)),
                };
            }

            Some(joined) = watchers.join_next() => {
                if let Some(result) = settle_watch_task(joined, &settings, &mut dropped) {
                    break result;
                }
            }
        }
    };

    watchers.abort_all();
    dispatcher.abort();

    info!(
        produced = stats.produced(),
        dequeued = stats.dequeued(),
        in_flight = stats.in_flight(),
        "Daemon stopped"
    );

    outcome
}

/// Convenience wrapper that takes everything from [`Config`].
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_config<S, T, F>(
    config: &Config,
    source: Arc<S>,
    transport: T,
    shutdown: F,
) -> Result<()>
where
    S: EventSource,
    T: MailTransport + 'static,
    F: Future<Output = ()>,
{
    run(DaemonSettings::from_config(config), source, transport, shutdown).await
}

type WatchOutcome = std::result::Result<(PathBuf, std::result::Result<(), WatchError>), JoinError>;

/// Logs a finished watch task. Returns `Some` when it ends the daemon.
fn settle_watch_task(
    joined: WatchOutcome,
    settings: &DaemonSettings,
    dropped: &mut usize,
) -> Option<Result<()>> {
    match joined {
        Ok((root, Ok(()))) => {
            info!(root = %root.display(), "Watch task ended");
            None
        }
        Ok((root, Err(e)))
            if settings.isolate_roots && matches!(e, WatchError::BindExhausted { .. }) =>
        {
            *dropped += 1;
            error!(
                root = %root.display(),
                error = %e,
                dropped = *dropped,
                "Dropping root, continuing with the remaining roots"
            );
            if *dropped == settings.watched_roots.len() {
                error!("Every watched root was dropped, nothing left to monitor");
                return Some(Err(HousekeeperError::NoRootsLeft(*dropped)));
            }
            None
        }
        Ok((root, Err(e))) => {
            error!(root = %root.display(), error = %e, "Watch task failed");
            Some(Err(e.into()))
        }
        Err(e) => Some(Err(task_failure("watch", &e))),
    }
}

fn task_failure(task: &str, e: &JoinError) -> HousekeeperError {
    error!(task, error = %e, "Task panicked or was cancelled");
    HousekeeperError::Task(format!("{task} task: {e}"))
}
