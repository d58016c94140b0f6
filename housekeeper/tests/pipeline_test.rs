//! Integration tests for the watch → queue → dispatch pipeline.
//!
//! These tests drive the daemon with an in-memory event source and a mail
//! transport that records every message, so they exercise the real task
//! wiring without touching the OS watcher or the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use housekeeper::daemon::{self, DaemonSettings};
use housekeeper::error::HousekeeperError;
use housekeeper::mailer::{MailTransport, TransportError};
use housekeeper::notification::{NotificationMessage, RENAME_SUBJECT};
use housekeeper::types::FileEvent;
use housekeeper::watcher::{EventSource, RetryPolicy, SourceItem, WatchError};
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Test Helpers
// =============================================================================

/// Event source with a fixed list of renames per root.
///
/// Roots without a script refuse to bind. With `keep_open` the source holds
/// on to each sink so the watch tasks never end on their own.
#[derive(Default)]
struct InMemorySource {
    scripts: HashMap<PathBuf, Vec<String>>,
    keep_open: bool,
    held: Mutex<Vec<mpsc::Sender<SourceItem>>>,
}

impl InMemorySource {
    fn with_root(mut self, root: &str, paths: &[&str]) -> Self {
        self.scripts.insert(
            PathBuf::from(root),
            paths.iter().map(|p| (*p).to_string()).collect(),
        );
        self
    }
}

impl EventSource for InMemorySource {
    type Binding = ();

    fn bind(&self, root: &Path, sink: mpsc::Sender<SourceItem>) -> Result<(), WatchError> {
        let Some(paths) = self.scripts.get(root) else {
            return Err(WatchError::DirectoryNotFound(root.to_path_buf()));
        };
        for path in paths {
            sink.try_send(Ok(FileEvent::rename(path.as_str())))
                .expect("script larger than binding buffer");
        }
        if self.keep_open {
            self.held.lock().unwrap().push(sink);
        }
        Ok(())
    }
}

/// Records every delivered message; optionally fails the n-th call (1-based).
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<NotificationMessage>>,
    fail_on: Option<usize>,
}

impl RecordingTransport {
    fn bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.body().join("\n"))
            .collect()
    }
}

impl MailTransport for RecordingTransport {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_on == Some(sent.len() + 1) {
            return Err(TransportError::Delivery("connection reset".to_string()));
        }
        sent.push(message.clone());
        Ok(())
    }
}

fn settings(roots: &[&str]) -> DaemonSettings {
    DaemonSettings {
        watched_roots: roots.iter().map(PathBuf::from).collect(),
        from_address: "ops@example.com".to_string(),
        to_address: "oncall@example.com".to_string(),
        queue_capacity: 8192,
        bind_retry: RetryPolicy::default(),
        isolate_roots: false,
    }
}

/// Asserts that the items of `expected` appear in `bodies` in the same order.
fn assert_subsequence(bodies: &[String], expected: &[&str]) {
    let positions: Vec<usize> = expected
        .iter()
        .map(|e| {
            bodies
                .iter()
                .position(|b| b == e)
                .unwrap_or_else(|| panic!("{e} was never sent"))
        })
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "per-root order broken: {bodies:?}"
    );
}

// =============================================================================
// Pipeline Tests
// =============================================================================

/// Two roots, one rename each: two mails, one path per body.
#[tokio::test]
async fn test_two_roots_one_rename_each() {
    let source = Arc::new(
        InMemorySource::default()
            .with_root("/R1", &["/R1/x"])
            .with_root("/R2", &["/R2/y"]),
    );
    let transport = Arc::new(RecordingTransport::default());

    daemon::run(
        settings(&["/R1", "/R2"]),
        source,
        Arc::clone(&transport),
        std::future::pending(),
    )
    .await
    .expect("daemon ends once both sources close");

    let mut bodies = transport.bodies();
    bodies.sort();
    assert_eq!(bodies, ["/R1/x", "/R2/y"]);

    for message in transport.sent.lock().unwrap().iter() {
        assert_eq!(message.subject(), RENAME_SUBJECT);
        assert_eq!(message.body().len(), 1);
    }
}

/// N events from one root produce N sends in order, duplicates included.
#[tokio::test]
async fn test_every_event_sent_once_in_root_order() {
    let paths = ["/R1/a", "/R1/b", "/R1/a", "/R1/c"];
    let source = Arc::new(InMemorySource::default().with_root("/R1", &paths));
    let transport = Arc::new(RecordingTransport::default());

    daemon::run(
        settings(&["/R1"]),
        source,
        Arc::clone(&transport),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(transport.bodies(), paths);
}

/// Interleaving across roots is free, but each root keeps its own order.
#[tokio::test]
async fn test_per_root_order_preserved_across_interleaving() {
    let r1: Vec<String> = (0..50).map(|i| format!("/R1/{i}")).collect();
    let r2: Vec<String> = (0..50).map(|i| format!("/R2/{i}")).collect();
    let r1_refs: Vec<&str> = r1.iter().map(String::as_str).collect();
    let r2_refs: Vec<&str> = r2.iter().map(String::as_str).collect();

    let source = Arc::new(
        InMemorySource::default()
            .with_root("/R1", &r1_refs)
            .with_root("/R2", &r2_refs),
    );
    let transport = Arc::new(RecordingTransport::default());

    daemon::run(
        settings(&["/R1", "/R2"]),
        source,
        Arc::clone(&transport),
        std::future::pending(),
    )
    .await
    .unwrap();

    let bodies = transport.bodies();
    assert_eq!(bodies.len(), 100);
    assert_subsequence(&bodies, &r1_refs);
    assert_subsequence(&bodies, &r2_refs);
}

/// A tiny queue forces producers to wait; nothing is dropped.
#[tokio::test]
async fn test_backpressure_loses_no_events() {
    let roots = ["/A", "/B", "/C"];
    let mut source = InMemorySource::default();
    let mut total = 0;
    for root in roots {
        let paths: Vec<String> = (0..300).map(|i| format!("{root}/{i}")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        source = source.with_root(root, &refs);
        total += paths.len();
    }
    let transport = Arc::new(RecordingTransport::default());

    let mut settings = settings(&roots);
    settings.queue_capacity = 2;

    daemon::run(settings, Arc::new(source), Arc::clone(&transport), std::future::pending())
        .await
        .unwrap();

    assert_eq!(transport.bodies().len(), total);
}

/// The first failed delivery stops the daemon with a dispatch error.
#[tokio::test]
async fn test_transport_failure_is_fatal() {
    let source = Arc::new(
        InMemorySource {
            keep_open: true,
            ..Default::default()
        }
        .with_root("/R1", &["/R1/a", "/R1/b", "/R1/c"]),
    );
    let transport = Arc::new(RecordingTransport {
        fail_on: Some(2),
        ..Default::default()
    });

    let err = daemon::run(
        settings(&["/R1"]),
        source,
        Arc::clone(&transport),
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HousekeeperError::Dispatch(_)), "got {err:?}");
    assert_eq!(transport.bodies(), ["/R1/a"]);
}

/// With the default policy a root that cannot be bound brings the daemon
/// down on the first failed attempt.
#[tokio::test]
async fn test_unbindable_root_is_fatal_by_default() {
    let source = Arc::new(
        InMemorySource {
            keep_open: true,
            ..Default::default()
        }
        .with_root("/good", &["/good/a"]),
    );
    let transport = Arc::new(RecordingTransport::default());

    let err = daemon::run(
        settings(&["/good", "/missing"]),
        source,
        transport,
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(
            err,
            HousekeeperError::Watch(WatchError::BindExhausted { attempts: 1, .. })
        ),
        "got {err:?}"
    );
}

/// With isolated roots the failing root is dropped and the rest keep going.
#[tokio::test]
async fn test_isolated_roots_survive_a_bad_root() {
    let source = Arc::new(InMemorySource::default().with_root("/good", &["/good/a", "/good/b"]));
    let transport = Arc::new(RecordingTransport::default());

    let mut settings = settings(&["/missing", "/good"]);
    settings.isolate_roots = true;

    daemon::run(settings, source, Arc::clone(&transport), std::future::pending())
        .await
        .expect("bad root is isolated");

    assert_eq!(transport.bodies(), ["/good/a", "/good/b"]);
}

/// Isolation dropping every root is an error, not a clean exit.
#[tokio::test]
async fn test_isolated_roots_all_dropped_is_fatal() {
    let transport = Arc::new(RecordingTransport::default());

    let mut settings = settings(&["/missing-a", "/missing-b"]);
    settings.isolate_roots = true;

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        daemon::run(
            settings,
            Arc::new(InMemorySource::default()),
            Arc::clone(&transport),
            std::future::pending(),
        ),
    )
    .await
    .expect("daemon stops once every root is dropped")
    .unwrap_err();

    assert!(matches!(err, HousekeeperError::NoRootsLeft(2)), "got {err:?}");
    assert!(transport.bodies().is_empty());
}

/// With open sources the daemon runs until the shutdown future resolves.
#[tokio::test]
async fn test_runs_until_shutdown() {
    let source = Arc::new(
        InMemorySource {
            keep_open: true,
            ..Default::default()
        }
        .with_root("/R1", &["/R1/a", "/R1/b"]),
    );
    let transport = Arc::new(RecordingTransport::default());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(daemon::run(
        settings(&["/R1"]),
        source,
        Arc::clone(&transport),
        async move {
            let _ = stop_rx.await;
        },
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.bodies().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both events delivered");

    assert!(!handle.is_finished(), "daemon should keep running");
    stop_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon stops after shutdown")
        .expect("daemon task did not panic");
    assert!(result.is_ok());
    assert_eq!(transport.bodies(), ["/R1/a", "/R1/b"]);
}

/// No roots: nothing to watch, the daemon returns at once.
#[tokio::test]
async fn test_no_roots_returns_immediately() {
    let transport = Arc::new(RecordingTransport::default());

    tokio::time::timeout(
        Duration::from_secs(1),
        daemon::run(
            settings(&[]),
            Arc::new(InMemorySource::default()),
            Arc::clone(&transport),
            std::future::pending(),
        ),
    )
    .await
    .expect("returns without waiting")
    .unwrap();

    assert!(transport.bodies().is_empty());
}
