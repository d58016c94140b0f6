//! Bounded fan-in queue between the watch tasks and the dispatcher.
//!
//! Every watch task holds a clone of the [`EventProducer`]; the dispatcher
//! owns the single [`EventConsumer`]. A full queue makes producers wait, so
//! events are never dropped to make room. Order is FIFO per producer; how
//! producers interleave is up to the scheduler.
//!
//! Both halves share a [`QueueStats`] so callers can check that every
//! produced event was dequeued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::FileEvent;

/// The consumer is gone; the event that could not be queued is handed back.
#[derive(Error, Debug)]
#[error("event queue closed")]
pub struct QueueClosed(pub FileEvent);

/// Counters shared by both halves of a queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    produced: AtomicU64,
    dequeued: AtomicU64,
}

impl QueueStats {
    /// Events accepted into the queue so far.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    /// Events handed to the consumer so far.
    #[must_use]
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Acquire)
    }

    /// Events accepted but not yet dequeued.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.produced().saturating_sub(self.dequeued())
    }
}

/// Creates a queue holding at most `capacity` events.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        EventProducer {
            tx,
            stats: Arc::clone(&stats),
        },
        EventConsumer { rx, stats },
    )
}

/// Producer half; cheap to clone, one clone per watch task.
#[derive(Debug, Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<FileEvent>,
    stats: Arc<QueueStats>,
}

impl EventProducer {
    /// Queues an event, waiting for space if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the consumer has been dropped.
    pub async fn push(&self, event: FileEvent) -> Result<(), QueueClosed> {
        self.tx
            .send(event)
            .await
            .map_err(|mpsc::error::SendError(event)| QueueClosed(event))?;
        self.stats.produced.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Returns true once the consumer is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half, owned by the dispatcher.
#[derive(Debug)]
pub struct EventConsumer {
    rx: mpsc::Receiver<FileEvent>,
    stats: Arc<QueueStats>,
}

impl EventConsumer {
    /// Waits for the next event.
    ///
    /// Returns `None` once every producer has been dropped and the queue is
    /// drained.
    pub async fn next(&mut self) -> Option<FileEvent> {
        let event = self.rx.recv().await?;
        self.stats.dequeued.fetch_add(1, Ordering::AcqRel);
        trace!(path = %event.path.display(), "Dequeued event");
        Some(event)
    }

    /// Maximum number of events the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rx.max_capacity()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}
