//! Single consumer of the event queue.
//!
//! For every dequeued event the dispatcher composes one notification whose
//! body is the event path and hands it to the mail transport, waiting for the
//! result before taking the next event. There is no batching: a burst of N
//! renames produces N mails.
//!
//! A transport failure ends the dispatcher with an error and no further
//! events are consumed.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::mailer::{MailTransport, TransportError};
use crate::notification::{compose, RENAME_SUBJECT};
use crate::queue::EventConsumer;
use crate::types::FileEvent;

/// Errors that stop the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The notification for `path` could not be delivered.
    #[error("failed to deliver notification for {path}: {source}")]
    Transport {
        path: PathBuf,
        #[source]
        source: TransportError,
    },
}

/// Drains the event queue into the mail transport.
#[derive(Debug)]
pub struct EventDispatcher<T> {
    queue: EventConsumer,
    transport: T,
    from: String,
    to: String,
    delivered: u64,
}

impl<T: MailTransport> EventDispatcher<T> {
    #[must_use]
    pub fn new(queue: EventConsumer, transport: T, from: String, to: String) -> Self {
        Self {
            queue,
            transport,
            from,
            to,
            delivered: 0,
        }
    }

    /// Number of notifications delivered so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Consumes events until the queue closes.
    ///
    /// The queue only closes once every watch task has ended, so in the
    /// daemon this runs for the life of the process. Returns the number of
    /// notifications delivered.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Transport`] on the first failed delivery.
    pub async fn run(mut self) -> Result<u64, DispatchError> {
        info!(
            to = %self.to,
            capacity = self.queue.capacity(),
            "Dispatcher started"
        );

        while let Some(event) = self.queue.next().await {
            self.dispatch(event).await?;
        }

        info!(delivered = self.delivered, "Event queue closed, dispatcher stopping");
        Ok(self.delivered)
    }

    /// Sends the notification for one event.
    async fn dispatch(&mut self, event: FileEvent) -> Result<(), DispatchError> {
        let path_line = event.path.to_string_lossy().into_owned();
        let message = compose(&self.from, &self.to, RENAME_SUBJECT, [path_line]);

        debug!(
            path = %event.path.display(),
            observed_at = %event.observed_at,
            "Sending rename notification"
        );

        if let Err(e) = self.transport.send(&message).await {
            error!(path = %event.path.display(), error = %e, "Failed to deliver notification");
            return Err(DispatchError::Transport {
                path: event.path,
                source: e,
            });
        }

        self.delivered += 1;
        Ok(())
    }
}
