//! Housekeeper - log sweeper and rename watcher.
//!
//! This crate provides two housekeeping duties that both end in a plain-text
//! mail notification.
//!
//! # Overview
//!
//! The daemon watches one or more directory roots for rename events. Every
//! root gets its own watch task; all of them feed a single bounded queue that
//! one dispatcher drains, sending one mail per event.
//!
//! The sweep is a one-shot batch job: it reclaims files in a log directory
//! that exceed a size threshold by deleting and recreating them empty, then
//! sends one summary mail listing what was reclaimed.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`daemon`]: Wiring of watch tasks, queue and dispatcher
//! - [`dispatcher`]: Queue consumer that sends one mail per event
//! - [`error`]: Error types for housekeeper operations
//! - [`mailer`]: Mail transport trait and SMTP implementation
//! - [`notification`]: Plain-text message composition
//! - [`queue`]: Bounded fan-in event queue
//! - [`sweep`]: Size-threshold reclamation of log files
//! - [`types`]: Event and file types
//! - [`watcher`]: Per-root rename watching with bind retry

pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod mailer;
pub mod notification;
pub mod queue;
pub mod sweep;
pub mod types;
pub mod watcher;

pub use config::{Config, ConfigError, MailConfig};
pub use daemon::DaemonSettings;
pub use dispatcher::{DispatchError, EventDispatcher};
pub use error::{HousekeeperError, Result};
pub use mailer::{MailTransport, SmtpCredential, SmtpMailer, TransportError};
pub use notification::{compose, NotificationMessage, RENAME_SUBJECT, SWEEP_SUBJECT};
pub use queue::{event_queue, EventConsumer, EventProducer, QueueStats};
pub use sweep::{notify_sweep, SizeSweep, SweepError, SweepReport};
pub use types::{FileEvent, FileEventKind, OversizedFile};
pub use watcher::{EventSource, NotifySource, RetryPolicy, WatchError, WatchTask};
