//! Error types for Housekeeper.
//!
//! Each module owns an error enum for its own failures; this module gathers
//! them into [`HousekeeperError`], which is what the daemon and the binary
//! deal in.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatcher::DispatchError;
use crate::mailer::TransportError;
use crate::sweep::SweepError;
use crate::watcher::WatchError;

/// Errors that can occur during housekeeper operations.
///
/// # Examples
///
/// ```ignore
/// use housekeeper::error::HousekeeperError;
///
/// fn load() -> Result<(), HousekeeperError> {
///     let config = Config::from_env()?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum HousekeeperError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A watch task stopped.
    #[error("file watch error: {0}")]
    Watch(#[from] WatchError),

    /// The dispatcher could not deliver a notification.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Mail delivery failed outside the dispatcher.
    #[error("mail error: {0}")]
    Transport(#[from] TransportError),

    /// The size sweep failed.
    #[error("sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// Root isolation dropped every watched root.
    #[error("no watched root could be bound ({0} dropped)")]
    NoRootsLeft(usize),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

/// A specialized `Result` type for housekeeper operations.
pub type Result<T> = std::result::Result<T, HousekeeperError>;
