//! Core data types shared by the watch pipeline and the size sweep.
//!
//! [`FileEvent`] flows from the watch tasks through the event queue to the
//! dispatcher. [`OversizedFile`] only lives for the duration of one sweep.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a filesystem change reported by an event source.
///
/// Only [`FileEventKind::Rename`] is forwarded by the watch tasks; the other
/// categories exist so sources can describe what they saw before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// A file or directory was moved or renamed.
    Rename,
    Create,
    Modify,
    Remove,
    Other,
}

impl FileEventKind {
    /// Returns true for the kinds the daemon reacts to.
    #[must_use]
    pub fn is_rename(self) -> bool {
        matches!(self, Self::Rename)
    }
}

/// A single observed filesystem change.
///
/// Events have no identity beyond path, kind and arrival order: two renames
/// of the same path are two events and produce two notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    /// Absolute path the change was reported for.
    pub path: PathBuf,

    /// What kind of change it was.
    pub kind: FileEventKind,

    /// When the event source handed the event to us.
    pub observed_at: DateTime<Utc>,
}

impl FileEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: Utc::now(),
        }
    }

    /// Shorthand for a rename event.
    #[must_use]
    pub fn rename(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Rename)
    }
}

/// A top-level file found over the size threshold during a sweep scan.
///
/// The size is the one observed when the directory was listed; it is never
/// refreshed during the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OversizedFile {
    pub path: PathBuf,
    pub size: u64,
}

impl OversizedFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
