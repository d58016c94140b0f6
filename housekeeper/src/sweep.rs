//! One-shot reclamation of oversized files in a log directory.
//!
//! A sweep lists the top level of a directory once, picks the regular files
//! strictly larger than the threshold, and for each one deletes it and
//! recreates it empty. Sizes come from that single listing; nothing is
//! re-stat'ed during the sweep.
//!
//! File operations are best-effort: a failed delete or recreate is logged,
//! the path is left out of the affected list, and the sweep moves on. Only a
//! failure to list the directory aborts the sweep.
//!
//! ```text
//! Scan -> Filter -> Reclaim (Delete -> Create, per candidate) -> Notify? -> Done
//! ```
//!
//! # Example
//!
//! ```no_run
//! use housekeeper::sweep::SizeSweep;
//!
//! let report = SizeSweep::new("/var/log", 1_000_000_000).run()?;
//! for path in &report.affected {
//!     println!("reclaimed {}", path.display());
//! }
//! # Ok::<(), housekeeper::sweep::SweepError>(())
//! ```

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mailer::{MailTransport, TransportError};
use crate::notification::{compose, NotificationMessage, SWEEP_SUBJECT};
use crate::types::OversizedFile;

/// Errors that abort a sweep.
#[derive(Error, Debug)]
pub enum SweepError {
    /// The target directory could not be listed.
    #[error("failed to list {dir}: {source}")]
    ListDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Files were reclaimed but the summary mail could not be delivered.
    #[error("failed to send sweep notification: {0}")]
    Notify(#[from] TransportError),
}

/// Type of a directory entry as seen by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Other,
}

/// One top-level entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: OsString,
    pub size: u64,
    pub entry_type: EntryType,
}

/// Directory and file primitives used by the sweep.
pub trait Filesystem {
    /// Lists the direct children of `dir`, in the order they should be
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be read.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Creates an empty file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::AlreadyExists`] if something already exists
    /// at `path`, or any other I/O error.
    fn create_empty(&self, path: &Path) -> io::Result<()>;
}

/// [`Filesystem`] backed by `std::fs`. Listings are sorted by file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Failed to get metadata, skipping entry"
                    );
                    continue;
                }
            };

            let entry_type = if metadata.is_dir() {
                EntryType::Dir
            } else if metadata.is_file() {
                EntryType::File
            } else {
                EntryType::Other
            };

            entries.push(DirEntryInfo {
                name: entry.file_name(),
                size: metadata.len(),
                entry_type,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_empty(&self, path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(drop)
    }
}

/// Which half of a reclaim failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimStage {
    Delete,
    Create,
}

/// A candidate that could not be reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimFailure {
    pub path: PathBuf,
    pub stage: ReclaimStage,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub dir: PathBuf,
    pub threshold_bytes: u64,
    /// Files found over the threshold, in processing order.
    pub candidates: Vec<OversizedFile>,
    /// Files deleted and recreated empty.
    pub affected: Vec<PathBuf>,
    pub failures: Vec<ReclaimFailure>,
}

impl SweepReport {
    /// Returns true if nothing was reclaimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }

    /// The summary notification, or `None` when nothing was reclaimed.
    #[must_use]
    pub fn notification(&self, from: &str, to: &str) -> Option<NotificationMessage> {
        if self.affected.is_empty() {
            return None;
        }
        Some(compose(
            from,
            to,
            SWEEP_SUBJECT,
            self.affected
                .iter()
                .map(|path| path.to_string_lossy().into_owned()),
        ))
    }
}

/// A configured sweep over one directory.
#[derive(Debug, Clone)]
pub struct SizeSweep<F = StdFilesystem> {
    dir: PathBuf,
    threshold_bytes: u64,
    fs: F,
}

impl SizeSweep<StdFilesystem> {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, threshold_bytes: u64) -> Self {
        Self::with_filesystem(dir, threshold_bytes, StdFilesystem)
    }
}

impl<F: Filesystem> SizeSweep<F> {
    #[must_use]
    pub fn with_filesystem(dir: impl Into<PathBuf>, threshold_bytes: u64, fs: F) -> Self {
        Self {
            dir: dir.into(),
            threshold_bytes,
            fs,
        }
    }

    /// Lists the directory once and returns the regular files strictly over
    /// the threshold.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::ListDir`] if the directory cannot be listed.
    pub fn scan(&self) -> Result<Vec<OversizedFile>, SweepError> {
        let entries = self.fs.list_dir(&self.dir).map_err(|source| SweepError::ListDir {
            dir: self.dir.clone(),
            source,
        })?;

        debug!(dir = %self.dir.display(), entries = entries.len(), "Scanned directory");

        Ok(entries
            .into_iter()
            .filter(|entry| entry.entry_type == EntryType::File)
            .filter(|entry| entry.size > self.threshold_bytes)
            .map(|entry| OversizedFile {
                path: self.dir.join(&entry.name),
                size: entry.size,
            })
            .collect())
    }

    /// Deletes and recreates one candidate.
    fn reclaim(&self, file: &OversizedFile) -> Result<(), ReclaimFailure> {
        let path = file.path();

        self.fs.remove_file(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to delete oversized file");
            ReclaimFailure {
                path: path.to_path_buf(),
                stage: ReclaimStage::Delete,
                error: e.to_string(),
            }
        })?;

        match self.fs.create_empty(path) {
            Ok(()) => Ok(()),
            // Recreated by someone else between delete and create.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "File already recreated");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to recreate file");
                Err(ReclaimFailure {
                    path: path.to_path_buf(),
                    stage: ReclaimStage::Create,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Runs scan, filter and reclaim. Does not send any mail.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::ListDir`] if the directory cannot be listed.
    pub fn run(&self) -> Result<SweepReport, SweepError> {
        let candidates = self.scan()?;

        info!(
            dir = %self.dir.display(),
            threshold_bytes = self.threshold_bytes,
            candidates = candidates.len(),
            "Starting sweep"
        );

        let mut affected = Vec::new();
        let mut failures = Vec::new();

        for file in &candidates {
            match self.reclaim(file) {
                Ok(()) => {
                    info!(path = %file.path.display(), size = file.size, "Reclaimed file");
                    affected.push(file.path.clone());
                }
                Err(failure) => failures.push(failure),
            }
        }

        Ok(SweepReport {
            dir: self.dir.clone(),
            threshold_bytes: self.threshold_bytes,
            candidates,
            affected,
            failures,
        })
    }
}

/// Sends the summary mail for `report`, if anything was reclaimed.
///
/// Returns whether a mail was sent.
///
/// # Errors
///
/// Returns the transport error if delivery fails.
pub async fn notify_sweep<T: MailTransport>(
    report: &SweepReport,
    transport: &T,
    from: &str,
    to: &str,
) -> Result<bool, TransportError> {
    let Some(message) = report.notification(from, to) else {
        info!(dir = %report.dir.display(), "No file has been deleted");
        return Ok(false);
    };

    transport.send(&message).await?;
    info!(files = report.affected.len(), to = %to, "Sweep notification sent");
    Ok(true)
}
