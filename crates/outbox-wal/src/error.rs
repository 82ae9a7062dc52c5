// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the WAL and commit store (§7).

use std::io;

/// Errors surfaced by [`crate::wal::Wal`] operations.
#[derive(thiserror::Error, Debug)]
pub enum WalError {
    /// Persistent I/O failure (create/open/write/fsync/rename).
    #[error("wal I/O error: {0}")]
    Io(#[from] io::Error),

    /// `append` observed on-disk usage at or above `max_disk_usage_mb`.
    #[error("disk usage limit reached")]
    DiskFull,

    /// The caller's context was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The background writer task is no longer running.
    #[error("wal writer task is no longer running")]
    WriterGone,
}

/// Errors surfaced by [`crate::commit::CommitStore`] operations.
#[derive(thiserror::Error, Debug)]
pub enum CommitError {
    /// Persistent I/O failure (write/fsync/rename), not a structural read failure.
    #[error("commit store I/O error: {0}")]
    Io(#[from] io::Error),
}
