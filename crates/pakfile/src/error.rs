//! Error types for archive operations

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::archive::Direction;

pub type Result<T> = std::result::Result<T, PackError>;

#[derive(Debug, Error)]
pub enum PackError {
    /// Bad magic, version, truncated file or an entry pointing past the end.
    #[error("Invalid archive: {0}")]
    Format(String),

    #[error("Archive is closed")]
    Closed,

    #[error("Archive is opened read-only")]
    ReadOnly,

    /// Another stream already holds the archive's file handle.
    #[error("An {0} stream is already open on this archive")]
    StreamConflict(Direction),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    /// The copy loop ran out of patience before moving every byte.
    #[error("Transfer of {path} stalled after {moved} of {expected} bytes")]
    TruncatedTransfer {
        path: String,
        moved: u64,
        expected: u64,
    },

    #[error("Invalid path pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    #[error("Invalid entry {path}: {reason}")]
    InvalidEntry { path: String, reason: String },

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Couldn't create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PackError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format(reason.into())
    }
}
