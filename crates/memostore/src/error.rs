//! Error types for memostore

use std::io;
use std::path::PathBuf;

/// Result type alias for memostore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for durable tier operations
///
/// Readers never see `Corrupt`: a damaged entry is dropped and reported as
/// absent. The variant exists for the scanning and decoding layers, which log
/// it before discarding the entry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// An on-disk entry could not be read back
    #[error("corrupt entry {path}: {reason}")]
    Corrupt {
        /// Blob or meta file that failed validation
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Entry can never fit under the tier's byte cap
    #[error("entry too large: {size} bytes (max {max})")]
    EntryTooLarge {
        /// Payload size of the rejected entry
        size: u64,
        /// Configured cap
        max: u64,
    },

    /// Metadata record could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
