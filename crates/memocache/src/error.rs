//! Error types for memocache

use std::path::PathBuf;

/// Result type alias for memocache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cache itself
///
/// Failures of the cached computation are never wrapped here: they reach the
/// caller as the computation's own error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument could not be encoded into a stable key
    #[error("cannot fingerprint argument to '{operation}': {reason}")]
    UnfingerprintableArgument {
        /// Operation whose key was being derived
        operation: String,
        /// Why encoding failed
        reason: String,
    },

    /// Configuration values out of range
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read or parsed
    #[error("failed to load cache configuration from {path}: {reason}")]
    Config {
        /// Configuration file
        path: PathBuf,
        /// Read or parse failure
        reason: String,
    },

    /// Durable tier failure surfaced during construction or maintenance
    #[error(transparent)]
    Store(#[from] memostore::Error),
}
