//! Error types for gkg-watch
//!
//! Every error a poll cycle can hit is recoverable: the worker turns it into a
//! [`CycleOutcome`](crate::types::CycleOutcome) and backs off. Only
//! configuration errors surface to the caller, and only at construction time.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gkg-watch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gkg-watch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "interval")
        key: Option<String>,
    },

    /// Transport failure: connection refused, timeout, non-2xx status or a
    /// body stream that broke off mid-transfer
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Pointer file content could not be parsed into a record
    #[error("malformed pointer: {reason}")]
    MalformedPointer {
        /// What was wrong with the pointer content
        reason: String,
    },

    /// Downloaded byte count differs from the size advertised by the pointer
    #[error("size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Archive URL
        url: String,
        /// Size advertised by the pointer
        expected: u64,
        /// Bytes actually written
        actual: u64,
    },

    /// Downloaded content digest differs from the hash advertised by the pointer
    #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Archive URL
        url: String,
        /// Hex digest advertised by the pointer
        expected: String,
        /// Hex digest of the bytes written
        actual: String,
    },

    /// Archive could not be opened or read as a ZIP container
    #[error("corrupt archive {}: {}", .archive.display(), .reason)]
    CorruptArchive {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (config or dedup state file)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::MalformedPointer`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedPointer {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::Config`] tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Returns true if the error means the feed itself is unusable rather than
    /// the transport or local storage
    ///
    /// Only pointer parse failures count. Size and hash mismatches are treated
    /// as transport problems since a retry usually fixes them.
    pub fn is_malformed_feed(&self) -> bool {
        matches!(self, Error::MalformedPointer { .. })
    }
}
