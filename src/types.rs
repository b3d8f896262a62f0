//! Core types for gkg-watch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Identity of one of the two polled feeds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    /// English-language stream (`lastupdate.txt`)
    Primary,
    /// Machine-translated multilingual stream (`lastupdate-translation.txt`)
    Translated,
}

impl StreamId {
    /// Both streams, in scheduling order
    pub const ALL: [StreamId; 2] = [StreamId::Primary, StreamId::Translated];

    /// Short tag used in log fields and state files
    pub fn label(&self) -> &'static str {
        match self {
            StreamId::Primary => "eng",
            StreamId::Translated => "trans",
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a pointer file: where the latest archive lives and how to check it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRecord {
    /// Absolute URL of the archive
    pub archive_url: String,

    /// Size in bytes advertised by the feed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,

    /// Lower-case hex digest advertised by the feed (MD5 or SHA-256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
}

impl PointerRecord {
    /// Create a record with only a URL
    pub fn new(archive_url: impl Into<String>) -> Self {
        Self {
            archive_url: archive_url.into(),
            expected_size: None,
            expected_hash: None,
        }
    }

    /// Set the expected size
    pub fn with_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Set the expected hash
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into().to_ascii_lowercase());
        self
    }

    /// Deduplication key: the hash when the feed provides one, otherwise the URL
    pub fn key(&self) -> &str {
        self.expected_hash.as_deref().unwrap_or(&self.archive_url)
    }
}

/// Result of a single poll cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cycle completed; `new_archive` is false when the pointer was unchanged
    Success {
        /// Whether a new archive was downloaded (and extracted, if enabled)
        new_archive: bool,
    },
    /// Network, storage or integrity failure; retried after back-off
    TransientError {
        /// Human-readable cause
        cause: String,
    },
    /// Pointer content could not be parsed
    MalformedFeed {
        /// Human-readable cause
        cause: String,
    },
}

impl CycleOutcome {
    /// Classify an error raised somewhere in the cycle
    pub fn from_error(err: &Error) -> Self {
        if err.is_malformed_feed() {
            CycleOutcome::MalformedFeed {
                cause: err.to_string(),
            }
        } else {
            CycleOutcome::TransientError {
                cause: err.to_string(),
            }
        }
    }

    /// Flat kind, without the cause
    pub fn kind(&self) -> OutcomeKind {
        match self {
            CycleOutcome::Success { new_archive: true } => OutcomeKind::Success,
            CycleOutcome::Success { new_archive: false } => OutcomeKind::NoNewArchive,
            CycleOutcome::TransientError { .. } => OutcomeKind::TransientError,
            CycleOutcome::MalformedFeed { .. } => OutcomeKind::MalformedFeed,
        }
    }

    /// Cause text for failed cycles
    pub fn cause(&self) -> Option<&str> {
        match self {
            CycleOutcome::Success { .. } => None,
            CycleOutcome::TransientError { cause } | CycleOutcome::MalformedFeed { cause } => {
                Some(cause)
            }
        }
    }

    /// Returns true for either success variant
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Success { .. })
    }
}

/// Outcome kind carried by [`Event::CycleCompleted`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A new archive was accepted
    Success,
    /// The pointer still names the last accepted archive
    NoNewArchive,
    /// Transient failure
    TransientError,
    /// Malformed pointer content
    MalformedFeed,
}

/// Event emitted by the stream workers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A poll cycle finished
    CycleCompleted {
        /// Stream that ran the cycle
        stream: StreamId,
        /// What happened
        outcome: OutcomeKind,
        /// Error text for failed cycles
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
        /// How long the stream waits before its next cycle
        #[serde(with = "duration_millis")]
        next_interval: Duration,
        /// When the cycle finished
        at: DateTime<Utc>,
    },

    /// An archive was committed under its final name
    ArchiveDownloaded {
        /// Stream the archive belongs to
        stream: StreamId,
        /// Source URL
        archive_url: String,
        /// Final path on disk
        path: PathBuf,
        /// Size on disk
        bytes: u64,
    },

    /// An archive was unpacked
    ArchiveExtracted {
        /// Stream the archive belongs to
        stream: StreamId,
        /// Directory the members were written to
        path: PathBuf,
        /// Number of files written
        files: usize,
    },

    /// A worker observed the stop signal and exited
    StreamStopped {
        /// Stream that stopped
        stream: StreamId,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
