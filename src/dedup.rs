//! Duplicate suppression for accepted archives
//!
//! [`DedupTracker`] is the in-memory comparison every cycle goes through. It
//! never does I/O. [`DedupStore`] is the optional file-backed collaborator a
//! worker uses to seed the tracker at start-up and to record each accepted
//! archive, so a restart does not repeat the last download.

use crate::error::Result;
use crate::types::{PointerRecord, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remembers the key of the last accepted archive of one stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DedupTracker {
    last_accepted_key: Option<String>,
}

impl DedupTracker {
    /// Empty tracker: every record is new
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded with a previously accepted key
    pub fn with_key(key: Option<String>) -> Self {
        Self {
            last_accepted_key: key,
        }
    }

    /// Returns true unless `record` has the same key as the last accepted archive
    pub fn is_new(&self, record: &PointerRecord) -> bool {
        self.last_accepted_key.as_deref() != Some(record.key())
    }

    /// Remember `record` as accepted
    pub fn accept(&mut self, record: &PointerRecord) {
        self.last_accepted_key = Some(record.key().to_string());
    }

    /// Key of the last accepted archive
    pub fn last_accepted_key(&self) -> Option<&str> {
        self.last_accepted_key.as_deref()
    }
}

/// Persisted record of the last accepted archive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedArchive {
    /// Stream the archive belongs to
    pub stream: StreamId,
    /// Dedup key (hash or URL)
    pub key: String,
    /// Archive URL
    pub archive_url: String,
    /// When the archive was accepted
    pub accepted_at: DateTime<Utc>,
}

impl AcceptedArchive {
    /// Build the entry for a freshly accepted record
    pub fn from_record(stream: StreamId, record: &PointerRecord) -> Self {
        Self {
            stream,
            key: record.key().to_string(),
            archive_url: record.archive_url.clone(),
            accepted_at: Utc::now(),
        }
    }
}

/// JSON file holding one stream's [`AcceptedArchive`]
///
/// Each stream gets its own file (`<dir>/<label>.json`), so the two workers
/// never write the same path.
#[derive(Clone, Debug)]
pub struct DedupStore {
    path: PathBuf,
}

impl DedupStore {
    /// Store for `stream` inside `dir`
    pub fn for_stream(dir: &Path, stream: StreamId) -> Self {
        Self {
            path: dir.join(format!("{}.json", stream.label())),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored entry; a missing file is not an error
    pub async fn load(&self) -> Result<Option<AcceptedArchive>> {
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored entry
    ///
    /// Writes a sibling temp file and renames it over the target so a crash
    /// never leaves a half-written state file.
    pub async fn save(&self, entry: &AcceptedArchive) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(entry)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = ?self.path, key = %entry.key, "dedup state saved");
        Ok(())
    }
}
