//! Per-stream poll loop
//!
//! A [`StreamWorker`] owns everything one feed needs: its fetcher, downloader,
//! dedup tracker and back-off state. Nothing is shared with the other stream
//! except the HTTP connection pool and the event channel, so a failing feed
//! can never stretch the interval of a healthy one.
//!
//! Each cycle walks `Fetching -> Parsing -> CheckingDedup -> Downloading ->
//! Extracting` and ends in `Cooling`, where the worker sleeps for the
//! interval chosen by its [`BackoffPolicy`]. The stop signal is observed both
//! while a cycle is in flight and while sleeping.

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::config::Config;
use crate::dedup::{AcceptedArchive, DedupStore, DedupTracker};
use crate::download::ArchiveDownloader;
use crate::error::Result;
use crate::extraction::extract_archive;
use crate::pointer::{PointerFetcher, parse_pointer};
use crate::types::{CycleOutcome, Event, StreamId};
use crate::utils::archive_file_name;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

/// Where a worker currently is in its cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, not yet running
    Idle,
    /// Requesting the pointer file
    Fetching,
    /// Parsing the pointer body
    Parsing,
    /// Comparing the record against the last accepted archive
    CheckingDedup,
    /// Streaming the archive to disk
    Downloading,
    /// Unpacking the archive
    Extracting,
    /// Waiting for the next cycle
    Cooling,
    /// Stop signal observed, loop exited
    Stopped,
}

/// Waits between cycles
///
/// The production implementation is [`TokioSleeper`]. Tests substitute a
/// sleeper that records the requested durations instead of waiting them out.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Independent poll loop for one stream
pub struct StreamWorker {
    id: StreamId,
    config: Arc<Config>,
    fetcher: PointerFetcher,
    downloader: ArchiveDownloader,
    policy: BackoffPolicy,
    backoff: BackoffState,
    dedup: DedupTracker,
    store: Option<DedupStore>,
    sleeper: Arc<dyn Sleeper>,
    state: WorkerState,
    event_tx: broadcast::Sender<Event>,
}

impl StreamWorker {
    /// Create a worker for `id` sharing `client` and `event_tx` with its sibling
    pub fn new(
        id: StreamId,
        config: Arc<Config>,
        client: reqwest::Client,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let policy = BackoffPolicy::from_config(&config.polling);
        let store = config
            .persistence
            .state_dir
            .as_deref()
            .map(|dir| DedupStore::for_stream(dir, id));

        Self {
            id,
            fetcher: PointerFetcher::new(client.clone(), config.http.pointer_timeout),
            downloader: ArchiveDownloader::new(client, config.http.download_timeout),
            backoff: policy.initial_state(),
            policy,
            dedup: DedupTracker::new(),
            store,
            sleeper: Arc::new(TokioSleeper),
            state: WorkerState::Idle,
            event_tx,
            config,
        }
    }

    /// Replace the sleeper used while cooling down
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Seed the dedup tracker from the persisted state, if persistence is enabled
    ///
    /// An unreadable state file is logged and ignored; the worker then starts
    /// as if nothing had been accepted yet.
    pub async fn restore(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load().await {
            Ok(Some(entry)) => {
                info!(stream = %self.id, key = %entry.key, url = %entry.archive_url, "restored last accepted archive");
                self.dedup = DedupTracker::with_key(Some(entry.key));
            }
            Ok(None) => {
                debug!(stream = %self.id, path = ?store.path(), "no persisted dedup state");
            }
            Err(e) => {
                warn!(stream = %self.id, path = ?store.path(), error = %e, "ignoring unreadable dedup state");
            }
        }
    }

    /// Stream this worker polls
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current position in the cycle
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Current back-off bookkeeping
    pub fn backoff(&self) -> BackoffState {
        self.backoff
    }

    /// Dedup tracker (read-only)
    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    /// Run one cycle, update the back-off state and emit [`Event::CycleCompleted`]
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = match self.poll_once().await {
            Ok(new_archive) => CycleOutcome::Success { new_archive },
            Err(e) => {
                let outcome = CycleOutcome::from_error(&e);
                match &outcome {
                    CycleOutcome::MalformedFeed { .. } => {
                        warn!(stream = %self.id, error = %e, "malformed pointer file")
                    }
                    _ => error!(stream = %self.id, error = %e, "poll cycle failed"),
                }
                outcome
            }
        };

        self.backoff = self.policy.next(&self.backoff, &outcome);
        debug!(
            stream = %self.id,
            outcome = ?outcome.kind(),
            consecutive_failures = self.backoff.consecutive_failures,
            next_interval_secs = self.backoff.current_interval.as_secs_f64(),
            "cycle completed"
        );

        self.emit_event(Event::CycleCompleted {
            stream: self.id,
            outcome: outcome.kind(),
            cause: outcome.cause().map(str::to_string),
            next_interval: self.backoff.current_interval,
            at: Utc::now(),
        });

        outcome
    }

    /// Poll until `cancel` fires
    ///
    /// An in-flight cycle is dropped on cancellation, which also discards any
    /// partially downloaded archive.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(stream = %self.id, pointer_url = %self.config.stream(self.id).pointer_url, "stream worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_cycle() => {}
            }

            self.state = WorkerState::Cooling;
            let wait = self.policy.sleep_duration(&self.backoff);
            let sleeper = Arc::clone(&self.sleeper);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleeper.sleep(wait) => {}
            }
        }

        self.state = WorkerState::Stopped;
        info!(stream = %self.id, "stream worker stopped");
        self.emit_event(Event::StreamStopped { stream: self.id });
    }

    /// One fetch/parse/dedup/download/extract pass
    ///
    /// Returns `Ok(false)` when the pointer still names the last accepted
    /// archive. The dedup tracker is only updated once every step succeeded,
    /// so a failed download or extraction is retried on the next cycle.
    async fn poll_once(&mut self) -> Result<bool> {
        let stream = self.config.stream(self.id);

        self.state = WorkerState::Fetching;
        let response = self.fetcher.fetch(&stream.pointer_url).await?;

        self.state = WorkerState::Parsing;
        let record = parse_pointer(&response.body, stream.archive_suffix.as_deref())?;

        self.state = WorkerState::CheckingDedup;
        if !self.dedup.is_new(&record) {
            debug!(stream = %self.id, url = %record.archive_url, "no new archive");
            return Ok(false);
        }

        self.state = WorkerState::Downloading;
        let file_name = archive_file_name(&record.archive_url);
        let archive_dir = self.config.archive_dir(self.id, &file_name);
        let archive = self.downloader.download(&record, &archive_dir).await?;
        self.emit_event(Event::ArchiveDownloaded {
            stream: self.id,
            archive_url: record.archive_url.clone(),
            path: archive.path.clone(),
            bytes: archive.bytes,
        });

        if self.config.extract {
            self.state = WorkerState::Extracting;
            let extract_dir = self.config.extract_dir(self.id, &file_name);
            let files = extract_archive(&archive.path, &extract_dir).await?;
            info!(stream = %self.id, dest = ?extract_dir, files = files.len(), "archive extracted");
            self.emit_event(Event::ArchiveExtracted {
                stream: self.id,
                path: extract_dir,
                files: files.len(),
            });
        }

        self.dedup.accept(&record);
        if let Some(store) = &self.store
            && let Err(e) = store
                .save(&AcceptedArchive::from_record(self.id, &record))
                .await
        {
            warn!(stream = %self.id, path = ?store.path(), error = %e, "failed to persist dedup state");
        }

        info!(stream = %self.id, url = %record.archive_url, "new archive accepted");
        Ok(true)
    }

    fn emit_event(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}
