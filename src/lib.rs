//! # gkg-watch
//!
//! Unattended watcher for the GDELT Global Knowledge Graph feeds.
//!
//! GDELT republishes two small pointer files every fifteen minutes, one for
//! the English stream and one for the machine-translated stream. Each names
//! the latest archive together with its size and digest. gkg-watch polls both
//! pointers independently, downloads every archive it has not seen yet,
//! verifies it, places it atomically and unpacks it next to the archive
//! folder. Failing streams back off exponentially without affecting each
//! other.
//!
//! ## Layout on disk
//!
//! ```text
//! <output_dir>/<YYYY>/rawdata_en/<archive>.gkg.csv.zip
//! <output_dir>/<YYYY>/csv_en/<archive>.gkg.csv
//! <output_dir>/<YYYY>/rawdata_tr/<archive>.translation.gkg.csv.zip
//! <output_dir>/<YYYY>/csv_tr/<archive>.translation.gkg.csv
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use gkg_watch::{Config, StreamScheduler, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         output_dir: "gkg".into(),
//!         ..Default::default()
//!     };
//!
//!     let scheduler = StreamScheduler::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         loop {
//!             match events.recv().await {
//!                 Ok(event) => println!("Event: {:?}", event),
//!                 Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
//!                 Err(_) => break,
//!             }
//!         }
//!     });
//!
//!     // Poll until SIGINT/SIGTERM
//!     run_with_shutdown(scheduler).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-stream back-off policy
pub mod backoff;
/// Configuration types
pub mod config;
/// Duplicate suppression and its persisted state
pub mod dedup;
/// Verified archive download
pub mod download;
/// Error types
pub mod error;
/// ZIP extraction
pub mod extraction;
/// Pointer file fetch and parse
pub mod pointer;
/// Runs both stream workers
pub mod scheduler;
/// Core types
pub mod types;
/// Path and file name helpers
pub mod utils;
/// Per-stream poll loop
pub mod worker;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, BackoffState};
pub use config::{Config, HttpConfig, PersistenceConfig, PollingConfig, StreamConfig};
pub use dedup::{DedupStore, DedupTracker};
pub use download::{ArchiveDownloader, DownloadedArchive};
pub use error::{Error, Result};
pub use extraction::{ZipExtractor, extract_archive};
pub use pointer::{PointerFetcher, parse_pointer};
pub use scheduler::StreamScheduler;
pub use types::{CycleOutcome, Event, OutcomeKind, PointerRecord, StreamId};
pub use worker::{Sleeper, StreamWorker, TokioSleeper, WorkerState};

/// Run the scheduler until SIGTERM or SIGINT, then stop both workers
///
/// In-flight downloads are abandoned; their temp files are removed and no
/// partial archive is left under its final name.
///
/// # Platform behavior
///
/// - **Unix:** listens for both SIGTERM and SIGINT (Ctrl+C).
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use gkg_watch::{Config, StreamScheduler, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scheduler = StreamScheduler::new(Config::default())?;
///     run_with_shutdown(scheduler).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(scheduler: StreamScheduler) -> Result<()> {
    let run = scheduler.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => {}
    }

    scheduler.shutdown();
    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let register = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(handler) => Some(handler),
        Err(e) => {
            tracing::warn!(signal = name, error = %e, "could not register signal handler");
            None
        }
    };
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("no signal handler registered, falling back to ctrl_c");
        tokio::signal::ctrl_c().await.ok();
        return;
    }

    let received = tokio::select! {
        _ = next_signal(&mut sigterm) => "SIGTERM",
        _ = next_signal(&mut sigint) => "SIGINT",
    };
    tracing::info!(signal = received, "shutdown signal received");
}

/// Resolves on the next delivery of `handler`; never resolves without one
#[cfg(unix)]
async fn next_signal(handler: &mut Option<tokio::signal::unix::Signal>) {
    match handler {
        Some(handler) => {
            handler.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
