//! Runs both stream workers side by side.
//!
//! The scheduler owns the pieces the two workers share (configuration, HTTP
//! connection pool, event channel and stop signal) and nothing else. Each
//! worker keeps its own back-off and dedup state, so a failing stream never
//! delays or blocks the other one.
//!
//! # Example
//!
//! ```no_run
//! use gkg_watch::{Config, StreamScheduler};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = StreamScheduler::new(Config::default())?;
//!
//! let mut events = scheduler.subscribe();
//! tokio::spawn(async move {
//!     loop {
//!         match events.recv().await {
//!             Ok(event) => println!("{:?}", event),
//!             Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
//!             Err(_) => break,
//!         }
//!     }
//! });
//!
//! let stop = scheduler.cancel_token();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
//!     stop.cancel();
//! });
//!
//! scheduler.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::error::Result;
use crate::pointer::build_client;
use crate::types::{Event, StreamId};
use crate::worker::{Sleeper, StreamWorker};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};


/// Capacity of the event channel; slow subscribers see `Lagged` beyond this
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Supervises the primary and translated stream workers
pub struct StreamScheduler {
    config: Arc<Config>,
    client: reqwest::Client,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl StreamScheduler {
    /// Validate `config` and build the shared HTTP client
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::error::Error::Config) for invalid settings,
    /// [`Error::Network`](crate::error::Error::Network) if the client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config.http)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            event_tx,
            cancel: CancellationToken::new(),
            sleeper: None,
        })
    }

    /// Replace the sleeper both workers use between cycles
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to worker events
    ///
    /// Subscribe before calling [`run`](Self::run) to observe the first cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops both workers when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask both workers to stop
    ///
    /// Workers observe the signal between cycles, during the cool-down sleep
    /// and while a request is in flight.
    pub fn shutdown(&self) {
        info!("stopping stream workers");
        self.cancel.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run both workers until the stop signal fires and both have exited
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::error::Error::Io) if the output directory
    /// cannot be created. Failures inside a poll cycle never surface here;
    /// they are reported through events and retried after back-off.
    pub async fn run(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        info!(
            output_dir = ?self.config.output_dir,
            interval_secs = self.config.polling.interval.as_secs(),
            max_interval_secs = self.config.polling.max_interval.as_secs(),
            extract = self.config.extract,
            "starting stream workers"
        );

        let mut handles = Vec::with_capacity(StreamId::ALL.len());
        for id in StreamId::ALL {
            let mut worker = StreamWorker::new(
                id,
                Arc::clone(&self.config),
                self.client.clone(),
                self.event_tx.clone(),
            );
            if let Some(sleeper) = &self.sleeper {
                worker = worker.with_sleeper(Arc::clone(sleeper));
            }
            worker.restore().await;

            let cancel = self.cancel.child_token();
            handles.push((id, tokio::spawn(worker.run(cancel))));
        }

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                error!(stream = %id, error = %e, "stream worker task failed");
            }
        }

        info!("all stream workers stopped");
        Ok(())
    }
}
