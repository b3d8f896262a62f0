//! Watch both GKG streams until Ctrl+C
//!
//! ```text
//! cargo run --example watch                 # defaults, writes to ./data
//! cargo run --example watch -- config.json  # settings from a JSON file
//! RUST_LOG=gkg_watch=debug cargo run --example watch
//! ```

use gkg_watch::{Config, Event, StreamScheduler, run_with_shutdown};
use std::path::Path;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gkg_watch=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json_file(Path::new(&path))?,
        None => Config::default(),
    };

    let scheduler = StreamScheduler::new(config)?;

    let events = scheduler.subscribe();
    tokio::spawn(print_events(events, |line| println!("{}", line)));

    run_with_shutdown(scheduler).await?;
    Ok(())
}

/// Print events until the channel closes, skipping over any backlog dropped
/// while the printer fell behind
async fn print_events(mut events: broadcast::Receiver<Event>, mut out: impl FnMut(String)) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                out(format!("(skipped {} events)", skipped));
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            Event::ArchiveDownloaded {
                stream, path, bytes, ..
            } => out(format!(
                "[{}] downloaded {} ({} bytes)",
                stream,
                path.display(),
                bytes
            )),
            Event::ArchiveExtracted {
                stream, path, files,
            } => out(format!(
                "[{}] extracted {} file(s) into {}",
                stream,
                files,
                path.display()
            )),
            Event::CycleCompleted {
                stream,
                outcome,
                cause: Some(cause),
                next_interval,
                ..
            } => out(format!(
                "[{}] {:?}: {} (retrying in {}s)",
                stream,
                outcome,
                cause,
                next_interval.as_secs()
            )),
            Event::StreamStopped { stream } => out(format!("[{}] stopped", stream)),
            _ => {}
        }
    }
}
