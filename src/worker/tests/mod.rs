use super::*;
use crate::types::OutcomeKind;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE_ROUTE: &str = "/gdeltv2/20250724144500.gkg.csv.zip";
const POINTER_ROUTE: &str = "/gdeltv2/lastupdate.txt";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ::zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = ::zip::write::FileOptions::default();
    for (name, content) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn pointer_body(server: &MockServer, archive: &[u8]) -> String {
    format!(
        "150383 297a16b493de7cf6ca809a7cc31d0b93 {uri}/gdeltv2/20250724144500.export.CSV.zip\n\
         {size} {md5:x} {uri}{route}\n",
        uri = server.uri(),
        size = archive.len(),
        md5 = md5::compute(archive),
        route = ARCHIVE_ROUTE,
    )
}

fn test_config(server: &MockServer, output: &Path) -> Config {
    let mut config = Config {
        output_dir: output.to_path_buf(),
        ..Config::default()
    };
    config.primary.pointer_url = format!("{}{}", server.uri(), POINTER_ROUTE);
    config.http.download_timeout = Duration::from_secs(10);
    config
}

fn test_worker(config: Config) -> (StreamWorker, broadcast::Receiver<Event>) {
    let (tx, rx) = broadcast::channel(64);
    let client = crate::pointer::build_client(&config.http).unwrap();
    let worker = StreamWorker::new(StreamId::Primary, Arc::new(config), client, tx);
    (worker, rx)
}

async fn mount_pointer(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path(POINTER_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

fn archive_path(output: &Path) -> std::path::PathBuf {
    output
        .join("2025")
        .join("rawdata_en")
        .join("20250724144500.gkg.csv.zip")
}

/// Records requested sleeps and returns almost immediately
#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// run_cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_new_archive_then_no_op() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("20250724144500.gkg.csv", b"GKGRECORDID\tDATE\n")]);
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (mut worker, mut rx) = test_worker(test_config(&server, output.path()));
    assert_eq!(worker.state(), WorkerState::Idle);

    let first = worker.run_cycle().await;
    assert_eq!(first, CycleOutcome::Success { new_archive: true });
    assert_eq!(std::fs::read(archive_path(output.path())).unwrap(), archive);
    assert_eq!(
        std::fs::read(
            output
                .path()
                .join("2025/csv_en/20250724144500.gkg.csv")
        )
        .unwrap(),
        b"GKGRECORDID\tDATE\n"
    );

    let second = worker.run_cycle().await;
    assert_eq!(second, CycleOutcome::Success { new_archive: false });
    assert_eq!(worker.backoff().consecutive_failures, 0);

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Event::CycleCompleted { .. } => "cycle",
            Event::ArchiveDownloaded { .. } => "downloaded",
            Event::ArchiveExtracted { .. } => "extracted",
            Event::StreamStopped { .. } => "stopped",
        })
        .collect();
    assert_eq!(kinds, vec!["downloaded", "extracted", "cycle", "cycle"]);

    match &events[3] {
        Event::CycleCompleted {
            outcome,
            next_interval,
            ..
        } => {
            assert_eq!(*outcome, OutcomeKind::NoNewArchive);
            assert_eq!(*next_interval, Duration::from_secs(120));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_extract_disabled_only_downloads() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("a.csv", b"x")]);
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(&server, output.path());
    config.extract = false;
    let (mut worker, _rx) = test_worker(config);

    assert!(worker.run_cycle().await.is_success());
    assert!(archive_path(output.path()).exists());
    assert!(!output.path().join("2025/csv_en").exists());
}

#[tokio::test]
async fn test_malformed_feed_backoff() {
    for (ignore_malformed, expected) in [(true, 120), (false, 240)] {
        let server = MockServer::start().await;
        mount_pointer(&server, String::new()).await;

        let output = TempDir::new().unwrap();
        let mut config = test_config(&server, output.path());
        config.polling.ignore_malformed = ignore_malformed;
        let (mut worker, mut rx) = test_worker(config);

        let outcome = worker.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::MalformedFeed { .. }));
        assert_eq!(
            worker.backoff().current_interval,
            Duration::from_secs(expected)
        );

        match drain(&mut rx).pop() {
            Some(Event::CycleCompleted { outcome, cause, .. }) => {
                assert_eq!(outcome, OutcomeKind::MalformedFeed);
                assert!(cause.unwrap().contains("empty"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_size_mismatch_is_retried() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("a.csv", b"x")]);
    // Pointer advertises more bytes than the server sends
    let body = format!(
        "{} {:x} {}{}\n",
        archive.len() + 100,
        md5::compute(&archive),
        server.uri(),
        ARCHIVE_ROUTE
    );
    mount_pointer(&server, body).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(2)
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (mut worker, _rx) = test_worker(test_config(&server, output.path()));

    let first = worker.run_cycle().await;
    assert!(matches!(first, CycleOutcome::TransientError { .. }));
    assert!(!archive_path(output.path()).exists());
    assert!(worker.dedup().last_accepted_key().is_none());
    assert_eq!(worker.backoff().current_interval, Duration::from_secs(240));

    let second = worker.run_cycle().await;
    assert!(matches!(second, CycleOutcome::TransientError { .. }));
    assert_eq!(worker.backoff().consecutive_failures, 2);
    assert_eq!(worker.backoff().current_interval, Duration::from_secs(480));
}

#[tokio::test]
async fn test_corrupt_archive_leaves_dedup_untouched() {
    let server = MockServer::start().await;
    let archive = b"PK\x03\x04 definitely not a zip".to_vec();
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (mut worker, _rx) = test_worker(test_config(&server, output.path()));

    let first = worker.run_cycle().await;
    assert!(matches!(first, CycleOutcome::TransientError { .. }));
    assert!(worker.dedup().last_accepted_key().is_none());
    // Verified archive stays in place for the next attempt
    assert!(archive_path(output.path()).exists());

    // Next cycle reuses the archive and tries extraction again
    let second = worker.run_cycle().await;
    assert!(matches!(second, CycleOutcome::TransientError { .. }));
    assert_eq!(worker.backoff().consecutive_failures, 2);
}

#[tokio::test]
async fn test_recovery_resets_backoff() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("a.csv", b"x")]);
    Mock::given(method("GET"))
        .and(path(POINTER_ROUTE))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (mut worker, _rx) = test_worker(test_config(&server, output.path()));

    worker.run_cycle().await;
    worker.run_cycle().await;
    assert_eq!(worker.backoff().current_interval, Duration::from_secs(480));

    let outcome = worker.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Success { new_archive: true });
    assert_eq!(worker.backoff().consecutive_failures, 0);
    assert_eq!(worker.backoff().current_interval, Duration::from_secs(120));
}

#[tokio::test]
async fn test_persisted_dedup_survives_restart() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("a.csv", b"x")]);
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(&server, output.path());
    config.persistence.state_dir = Some(output.path().join("state"));

    let (mut first, _rx) = test_worker(config.clone());
    assert_eq!(
        first.run_cycle().await,
        CycleOutcome::Success { new_archive: true }
    );
    assert!(output.path().join("state/eng.json").exists());

    // Remove the archive so only the state file can prevent a second download
    std::fs::remove_file(archive_path(output.path())).unwrap();

    let (mut second, _rx) = test_worker(config);
    second.restore().await;
    assert!(second.dedup().last_accepted_key().is_some());
    assert_eq!(
        second.run_cycle().await,
        CycleOutcome::Success { new_archive: false }
    );
}

#[tokio::test]
async fn test_unreadable_state_is_ignored() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();
    let state_dir = output.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("eng.json"), b"{ broken").unwrap();

    let mut config = test_config(&server, output.path());
    config.persistence.state_dir = Some(state_dir);
    let (mut worker, _rx) = test_worker(config);

    worker.restore().await;
    assert!(worker.dedup().last_accepted_key().is_none());
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(POINTER_ROUTE))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (worker, mut rx) = test_worker(test_config(&server, output.path()));
    let sleeper = Arc::new(RecordingSleeper::default());
    let worker = worker.with_sleeper(sleeper.clone());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    let sleeps = sleeper.sleeps.lock().unwrap().clone();
    assert!(sleeps.len() >= 2, "expected several cycles, got {:?}", sleeps);
    assert_eq!(sleeps[0], Duration::from_secs(240));
    assert_eq!(sleeps[1], Duration::from_secs(480));
    assert!(sleeps.iter().all(|d| *d <= Duration::from_secs(1800)));

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(Event::StreamStopped {
            stream: StreamId::Primary
        })
    ));
}

#[tokio::test]
async fn test_cancel_during_download_leaves_no_archive() {
    let server = MockServer::start().await;
    let archive = zip_bytes(&[("a.csv", b"x")]);
    mount_pointer(&server, pointer_body(&server, &archive)).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_ROUTE))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(archive)
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let (worker, _rx) = test_worker(test_config(&server, output.path()));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    let archive_dir = output.path().join("2025/rawdata_en");
    let leftovers = std::fs::read_dir(&archive_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_worker_starts_idle_at_base_interval() {
    let config = Config::default();
    let (tx, _rx) = broadcast::channel(4);
    let client = reqwest::Client::new();
    let worker = StreamWorker::new(StreamId::Translated, Arc::new(config), client, tx);

    assert_eq!(worker.id(), StreamId::Translated);
    assert_eq!(worker.state(), WorkerState::Idle);
    assert_eq!(worker.backoff().current_interval, Duration::from_secs(120));
    assert_eq!(worker.backoff().consecutive_failures, 0);
}
