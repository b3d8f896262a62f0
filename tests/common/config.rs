//! Test configuration helpers pointing both streams at a mock server

use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

use gkg_watch::Config;

/// Pointer path of the English stream on the mock server
pub const PRIMARY_POINTER: &str = "/gdeltv2/lastupdate.txt";

/// Pointer path of the translated stream on the mock server
pub const TRANSLATED_POINTER: &str = "/gdeltv2/lastupdate-translation.txt";

/// Configuration writing into `output` and polling `server`
///
/// Timeouts are short so a misbehaving test fails quickly.
pub fn mock_config(server: &MockServer, output: &TempDir) -> Config {
    let mut config = Config {
        output_dir: output.path().join("data"),
        ..Config::default()
    };
    config.primary.pointer_url = format!("{}{}", server.uri(), PRIMARY_POINTER);
    config.translated.pointer_url = format!("{}{}", server.uri(), TRANSLATED_POINTER);
    config.http.pointer_timeout = Duration::from_secs(5);
    config.http.download_timeout = Duration::from_secs(10);
    config
}
