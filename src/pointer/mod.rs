//! Pointer file retrieval and parsing
//!
//! A pointer file is the small text resource each feed republishes every
//! fifteen minutes, naming the archives of the latest slot. GDELT writes one
//! entry per line as `<size> <md5> <url>`:
//!
//! ```text
//! 150383 297a16b493de7cf6ca809a7cc31d0b93 http://data.gdeltproject.org/gdeltv2/20250724144500.export.CSV.zip
//! 318084 bb27f78ba45f69a17ea6ed7755e9f8ff http://data.gdeltproject.org/gdeltv2/20250724144500.mentions.CSV.zip
//! 10768507 ea8dde0beb0ba98810a92db068c0ce99 http://data.gdeltproject.org/gdeltv2/20250724144500.gkg.csv.zip
//! ```
//!
//! [`PointerFetcher`] performs the single GET; [`parse_pointer`] turns the
//! bytes into a [`PointerRecord`](crate::types::PointerRecord).

mod parser;


pub use parser::parse_pointer;

use crate::config::HttpConfig;
use crate::error::Result;
use std::time::Duration;
use tracing::debug;

/// Raw pointer response
#[derive(Clone, Debug)]
pub struct PointerResponse {
    /// HTTP status code (always 2xx, other statuses are returned as errors)
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

/// Fetches pointer files over HTTP
///
/// Stateless apart from the shared connection pool. Performs no retries;
/// retrying is the worker's job through its back-off policy.
#[derive(Clone)]
pub struct PointerFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl PointerFetcher {
    /// Create a fetcher on top of an existing client
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Create a fetcher with its own client built from `config`
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Ok(Self::new(build_client(config)?, config.pointer_timeout))
    }

    /// GET `url`, failing with [`Error::Network`](crate::error::Error::Network)
    /// on connection failure, timeout or a non-2xx status
    pub async fn fetch(&self, url: &str) -> Result<PointerResponse> {
        debug!(url = %url, "fetching pointer");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status, bytes = body.len(), "pointer fetched");
        Ok(PointerResponse { status, body })
    }
}

/// Build the HTTP client shared by the pointer fetcher and archive downloader
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.pointer_timeout)
        .build()?;
    Ok(client)
}
