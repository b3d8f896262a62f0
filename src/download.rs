//! Archive download with integrity checks and atomic placement
//!
//! The archive body is streamed into a temp file inside the destination
//! directory and renamed onto its final name only after the size and hash
//! advertised by the pointer have been checked. The temp file is deleted on
//! every failure path, including the future being dropped on shutdown, so a
//! truncated archive is never visible under its final name.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::types::PointerRecord;
use crate::utils::archive_file_name;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A committed archive on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedArchive {
    /// Final path
    pub path: PathBuf,
    /// Size on disk
    pub bytes: u64,
    /// True when an existing file was reused instead of downloading
    pub reused: bool,
}

/// Streams archives to local storage
#[derive(Clone)]
pub struct ArchiveDownloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl ArchiveDownloader {
    /// Create a downloader on top of an existing client
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Create a downloader with its own client built from `config`
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Ok(Self::new(
            crate::pointer::build_client(config)?,
            config.download_timeout,
        ))
    }

    /// Download `record` into `dest_dir` under a name derived from its URL
    ///
    /// An existing file with the expected size and digest (when the pointer
    /// gives them) is reused without a request, which lets a restarted watcher
    /// pick up where it left off.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] on connection failure, timeout, non-2xx status or a
    ///   body stream that breaks off
    /// - [`Error::SizeMismatch`] / [`Error::HashMismatch`] when verification fails
    /// - [`Error::Io`] for local storage failures
    pub async fn download(&self, record: &PointerRecord, dest_dir: &Path) -> Result<DownloadedArchive> {
        let final_path = dest_dir.join(archive_file_name(&record.archive_url));
        tokio::fs::create_dir_all(dest_dir).await?;

        if let Some(existing) = reusable_archive(&final_path, record).await? {
            info!(path = ?existing.path, bytes = existing.bytes, "archive already on disk, skipping download");
            return Ok(existing);
        }

        info!(url = %record.archive_url, expected_size = ?record.expected_size, "downloading archive");

        let response = self
            .client
            .get(&record.archive_url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        // Deleted on drop unless persisted below
        let (std_file, temp_path) = tempfile::Builder::new()
            .prefix(".gkg-")
            .suffix(".part")
            .tempfile_in(dest_dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut hasher = StreamHasher::for_digest(record.expected_hash.as_deref());
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        debug!(url = %record.archive_url, bytes = written, temp = ?temp_path, "archive body received");

        if let Some(expected) = record.expected_size
            && expected != written
        {
            return Err(Error::SizeMismatch {
                url: record.archive_url.clone(),
                expected,
                actual: written,
            });
        }

        if let (Some(expected), Some(actual)) = (record.expected_hash.as_deref(), hasher.finish())
            && !expected.eq_ignore_ascii_case(&actual)
        {
            return Err(Error::HashMismatch {
                url: record.archive_url.clone(),
                expected: expected.to_string(),
                actual,
            });
        }

        temp_path
            .persist(&final_path)
            .map_err(|e| Error::Io(e.error))?;

        info!(path = ?final_path, bytes = written, "archive downloaded");

        Ok(DownloadedArchive {
            path: final_path,
            bytes: written,
            reused: false,
        })
    }
}

async fn reusable_archive(path: &Path, record: &PointerRecord) -> Result<Option<DownloadedArchive>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if let Some(expected) = record.expected_size
        && expected != metadata.len()
    {
        warn!(
            path = ?path,
            expected,
            actual = metadata.len(),
            "existing archive has unexpected size, downloading again"
        );
        return Ok(None);
    }

    if let Some(expected) = record.expected_hash.as_deref() {
        let owned_path = path.to_path_buf();
        let hasher = StreamHasher::for_digest(Some(expected));
        let actual = tokio::task::spawn_blocking(move || hash_file(&owned_path, hasher))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        if let Some(actual) = actual
            && !expected.eq_ignore_ascii_case(&actual)
        {
            warn!(
                path = ?path,
                expected,
                actual = %actual,
                "existing archive has unexpected digest, downloading again"
            );
            return Ok(None);
        }
    }

    Ok(Some(DownloadedArchive {
        path: path.to_path_buf(),
        bytes: metadata.len(),
        reused: true,
    }))
}

fn hash_file(path: &Path, mut hasher: StreamHasher) -> std::io::Result<Option<String>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Incremental digest matching the length of the advertised hash
enum StreamHasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Disabled,
}

impl StreamHasher {
    fn for_digest(expected: Option<&str>) -> Self {
        match expected.map(str::len) {
            Some(32) => StreamHasher::Md5(md5::Context::new()),
            Some(64) => StreamHasher::Sha256(Sha256::new()),
            _ => StreamHasher::Disabled,
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Md5(ctx) => ctx.consume(data),
            StreamHasher::Sha256(hasher) => hasher.update(data),
            StreamHasher::Disabled => {}
        }
    }

    fn finish(self) -> Option<String> {
        match self {
            StreamHasher::Md5(ctx) => Some(format!("{:x}", ctx.compute())),
            StreamHasher::Sha256(hasher) => Some(format!("{:x}", hasher.finalize())),
            StreamHasher::Disabled => None,
        }
    }
}
