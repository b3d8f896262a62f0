//! Archive extraction
//!
//! GDELT publishes every slot as a ZIP holding a single CSV. [`ZipExtractor`]
//! does the unpacking; [`extract_archive`] runs it on the blocking pool so the
//! worker's runtime threads stay free.

mod zip;


pub use zip::ZipExtractor;

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;

/// Extract `archive_path` into `dest_path` without blocking the async runtime
///
/// # Returns
/// * `Ok(Vec<PathBuf>)` - Files written, in archive order
/// * `Err(Error::CorruptArchive)` - The archive could not be read
/// * `Err(Error::Io)` - Output could not be written
pub async fn extract_archive(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
    let archive_owned = archive_path.to_path_buf();
    let dest_owned = dest_path.to_path_buf();

    spawn_blocking(move || ZipExtractor::extract(&archive_owned, &dest_owned))
        .await
        .map_err(|e| Error::CorruptArchive {
            archive: archive_path.to_path_buf(),
            reason: format!("extraction task panicked: {}", e),
        })?
}
