use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Extract every entry of `archive_path` into `dest_path`
    ///
    /// Relative member names are preserved and intermediate directories are
    /// created. Existing files are overwritten, so extracting the same archive
    /// twice yields the same tree. Entries whose names would escape
    /// `dest_path` are skipped.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        // Open before touching the destination so a corrupt archive leaves no trace
        let file = std::fs::File::open(archive_path).map_err(|e| Error::CorruptArchive {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to open archive: {}", e),
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| Error::CorruptArchive {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to read ZIP archive: {}", e),
        })?;

        std::fs::create_dir_all(dest_path)?;

        let mut extracted_files = Vec::new();

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|e| Error::CorruptArchive {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to read ZIP entry {}: {}", i, e),
            })?;

            if let Some(file_path) = Self::extract_entry(entry, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_entry(
        mut entry: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let file_path = match entry.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(name = entry.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&file_path)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut outfile = std::fs::File::create(&file_path)?;

        // Read errors mean a damaged member (bad CRC, truncated data); write
        // errors are local storage failures
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = entry.read(&mut buf).map_err(|e| Error::CorruptArchive {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to extract {}: {}", entry.name(), e),
            })?;
            if n == 0 {
                break;
            }
            outfile.write_all(&buf[..n])?;
        }

        Ok(Some(file_path))
    }
}
