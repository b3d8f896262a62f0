//! Utility functions for archive naming and path layout

use sha2::{Digest, Sha256};

/// Derive a deterministic local file name from an archive URL
///
/// Uses the last path segment (`.../20250724144500.gkg.csv.zip` →
/// `20250724144500.gkg.csv.zip`). Segments that are empty, `.`/`..` or carry
/// path separators after percent-decoding fall back to the SHA-256 of the URL
/// so the name stays stable across runs.
///
/// # Examples
///
/// ```
/// use gkg_watch::utils::archive_file_name;
///
/// assert_eq!(
///     archive_file_name("http://data.gdeltproject.org/gdeltv2/20250724144500.gkg.csv.zip"),
///     "20250724144500.gkg.csv.zip"
/// );
/// ```
pub fn archive_file_name(archive_url: &str) -> String {
    let segment = url::Url::parse(archive_url).ok().and_then(|url| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });

    match segment {
        Some(name) if is_safe_file_name(&name) => name,
        _ => {
            let digest = Sha256::digest(archive_url.as_bytes());
            format!("{:x}.zip", digest)
        }
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('%')
}

/// Year prefix of a GDELT timestamped file name (`20250724144500...` → `2025`)
pub fn year_prefix(file_name: &str) -> Option<&str> {
    let prefix = file_name.get(..4)?;
    if prefix.bytes().all(|b| b.is_ascii_digit()) {
        Some(prefix)
    } else {
        None
    }
}
