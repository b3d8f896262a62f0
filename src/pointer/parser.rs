use crate::error::{Error, Result};
use crate::types::PointerRecord;

/// Most fields a pointer entry may carry: size, hash and URL
const MAX_FIELDS: usize = 3;

/// Longest decimal size we accept before treating the field as a digest
const MAX_SIZE_DIGITS: usize = 20;

/// Parse pointer bytes into the record of the most recent archive
///
/// Lines are scanned in feed order (first line = most recent). Within a line,
/// fields are separated by whitespace or commas, and the first absolute
/// `http`/`https` URL is the archive URL. Lines without a URL are skipped.
/// When `suffix` is set, only entries whose URL ends with it are eligible.
///
/// The remaining fields of the selected line must each be a decimal size or a
/// 32/64 character hex digest. Everything after the selected line is ignored.
///
/// # Errors
///
/// [`Error::MalformedPointer`] for empty or non-UTF-8 input, input without any
/// URL, no entry matching `suffix`, or a selected line with unrecognised or
/// surplus fields.
pub fn parse_pointer(bytes: &[u8], suffix: Option<&str>) -> Result<PointerRecord> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::malformed(format!("pointer is not valid UTF-8: {}", e)))?;

    let mut urls_seen = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .collect();

        let Some(url_index) = fields.iter().position(|f| is_archive_url(f)) else {
            continue;
        };
        urls_seen += 1;

        if let Some(suffix) = suffix
            && !fields[url_index].ends_with(suffix)
        {
            continue;
        }

        return record_from_fields(&fields, url_index);
    }

    if text.trim().is_empty() {
        return Err(Error::malformed("empty pointer"));
    }
    match suffix {
        Some(suffix) if urls_seen > 0 => Err(Error::malformed(format!(
            "none of {} entries ends with '{}'",
            urls_seen, suffix
        ))),
        _ => Err(Error::malformed("no archive URL found")),
    }
}

fn is_archive_url(field: &str) -> bool {
    match url::Url::parse(field) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

fn record_from_fields(fields: &[&str], url_index: usize) -> Result<PointerRecord> {
    if fields.len() > MAX_FIELDS {
        return Err(Error::malformed(format!(
            "wrong field count: expected at most {}, got {}",
            MAX_FIELDS,
            fields.len()
        )));
    }

    let mut record = PointerRecord::new(fields[url_index]);

    for (index, field) in fields.iter().enumerate() {
        if index == url_index {
            continue;
        }

        if field.len() <= MAX_SIZE_DIGITS && field.bytes().all(|b| b.is_ascii_digit()) {
            let size = field
                .parse::<u64>()
                .map_err(|_| Error::malformed(format!("size field out of range: '{}'", field)))?;
            if record.expected_size.replace(size).is_some() {
                return Err(Error::malformed("wrong field count: more than one size field"));
            }
        } else if is_hex_digest(field) {
            if record.expected_hash.is_some() {
                return Err(Error::malformed("wrong field count: more than one hash field"));
            }
            record = record.with_hash(*field);
        } else {
            return Err(Error::malformed(format!("non-numeric size field: '{}'", field)));
        }
    }

    Ok(record)
}

fn is_hex_digest(field: &str) -> bool {
    matches!(field.len(), 32 | 64) && field.bytes().all(|b| b.is_ascii_hexdigit())
}
