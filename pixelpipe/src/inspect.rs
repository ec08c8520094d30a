//! Read and maintain an on-disk image cache outside of a running loader

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use pixelpipe_core::disk::hash_key;
use pixelpipe_core::fetch::mime_type_from_path;
use pixelpipe_core::{CachedResponseMetadata, DiskCache, Headers};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Totals for a cache directory
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub directory: PathBuf,
    pub entries: usize,
    /// Bytes of cached image data
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    /// Bytes of response metadata, not counted against the budget
    pub metadata_bytes: u64,
}

/// One committed entry, as listed
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub hash: String,
    pub data_len: u64,
    pub metadata_len: u64,
}

/// Everything known about one entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryDetails {
    pub key: String,
    pub hash: String,
    pub data_len: u64,
    pub mime_type: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub headers: Vec<(String, String)>,
}

pub fn summarize(cache: &DiskCache) -> CacheSummary {
    let entries = cache.entries();
    CacheSummary {
        directory: cache.directory().to_path_buf(),
        entries: entries.len(),
        size_bytes: cache.size(),
        max_size_bytes: cache.max_size_bytes(),
        metadata_bytes: entries.iter().map(|e| e.metadata_len).sum(),
    }
}

/// Entries from least to most recently used
pub fn list(cache: &DiskCache) -> Vec<EntrySummary> {
    cache
        .entries()
        .into_iter()
        .map(|entry| EntrySummary {
            hash: entry.hash,
            data_len: entry.data_len,
            metadata_len: entry.metadata_len,
        })
        .collect()
}

pub fn show(cache: &DiskCache, key: &str) -> Result<Option<EntryDetails>> {
    let Some(snapshot) = cache.open_snapshot(key)? else {
        return Ok(None);
    };

    let metadata_bytes = snapshot.read_metadata()?;
    let metadata = if metadata_bytes.is_empty() {
        None
    } else {
        Some(
            CachedResponseMetadata::from_bytes(&metadata_bytes)
                .with_context(|| format!("unreadable metadata for {}", key))?,
        )
    };
    let data_len = std::fs::metadata(snapshot.data_path())?.len();

    Ok(Some(EntryDetails {
        key: key.to_string(),
        hash: snapshot.hash().to_string(),
        data_len,
        mime_type: metadata
            .as_ref()
            .and_then(|m| m.mime_type())
            .map(str::to_string),
        sent_at: metadata.as_ref().and_then(|m| timestamp(m.sent_at_millis)),
        received_at: metadata.as_ref().and_then(|m| timestamp(m.received_at_millis)),
        headers: metadata
            .map(|m| {
                m.headers
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
    }))
}

/// Store `file` under `key`, as if it had been downloaded at `now`
///
/// Returns the number of data bytes written.
pub fn import(
    cache: &DiskCache,
    key: &str,
    file: &Path,
    max_age_secs: Option<u64>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let data = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let mut headers = Headers::new();
    if let Some(mime_type) = mime_type_from_path(file) {
        headers.add("Content-Type", mime_type);
    }
    headers.add("Date", now.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
    if let Some(max_age) = max_age_secs {
        headers.add("Cache-Control", format!("max-age={}", max_age));
    }
    let millis = now.timestamp_millis();
    let metadata = CachedResponseMetadata::new(millis, millis, headers);

    let Some(mut editor) = cache.open_editor(key)? else {
        bail!("entry {} is being written by another process", key);
    };
    let written = editor
        .write_metadata(&metadata.to_bytes())
        .and_then(|_| editor.write_data(&data));
    match written {
        Ok(()) => {
            editor.commit()?;
            info!("Imported {} into {} ({} bytes)", file.display(), key, data.len());
        }
        Err(e) => {
            editor.abort()?;
            return Err(e.into());
        }
    }
    Ok(data.len() as u64)
}

/// Hash the cache would store `key` under
pub fn hash(key: &str) -> String {
    hash_key(key)
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
