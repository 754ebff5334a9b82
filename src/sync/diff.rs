//! Content-addressed diffing
//!
//! Local items are keyed by the content hash computed at ingestion. The
//! remote is asked once, with every local hash, which ones it lacks.

use crate::error::Result;
use crate::meta::DataItem;
use crate::storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// Per-run view of a data item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileInfo {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub extension: String,
    pub location: String,
    pub content_hash: String,
    pub data_size: u64,
    pub node_set: Option<Vec<String>>,
}

/// Hashes in `local` that `remote` does not hold, sorted
pub fn missing_hashes<'a, L, R>(local: L, remote: R) -> BTreeSet<String>
where
    L: IntoIterator<Item = &'a String>,
    R: IntoIterator<Item = &'a String>,
{
    let known: HashSet<&String> = remote.into_iter().collect();
    local
        .into_iter()
        .filter(|hash| !known.contains(hash))
        .cloned()
        .collect()
}

/// Distinct hashes of `files`, sorted
pub fn local_hashes(files: &[LocalFileInfo]) -> Vec<String> {
    files
        .iter()
        .map(|f| f.content_hash.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Files whose hash the remote reported missing. Hashes the remote returns
/// that were never sent are ignored.
pub fn files_to_upload<'a>(
    files: &'a [LocalFileInfo],
    missing: &[String],
) -> Vec<&'a LocalFileInfo> {
    let missing: HashSet<&str> = missing.iter().map(String::as_str).collect();
    files
        .iter()
        .filter(|f| missing.contains(f.content_hash.as_str()))
        .collect()
}

/// Build the per-run file list. Items without a stored hash are skipped;
/// a missing size is read from storage.
pub async fn extract_local_files(
    items: Vec<DataItem>,
    storage: &dyn StorageBackend,
) -> Result<Vec<LocalFileInfo>> {
    let mut files = Vec::with_capacity(items.len());

    for item in items {
        let Some(content_hash) = item.content_hash.clone().filter(|h| !h.is_empty()) else {
            warn!(data_id = %item.id, name = %item.name, "Skipping data item without content hash");
            continue;
        };

        let data_size = match item.data_size {
            Some(size) if size >= 0 => size as u64,
            _ => storage.get_size(&item.raw_data_location).await?,
        };

        files.push(LocalFileInfo {
            node_set: item.node_set(),
            id: item.id,
            name: item.name,
            mime_type: item
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            extension: item.extension.unwrap_or_default(),
            location: item.raw_data_location,
            content_hash,
            data_size,
        });
    }

    Ok(files)
}
