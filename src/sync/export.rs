//! Store -> JSONL export.
//!
//! Two modes: *dirty* merges only the pending records into the existing
//! JSONL; *full* rewrites the file from the store. Both emit canonical
//! JSONL (ascending ID, fixed field order, trailing newline) through an
//! atomic temp-file rename, then update the export bookkeeping.
//!
//! Dirty-set clearing is hash-gated: a mutation that lands between the
//! export snapshot and the clear leaves its row dirty for the next pass.

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::sync::{
    METADATA_JSONL_CONTENT_HASH, METADATA_LAST_EXPORT_TIME, read_issue_map, serialize_issues,
    write_atomic,
};
use crate::util::hash::{content_hash, sha256_hex};
use crate::util::progress::{progress_bar, should_show_progress};
use crate::util::time::format_ts;

/// Result of an export run.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Records written to the file (whole-file count, both modes).
    pub total_records: usize,
    /// Issues this run actually flushed (dirty mode: the dirty subset).
    pub exported_ids: Vec<String>,
    /// SHA256 of the written bytes.
    pub content_hash: String,
    /// Tombstones dropped for exceeding retention.
    pub pruned_tombstones: usize,
}

/// Rewrite the whole JSONL from the store.
///
/// Expired tombstones are pruned on the way out. Clears the dirty set
/// (hash-gated) and all export hashes, then records fresh ones.
///
/// # Errors
///
/// Propagates storage and I/O failures; on failure the previous JSONL is
/// left untouched.
pub fn export_full(
    storage: &mut SqliteStorage,
    jsonl_path: &Path,
    retention_days: Option<u64>,
) -> Result<ExportResult> {
    let now = Utc::now();
    let all = storage.get_all_issues_for_export()?;
    let bar = progress_bar(all.len() as u64, "Exporting issues", should_show_progress());

    let mut kept: Vec<Issue> = Vec::with_capacity(all.len());
    let mut pruned = 0usize;
    for issue in all {
        if issue.is_expired_tombstone(retention_days, now) {
            pruned += 1;
        } else {
            kept.push(issue);
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let contents = serialize_issues(&kept)?;
    write_atomic(jsonl_path, &contents)?;
    let file_hash = sha256_hex(contents.as_bytes());

    let hashes: Vec<(String, String)> = kept
        .iter()
        .map(|issue| (issue.id.clone(), content_hash(issue)))
        .collect();

    let dirty_snapshot = storage.get_dirty_entries()?;
    storage.clear_dirty_matching(&dirty_snapshot)?;
    storage.clear_all_export_hashes()?;
    storage.set_export_hashes(&hashes)?;
    storage.set_metadata(METADATA_JSONL_CONTENT_HASH, &file_hash)?;
    storage.set_metadata(METADATA_LAST_EXPORT_TIME, &format_ts(now))?;

    tracing::info!(
        records = kept.len(),
        pruned_tombstones = pruned,
        path = %jsonl_path.display(),
        "full export complete"
    );

    Ok(ExportResult {
        total_records: kept.len(),
        exported_ids: hashes.into_iter().map(|(id, _)| id).collect(),
        content_hash: file_hash,
        pruned_tombstones: pruned,
    })
}

/// Merge only the dirty records into the existing JSONL.
///
/// Returns `None` when the dirty set is empty and the file already exists
/// (nothing to do).
///
/// # Errors
///
/// Propagates storage and I/O failures.
pub fn export_dirty(
    storage: &mut SqliteStorage,
    jsonl_path: &Path,
) -> Result<Option<ExportResult>> {
    let dirty = storage.get_dirty_entries()?;
    if dirty.is_empty() && jsonl_path.exists() {
        tracing::debug!("dirty export: nothing pending");
        return Ok(None);
    }

    let mut records: HashMap<String, Issue> = read_issue_map(jsonl_path)?;
    let mut exported: Vec<(String, String)> = Vec::with_capacity(dirty.len());

    for (id, dirty_hash) in &dirty {
        match storage.get_issue(id)? {
            Some(issue) if !issue.ephemeral => {
                exported.push((id.clone(), dirty_hash.clone()));
                records.insert(id.clone(), issue);
            }
            Some(_) => {
                // ephemerals never reach the JSONL but their flag is served
                exported.push((id.clone(), dirty_hash.clone()));
            }
            None => {
                tracing::warn!(id = %id, "dirty issue vanished before export");
            }
        }
    }

    let all: Vec<Issue> = records.into_values().collect();
    let contents = serialize_issues(&all)?;
    write_atomic(jsonl_path, &contents)?;
    let file_hash = sha256_hex(contents.as_bytes());

    // Clear only rows whose hash still matches the exported snapshot.
    storage.clear_dirty_matching(&exported)?;
    let export_hashes: Vec<(String, String)> = exported
        .iter()
        .map(|(id, hash)| (id.clone(), hash.clone()))
        .collect();
    storage.set_export_hashes(&export_hashes)?;
    storage.set_metadata(METADATA_JSONL_CONTENT_HASH, &file_hash)?;
    storage.set_metadata(METADATA_LAST_EXPORT_TIME, &format_ts(Utc::now()))?;

    tracing::info!(
        flushed = exported.len(),
        records = all.len(),
        path = %jsonl_path.display(),
        "dirty export complete"
    );

    Ok(Some(ExportResult {
        total_records: all.len(),
        exported_ids: exported.into_iter().map(|(id, _)| id).collect(),
        content_hash: file_hash,
        pruned_tombstones: 0,
    }))
}

/// Flush pending records after a mutating command; no-op when clean.
///
/// # Errors
///
/// Propagates storage and I/O failures.
pub fn auto_flush(storage: &mut SqliteStorage, jsonl_path: &Path) -> Result<usize> {
    match export_dirty(storage, jsonl_path)? {
        Some(result) => Ok(result.exported_ids.len()),
        None => Ok(0),
    }
}
