//! Change-detected JSONL -> Store ingestion.
//!
//! The pipeline is gated twice before any parsing happens: a cheap lstat
//! mtime probe against `last_import_time`, then a whole-file SHA256 against
//! `jsonl_content_hash` (so a rewritten-but-identical file cannot cause
//! retry loops). Conflict markers abort with no mutation. All upserts land
//! in one store transaction; concurrent imports of the same database are
//! excluded by the store's write lock (the daemon serializes clients).

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::model::{Issue, Status};
use crate::storage::{
    SqliteStorage, resurrect_parent, sync_comments_tx, sync_dependencies_tx, sync_labels_tx,
    upsert_issue_tx,
};
use crate::sync::{
    METADATA_JSONL_CONTENT_HASH, METADATA_LAST_IMPORT_HASH, METADATA_LAST_IMPORT_TIME,
    ensure_no_conflict_markers, parse_issues, read_issue_map,
};
use crate::util::cancel::CancelToken;
use crate::util::hash::{content_hash, sha256_hex};
use crate::util::id::{IdGenerator, parse_id};
use crate::util::progress::{progress_bar, should_show_progress};
use crate::util::time::{format_ts, parse_metadata_ts};
use crate::validation::require_valid;

/// Import configuration.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Additional JSONL consulted when resurrecting missing parents
    /// (defaults to the file being imported).
    pub resurrection_source: Option<PathBuf>,
}

/// What an import run did.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub tombstone_skipped: usize,
    pub resurrected: usize,
    /// Colliding incoming IDs that were regenerated (old -> new).
    pub remapped: HashMap<String, String>,
}

impl ImportStats {
    /// Remapped IDs must be written back out so other clones learn them.
    #[must_use]
    pub fn needs_full_export(&self) -> bool {
        !self.remapped.is_empty()
    }
}

/// Outcome of an auto-import invocation.
#[derive(Debug, Clone)]
pub enum AutoImportOutcome {
    /// Nothing to do: file missing/empty, content unchanged, or not stale.
    NoChange,
    /// Records were ingested.
    Imported(ImportStats),
}

/// Cheap staleness probe: stored `last_import_time` predates the file's
/// lstat mtime. lstat, not stat: a recreated symlink must reveal its own
/// mtime rather than masking a content change behind its target's.
///
/// # Errors
///
/// `CorruptMetadata` when the stored timestamp does not parse.
pub fn is_stale(storage: &SqliteStorage, jsonl_path: &Path) -> Result<bool> {
    let Some(stored) = storage.get_metadata(METADATA_LAST_IMPORT_TIME)? else {
        return Ok(true);
    };
    let last_import = parse_metadata_ts(METADATA_LAST_IMPORT_TIME, &stored)?;

    let Ok(meta) = std::fs::symlink_metadata(jsonl_path) else {
        return Ok(false); // nothing on disk to import
    };
    let mtime: DateTime<Utc> = meta.modified()?.into();
    Ok(last_import < mtime)
}

/// Auto-import: staleness-gated ingestion of the workspace JSONL.
///
/// # Errors
///
/// `ConflictMarkersPresent` (nothing mutated), `JsonlParse`, storage errors.
pub fn auto_import_if_stale(
    storage: &mut SqliteStorage,
    jsonl_path: &Path,
    options: &ImportOptions,
    cancel: &CancelToken,
) -> Result<AutoImportOutcome> {
    if !is_stale(storage, jsonl_path)? {
        tracing::debug!(path = %jsonl_path.display(), "auto-import: not stale");
        return Ok(AutoImportOutcome::NoChange);
    }
    import_file(storage, jsonl_path, options, cancel)
}

/// Run the full import pipeline on `jsonl_path`.
///
/// # Errors
///
/// `ConflictMarkersPresent` (nothing mutated), `JsonlParse` with line and
/// snippet, `Cancelled`, storage errors.
#[allow(clippy::too_many_lines)]
pub fn import_file(
    storage: &mut SqliteStorage,
    jsonl_path: &Path,
    options: &ImportOptions,
    cancel: &CancelToken,
) -> Result<AutoImportOutcome> {
    cancel.check()?;
    let now = Utc::now();

    // Step 1: read bytes; empty or missing records the probe time only.
    let bytes = match std::fs::read(jsonl_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            storage.set_metadata(METADATA_LAST_IMPORT_TIME, &format_ts(now))?;
            return Ok(AutoImportOutcome::NoChange);
        }
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        storage.set_metadata(METADATA_LAST_IMPORT_TIME, &format_ts(now))?;
        return Ok(AutoImportOutcome::NoChange);
    }

    // Step 2: content hash gate. mtime may have moved with identical bytes.
    let file_hash = sha256_hex(&bytes);
    if storage.get_metadata(METADATA_JSONL_CONTENT_HASH)?.as_deref() == Some(file_hash.as_str()) {
        storage.set_metadata(METADATA_LAST_IMPORT_TIME, &format_ts(now))?;
        tracing::debug!("auto-import: content unchanged");
        return Ok(AutoImportOutcome::NoChange);
    }

    // Step 3: conflict markers abort before anything is touched.
    ensure_no_conflict_markers(jsonl_path)?;

    // Step 4: parse, tolerate blanks, fail fast with position.
    let text = String::from_utf8(bytes)
        .map_err(|e| BeadsError::Config(format!("JSONL is not valid UTF-8: {e}")))?;
    let mut incoming = parse_issues(&text)?;
    for issue in &mut incoming {
        normalize_incoming(issue, now);
        require_valid(issue)?;
    }

    let incoming_ids: HashSet<String> = incoming.iter().map(|i| i.id.clone()).collect();

    // Decide per-record actions against current store state.
    let bar = progress_bar(incoming.len() as u64, "Importing issues", should_show_progress());
    let mut stats = ImportStats::default();
    let mut ops: Vec<Issue> = Vec::new();
    let mut chosen_new_ids: HashSet<String> = HashSet::new();

    for mut issue in incoming {
        cancel.check()?;
        bar.inc(1);

        let Some(existing) = storage.get_issue(&issue.id)? else {
            issue.content_hash = Some(content_hash(&issue));
            stats.created += 1;
            ops.push(issue);
            continue;
        };

        // Tombstone protection: a local deletion wins over remote edits.
        if existing.status == Status::Tombstone && issue.status != Status::Tombstone {
            stats.tombstone_skipped += 1;
            continue;
        }

        if existing.created_at == issue.created_at {
            // Same logical issue: last writer wins on updated_at.
            let incoming_hash = content_hash(&issue);
            let unchanged = existing
                .content_hash
                .as_deref()
                .is_some_and(|h| h == incoming_hash)
                && existing.updated_at == issue.updated_at;
            if unchanged || issue.updated_at <= existing.updated_at {
                stats.skipped += 1;
                continue;
            }
            issue.content_hash = Some(incoming_hash);
            stats.updated += 1;
            ops.push(issue);
        } else {
            // Distinct creation tuple landed on the same ID: regenerate the
            // incoming ID at the same hash length and remember the mapping.
            let parsed = parse_id(&issue.id)?;
            let generator = IdGenerator::with_prefix(parsed.prefix.clone());
            let new_id = generator.generate_from_length(
                &issue.title,
                issue.description.as_deref(),
                issue.created_by.as_deref(),
                issue.created_at,
                parsed.hash.len(),
                |candidate| {
                    storage.id_exists(candidate).unwrap_or(true)
                        || incoming_ids.contains(candidate)
                        || chosen_new_ids.contains(candidate)
                },
            )?;
            tracing::warn!(old = %issue.id, new = %new_id, "import ID collision; remapping");
            chosen_new_ids.insert(new_id.clone());
            stats.remapped.insert(issue.id.clone(), new_id.clone());
            issue.id = new_id;
            issue.content_hash = Some(content_hash(&issue));
            stats.created += 1;
            ops.push(issue);
        }
    }
    bar.finish_and_clear();

    // Rewrite edges that pointed at remapped IDs.
    if !stats.remapped.is_empty() {
        for issue in &mut ops {
            for dep in &mut issue.dependencies {
                if let Some(new_id) = stats.remapped.get(&dep.depends_on_id) {
                    dep.depends_on_id.clone_from(new_id);
                }
                if let Some(new_id) = stats.remapped.get(&dep.issue_id) {
                    dep.issue_id.clone_from(new_id);
                }
            }
        }
    }

    // Missing parents implied by child IDs are resurrected (closed, P4,
    // marked description), sourced from the incoming batch, then the
    // working-tree JSONL, then synthesized from the bare ID.
    let resurrection_map = load_resurrection_map(jsonl_path, options)?;
    let op_ids: HashSet<String> = ops.iter().map(|i| i.id.clone()).collect();
    let mut resurrections: Vec<Issue> = Vec::new();
    let mut resurrected_ids: HashSet<String> = HashSet::new();
    for issue in &ops {
        let mut current = parse_id(&issue.id)?;
        while let Some(parent_id) = current.parent() {
            let known = op_ids.contains(&parent_id)
                || resurrected_ids.contains(&parent_id)
                || storage.id_exists(&parent_id)?;
            if !known {
                let template = resurrection_map
                    .get(&parent_id)
                    .cloned()
                    .unwrap_or_else(|| Issue::new(parent_id.clone(), parent_id.clone(), now));
                let record = resurrect_parent(&template, now);
                tracing::info!(id = %parent_id, "resurrecting missing parent during import");
                resurrected_ids.insert(parent_id.clone());
                resurrections.push(record);
                stats.resurrected += 1;
            }
            current = parse_id(&parent_id)?;
        }
    }
    ops.extend(resurrections);

    // Step 5: one transaction for every upsert. Records that mirror the
    // file are not dirty; remapped and resurrected ones diverge from it and
    // must reach the next export.
    let needs_export: HashSet<String> = stats
        .remapped
        .values()
        .cloned()
        .chain(resurrected_ids.iter().cloned())
        .collect();
    let final_hash = file_hash.clone();
    let import_time = format_ts(now);
    storage.mutate("import_jsonl", move |tx, ctx| {
        for issue in &ops {
            upsert_issue_tx(tx, issue)?;
            sync_labels_tx(tx, &issue.id, &issue.labels)?;
            sync_dependencies_tx(tx, &issue.id, &issue.dependencies)?;
            sync_comments_tx(tx, &issue.id, &issue.comments)?;
            if needs_export.contains(&issue.id) {
                ctx.mark_dirty(&issue.id, issue.content_hash.as_deref().unwrap_or(""));
            }
        }
        SqliteStorage::set_metadata_tx(tx, METADATA_JSONL_CONTENT_HASH, &final_hash)?;
        SqliteStorage::set_metadata_tx(tx, METADATA_LAST_IMPORT_HASH, &final_hash)?;
        SqliteStorage::set_metadata_tx(tx, METADATA_LAST_IMPORT_TIME, &import_time)?;
        Ok(())
    })?;

    tracing::info!(
        created = stats.created,
        updated = stats.updated,
        skipped = stats.skipped,
        tombstone_skipped = stats.tombstone_skipped,
        resurrected = stats.resurrected,
        remapped = stats.remapped.len(),
        "import complete"
    );

    Ok(AutoImportOutcome::Imported(stats))
}

/// Repair invariants on an incoming record without rejecting it.
fn normalize_incoming(issue: &mut Issue, now: DateTime<Utc>) {
    // Closed records without a closure time get one.
    if issue.status.is_terminal() && issue.closed_at.is_none() {
        issue.closed_at = Some(now);
    }
    if !issue.status.is_terminal() {
        issue.closed_at = None;
    }
    // Tombstones must carry a deletion time.
    if issue.status == Status::Tombstone && issue.deleted_at.is_none() {
        issue.deleted_at = Some(issue.updated_at);
    }
    issue.content_hash = Some(content_hash(issue));
}

fn load_resurrection_map(
    jsonl_path: &Path,
    options: &ImportOptions,
) -> Result<HashMap<String, Issue>> {
    let mut map = read_issue_map(jsonl_path)?;
    if let Some(source) = &options.resurrection_source {
        if source != jsonl_path {
            for (id, issue) in read_issue_map(source)? {
                map.entry(id).or_insert(issue);
            }
        }
    }
    Ok(map)
}
