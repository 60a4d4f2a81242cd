//! JSONL synchronization core.
//!
//! - `export`: Store -> JSONL (dirty and full modes)
//! - `import`: JSONL -> Store (change-detected auto-import)
//! - `merge`: per-field three-way merge over JSONL record streams
//! - `worktree`: sparse-checkout scratch worktree for the sync branch
//! - `engine`: orchestration with force-push detection
//!
//! This module holds what they share: metadata keys, conflict-marker
//! scanning, and the JSONL codec (one record per line, ascending by ID,
//! trailing newline, atomic replace via temp file + rename).

pub mod engine;
pub mod export;
pub mod import;
pub mod merge;
pub mod worktree;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::util::hash::sha256_hex;

/// Metadata key: SHA256 of the JSONL bytes at last import/export.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Metadata key: RFC3339Nano wall time of the last import.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";
/// Metadata key: file hash observed by the last import.
pub const METADATA_LAST_IMPORT_HASH: &str = "last_import_hash";
/// Metadata key: wall time of the last export.
pub const METADATA_LAST_EXPORT_TIME: &str = "last_export_time";
/// Metadata key: remote sync-branch SHA after the last successful push.
/// The sync engine is the only writer.
pub const METADATA_REMOTE_SHA: &str = "sync.remote_sha";

static CONFLICT_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(<{7}|={7}|>{7})").expect("valid regex"));

/// Line numbers (1-based) of git conflict markers in the text.
#[must_use]
pub fn find_conflict_markers(text: &str) -> Vec<usize> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| CONFLICT_MARKER_RE.is_match(line))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Abort with `ConflictMarkersPresent` if the file carries conflict markers.
///
/// # Errors
///
/// `ConflictMarkersPresent` naming the file; `Io` if it cannot be read.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let text = fs::read_to_string(path)?;
    let markers = find_conflict_markers(&text);
    if markers.is_empty() {
        Ok(())
    } else {
        tracing::error!(
            path = %path.display(),
            lines = ?markers,
            "conflict markers in JSONL; resolve the conflict or rewrite with 'bd export -o {}'",
            path.display()
        );
        Err(BeadsError::ConflictMarkersPresent {
            path: path.to_path_buf(),
        })
    }
}

/// First 80 characters of a line, for parse error snippets.
#[must_use]
pub fn line_snippet(line: &str) -> String {
    line.chars().take(80).collect()
}

/// Parse JSONL text into issues, tolerating empty lines.
///
/// # Errors
///
/// Fails fast on the first malformed line with its number and an 80-char
/// snippet.
pub fn parse_issues(text: &str) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let issue: Issue = serde_json::from_str(line).map_err(|e| BeadsError::JsonlParse {
            line: idx + 1,
            reason: e.to_string(),
            snippet: line_snippet(line),
        })?;
        issues.push(issue);
    }
    Ok(issues)
}

/// Read and parse a JSONL file; a missing file is an empty list.
///
/// # Errors
///
/// `Io` on read failure, `JsonlParse` on malformed content.
pub fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    parse_issues(&fs::read_to_string(path)?)
}

/// Read a JSONL file into an ID-keyed map. Records without a usable ID are
/// impossible here (the ID field is mandatory in the schema); duplicate IDs
/// keep the later record.
///
/// # Errors
///
/// `Io` on read failure, `JsonlParse` on malformed content.
pub fn read_issue_map(path: &Path) -> Result<HashMap<String, Issue>> {
    Ok(read_issues(path)?
        .into_iter()
        .map(|issue| (issue.id.clone(), issue))
        .collect())
}

/// Serialize issues in canonical JSONL form: ascending by ID, one object
/// per line, trailing newline.
///
/// # Errors
///
/// Propagates serialization failures.
pub fn serialize_issues(issues: &[Issue]) -> Result<String> {
    let mut sorted: Vec<&Issue> = issues.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for issue in sorted {
        out.push_str(&serde_json::to_string(issue)?);
        out.push('\n');
    }
    Ok(out)
}

/// Count records in a JSONL file without full deserialization.
///
/// # Errors
///
/// `Io` on read failure.
pub fn count_records(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
}

/// Write a file atomically: temp file in the same directory, then rename.
/// Partial writes are never visible.
///
/// # Errors
///
/// `Io` on write or rename failure.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        BeadsError::Config(format!("path has no parent: {}", path.display()))
    })?;
    fs::create_dir_all(dir)?;
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// SHA256 of a file's bytes; `None` when the file is missing.
///
/// # Errors
///
/// `Io` on read failure.
pub fn file_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(sha256_hex(&fs::read(path)?)))
}
