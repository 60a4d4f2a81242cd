//! Three-way, per-field JSONL merge.
//!
//! Registered with git as `merge.beads.driver = "bd merge %A %O %A %B"` and
//! reused by sync-out for fresh-clone protection (empty base). Per record:
//!
//! - identical sides pass through
//! - a side unchanged from base yields to the changed side
//! - both changed resolves field by field: monotone timestamps take the
//!   maximum, set fields take the union, status prefers tombstone then the
//!   later `updated_at`, and every other scalar is ours-wins
//!
//! Output is deterministic: ascending by ID, canonical field order.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::model::{Comment, Dependency, Issue, Status};
use crate::sync::{ensure_no_conflict_markers, line_snippet, serialize_issues, write_atomic};
use crate::util::hash::content_hash;

/// Counters describing what a merge did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Records taken unchanged (identical on both sides).
    pub unchanged: usize,
    /// Records where exactly one side had changed from base.
    pub one_sided: usize,
    /// Records resolved field by field.
    pub field_merged: usize,
    /// Records present on a single side and added.
    pub added: usize,
    /// Records deleted relative to base.
    pub deleted: usize,
    /// Lines dropped for lacking an ID.
    pub dropped_no_id: usize,
}

/// Result of merging two record maps over a base.
#[derive(Debug)]
pub struct MergeOutcome {
    pub merged: Vec<Issue>,
    pub stats: MergeStats,
}

/// Merge driver entry: read ours/base/theirs, merge, write the result to
/// `output` (git passes `%A` twice so ours is rewritten in place).
///
/// # Errors
///
/// `ConflictMarkersPresent` when any input still carries markers;
/// `JsonlParse` on malformed records.
pub fn merge_files(ours: &Path, base: &Path, theirs: &Path, output: &Path) -> Result<MergeStats> {
    for path in [ours, base, theirs] {
        ensure_no_conflict_markers(path)?;
    }

    let (base_map, mut stats) = read_lenient(base)?;
    let (ours_map, s) = read_lenient(ours)?;
    stats.dropped_no_id += s.dropped_no_id;
    let (theirs_map, s) = read_lenient(theirs)?;
    stats.dropped_no_id += s.dropped_no_id;

    let outcome = merge_maps(&base_map, &ours_map, &theirs_map);
    stats = MergeStats {
        dropped_no_id: stats.dropped_no_id,
        ..outcome.stats
    };

    write_atomic(output, &serialize_issues(&outcome.merged)?)?;
    Ok(stats)
}

/// Lenient JSONL read: lines without an `id` are dropped with a warning
/// instead of failing the merge.
fn read_lenient(path: &Path) -> Result<(HashMap<String, Issue>, MergeStats)> {
    let mut map = HashMap::new();
    let mut stats = MergeStats::default();
    if !path.exists() {
        return Ok((map, stats));
    }
    let text = fs::read_to_string(path)?;
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| crate::error::BeadsError::JsonlParse {
                line: idx + 1,
                reason: e.to_string(),
                snippet: line_snippet(line),
            })?;
        if value.get("id").and_then(|v| v.as_str()).is_none() {
            tracing::warn!(
                path = %path.display(),
                line = idx + 1,
                "dropping JSONL record without an id"
            );
            stats.dropped_no_id += 1;
            continue;
        }
        let issue: Issue =
            serde_json::from_value(value).map_err(|e| crate::error::BeadsError::JsonlParse {
                line: idx + 1,
                reason: e.to_string(),
                snippet: line_snippet(line),
            })?;
        map.insert(issue.id.clone(), issue);
    }
    Ok((map, stats))
}

/// Merge ours/theirs over a base, per record then per field.
#[must_use]
pub fn merge_maps(
    base: &HashMap<String, Issue>,
    ours: &HashMap<String, Issue>,
    theirs: &HashMap<String, Issue>,
) -> MergeOutcome {
    let mut ids: Vec<&String> = ours.keys().chain(theirs.keys()).chain(base.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut merged = Vec::new();
    let mut stats = MergeStats::default();

    for id in ids {
        let b = base.get(id);
        let l = ours.get(id);
        let r = theirs.get(id);

        match (b, l, r) {
            // Deleted on both sides (or spurious base-only record)
            (_, None, None) => stats.deleted += 1,

            // Present on one side only
            (None, Some(l), None) => {
                merged.push(l.clone());
                stats.added += 1;
            }
            (None, None, Some(r)) => {
                merged.push(r.clone());
                stats.added += 1;
            }

            // In base, one side deleted the line
            (Some(b), Some(l), None) => {
                if changed_from(b, l) {
                    merged.push(l.clone());
                    stats.one_sided += 1;
                } else {
                    stats.deleted += 1;
                }
            }
            (Some(b), None, Some(r)) => {
                if changed_from(b, r) {
                    merged.push(r.clone());
                    stats.one_sided += 1;
                } else {
                    stats.deleted += 1;
                }
            }

            // Both sides have the record
            (b, Some(l), Some(r)) => {
                if records_equal(l, r) {
                    merged.push(l.clone());
                    stats.unchanged += 1;
                } else {
                    let l_changed = b.is_none_or(|b| changed_from(b, l));
                    let r_changed = b.is_none_or(|b| changed_from(b, r));
                    match (l_changed, r_changed) {
                        (true, false) => {
                            merged.push(l.clone());
                            stats.one_sided += 1;
                        }
                        (false, true) => {
                            merged.push(r.clone());
                            stats.one_sided += 1;
                        }
                        // Both changed (including both-created with
                        // different content: base treated as empty record)
                        _ => {
                            merged.push(merge_fields(l, r));
                            stats.field_merged += 1;
                        }
                    }
                }
            }
        }
    }

    MergeOutcome { merged, stats }
}

fn records_equal(a: &Issue, b: &Issue) -> bool {
    content_hash(a) == content_hash(b)
        && a.updated_at == b.updated_at
        && a.labels == b.labels
        && a.dependencies == b.dependencies
}

fn changed_from(base: &Issue, side: &Issue) -> bool {
    !records_equal(base, side)
}

/// Per-field resolution when both sides changed.
///
/// `ours` wins every scalar; status prefers tombstone, then the later
/// `updated_at`; monotone timestamps take the maximum; sets take the union.
/// The base never reappears here: an element deleted by both sides is in
/// neither input, so the union drops it, while one kept by either side
/// survives.
#[must_use]
pub fn merge_fields(ours: &Issue, theirs: &Issue) -> Issue {
    // Scalars start from ours; a lone tombstone side supplies the deletion
    // fields together with the winning status.
    let tombstone_side = match (
        ours.status == Status::Tombstone,
        theirs.status == Status::Tombstone,
    ) {
        (false, true) => Some(theirs),
        _ => None,
    };

    let mut merged = tombstone_side.unwrap_or(ours).clone();

    // Status: tombstone wins over anything; otherwise last writer wins.
    merged.status = match (
        ours.status == Status::Tombstone,
        theirs.status == Status::Tombstone,
    ) {
        (true, _) | (_, true) => Status::Tombstone,
        _ => {
            if theirs.updated_at > ours.updated_at {
                theirs.status.clone()
            } else {
                ours.status.clone()
            }
        }
    };

    // Monotone timestamps: maximum.
    merged.updated_at = ours.updated_at.max(theirs.updated_at);
    merged.closed_at = max_opt(ours.closed_at, theirs.closed_at);
    merged.deleted_at = max_opt(ours.deleted_at, theirs.deleted_at);

    // created_at converges to the earliest observation of the record.
    merged.created_at = ours.created_at.min(theirs.created_at);

    merged.labels = union_labels(&ours.labels, &theirs.labels);
    merged.dependencies = union_dependencies(&ours.dependencies, &theirs.dependencies);
    merged.comments = union_comments(&ours.comments, &theirs.comments);

    // Closed status must keep its timestamp invariant after the per-field mix.
    if merged.status.is_terminal() && merged.closed_at.is_none() {
        merged.closed_at = Some(merged.updated_at);
    }

    merged.content_hash = Some(content_hash(&merged));
    merged
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn union_labels(ours: &[String], theirs: &[String]) -> Vec<String> {
    let mut all: Vec<String> = ours.iter().chain(theirs.iter()).cloned().collect();
    all.sort();
    all.dedup();
    all
}

fn union_dependencies(ours: &[Dependency], theirs: &[Dependency]) -> Vec<Dependency> {
    let mut all: Vec<Dependency> = Vec::new();
    for dep in ours.iter().chain(theirs.iter()) {
        if !all
            .iter()
            .any(|d| d.depends_on_id == dep.depends_on_id && d.dep_type == dep.dep_type)
        {
            all.push(dep.clone());
        }
    }
    all.sort_by(|a, b| {
        (&a.depends_on_id, a.dep_type.as_str()).cmp(&(&b.depends_on_id, b.dep_type.as_str()))
    });
    all
}

fn union_comments(ours: &[Comment], theirs: &[Comment]) -> Vec<Comment> {
    let mut all: Vec<Comment> = Vec::new();
    for comment in ours.iter().chain(theirs.iter()) {
        if !all.iter().any(|c| {
            c.author == comment.author
                && c.body == comment.body
                && c.created_at == comment.created_at
        }) {
            all.push(comment.clone());
        }
    }
    all.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, Priority};
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn make_issue(id: &str, title: &str, updated: i64) -> Issue {
        let mut issue = Issue::new(id, title, ts(1_000));
        issue.updated_at = ts(updated);
        issue
    }

    fn map_of(issues: &[Issue]) -> HashMap<String, Issue> {
        issues.iter().map(|i| (i.id.clone(), i.clone())).collect()
    }

    fn dep(src: &str, dst: &str) -> Dependency {
        Dependency {
            issue_id: src.to_string(),
            depends_on_id: dst.to_string(),
            dep_type: DependencyType::Blocks,
            created_at: ts(1_000),
            created_by: None,
        }
    }

    #[test]
    fn identical_sides_pass_through() {
        let a = make_issue("bd-aaa", "Same", 2_000);
        let outcome = merge_maps(&map_of(&[a.clone()]), &map_of(&[a.clone()]), &map_of(&[a]));
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.stats.unchanged, 1);
    }

    #[test]
    fn one_sided_change_wins() {
        let base = make_issue("bd-aaa", "Base title", 2_000);
        let changed = make_issue("bd-aaa", "Theirs changed it", 3_000);
        let outcome = merge_maps(
            &map_of(std::slice::from_ref(&base)),
            &map_of(std::slice::from_ref(&base)),
            &map_of(&[changed]),
        );
        assert_eq!(outcome.merged[0].title, "Theirs changed it");
        assert_eq!(outcome.stats.one_sided, 1);
    }

    #[test]
    fn both_changed_scalars_are_ours_wins() {
        let base = make_issue("bd-aaa", "Base", 1_000);
        let mut ours = make_issue("bd-aaa", "Ours title", 2_000);
        ours.priority = Priority::HIGH;
        let mut theirs = make_issue("bd-aaa", "Theirs title", 3_000);
        theirs.priority = Priority::CRITICAL;

        let outcome = merge_maps(&map_of(&[base]), &map_of(&[ours]), &map_of(&[theirs]));
        let merged = &outcome.merged[0];
        assert_eq!(merged.title, "Ours title");
        assert_eq!(merged.priority, Priority::HIGH);
        // monotone: max updated_at
        assert_eq!(merged.updated_at, ts(3_000));
        assert_eq!(outcome.stats.field_merged, 1);
    }

    #[test]
    fn status_uses_later_updated_at() {
        let base = make_issue("bd-aaa", "T", 1_000);
        let mut ours = make_issue("bd-aaa", "T", 2_000);
        ours.status = Status::InProgress;
        let mut theirs = make_issue("bd-aaa", "T", 3_000);
        theirs.status = Status::Closed;
        theirs.closed_at = Some(ts(3_000));

        let outcome = merge_maps(&map_of(&[base]), &map_of(&[ours]), &map_of(&[theirs]));
        assert_eq!(outcome.merged[0].status, Status::Closed);
        assert!(outcome.merged[0].closed_at.is_some());
    }

    #[test]
    fn tombstone_wins_regardless_of_time() {
        let base = make_issue("bd-aaa", "T", 1_000);
        let ours = make_issue("bd-aaa", "Edited much later", 9_000);
        let mut theirs = make_issue("bd-aaa", "T", 2_000);
        theirs.tombstone(ts(2_000), Some("bob"), None);

        let outcome = merge_maps(&map_of(&[base]), &map_of(&[ours]), &map_of(&[theirs]));
        let merged = &outcome.merged[0];
        assert_eq!(merged.status, Status::Tombstone);
        assert_eq!(merged.deleted_by.as_deref(), Some("bob"));
        assert!(merged.deleted_at.is_some());
    }

    #[test]
    fn set_fields_union_and_both_side_deletions_drop() {
        let mut base = make_issue("bd-aaa", "T", 1_000);
        base.labels = vec!["both-delete".into(), "keep".into()];
        let mut ours = make_issue("bd-aaa", "Ours", 2_000);
        ours.labels = vec!["keep".into(), "ours-added".into()];
        let mut theirs = make_issue("bd-aaa", "Theirs", 3_000);
        theirs.labels = vec!["keep".into(), "theirs-added".into()];

        let outcome = merge_maps(&map_of(&[base]), &map_of(&[ours]), &map_of(&[theirs]));
        assert_eq!(
            outcome.merged[0].labels,
            vec!["keep", "ours-added", "theirs-added"]
        );
    }

    #[test]
    fn set_merge_is_commutative() {
        let mut base = make_issue("bd-aaa", "T", 1_000);
        base.labels = vec!["x".into()];
        base.dependencies = vec![dep("bd-aaa", "bd-old")];
        let mut left = make_issue("bd-aaa", "L", 2_000);
        left.labels = vec!["x".into(), "l".into()];
        left.dependencies = vec![dep("bd-aaa", "bd-old"), dep("bd-aaa", "bd-l")];
        let mut right = make_issue("bd-aaa", "R", 3_000);
        right.labels = vec!["x".into(), "r".into()];
        right.dependencies = vec![dep("bd-aaa", "bd-r")];

        let lr = merge_maps(
            &map_of(std::slice::from_ref(&base)),
            &map_of(std::slice::from_ref(&left)),
            &map_of(std::slice::from_ref(&right)),
        );
        let rl = merge_maps(&map_of(&[base]), &map_of(&[right]), &map_of(&[left]));
        assert_eq!(lr.merged[0].labels, rl.merged[0].labels);
        let dep_ids = |issue: &Issue| {
            issue
                .dependencies
                .iter()
                .map(|d| d.depends_on_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(dep_ids(&lr.merged[0]), dep_ids(&rl.merged[0]));
    }

    #[test]
    fn independent_adds_are_both_kept() {
        let ours = make_issue("bd-aaa111", "Issue from A", 2_000);
        let theirs = make_issue("bd-bbb222", "Issue from B", 2_000);
        let outcome = merge_maps(&HashMap::new(), &map_of(&[ours]), &map_of(&[theirs]));
        assert_eq!(outcome.merged.len(), 2);
        assert_eq!(outcome.merged[0].id, "bd-aaa111");
        assert_eq!(outcome.merged[1].id, "bd-bbb222");
        assert_eq!(outcome.stats.added, 2);
    }

    #[test]
    fn convergent_creation_same_id_merges_fields() {
        let mut ours = make_issue("bd-aaa", "Same start", 2_000);
        ours.labels = vec!["from-a".into()];
        let mut theirs = make_issue("bd-aaa", "Same start", 3_000);
        theirs.labels = vec!["from-b".into()];
        theirs.status = Status::InProgress;

        let outcome = merge_maps(&HashMap::new(), &map_of(&[ours]), &map_of(&[theirs]));
        let merged = &outcome.merged[0];
        assert_eq!(merged.labels, vec!["from-a", "from-b"]);
        assert_eq!(merged.status, Status::InProgress); // theirs is newer
        assert_eq!(merged.updated_at, ts(3_000));
    }

    #[test]
    fn unchanged_side_deletion_applies() {
        let base = make_issue("bd-aaa", "T", 1_000);
        // ours kept it unchanged, theirs removed the line entirely
        let outcome = merge_maps(&map_of(std::slice::from_ref(&base)), &map_of(&[base.clone()]), &HashMap::new());
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.stats.deleted, 1);
    }

    #[test]
    fn modified_side_survives_other_sides_line_removal() {
        let base = make_issue("bd-aaa", "T", 1_000);
        let edited = make_issue("bd-aaa", "Edited", 2_000);
        let outcome = merge_maps(&map_of(&[base]), &map_of(&[edited]), &HashMap::new());
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].title, "Edited");
    }

    #[test]
    fn output_is_sorted_by_id() {
        let issues = [
            make_issue("bd-ccc", "C", 2_000),
            make_issue("bd-aaa", "A", 2_000),
            make_issue("bd-bbb", "B", 2_000),
        ];
        let outcome = merge_maps(&HashMap::new(), &map_of(&issues), &HashMap::new());
        let ids: Vec<&str> = outcome.merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-aaa", "bd-bbb", "bd-ccc"]);
    }

    #[test]
    fn driver_rejects_conflict_markers() {
        let td = TempDir::new().unwrap();
        let ours = td.path().join("ours.jsonl");
        let base = td.path().join("base.jsonl");
        let theirs = td.path().join("theirs.jsonl");
        fs::write(&ours, "<<<<<<< HEAD\n").unwrap();
        fs::write(&base, "").unwrap();
        fs::write(&theirs, "").unwrap();

        let err = merge_files(&ours, &base, &theirs, &ours).unwrap_err();
        assert!(matches!(err, crate::error::BeadsError::ConflictMarkersPresent { .. }));
    }

    #[test]
    fn driver_merges_files_in_place() {
        let td = TempDir::new().unwrap();
        let ours_path = td.path().join("ours.jsonl");
        let base_path = td.path().join("base.jsonl");
        let theirs_path = td.path().join("theirs.jsonl");

        let base = make_issue("bd-aaa", "Base", 1_000);
        let ours = make_issue("bd-aaa", "Ours", 2_000);
        let mut theirs = make_issue("bd-aaa", "Base", 1_000);
        theirs.labels = vec!["remote".into()];
        theirs.updated_at = ts(1_500);

        fs::write(&base_path, serialize_issues(std::slice::from_ref(&base)).unwrap()).unwrap();
        fs::write(&ours_path, serialize_issues(std::slice::from_ref(&ours)).unwrap()).unwrap();
        fs::write(&theirs_path, serialize_issues(&[theirs]).unwrap()).unwrap();

        merge_files(&ours_path, &base_path, &theirs_path, &ours_path).unwrap();
        let merged = crate::sync::read_issues(&ours_path).unwrap();
        assert_eq!(merged[0].title, "Ours");
        assert_eq!(merged[0].labels, vec!["remote"]);
    }

    #[test]
    fn records_without_id_are_dropped() {
        let td = TempDir::new().unwrap();
        let ours = td.path().join("ours.jsonl");
        let base = td.path().join("base.jsonl");
        let theirs = td.path().join("theirs.jsonl");
        let good = serialize_issues(&[make_issue("bd-aaa", "A", 2_000)]).unwrap();
        fs::write(&ours, format!("{{\"title\":\"no id here\"}}\n{good}")).unwrap();
        fs::write(&base, "").unwrap();
        fs::write(&theirs, "").unwrap();

        let stats = merge_files(&ours, &base, &theirs, &ours).unwrap();
        assert_eq!(stats.dropped_no_id, 1);
        assert_eq!(crate::sync::read_issues(&ours).unwrap().len(), 1);
    }
}
