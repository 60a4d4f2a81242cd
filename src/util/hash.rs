//! Content hashing for dirty tracking, import dedup and merge.
//!
//! SHA256 over stable ordered fields with NUL separators. Timestamps and
//! relations are excluded so that clock-only differences never look like
//! content changes.

use sha2::{Digest, Sha256};

use crate::model::Issue;

/// Compute the SHA256 content hash for an issue.
///
/// Fields included (stable order, NUL separated): title, description,
/// design, `acceptance_criteria`, notes, status, priority, `issue_type`,
/// assignee, `external_ref`, pinned.
///
/// Fields excluded: id, timestamps, labels/dependencies/comments (separate
/// entities), tombstone bookkeeping.
#[must_use]
pub fn content_hash(issue: &Issue) -> String {
    let mut hasher = Sha256::new();
    let mut add_field = |value: &str| {
        hasher.update(value.as_bytes());
        hasher.update(b"\x00");
    };

    add_field(&issue.title);
    add_field(issue.description.as_deref().unwrap_or(""));
    add_field(issue.design.as_deref().unwrap_or(""));
    add_field(issue.acceptance_criteria.as_deref().unwrap_or(""));
    add_field(issue.notes.as_deref().unwrap_or(""));
    add_field(issue.status.as_str());
    add_field(&issue.priority.0.to_string());
    add_field(issue.issue_type.as_str());
    add_field(issue.assignee.as_deref().unwrap_or(""));
    add_field(issue.external_ref.as_deref().unwrap_or(""));
    add_field(if issue.pinned { "true" } else { "false" });

    format!("{:x}", hasher.finalize())
}

/// SHA256 of raw bytes, hex-encoded. Used for whole-file JSONL hashes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, Status};
    use chrono::{TimeZone, Utc};

    fn make_issue() -> Issue {
        let mut issue = Issue::new("bd-test12", "Test Issue", Utc.timestamp_opt(0, 0).unwrap());
        issue.description = Some("A test description".to_string());
        issue
    }

    #[test]
    fn deterministic() {
        let issue = make_issue();
        assert_eq!(content_hash(&issue), content_hash(&issue));
    }

    #[test]
    fn is_sha256_hex() {
        let hash = content_hash(&make_issue());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn changes_with_title_and_status() {
        let mut issue = make_issue();
        let h1 = content_hash(&issue);
        issue.title = "Different".to_string();
        let h2 = content_hash(&issue);
        assert_ne!(h1, h2);
        issue.status = Status::Closed;
        assert_ne!(h2, content_hash(&issue));
    }

    #[test]
    fn ignores_timestamps_and_id() {
        let mut issue = make_issue();
        let h1 = content_hash(&issue);
        issue.updated_at = Utc.timestamp_opt(99, 0).unwrap();
        issue.id = "bd-other99".to_string();
        assert_eq!(h1, content_hash(&issue));
    }

    #[test]
    fn file_hash_matches_known_vector() {
        // sha256("") is a well-known constant
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
