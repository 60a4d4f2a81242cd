//! Issue validation.
//!
//! Enforced before creates and before import upserts so that invariant
//! violations never reach the database.

use crate::error::{BeadsError, Result};
use crate::model::{Issue, Status};
use crate::util::id::is_valid_id;

/// Maximum title length.
pub const MAX_TITLE_LEN: usize = 500;

/// A single field validation failure.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an issue against the store invariants.
///
/// - ID is legal
/// - title non-empty and at most 500 chars
/// - priority within 0..=4
/// - closed/tombstone implies `closed_at`
/// - tombstone implies `deleted_at`
///
/// # Errors
///
/// Returns every violation found, not just the first.
pub fn validate_issue(issue: &Issue) -> std::result::Result<(), Vec<ValidationIssue>> {
    let mut problems = Vec::new();
    let mut push = |field: &str, message: String| {
        problems.push(ValidationIssue {
            field: field.to_string(),
            message,
        });
    };

    if !is_valid_id(&issue.id) {
        push("id", format!("illegal issue ID '{}'", issue.id));
    }
    if issue.title.trim().is_empty() {
        push("title", "must not be empty".to_string());
    }
    if issue.title.chars().count() > MAX_TITLE_LEN {
        push("title", format!("longer than {MAX_TITLE_LEN} characters"));
    }
    if !(0..=4).contains(&issue.priority.0) {
        push("priority", format!("out of range: {}", issue.priority.0));
    }
    if issue.status.is_terminal() && issue.closed_at.is_none() {
        push("closed_at", "required when status is closed".to_string());
    }
    if issue.status == Status::Tombstone && issue.deleted_at.is_none() {
        push("deleted_at", "required when status is tombstone".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Validate and convert failures into a single `Validation` error.
///
/// # Errors
///
/// Returns the first violation as a `BeadsError::Validation`.
pub fn require_valid(issue: &Issue) -> Result<()> {
    validate_issue(issue).map_err(|problems| {
        let joined = problems
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        BeadsError::validation("issue", format!("{}: {joined}", issue.id))
    })
}
