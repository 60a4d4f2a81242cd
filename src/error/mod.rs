//! Error types and handling for `beads_git`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration at the edges
//! - Provides recovery hints for user-facing errors
//! - Exit codes: 0 success, 1 user error, 2 concurrency/lock,
//!   3 conflict-markers-present, 4 force-push-detected

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `beads_git` operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Workspace / storage ===
    /// No `.beads` directory resolvable from the working directory.
    #[error("beads not initialized: run 'bd init' first")]
    NotInitialized,

    /// `.beads` exists but holds no database.
    #[error("no database in '{path}': run 'bd init'")]
    DbNotInitialized { path: PathBuf },

    /// Already initialized.
    #[error("already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    /// Database is locked by another process.
    #[error("database is locked: {path}")]
    DatabaseLocked { path: PathBuf },

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issues ===
    /// Issue with the specified ID was not found.
    #[error("issue not found: {id}")]
    IssueNotFound { id: String },

    /// Attempted to create an issue with an ID that already exists.
    #[error("issue ID collision: {id}")]
    IdCollision { id: String },

    /// Partial ID matches multiple issues.
    #[error("ambiguous ID '{partial}': matches {matches:?}")]
    AmbiguousId {
        partial: String,
        matches: Vec<String>,
    },

    /// Issue ID format is invalid.
    #[error("invalid issue ID format: {id}")]
    InvalidId { id: String },

    /// Every candidate ID collided through length 8 x nonce 10.
    #[error("ID space exhausted generating an ID for '{title}'")]
    IdSpaceExhausted { title: String },

    /// Child create without a resurrectable parent.
    #[error("missing parent: {id}")]
    MissingParent { id: String },

    /// Child ID would exceed the configured hierarchy depth.
    #[error("hierarchy depth limit ({max}) exceeded for {id}")]
    MaxDepthExceeded { id: String, max: usize },

    /// External ref already attached to another live issue.
    #[error("external_ref '{external_ref}' already used by {existing}")]
    DuplicateExternalRef {
        external_ref: String,
        existing: String,
    },

    // === Validation ===
    /// Field validation failed.
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("invalid status: {status}")]
    InvalidStatus { status: String },

    /// Priority out of valid range (0-4).
    #[error("priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Dependencies ===
    /// Adding the dependency would create a cycle.
    #[error("cycle detected in dependencies: {path}")]
    DependencyCycle { path: String },

    /// Self-referential dependency.
    #[error("issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    /// Dependency target not found.
    #[error("dependency target not found: {id}")]
    DependencyNotFound { id: String },

    // === JSONL / sync ===
    /// Failed to parse a line in the JSONL file.
    #[error("JSONL parse error at line {line}: {reason}: {snippet}")]
    JsonlParse {
        line: usize,
        reason: String,
        snippet: String,
    },

    /// Git merge conflict markers found in the JSONL file.
    #[error("conflict markers present in {path}")]
    ConflictMarkersPresent { path: PathBuf },

    /// Stored remote SHA is no longer an ancestor of the remote branch.
    #[error("force-push detected on '{branch}': stored {stored}, remote {current}")]
    ForcePushDetected {
        stored: String,
        current: String,
        branch: String,
    },

    /// A stored metadata value could not be parsed.
    #[error("corrupt metadata '{key}': {value}")]
    CorruptMetadata { key: String, value: String },

    /// Reserved: per-field resolution was impossible in the merge driver.
    #[error("merge conflict in {path}: {markers} unresolved markers")]
    MergeConflict { path: PathBuf, markers: usize },

    /// Sync branch equals main/master.
    #[error("sync branch '{branch}' must not be main or master")]
    SyncBranchIsMain { branch: String },

    /// Sync branch is currently checked out.
    #[error("sync branch '{branch}' is checked out; switch off it first")]
    SyncBranchCheckedOut { branch: String },

    /// Installed git hooks are older than the pinned minimum.
    #[error("installed hooks version {found} older than required {required}")]
    HooksOutdated { found: String, required: String },

    /// A user hook exceeded its deadline.
    #[error("hook '{hook}' timed out")]
    HookTimeout { hook: String },

    // === Subprocess / git ===
    /// A git invocation failed.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    // === Daemon ===
    /// Daemon socket unreachable and could not be started.
    #[error("daemon unavailable at '{path}'")]
    DaemonUnavailable { path: PathBuf },

    // === Cancellation ===
    /// Operation cancelled via cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    // === I/O ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Wrapped ===
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    /// Process exit code for this error.
    ///
    /// 1 user error, 2 concurrency/lock, 3 conflict markers, 4 force push.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseLocked { .. } => 2,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                2
            }
            Self::ConflictMarkersPresent { .. } => 3,
            Self::ForcePushDetected { .. } => 4,
            _ => 1,
        }
    }

    /// Human-friendly remediation for this error, one line.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotInitialized | Self::DbNotInitialized { .. } => {
                Some("Run: bd init".to_string())
            }
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize".to_string()),
            Self::AmbiguousId { .. } => Some("Provide more characters of the ID".to_string()),
            Self::ConflictMarkersPresent { path } => Some(format!(
                "Resolve the git conflict, or rewrite the file with: bd export -o {}",
                path.display()
            )),
            Self::ForcePushDetected { .. } => Some(
                "Inspect the remote sync branch, then rerun with --accept-remote to adopt it"
                    .to_string(),
            ),
            Self::SyncBranchCheckedOut { branch } => Some(format!(
                "Switch off the sync branch '{branch}' before syncing"
            )),
            Self::SyncBranchIsMain { .. } => {
                Some("Set sync-branch in .beads/config.yaml to a dedicated branch".to_string())
            }
            Self::MissingParent { id } => Some(format!(
                "Create '{id}' first, or import a JSONL that contains it"
            )),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)".to_string())
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: open, in_progress, blocked, closed".to_string())
            }
            Self::DependencyCycle { .. } => {
                Some("Remove one dependency to break the cycle".to_string())
            }
            Self::JsonlParse { line, .. } => Some(format!("Check line {line} of the JSONL file")),
            Self::DatabaseLocked { .. } => {
                Some("Another bd process holds the lock; retry shortly".to_string())
            }
            Self::HooksOutdated { .. } => Some("Run: bd hooks install".to_string()),
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = BeadsError::IssueNotFound {
            id: "bd-abc123".to_string(),
        };
        assert_eq!(err.to_string(), "issue not found: bd-abc123");

        let err = BeadsError::ForcePushDetected {
            stored: "abc12345".to_string(),
            current: "def67890".to_string(),
            branch: "beads-sync".to_string(),
        };
        assert!(err.to_string().contains("abc12345"));
        assert!(err.to_string().contains("def67890"));
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(BeadsError::NotInitialized.exit_code(), 1);
        assert_eq!(
            BeadsError::DatabaseLocked {
                path: PathBuf::from("x.db")
            }
            .exit_code(),
            2
        );
        assert_eq!(
            BeadsError::ConflictMarkersPresent {
                path: PathBuf::from("issues.jsonl")
            }
            .exit_code(),
            3
        );
        assert_eq!(
            BeadsError::ForcePushDetected {
                stored: "a".into(),
                current: "b".into(),
                branch: "beads-sync".into()
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn suggestions_mention_remediation() {
        assert_eq!(
            BeadsError::NotInitialized.suggestion().as_deref(),
            Some("Run: bd init")
        );
        let s = BeadsError::ConflictMarkersPresent {
            path: PathBuf::from(".beads/issues.jsonl"),
        }
        .suggestion()
        .unwrap();
        assert!(s.contains("bd export -o"));
    }
}
