//! Structured error output for AI coding agents.
//!
//! Provides machine-parseable error information with:
//! - Stable error codes for categorization
//! - Hints for self-correction
//! - Retryability flags

use crate::error::BeadsError;
use serde::Serialize;
use serde_json::{Value, json};

/// Machine-readable error codes, `SCREAMING_SNAKE_CASE` for easy parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    NotInitialized,
    DbNotInitialized,
    AlreadyInitialized,
    DatabaseLocked,
    DatabaseError,
    IssueNotFound,
    AmbiguousId,
    IdCollision,
    InvalidId,
    IdSpaceExhausted,
    MissingParent,
    MaxDepthExceeded,
    DuplicateExternalRef,
    ValidationFailed,
    InvalidStatus,
    InvalidPriority,
    CycleDetected,
    SelfDependency,
    DependencyNotFound,
    JsonlParseError,
    ConflictMarkers,
    ForcePushDetected,
    CorruptMetadata,
    MergeConflict,
    SyncBranchIsMain,
    SyncBranchCheckedOut,
    HooksOutdated,
    HookTimeout,
    GitError,
    DaemonUnavailable,
    Cancelled,
    IoError,
    JsonError,
    YamlError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DbNotInitialized => "DB_NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseLocked => "DATABASE_LOCKED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::AmbiguousId => "AMBIGUOUS_ID",
            Self::IdCollision => "ID_COLLISION",
            Self::InvalidId => "INVALID_ID",
            Self::IdSpaceExhausted => "ID_SPACE_EXHAUSTED",
            Self::MissingParent => "MISSING_PARENT",
            Self::MaxDepthExceeded => "MAX_DEPTH_EXCEEDED",
            Self::DuplicateExternalRef => "DUPLICATE_EXTERNAL_REF",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::SelfDependency => "SELF_DEPENDENCY",
            Self::DependencyNotFound => "DEPENDENCY_NOT_FOUND",
            Self::JsonlParseError => "JSONL_PARSE_ERROR",
            Self::ConflictMarkers => "CONFLICT_MARKERS",
            Self::ForcePushDetected => "FORCE_PUSH_DETECTED",
            Self::CorruptMetadata => "CORRUPT_METADATA",
            Self::MergeConflict => "MERGE_CONFLICT",
            Self::SyncBranchIsMain => "SYNC_BRANCH_IS_MAIN",
            Self::SyncBranchCheckedOut => "SYNC_BRANCH_CHECKED_OUT",
            Self::HooksOutdated => "HOOKS_OUTDATED",
            Self::HookTimeout => "HOOK_TIMEOUT",
            Self::GitError => "GIT_ERROR",
            Self::DaemonUnavailable => "DAEMON_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller might succeed by retrying (after a wait or a fix).
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::DatabaseLocked
                | Self::ValidationFailed
                | Self::InvalidStatus
                | Self::InvalidPriority
                | Self::AmbiguousId
                | Self::DaemonUnavailable
        )
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Build from a `BeadsError`.
    #[must_use]
    pub fn from_error(err: &BeadsError) -> Self {
        let (code, context) = classify(err);
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion(),
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize to the `{"error": {...}}` envelope.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut out = String::new();
        if color {
            out.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            out.push_str("Error: ");
        }
        out.push_str(&self.message);
        if let Some(hint) = &self.hint {
            out.push('\n');
            if color {
                out.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                out.push_str("Hint: ");
            }
            out.push_str(hint);
        }
        out
    }
}

#[allow(clippy::too_many_lines)]
fn classify(err: &BeadsError) -> (ErrorCode, Option<Value>) {
    match err {
        BeadsError::NotInitialized => (ErrorCode::NotInitialized, None),
        BeadsError::DbNotInitialized { path } => (
            ErrorCode::DbNotInitialized,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::AlreadyInitialized { path } => (
            ErrorCode::AlreadyInitialized,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::DatabaseLocked { path } => (
            ErrorCode::DatabaseLocked,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::Database(_) => (ErrorCode::DatabaseError, None),
        BeadsError::IssueNotFound { id } => {
            (ErrorCode::IssueNotFound, Some(json!({"searched_id": id})))
        }
        BeadsError::AmbiguousId { partial, matches } => (
            ErrorCode::AmbiguousId,
            Some(json!({"partial_id": partial, "matches": matches})),
        ),
        BeadsError::IdCollision { id } => (ErrorCode::IdCollision, Some(json!({"id": id}))),
        BeadsError::InvalidId { id } => (ErrorCode::InvalidId, Some(json!({"id": id}))),
        BeadsError::IdSpaceExhausted { title } => {
            (ErrorCode::IdSpaceExhausted, Some(json!({"title": title})))
        }
        BeadsError::MissingParent { id } => {
            (ErrorCode::MissingParent, Some(json!({"parent_id": id})))
        }
        BeadsError::MaxDepthExceeded { id, max } => (
            ErrorCode::MaxDepthExceeded,
            Some(json!({"id": id, "max_depth": max})),
        ),
        BeadsError::DuplicateExternalRef {
            external_ref,
            existing,
        } => (
            ErrorCode::DuplicateExternalRef,
            Some(json!({"external_ref": external_ref, "existing": existing})),
        ),
        BeadsError::Validation { field, reason } => (
            ErrorCode::ValidationFailed,
            Some(json!({"field": field, "reason": reason})),
        ),
        BeadsError::InvalidStatus { status } => {
            (ErrorCode::InvalidStatus, Some(json!({"status": status})))
        }
        BeadsError::InvalidPriority { priority } => (
            ErrorCode::InvalidPriority,
            Some(json!({"priority": priority})),
        ),
        BeadsError::DependencyCycle { path } => {
            (ErrorCode::CycleDetected, Some(json!({"cycle_path": path})))
        }
        BeadsError::SelfDependency { id } => (ErrorCode::SelfDependency, Some(json!({"id": id}))),
        BeadsError::DependencyNotFound { id } => {
            (ErrorCode::DependencyNotFound, Some(json!({"id": id})))
        }
        BeadsError::JsonlParse { line, snippet, .. } => (
            ErrorCode::JsonlParseError,
            Some(json!({"line": line, "snippet": snippet})),
        ),
        BeadsError::ConflictMarkersPresent { path } => (
            ErrorCode::ConflictMarkers,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::ForcePushDetected {
            stored,
            current,
            branch,
        } => (
            ErrorCode::ForcePushDetected,
            Some(json!({"stored_sha": stored, "remote_sha": current, "branch": branch})),
        ),
        BeadsError::CorruptMetadata { key, value } => (
            ErrorCode::CorruptMetadata,
            Some(json!({"key": key, "value": value})),
        ),
        BeadsError::MergeConflict { path, markers } => (
            ErrorCode::MergeConflict,
            Some(json!({"path": path.display().to_string(), "markers": markers})),
        ),
        BeadsError::SyncBranchIsMain { branch } => (
            ErrorCode::SyncBranchIsMain,
            Some(json!({"branch": branch})),
        ),
        BeadsError::SyncBranchCheckedOut { branch } => (
            ErrorCode::SyncBranchCheckedOut,
            Some(json!({"branch": branch})),
        ),
        BeadsError::HooksOutdated { found, required } => (
            ErrorCode::HooksOutdated,
            Some(json!({"found": found, "required": required})),
        ),
        BeadsError::HookTimeout { hook } => (ErrorCode::HookTimeout, Some(json!({"hook": hook}))),
        BeadsError::Git { command, message } => (
            ErrorCode::GitError,
            Some(json!({"command": command, "message": message})),
        ),
        BeadsError::DaemonUnavailable { path } => (
            ErrorCode::DaemonUnavailable,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::Cancelled => (ErrorCode::Cancelled, None),
        BeadsError::Io(_) => (ErrorCode::IoError, None),
        BeadsError::Json(_) => (ErrorCode::JsonError, None),
        BeadsError::Yaml(_) => (ErrorCode::YamlError, None),
        BeadsError::Config(_) => (ErrorCode::ConfigError, None),
        BeadsError::Other(_) => (ErrorCode::InternalError, None),
    }
}
