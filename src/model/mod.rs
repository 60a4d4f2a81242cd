//! Core data types for `beads_git`.
//!
//! This module defines the entities shared by the store, the JSONL codec
//! and the sync engine:
//! - `Issue` - the primary work item
//! - `Status` - lifecycle states, including `tombstone`
//! - `IssueType` - categories of issues
//! - `Dependency` - directed edges between issues
//! - `Comment` - issue comments
//!
//! Field declaration order on `Issue` is load-bearing: serde serializes in
//! declaration order, and the JSONL record format fixes the leading keys to
//! `id,title,status,priority,issue_type,created_at,updated_at` so diffs stay
//! stable across clones.

use crate::util::time::{rfc3339_nanos, rfc3339_nanos_opt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Title given to tombstoned issues. The original title lives on only in
/// JSONL history and in `delete_reason` context.
pub const TOMBSTONE_TITLE: &str = "[deleted]";

/// Description prefix applied to parents auto-inserted at import time.
pub const RESURRECTED_PREFIX: &str = "[RESURRECTED]";

/// Default tombstone retention before pruning, in days.
pub const DEFAULT_TOMBSTONE_RETENTION_DAYS: u64 = 90;

/// Issue lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
    Tombstone,
    #[serde(untagged)]
    Custom(String),
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
            Self::Custom(value) => value,
        }
    }

    /// Closed or tombstoned.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }

    /// Counts as a live blocker for readiness.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            "tombstone" => Ok(Self::Tombstone),
            other if !other.is_empty() => Ok(Self::Custom(other.to_string())),
            other => Err(crate::error::BeadsError::InvalidStatus {
                status: other.to_string(),
            }),
        }
    }
}

/// Issue priority (0=highest, 4=backlog).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        let val = s.strip_prefix('P').unwrap_or(&s);
        match val.parse::<i32>() {
            Ok(p) if (0..=4).contains(&p) => Ok(Self(p)),
            _ => Err(crate::error::BeadsError::InvalidPriority {
                priority: val.parse().unwrap_or(-1),
            }),
        }
    }
}

/// Issue type category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
    #[serde(untagged)]
    Custom(String),
}

impl IssueType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
            Self::Custom(value) => value,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "epic" => Ok(Self::Epic),
            "chore" => Ok(Self::Chore),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

/// Dependency relationship type.
///
/// `blocks` and `parent-child` carry readiness and hierarchy; the rest are
/// annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    ParentChild,
    Related,
    Duplicates,
    DiscoveredFrom,
    #[serde(untagged)]
    Custom(String),
}

impl DependencyType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent-child",
            Self::Related => "related",
            Self::Duplicates => "duplicates",
            Self::DiscoveredFrom => "discovered-from",
            Self::Custom(value) => value,
        }
    }

    /// Only `blocks` edges gate readiness.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocks)
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = crate::error::BeadsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocks" => Ok(Self::Blocks),
            "parent-child" => Ok(Self::ParentChild),
            "related" => Ok(Self::Related),
            "duplicates" => Ok(Self::Duplicates),
            "discovered-from" => Ok(Self::DiscoveredFrom),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

/// Directed edge between two issues.
///
/// Edges are stored as their own entity keyed by
/// `(issue_id, depends_on_id, type)`; issues never embed each other at rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    /// The issue that has the dependency (source).
    pub issue_id: String,

    /// The issue being depended on (target).
    pub depends_on_id: String,

    /// Type of dependency.
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    /// Creation timestamp.
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,

    /// Creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// A comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    #[serde(default)]
    pub id: i64,
    pub issue_id: String,
    pub author: String,
    #[serde(rename = "text")]
    pub body: String,
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,
}

/// The primary issue entity.
///
/// Declaration order fixes the JSONL key order; optional fields are only
/// written when non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Unique ID (e.g., "bd-7xq3", "bd-7xq3.2.1").
    pub id: String,

    /// Title (1-500 chars).
    pub title: String,

    /// Workflow status.
    #[serde(default)]
    pub status: Status,

    /// Priority (0=highest, 4=backlog).
    #[serde(default)]
    pub priority: Priority,

    /// Issue type.
    #[serde(default)]
    pub issue_type: IssueType,

    /// Creation timestamp.
    #[serde(with = "rfc3339_nanos")]
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    #[serde(with = "rfc3339_nanos")]
    pub updated_at: DateTime<Utc>,

    /// Detailed description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Technical design notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,

    /// Acceptance criteria.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,

    /// Additional notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Assigned user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Creator username; part of the ID hash input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// Closure timestamp. Invariant: set whenever status is closed.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_nanos_opt")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Canonical URL of an external counterpart. Unique across live issues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Labels attached to this issue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Outgoing dependency edges (for export; the table is authoritative).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Comments (for export; the table is authoritative).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,

    // Tombstone fields
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_nanos_opt")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_reason: Option<String>,
    /// Issue type before tombstoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    /// Repository the issue was created in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,

    /// Content hash for dirty tracking and dedup; never serialized.
    #[serde(skip)]
    pub content_hash: Option<String>,
}

impl Issue {
    /// Minimal open issue with the given id/title and a single timestamp.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: Status::Open,
            priority: Priority::default(),
            issue_type: IssueType::default(),
            created_at: now,
            updated_at: now,
            description: None,
            design: None,
            acceptance_criteria: None,
            notes: None,
            assignee: None,
            created_by: None,
            closed_at: None,
            external_ref: None,
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
            deleted_at: None,
            deleted_by: None,
            delete_reason: None,
            original_type: None,
            pinned: false,
            ephemeral: false,
            source_repo: None,
            content_hash: None,
        }
    }

    /// Rewrite this issue as a tombstone in place.
    ///
    /// Title becomes the sentinel, the original type is preserved, and the
    /// deletion fields are stamped.
    pub fn tombstone(&mut self, now: DateTime<Utc>, by: Option<&str>, reason: Option<&str>) {
        self.original_type = Some(self.issue_type.as_str().to_string());
        self.title = TOMBSTONE_TITLE.to_string();
        self.status = Status::Tombstone;
        self.deleted_at = Some(now);
        self.deleted_by = by.map(str::to_string);
        self.delete_reason = reason.map(str::to_string);
        self.closed_at.get_or_insert(now);
        self.updated_at = now;
    }

    /// Check if this issue is a tombstone past its retention window.
    #[must_use]
    pub fn is_expired_tombstone(&self, retention_days: Option<u64>, now: DateTime<Utc>) -> bool {
        if self.status != Status::Tombstone {
            return false;
        }
        let days = retention_days.unwrap_or(DEFAULT_TOMBSTONE_RETENTION_DAYS);
        if days == 0 {
            return false;
        }
        let Some(deleted_at) = self.deleted_at else {
            return false; // keep if deletion time is unknown
        };
        let days = i64::try_from(days).unwrap_or(i64::MAX);
        now > deleted_at + chrono::Duration::days(days)
    }
}

/// Epic completion status with child counts.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EpicStatus {
    pub epic: Issue,
    pub total_children: usize,
    pub closed_children: usize,
    pub eligible_for_close: bool,
}
