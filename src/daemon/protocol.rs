//! Daemon wire protocol: newline-delimited JSON over the local socket.
//!
//! One request per line, one response per line. Subscribers receive
//! mutation events as additional lines after their `subscribe` response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BeadsError, StructuredError};
use crate::util::time::rfc3339_nanos;

/// Client request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Daemon health: version, status, last error.
    Health,
    /// Fetch one issue.
    Show { id: String },
    /// List issues, optionally filtered by status.
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// Ready-to-work issues.
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Issue counts by status.
    Stats,
    /// Create an issue from params; the daemon generates the ID.
    Create {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
    /// Update issue fields.
    Update {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
    },
    /// Close an issue.
    Close { id: String },
    /// Tombstone an issue.
    Delete {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Stream mutation events on this connection.
    Subscribe,
    /// Shut the daemon down.
    Stop,
}

/// Server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
}

impl Response {
    #[must_use]
    pub const fn ok_empty() -> Self {
        Self::Ok { data: None }
    }

    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self::Ok { data: Some(data) }
    }

    #[must_use]
    pub fn from_error(err: &BeadsError) -> Self {
        let structured = StructuredError::from_error(err);
        Self::Error {
            code: structured.code.as_str().to_string(),
            message: structured.message,
            hint: structured.hint,
        }
    }
}

/// What kind of mutation an event describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Close,
    Delete,
}

/// One entry in the mutation feed. Within one database, events observe the
/// store's commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Monotone sequence number within this daemon's lifetime.
    pub id: u64,
    pub kind: MutationKind,
    pub issue_id: String,
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
}

/// Registry entry written next to the socket (`.beads/daemon.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub socket: String,
    pub db_path: String,
    pub version: String,
    #[serde(with = "rfc3339_nanos")]
    pub started_at: DateTime<Utc>,
}
