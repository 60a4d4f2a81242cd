//! Command implementations.
//!
//! Commands are thin clients of the core: resolve the [`Workspace`] at the
//! edge, open the store, run one operation, print text or JSON.

pub mod comment;
pub mod config_cmd;
pub mod create;
pub mod daemon_cmd;
pub mod delete;
pub mod dep;
pub mod export;
pub mod hooks_cmd;
pub mod import;
pub mod init;
pub mod label;
pub mod lifecycle;
pub mod list;
pub mod merge_driver;
pub mod ready;
pub mod show;
pub mod sync_cmd;
pub mod update;

use serde::Serialize;
use std::io::IsTerminal;

use crate::config::{CONFIG_ISSUE_PREFIX, EnvOverrides, Workspace};
use crate::error::Result;
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::sync::import::{AutoImportOutcome, ImportOptions, auto_import_if_stale};
use crate::util::cancel::CancelToken;
use crate::util::id::resolve_id;

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub json: bool,
    pub actor: Option<String>,
    pub db: Option<std::path::PathBuf>,
    pub no_auto_import: bool,
    pub no_auto_flush: bool,
}

impl GlobalOpts {
    /// Actor for mutations: flag, then $USER, then "unknown".
    #[must_use]
    pub fn actor(&self) -> String {
        self.actor
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// JSON output when asked for or when stdout is piped.
    #[must_use]
    pub fn use_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

/// Resolve the workspace for this invocation (env read once, here).
///
/// # Errors
///
/// `NotInitialized` when no `.beads` is found.
pub fn load_workspace(globals: &GlobalOpts) -> Result<Workspace> {
    let mut env = EnvOverrides::from_env();
    if globals.db.is_some() {
        env.db.clone_from(&globals.db);
    }
    if globals.no_auto_import {
        env.no_auto_import = true;
    }
    Workspace::resolve(None, &env)
}

/// Open storage and run the staleness-gated auto-import first.
///
/// # Errors
///
/// Propagates open and import failures (conflict markers included).
pub fn open_storage_imported(workspace: &Workspace) -> Result<SqliteStorage> {
    let mut storage = workspace.open_storage()?;
    if !workspace.no_auto_import {
        match auto_import_if_stale(
            &mut storage,
            &workspace.jsonl_path,
            &ImportOptions::default(),
            &CancelToken::new(),
        )? {
            AutoImportOutcome::NoChange => {}
            AutoImportOutcome::Imported(stats) => {
                tracing::debug!(
                    created = stats.created,
                    updated = stats.updated,
                    "auto-import before command"
                );
            }
        }
    }
    Ok(storage)
}

/// Resolve user-supplied ID text (full ID or hash fragment) to a stored ID.
///
/// # Errors
///
/// `IssueNotFound` / `AmbiguousId` per the resolution rules.
pub fn resolve(storage: &SqliteStorage, input: &str) -> Result<String> {
    let prefix = storage
        .get_config(CONFIG_ISSUE_PREFIX)?
        .unwrap_or_else(|| "bd".to_string());
    resolve_id(
        input,
        &prefix,
        |id| storage.id_exists(id).unwrap_or(false),
        |fragment| storage.find_ids_by_hash(fragment).unwrap_or_default(),
    )
}

/// Print a value as pretty JSON or via the text renderer.
pub fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => eprintln!("serialization failed: {e}"),
        }
    } else {
        println!("{}", text());
    }
}

/// One-line issue rendering for lists.
#[must_use]
pub fn issue_line(issue: &Issue) -> String {
    let assignee = issue
        .assignee
        .as_deref()
        .map(|a| format!(" @{a}"))
        .unwrap_or_default();
    format!(
        "{}  [{}] {} {}{}",
        issue.id, issue.status, issue.priority, issue.title, assignee
    )
}

/// Multi-line issue rendering for `show`.
#[must_use]
pub fn issue_details(issue: &Issue) -> String {
    let mut out = format!(
        "{}\n  title:    {}\n  status:   {}\n  priority: {}\n  type:     {}\n",
        issue.id, issue.title, issue.status, issue.priority, issue.issue_type
    );
    if let Some(assignee) = &issue.assignee {
        out.push_str(&format!("  assignee: {assignee}\n"));
    }
    if let Some(description) = &issue.description {
        out.push_str(&format!("  description: {description}\n"));
    }
    if !issue.labels.is_empty() {
        out.push_str(&format!("  labels:   {}\n", issue.labels.join(", ")));
    }
    for dep in &issue.dependencies {
        out.push_str(&format!(
            "  dep:      {} -> {} ({})\n",
            dep.issue_id, dep.depends_on_id, dep.dep_type
        ));
    }
    for comment in &issue.comments {
        out.push_str(&format!("  comment [{}]: {}\n", comment.author, comment.body));
    }
    out
}
