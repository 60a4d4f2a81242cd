//! Sync orchestration.
//!
//! One `sync` invocation walks the state machine
//! `Start -> Fetch -> DetectForcePush -> AutoImport -> Export -> Commit ->
//! Push -> UpdateStoredSha -> Done`. Non-fatal situations (no remote, no
//! changes) short-circuit to `Done`; everything else surfaces a typed error.
//!
//! Force-push detection: `sync.remote_sha` holds the remote SHA observed
//! after the last successful push, and this engine is its only writer. A
//! fetched remote head that the stored SHA is not an ancestor of means the
//! branch history was rewritten, and the sync refuses to proceed.

use chrono::{SecondsFormat, Utc};
use std::thread;
use std::time::Duration;

use crate::config::Workspace;
use crate::error::{BeadsError, Result};
use crate::git::GitRunner;
use crate::hooks::check_git_hooks_version;
use crate::storage::SqliteStorage;
use crate::sync::export::{export_dirty, export_full};
use crate::sync::import::{AutoImportOutcome, ImportOptions, ImportStats, auto_import_if_stale, import_file};
use crate::sync::worktree::{SyncOutAction, SyncWorktree};
use crate::sync::METADATA_REMOTE_SHA;
use crate::util::cancel::CancelToken;

/// Environment key set on pushes so installed pre-push hooks can recognize
/// the engine's own push of the sync branch and skip re-entering sync.
pub const SYNC_PUSH_BYPASS_ENV: &str = "BEADS_SYNC_GIT_PUSH";

/// Fetch/push retry policy: bounded exponential backoff.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// States of one sync invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Start,
    Fetch,
    DetectForcePush,
    AutoImport,
    Export,
    Commit,
    Push,
    UpdateStoredSha,
    Done,
}

/// Options for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Remote name, `origin` by default.
    pub remote: String,
    /// Adopt the remote branch after a detected force-push: clears the
    /// stored SHA instead of refusing. User-initiated only.
    pub accept_remote: bool,
    /// Local content is authoritative for the worktree JSONL (deletes).
    pub force_overwrite: bool,
    /// Skip the push (offline / dry runs).
    pub no_push: bool,
    /// Cooperative cancellation.
    pub cancel: CancelToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            accept_remote: false,
            force_overwrite: false,
            no_push: false,
            cancel: CancelToken::new(),
        }
    }
}

/// What a sync run did.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub branch: String,
    pub fetched: bool,
    pub imported: Option<ImportStats>,
    pub exported_records: usize,
    pub sync_out: Option<SyncOutAction>,
    pub committed: bool,
    pub pushed: bool,
    pub remote_sha: Option<String>,
}

/// Orchestrates import, export, worktree and git for one database.
pub struct SyncEngine<'a> {
    workspace: &'a Workspace,
    git: GitRunner,
}

impl<'a> SyncEngine<'a> {
    /// Build an engine rooted at the workspace's repository.
    #[must_use]
    pub fn new(workspace: &'a Workspace) -> Self {
        let git = GitRunner::new(&workspace.root).with_cancel(CancelToken::new());
        Self { workspace, git }
    }

    /// Run one sync invocation.
    ///
    /// # Errors
    ///
    /// `SyncBranchIsMain` / `SyncBranchCheckedOut` on branch misuse,
    /// `ForcePushDetected` on history rewrite, plus import/export/git
    /// failures. Transient fetch/push failures are retried with backoff
    /// before surfacing.
    #[allow(clippy::too_many_lines)]
    pub fn run(&self, storage: &mut SqliteStorage, options: &SyncOptions) -> Result<SyncReport> {
        let git = self.git.clone().with_cancel(options.cancel.clone());
        let branch = self.workspace.sync_branch(storage)?;
        let mut report = SyncReport {
            branch: branch.clone(),
            ..Default::default()
        };

        let has_remote = git.has_remote(&options.remote);
        let mut remote_head: Option<String> = None;
        let mut step = SyncStep::Start;

        loop {
            options.cancel.check()?;
            tracing::debug!(step = ?step, branch = %branch, "sync step");
            step = match step {
                SyncStep::Start => {
                    validate_sync_branch(&git, &branch)?;
                    check_git_hooks_version(&self.workspace.root)?;
                    SyncStep::Fetch
                }

                SyncStep::Fetch => {
                    if has_remote {
                        // Explicit refspec so the remote-tracking ref always
                        // refreshes, forced updates included. A branch the
                        // remote does not have yet is a first sync, not an
                        // error.
                        let fetched = with_retry("fetch", &options.cancel, || {
                            git.fetch_branch(&options.remote, &branch)
                        });
                        match fetched {
                            Ok(()) => report.fetched = true,
                            Err(e) => {
                                tracing::debug!(error = %e, "fetch failed; treating as absent remote branch");
                            }
                        }
                        remote_head = git
                            .rev_parse(&format!("refs/remotes/{}/{branch}", options.remote))?;
                    }
                    SyncStep::DetectForcePush
                }

                SyncStep::DetectForcePush => {
                    if options.accept_remote {
                        storage.delete_metadata(METADATA_REMOTE_SHA)?;
                        tracing::info!("accepting remote sync branch; stored SHA cleared");
                    } else {
                        detect_force_push(
                            &git,
                            storage,
                            remote_head.as_deref(),
                            &branch,
                        )?;
                    }
                    SyncStep::AutoImport
                }

                SyncStep::AutoImport => {
                    self.ensure_branch(&git, &branch, remote_head.as_deref())?;
                    let worktree = SyncWorktree::locate(git.clone(), &branch)?;
                    worktree.ensure()?;
                    if let Some(remote_sha) = remote_head.as_deref() {
                        // Bring the worktree to the fetched remote state; the
                        // database is reconciled from its JSONL next.
                        worktree.git().run(&["reset", "--hard", remote_sha])?;
                        worktree.repair_sparse()?;
                    }

                    if self.workspace.no_auto_import {
                        tracing::debug!("auto-import disabled for this invocation");
                    } else {
                        // Local working-tree JSONL first (manual edits),
                        // then the worktree copy at the remote state.
                        let local = auto_import_if_stale(
                            storage,
                            &self.workspace.jsonl_path,
                            &ImportOptions::default(),
                            &options.cancel,
                        )?;
                        let jsonl_name = self.workspace.metadata.jsonl_export.clone();
                        let worktree_jsonl = worktree.jsonl_path(&jsonl_name);
                        let remote = if worktree_jsonl.exists() {
                            import_file(
                                storage,
                                &worktree_jsonl,
                                &ImportOptions {
                                    resurrection_source: Some(self.workspace.jsonl_path.clone()),
                                },
                                &options.cancel,
                            )?
                        } else {
                            AutoImportOutcome::NoChange
                        };
                        report.imported = merge_outcomes(local, remote);
                    }
                    SyncStep::Export
                }

                SyncStep::Export => {
                    let retention = self.workspace.retention_days(storage)?;
                    // Imports leave the working-tree JSONL behind the
                    // database (remaps especially), so rewrite it whole.
                    let needs_full =
                        report.imported.is_some() || !self.workspace.jsonl_path.exists();
                    let result = if needs_full {
                        Some(export_full(
                            storage,
                            &self.workspace.jsonl_path,
                            Some(retention),
                        )?)
                    } else {
                        export_dirty(storage, &self.workspace.jsonl_path)?
                    };
                    report.exported_records = result.as_ref().map_or(0, |r| r.total_records);

                    let worktree = SyncWorktree::locate(git.clone(), &branch)?;
                    let local_issues = crate::sync::read_issues(&self.workspace.jsonl_path)?;
                    let jsonl_name = self.workspace.metadata.jsonl_export.clone();
                    report.sync_out = Some(worktree.sync_out(
                        &local_issues,
                        &jsonl_name,
                        options.force_overwrite,
                    )?);
                    SyncStep::Commit
                }

                SyncStep::Commit => {
                    let worktree = SyncWorktree::locate(git.clone(), &branch)?;
                    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                    report.committed = worktree.commit(&format!("beads: sync {stamp}"))?;
                    SyncStep::Push
                }

                SyncStep::Push => {
                    if has_remote && !options.no_push {
                        // The bypass key is the branch name: the installed
                        // pre-push hook sees it and does not re-enter sync.
                        let push_git = git.clone().with_env(SYNC_PUSH_BYPASS_ENV, &branch);
                        with_retry("push", &options.cancel, || {
                            push_git.push_branch(&options.remote, &branch)
                        })?;
                        report.pushed = true;
                    }
                    SyncStep::UpdateStoredSha
                }

                SyncStep::UpdateStoredSha => {
                    if report.pushed {
                        if let Some(sha) = git.rev_parse(&format!("refs/heads/{branch}"))? {
                            storage.set_metadata(METADATA_REMOTE_SHA, &sha)?;
                            report.remote_sha = Some(sha);
                        }
                    }
                    SyncStep::Done
                }

                SyncStep::Done => break,
            };
        }

        tracing::info!(
            branch = %report.branch,
            committed = report.committed,
            pushed = report.pushed,
            "sync complete"
        );
        Ok(report)
    }

    /// Make sure the local sync branch exists: at the remote head when one
    /// is known, otherwise rooted at the current HEAD.
    fn ensure_branch(&self, git: &GitRunner, branch: &str, remote_head: Option<&str>) -> Result<()> {
        if git.branch_exists(branch)? {
            return Ok(());
        }
        match remote_head {
            Some(sha) => {
                git.run(&["branch", branch, sha])?;
            }
            None => {
                git.run(&["branch", branch])?;
            }
        }
        Ok(())
    }
}

/// The sync branch must be dedicated: never main/master and never the
/// branch the user has checked out.
fn validate_sync_branch(git: &GitRunner, branch: &str) -> Result<()> {
    if branch == "main" || branch == "master" {
        return Err(BeadsError::SyncBranchIsMain {
            branch: branch.to_string(),
        });
    }
    if git.current_branch()?.as_deref() == Some(branch) {
        return Err(BeadsError::SyncBranchCheckedOut {
            branch: branch.to_string(),
        });
    }
    Ok(())
}

/// Compare the stored SHA with the fetched remote head.
///
/// Empty stored SHA: first sync. Equal: no change. Stored an ancestor of
/// current: normal fast-forward. Anything else: the remote history was
/// rewritten.
fn detect_force_push(
    git: &GitRunner,
    storage: &SqliteStorage,
    remote_head: Option<&str>,
    branch: &str,
) -> Result<()> {
    let Some(stored) = storage.get_metadata(METADATA_REMOTE_SHA)? else {
        return Ok(());
    };
    if stored.is_empty() {
        return Ok(());
    }
    let Some(current) = remote_head else {
        return Ok(());
    };
    if stored == current {
        return Ok(());
    }
    if git.is_ancestor(&stored, current)? {
        return Ok(());
    }
    Err(BeadsError::ForcePushDetected {
        stored: short_sha(&stored),
        current: short_sha(current),
        branch: branch.to_string(),
    })
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}

fn merge_outcomes(a: AutoImportOutcome, b: AutoImportOutcome) -> Option<ImportStats> {
    let combine = |mut x: ImportStats, y: ImportStats| {
        x.created += y.created;
        x.updated += y.updated;
        x.skipped += y.skipped;
        x.tombstone_skipped += y.tombstone_skipped;
        x.resurrected += y.resurrected;
        x.remapped.extend(y.remapped);
        x
    };
    match (a, b) {
        (AutoImportOutcome::NoChange, AutoImportOutcome::NoChange) => None,
        (AutoImportOutcome::Imported(x), AutoImportOutcome::NoChange) => Some(x),
        (AutoImportOutcome::NoChange, AutoImportOutcome::Imported(y)) => Some(y),
        (AutoImportOutcome::Imported(x), AutoImportOutcome::Imported(y)) => Some(combine(x, y)),
    }
}

/// Retry transient git failures with bounded exponential backoff
/// (3 attempts, 500 ms base).
fn with_retry<F>(op: &str, cancel: &CancelToken, mut f: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let mut delay = RETRY_BASE;
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        cancel.check()?;
        match f() {
            Ok(()) => return Ok(()),
            Err(e @ BeadsError::Cancelled) => return Err(e),
            Err(e) => {
                tracing::warn!(op, attempt, error = %e, "transient git failure");
                last_err = Some(e);
                if attempt < RETRY_ATTEMPTS {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or(BeadsError::Cancelled))
}
