//! Sparse-checkout scratch worktree for the sync branch.
//!
//! The worktree lives under the repository's common git dir
//! (`<git-common-dir>/beads-worktrees/<branch>`), outside the user's
//! working tree, pinned to the sync branch with sparse-checkout restricted
//! to `/.beads/`. It is disposable: anything unhealthy is torn down and
//! recreated.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::git::GitRunner;
use crate::model::Issue;
use crate::sync::merge::merge_maps;
use crate::sync::{count_records, read_issue_map, serialize_issues, write_atomic};

/// Subdirectory of the git common dir that holds beads worktrees.
const WORKTREE_SUBDIR: &str = "beads-worktrees";

/// How sync-out wrote the worktree JSONL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutAction {
    /// Local content replaced the worktree file.
    Wrote,
    /// The worktree had strictly more records; merged with an empty base.
    MergedForProtection,
}

/// A scratch worktree pinned to the sync branch.
#[derive(Debug)]
pub struct SyncWorktree {
    repo_git: GitRunner,
    branch: String,
    dir: PathBuf,
}

impl SyncWorktree {
    /// Locate (without creating) the worktree for `branch`.
    ///
    /// # Errors
    ///
    /// `Git` when the repository's common dir cannot be resolved.
    pub fn locate(repo_git: GitRunner, branch: &str) -> Result<Self> {
        let common = repo_git.run(&["rev-parse", "--git-common-dir"])?;
        let mut common_dir = PathBuf::from(common.trimmed());
        if common_dir.is_relative() {
            common_dir = repo_git.repo_dir().join(common_dir);
        }
        let dir = common_dir.join(WORKTREE_SUBDIR).join(branch);
        Ok(Self {
            repo_git,
            branch: branch.to_string(),
            dir,
        })
    }

    /// The worktree directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runner scoped to the worktree directory.
    #[must_use]
    pub fn git(&self) -> GitRunner {
        self.repo_git.clone_into_dir(&self.dir)
    }

    /// Path of the JSONL inside the worktree.
    #[must_use]
    pub fn jsonl_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(".beads").join(file_name)
    }

    /// Make sure a healthy worktree exists: prune stale registrations,
    /// recreate anything `git worktree list` does not consider valid or
    /// whose `.git` pointer is gone, and keep sparse-checkout pinned to
    /// `/.beads/`.
    ///
    /// # Errors
    ///
    /// `Git` on git failures, `Io` on teardown failures.
    pub fn ensure(&self) -> Result<()> {
        self.repo_git.worktree_prune()?;

        let registered = self
            .repo_git
            .worktree_list()?
            .into_iter()
            .any(|entry| entry.path == self.dir);
        let healthy = registered && self.dir.join(".git").exists();

        if !healthy {
            if registered || self.dir.exists() {
                tracing::warn!(dir = %self.dir.display(), "recreating unhealthy sync worktree");
                let _ = self.repo_git.run(&[
                    "worktree",
                    "remove",
                    "--force",
                    &self.dir.to_string_lossy(),
                ]);
                if self.dir.exists() {
                    fs::remove_dir_all(&self.dir)?;
                }
                self.repo_git.worktree_prune()?;
            }
            if let Some(parent) = self.dir.parent() {
                fs::create_dir_all(parent)?;
            }
            // -f survives "registered but missing" leftovers; --no-checkout
            // defers materialization until sparse rules are in place.
            self.repo_git.run(&[
                "worktree",
                "add",
                "-f",
                "--no-checkout",
                &self.dir.to_string_lossy(),
                &self.branch,
            ])?;
        }

        self.repair_sparse()?;
        Ok(())
    }

    /// Validate the sparse list still includes `.beads`; re-init in
    /// non-cone mode when it does not, then materialize the checkout.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failures.
    pub fn repair_sparse(&self) -> Result<()> {
        let wt = self.git();
        let sparse_ok = wt
            .run(&["sparse-checkout", "list"])
            .map(|out| out.stdout.lines().any(|l| l.trim().trim_start_matches('/') == ".beads"))
            .unwrap_or(false);
        if !sparse_ok {
            wt.run(&["sparse-checkout", "set", "--no-cone", "/.beads/"])?;
        }
        // An unborn branch has nothing to materialize yet.
        if wt.rev_parse("HEAD")?.is_some() && !wt.run_ok(&["checkout", "--", "."])? {
            wt.run(&["reset", "--hard", "HEAD"])?;
        }
        Ok(())
    }

    /// Write local JSONL content into the worktree.
    ///
    /// Fresh-clone protection: when the worktree file has strictly more
    /// records than the local one and `force_overwrite` is unset, the two
    /// are merged with an empty base instead of overwritten, so a freshly
    /// cloned near-empty database cannot wipe the canonical file.
    /// `force_overwrite` is for delete propagation, where local is
    /// authoritative.
    ///
    /// # Errors
    ///
    /// `Io`, `JsonlParse` or `Git` failures.
    pub fn sync_out(
        &self,
        local_issues: &[Issue],
        file_name: &str,
        force_overwrite: bool,
    ) -> Result<SyncOutAction> {
        let target = self.jsonl_path(file_name);
        let remote_count = count_records(&target)?;

        let action = if !force_overwrite && remote_count > local_issues.len() {
            tracing::warn!(
                remote = remote_count,
                local = local_issues.len(),
                "worktree has more records than local; merging instead of overwriting"
            );
            let local_map: HashMap<String, Issue> = local_issues
                .iter()
                .map(|issue| (issue.id.clone(), issue.clone()))
                .collect();
            let remote_map = read_issue_map(&target)?;
            let outcome = merge_maps(&HashMap::new(), &local_map, &remote_map);
            write_atomic(&target, &serialize_issues(&outcome.merged)?)?;
            SyncOutAction::MergedForProtection
        } else {
            write_atomic(&target, &serialize_issues(local_issues)?)?;
            SyncOutAction::Wrote
        };

        self.git()
            .run(&["add", &format!(".beads/{file_name}")])?;
        Ok(action)
    }

    /// Commit staged `.beads/` changes; false when there is nothing to commit.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failures.
    pub fn commit(&self, message: &str) -> Result<bool> {
        let wt = self.git();
        let status = wt.run(&["status", "--porcelain", "--", ".beads"])?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }
        wt.run(&["commit", "-q", "-m", message, "--", ".beads"])?;
        Ok(true)
    }
}

/// Strip anything preceding `.beads/` from a path string. Bare-repo
/// worktrees report paths like `main/.beads/issues.jsonl`.
#[must_use]
pub fn normalize_beads_path(path: &str) -> &str {
    path.find(".beads/")
        .map_or(path, |idx| &path[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn make_issue(id: &str) -> Issue {
        Issue::new(id, format!("Issue {id}"), Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn init_repo_with_sync_branch(dir: &Path) -> GitRunner {
        let git = GitRunner::new(dir);
        git.run(&["init", "-q", "-b", "main"]).unwrap();
        git.run(&["config", "user.email", "t@example.com"]).unwrap();
        git.run(&["config", "user.name", "T"]).unwrap();
        fs::create_dir_all(dir.join(".beads")).unwrap();
        fs::write(dir.join(".beads/issues.jsonl"), "").unwrap();
        git.run(&["add", "."]).unwrap();
        git.run(&["commit", "-q", "-m", "init"]).unwrap();
        git.run(&["branch", "beads-sync"]).unwrap();
        git
    }

    #[test]
    fn normalize_strips_bare_repo_prefix() {
        assert_eq!(
            normalize_beads_path("main/.beads/issues.jsonl"),
            ".beads/issues.jsonl"
        );
        assert_eq!(
            normalize_beads_path(".beads/issues.jsonl"),
            ".beads/issues.jsonl"
        );
        assert_eq!(normalize_beads_path("other/path.txt"), "other/path.txt");
    }

    #[test]
    fn ensure_creates_and_recreates() {
        let td = TempDir::new().unwrap();
        let git = init_repo_with_sync_branch(td.path());
        let wt = SyncWorktree::locate(git, "beads-sync").unwrap();

        wt.ensure().unwrap();
        assert!(wt.dir().join(".git").exists());
        assert!(wt.dir().join(".beads").exists());

        // Damage it: drop the .git pointer, ensure repairs.
        fs::remove_file(wt.dir().join(".git")).unwrap();
        wt.ensure().unwrap();
        assert!(wt.dir().join(".git").exists());
    }

    #[test]
    fn sparse_only_materializes_beads() {
        let td = TempDir::new().unwrap();
        let git = init_repo_with_sync_branch(td.path());
        fs::write(td.path().join("code.rs"), "fn main() {}").unwrap();
        git.run(&["add", "."]).unwrap();
        git.run(&["commit", "-q", "-m", "code"]).unwrap();
        // move the sync branch up so the worktree sees both paths
        git.run(&["branch", "-f", "beads-sync", "main"]).unwrap();

        let wt = SyncWorktree::locate(git, "beads-sync").unwrap();
        wt.ensure().unwrap();
        assert!(wt.dir().join(".beads").exists());
        assert!(!wt.dir().join("code.rs").exists());
    }

    #[test]
    fn sync_out_writes_and_commits() {
        let td = TempDir::new().unwrap();
        let git = init_repo_with_sync_branch(td.path());
        let wt = SyncWorktree::locate(git, "beads-sync").unwrap();
        wt.ensure().unwrap();

        let issues = vec![make_issue("bd-aaa"), make_issue("bd-bbb")];
        let action = wt.sync_out(&issues, "issues.jsonl", false).unwrap();
        assert_eq!(action, SyncOutAction::Wrote);
        assert!(wt.commit("beads: sync test").unwrap());
        // idempotent commit
        assert!(!wt.commit("beads: sync test").unwrap());
    }

    #[test]
    fn fresh_clone_protection_merges_instead_of_overwriting() {
        let td = TempDir::new().unwrap();
        let git = init_repo_with_sync_branch(td.path());
        let wt = SyncWorktree::locate(git, "beads-sync").unwrap();
        wt.ensure().unwrap();

        // Remote state: many issues already in the worktree JSONL.
        let remote: Vec<Issue> = (0..10).map(|i| make_issue(&format!("bd-rem{i:03}"))).collect();
        write_atomic(
            &wt.jsonl_path("issues.jsonl"),
            &serialize_issues(&remote).unwrap(),
        )
        .unwrap();

        // Local fresh clone: only 2 issues.
        let local = vec![make_issue("bd-loc001"), make_issue("bd-loc002")];
        let action = wt.sync_out(&local, "issues.jsonl", false).unwrap();
        assert_eq!(action, SyncOutAction::MergedForProtection);

        let merged = read_issue_map(&wt.jsonl_path("issues.jsonl")).unwrap();
        assert_eq!(merged.len(), 12);
        assert!(merged.contains_key("bd-rem000"));
        assert!(merged.contains_key("bd-loc001"));
    }

    #[test]
    fn force_overwrite_is_authoritative() {
        let td = TempDir::new().unwrap();
        let git = init_repo_with_sync_branch(td.path());
        let wt = SyncWorktree::locate(git, "beads-sync").unwrap();
        wt.ensure().unwrap();

        let remote: Vec<Issue> = (0..5).map(|i| make_issue(&format!("bd-rem{i:03}"))).collect();
        write_atomic(
            &wt.jsonl_path("issues.jsonl"),
            &serialize_issues(&remote).unwrap(),
        )
        .unwrap();

        let local = vec![make_issue("bd-only01")];
        let action = wt.sync_out(&local, "issues.jsonl", true).unwrap();
        assert_eq!(action, SyncOutAction::Wrote);
        let on_disk = read_issue_map(&wt.jsonl_path("issues.jsonl")).unwrap();
        assert_eq!(on_disk.len(), 1);
    }
}
