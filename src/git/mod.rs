//! Git subprocess orchestration.
//!
//! Every git invocation goes through [`GitRunner`]: a working directory, an
//! optional deadline, and a cancellation token. Timed-out or cancelled calls
//! terminate the whole process group so spawned children cannot outlive the
//! call (best-effort on platforms without process groups). Only `--porcelain`
//! and `rev-parse` style outputs are parsed, never human-readable text.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{BeadsError, Result};
use crate::util::cancel::CancelToken;

/// Poll interval while waiting on a child with a deadline.
const WAIT_SLICE: Duration = Duration::from_millis(50);
/// Grace period for a killed child to exit.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a git invocation.
#[derive(Debug)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Trimmed stdout.
    #[must_use]
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs git commands inside one repository.
#[derive(Debug, Clone)]
pub struct GitRunner {
    repo_dir: PathBuf,
    deadline: Option<Duration>,
    cancel: CancelToken,
    /// Extra environment for spawned processes (e.g. hook bypass keys).
    env: Vec<(String, String)>,
}

impl GitRunner {
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            deadline: None,
            cancel: CancelToken::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Point this runner at a different working directory.
    pub fn set_repo_dir(&mut self, dir: impl Into<PathBuf>) {
        self.repo_dir = dir.into();
    }

    /// Same configuration, different working directory.
    #[must_use]
    pub fn clone_into_dir(&self, dir: &Path) -> Self {
        let mut runner = self.clone();
        runner.set_repo_dir(dir);
        runner
    }

    /// Run `git <args>`, failing on non-zero exit.
    ///
    /// # Errors
    ///
    /// `Git` on non-zero exit or timeout, `Cancelled` when the token fired.
    pub fn run(&self, args: &[&str]) -> Result<GitOutput> {
        let output = self.spawn_and_wait(args)?;
        if output.status.success() {
            Ok(GitOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            Err(BeadsError::Git {
                command: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Run `git <args>` and report only whether it succeeded.
    ///
    /// # Errors
    ///
    /// `Git` on spawn failure or timeout, `Cancelled` when the token fired.
    pub fn run_ok(&self, args: &[&str]) -> Result<bool> {
        Ok(self.spawn_and_wait(args)?.status.success())
    }

    fn spawn_and_wait(&self, args: &[&str]) -> Result<Output> {
        self.cancel.check()?;

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: a timeout kill reaches descendants too.
            cmd.process_group(0);
        }

        let command_line = args.join(" ");
        let child = cmd.spawn().map_err(|e| BeadsError::Git {
            command: command_line.clone(),
            message: format!("failed to spawn git: {e}"),
        })?;
        let pid = child.id();

        // Drain pipes on a helper thread so large porcelain output cannot
        // deadlock the deadline loop.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        let started = Instant::now();
        loop {
            match rx.recv_timeout(WAIT_SLICE) {
                Ok(result) => {
                    return result.map_err(|e| BeadsError::Git {
                        command: command_line,
                        message: e.to_string(),
                    });
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        kill_process_group(pid);
                        let _ = rx.recv_timeout(KILL_GRACE);
                        return Err(BeadsError::Cancelled);
                    }
                    if let Some(deadline) = self.deadline {
                        if started.elapsed() > deadline {
                            kill_process_group(pid);
                            let _ = rx.recv_timeout(KILL_GRACE);
                            return Err(BeadsError::Git {
                                command: command_line,
                                message: format!("timed out after {deadline:?}"),
                            });
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(BeadsError::Git {
                        command: command_line,
                        message: "wait thread disconnected".to_string(),
                    });
                }
            }
        }
    }
}

/// Terminate a child's process group; best-effort where groups don't exist.
fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        // The child was spawned as its own group leader, so pgid == pid.
        let _ = Command::new("kill")
            .args(["-TERM", &format!("-{pid}")])
            .status();
    }
    #[cfg(not(unix))]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status();
    }
}

// ============================================================================
// Typed wrappers for the commands the sync core needs
// ============================================================================

impl GitRunner {
    /// Whether `repo_dir` is inside a git work tree.
    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        self.run_ok(&["rev-parse", "--is-inside-work-tree"])
            .unwrap_or(false)
    }

    /// Repository top level.
    ///
    /// # Errors
    ///
    /// `Git` when not inside a repository.
    pub fn top_level(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.run(&["rev-parse", "--show-toplevel"])?.trimmed()))
    }

    /// Currently checked-out branch, `None` when detached.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failure.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = out.trimmed().to_string();
        Ok(if branch == "HEAD" { None } else { Some(branch) })
    }

    /// SHA of a ref, `None` when it does not resolve.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the token fired.
    pub fn rev_parse(&self, reference: &str) -> Result<Option<String>> {
        let output = self.spawn_and_wait(&["rev-parse", "--verify", "--quiet", reference])?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// `git merge-base --is-ancestor a b`.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failure.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.run_ok(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    /// Whether a local branch exists.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the token fired.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self
            .rev_parse(&format!("refs/heads/{branch}"))?
            .is_some())
    }

    /// Whether the named remote is configured.
    #[must_use]
    pub fn has_remote(&self, remote: &str) -> bool {
        self.run_ok(&["remote", "get-url", remote]).unwrap_or(false)
    }

    /// Fetch one branch with an explicit refspec so the remote-tracking ref
    /// is always refreshed, even for forced updates.
    ///
    /// # Errors
    ///
    /// `Git` on fetch failure (including network errors).
    pub fn fetch_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        self.run(&["fetch", remote, &refspec])?;
        Ok(())
    }

    /// Push a branch to a remote.
    ///
    /// # Errors
    ///
    /// `Git` on push failure.
    pub fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", remote, &format!("refs/heads/{branch}:refs/heads/{branch}")])?;
        Ok(())
    }

    /// `git worktree list --porcelain`, parsed into (path, branch?) entries.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failure.
    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        let mut entries = Vec::new();
        let mut current: Option<WorktreeEntry> = None;
        for line in out.stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(WorktreeEntry {
                    path: PathBuf::from(path),
                    branch: None,
                });
            } else if let Some(branch) = line.strip_prefix("branch ") {
                if let Some(entry) = current.as_mut() {
                    entry.branch = Some(
                        branch
                            .strip_prefix("refs/heads/")
                            .unwrap_or(branch)
                            .to_string(),
                    );
                }
            }
        }
        if let Some(entry) = current {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// `git worktree prune`.
    ///
    /// # Errors
    ///
    /// `Git` on subprocess failure.
    pub fn worktree_prune(&self) -> Result<()> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }
}

/// One `git worktree list --porcelain` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        let git = GitRunner::new(dir);
        git.run(&["init", "-q", "-b", "main"]).unwrap();
        git.run(&["config", "user.email", "test@example.com"]).unwrap();
        git.run(&["config", "user.name", "Test User"]).unwrap();
    }

    fn commit_empty(dir: &Path, msg: &str) {
        GitRunner::new(dir)
            .run(&["commit", "--allow-empty", "-q", "-m", msg])
            .unwrap();
    }

    #[test]
    fn detects_repo() {
        let td = TempDir::new().unwrap();
        let git = GitRunner::new(td.path());
        assert!(!git.is_git_repo());
        init_repo(td.path());
        assert!(git.is_git_repo());
    }

    #[test]
    fn rev_parse_and_branch() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        commit_empty(td.path(), "first");
        let git = GitRunner::new(td.path());

        let sha = git.rev_parse("HEAD").unwrap().unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(git.current_branch().unwrap().as_deref(), Some("main"));
        assert!(git.rev_parse("refs/heads/nope").unwrap().is_none());
    }

    #[test]
    fn ancestry_check() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        commit_empty(td.path(), "first");
        let git = GitRunner::new(td.path());
        let first = git.rev_parse("HEAD").unwrap().unwrap();
        commit_empty(td.path(), "second");
        let second = git.rev_parse("HEAD").unwrap().unwrap();

        assert!(git.is_ancestor(&first, &second).unwrap());
        assert!(!git.is_ancestor(&second, &first).unwrap());
    }

    #[test]
    fn failed_command_is_typed() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        let git = GitRunner::new(td.path());
        let err = git.run(&["rev-parse", "--verify", "no-such-ref"]).unwrap_err();
        assert!(matches!(err, BeadsError::Git { .. }));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let git = GitRunner::new(td.path()).with_cancel(cancel);
        assert!(matches!(git.run(&["status"]).unwrap_err(), BeadsError::Cancelled));
    }

    #[test]
    fn worktree_list_parses_porcelain() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        commit_empty(td.path(), "first");
        let git = GitRunner::new(td.path());
        let entries = git.worktree_list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
    }
}
