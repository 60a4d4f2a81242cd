//! Out-of-process hooks.
//!
//! Two families:
//!
//! - **User hooks** under `.beads/hooks/` (`on_create`, `on_update`,
//!   `on_close`): invoked with `(issue_id, event)` arguments and the issue
//!   JSON on stdin. A hook that overruns its deadline is killed (whole
//!   process group where the platform has one) and reported as
//!   `HookTimeout`; callers log it, the triggering mutation is never rolled
//!   back for it.
//! - **Git hooks** installed into the repository by `bd hooks install`,
//!   each carrying a `# bd-hooks-version: <semver>` marker line. Sync
//!   refuses to cooperate with hooks older than the pinned minimum.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{BeadsError, Result};
use crate::git::GitRunner;
use crate::model::Issue;

/// Version stamped into freshly installed git hooks.
pub const HOOKS_VERSION: &str = "1.0.0";
/// Oldest hook version the sync engine will cooperate with.
pub const MIN_HOOKS_VERSION: &str = "1.0.0";
/// Default deadline for user hooks.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

static HOOK_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bd-hooks-version:\s*(\S+)").expect("valid regex"));

/// Lifecycle events that trigger user hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Create,
    Update,
    Close,
}

impl HookEvent {
    /// Script filename under `.beads/hooks/`.
    #[must_use]
    pub const fn script_name(self) -> &'static str {
        match self {
            Self::Create => "on_create",
            Self::Update => "on_update",
            Self::Close => "on_close",
        }
    }

    /// Event name passed as the second argument.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Close => "close",
        }
    }
}

/// Run a user hook if its script exists.
///
/// The hook receives `(issue_id, event)` as arguments and the issue JSON on
/// stdin. Non-zero exits are logged and tolerated; only spawn failures and
/// timeouts surface.
///
/// # Errors
///
/// `HookTimeout` when the deadline passes; `Io`/`Json` on setup failures.
pub fn run_user_hook(
    beads_dir: &Path,
    event: HookEvent,
    issue: &Issue,
    timeout: Duration,
) -> Result<()> {
    let script = beads_dir.join("hooks").join(event.script_name());
    if !script.is_file() {
        return Ok(());
    }

    let payload = serde_json::to_string(issue)?;
    let mut cmd = Command::new(&script);
    cmd.arg(&issue.id)
        .arg(event.event_name())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    if let Some(mut stdin) = child.stdin.take() {
        // A hook that never reads stdin must not wedge us.
        let _ = stdin.write_all(payload.as_bytes());
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => {
            if !status.success() {
                tracing::warn!(
                    hook = event.script_name(),
                    issue = %issue.id,
                    code = ?status.code(),
                    "hook exited non-zero"
                );
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            kill_group(pid);
            let _ = rx.recv_timeout(Duration::from_secs(2));
            Err(BeadsError::HookTimeout {
                hook: event.script_name().to_string(),
            })
        }
    }
}

/// Run a user hook and downgrade every failure to a log line. Hook
/// problems never fail the mutation that triggered them.
pub fn fire_user_hook(beads_dir: &Path, event: HookEvent, issue: &Issue) {
    if let Err(e) = run_user_hook(beads_dir, event, issue, DEFAULT_HOOK_TIMEOUT) {
        tracing::warn!(hook = event.script_name(), issue = %issue.id, error = %e, "hook failed");
    }
}

fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .args(["-TERM", &format!("-{pid}")])
            .status();
    }
    #[cfg(not(unix))]
    {
        // No process groups: descendants may survive the timeout.
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status();
    }
}

// ============================================================================
// Git hook installation
// ============================================================================

const GIT_HOOKS: &[(&str, &str)] = &[
    (
        "pre-commit",
        "#!/bin/sh\n# bd-hooks-version: {version}\n# beads: flush pending issue exports before committing\nbd export >/dev/null 2>&1 || true\n",
    ),
    (
        "post-merge",
        "#!/bin/sh\n# bd-hooks-version: {version}\n# beads: pick up issue changes after a merge\nbd import >/dev/null 2>&1 || true\n",
    ),
    (
        "pre-push",
        "#!/bin/sh\n# bd-hooks-version: {version}\n# beads: flush before pushing; skip when the sync engine itself pushes\nif [ -n \"$BEADS_SYNC_GIT_PUSH\" ]; then exit 0; fi\nbd export >/dev/null 2>&1 || true\n",
    ),
    (
        "post-checkout",
        "#!/bin/sh\n# bd-hooks-version: {version}\n# beads: pick up issue changes after switching branches\nbd import >/dev/null 2>&1 || true\n",
    ),
];

/// Install the recommended git hooks; returns the names written.
///
/// Existing hooks without a beads marker are left alone (and reported via
/// a warning); hooks we previously installed are overwritten in place.
/// Also registers the JSONL merge driver and its `.gitattributes` line.
///
/// # Errors
///
/// `Git` when the hooks directory cannot be resolved, `Io` on writes.
pub fn install_git_hooks(repo_root: &Path) -> Result<Vec<String>> {
    let hooks_dir = git_hooks_dir(repo_root)?;
    fs::create_dir_all(&hooks_dir)?;

    let mut written = Vec::new();
    for (name, template) in GIT_HOOKS {
        let path = hooks_dir.join(name);
        if path.exists() {
            let existing = fs::read_to_string(&path).unwrap_or_default();
            if !HOOK_VERSION_RE.is_match(&existing) {
                tracing::warn!(hook = name, "existing non-beads hook left untouched");
                continue;
            }
        }
        let contents = template.replace("{version}", HOOKS_VERSION);
        fs::write(&path, contents)?;
        make_executable(&path)?;
        written.push((*name).to_string());
    }

    register_merge_driver(repo_root)?;
    Ok(written)
}

/// Register the JSONL merge driver: repeated %A signals in-place output.
///
/// # Errors
///
/// `Git` on config failures, `Io` when `.gitattributes` cannot be written.
pub fn register_merge_driver(repo_root: &Path) -> Result<()> {
    let git = GitRunner::new(repo_root);
    git.run(&["config", "merge.beads.name", "beads JSONL merge"])?;
    git.run(&["config", "merge.beads.driver", "bd merge %A %O %A %B"])?;

    let attributes_path = repo_root.join(".gitattributes");
    let line = ".beads/issues.jsonl merge=beads";
    let existing = fs::read_to_string(&attributes_path).unwrap_or_default();
    if !existing.lines().any(|l| l.trim() == line) {
        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(line);
        contents.push('\n');
        fs::write(&attributes_path, contents)?;
    }
    Ok(())
}

/// Version of the installed pre-push hook, if one with a marker exists.
///
/// # Errors
///
/// `Io` when the hook exists but cannot be read.
pub fn installed_hooks_version(repo_root: &Path) -> Result<Option<semver::Version>> {
    let hooks_dir = git_hooks_dir(repo_root)?;
    let path = hooks_dir.join("pre-push");
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    Ok(HOOK_VERSION_RE
        .captures(&contents)
        .and_then(|caps| caps.get(1))
        .and_then(|m| semver::Version::parse(m.as_str()).ok()))
}

/// Refuse sync cooperation with hooks older than the pinned minimum.
/// Missing hooks (or hooks without a marker) are fine.
///
/// # Errors
///
/// `HooksOutdated` when a marked hook predates `MIN_HOOKS_VERSION`.
pub fn check_git_hooks_version(repo_root: &Path) -> Result<()> {
    let Some(found) = installed_hooks_version(repo_root)? else {
        return Ok(());
    };
    let required = semver::Version::parse(MIN_HOOKS_VERSION)
        .map_err(|e| BeadsError::Config(format!("bad pinned hooks version: {e}")))?;
    if found < required {
        return Err(BeadsError::HooksOutdated {
            found: found.to_string(),
            required: required.to_string(),
        });
    }
    Ok(())
}

fn git_hooks_dir(repo_root: &Path) -> Result<PathBuf> {
    let git = GitRunner::new(repo_root);
    let out = git.run(&["rev-parse", "--git-path", "hooks"])?;
    let mut dir = PathBuf::from(out.trimmed());
    if dir.is_relative() {
        dir = repo_root.join(dir);
    }
    Ok(dir)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn make_issue(id: &str) -> Issue {
        Issue::new(id, "T", Utc.timestamp_opt(0, 0).unwrap())
    }

    fn init_repo(dir: &Path) {
        let git = GitRunner::new(dir);
        git.run(&["init", "-q", "-b", "main"]).unwrap();
    }

    #[test]
    fn missing_user_hook_is_noop() {
        let td = TempDir::new().unwrap();
        run_user_hook(
            td.path(),
            HookEvent::Create,
            &make_issue("bd-aaa"),
            Duration::from_secs(1),
        )
        .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn user_hook_receives_args_and_stdin() {
        let td = TempDir::new().unwrap();
        let hooks = td.path().join("hooks");
        fs::create_dir_all(&hooks).unwrap();
        let out_file = td.path().join("out.txt");
        let script = hooks.join("on_close");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1 $2\" > {}\ncat >> {}\n", out_file.display(), out_file.display()),
        )
        .unwrap();
        make_executable(&script).unwrap();

        run_user_hook(
            td.path(),
            HookEvent::Close,
            &make_issue("bd-aaa111"),
            Duration::from_secs(5),
        )
        .unwrap();

        let captured = fs::read_to_string(&out_file).unwrap();
        assert!(captured.starts_with("bd-aaa111 close"));
        assert!(captured.contains("\"id\":\"bd-aaa111\""));
    }

    #[cfg(unix)]
    #[test]
    fn user_hook_timeout_is_typed() {
        let td = TempDir::new().unwrap();
        let hooks = td.path().join("hooks");
        fs::create_dir_all(&hooks).unwrap();
        let script = hooks.join("on_create");
        fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        make_executable(&script).unwrap();

        let err = run_user_hook(
            td.path(),
            HookEvent::Create,
            &make_issue("bd-aaa"),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, BeadsError::HookTimeout { .. }));
    }

    #[test]
    fn install_writes_versioned_hooks() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());

        let written = install_git_hooks(td.path()).unwrap();
        assert_eq!(written.len(), 4);

        let version = installed_hooks_version(td.path()).unwrap().unwrap();
        assert_eq!(version.to_string(), HOOKS_VERSION);
        check_git_hooks_version(td.path()).unwrap();
    }

    #[test]
    fn merge_driver_registration_is_idempotent() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());

        register_merge_driver(td.path()).unwrap();
        register_merge_driver(td.path()).unwrap();

        let git = GitRunner::new(td.path());
        let driver = git.run(&["config", "merge.beads.driver"]).unwrap();
        assert_eq!(driver.trimmed(), "bd merge %A %O %A %B");

        let attributes = fs::read_to_string(td.path().join(".gitattributes")).unwrap();
        assert_eq!(
            attributes
                .lines()
                .filter(|l| l.contains("merge=beads"))
                .count(),
            1
        );
    }

    #[test]
    fn foreign_hooks_are_preserved() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        let hooks_dir = git_hooks_dir(td.path()).unwrap();
        fs::create_dir_all(&hooks_dir).unwrap();
        fs::write(hooks_dir.join("pre-push"), "#!/bin/sh\necho mine\n").unwrap();

        let written = install_git_hooks(td.path()).unwrap();
        assert!(!written.contains(&"pre-push".to_string()));
        let contents = fs::read_to_string(hooks_dir.join("pre-push")).unwrap();
        assert!(contents.contains("echo mine"));
        // unmarked hook does not trip the version gate
        check_git_hooks_version(td.path()).unwrap();
    }

    #[test]
    fn outdated_marker_fails_the_gate() {
        let td = TempDir::new().unwrap();
        init_repo(td.path());
        let hooks_dir = git_hooks_dir(td.path()).unwrap();
        fs::create_dir_all(&hooks_dir).unwrap();
        fs::write(
            hooks_dir.join("pre-push"),
            "#!/bin/sh\n# bd-hooks-version: 0.0.1\n",
        )
        .unwrap();

        let err = check_git_hooks_version(td.path()).unwrap_err();
        assert!(matches!(err, BeadsError::HooksOutdated { .. }));
    }
}
