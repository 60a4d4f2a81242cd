//! Workspace resolution and configuration for `beads_git`.
//!
//! Path and environment reads happen here, at the edge, exactly once. The
//! resulting [`Workspace`] is an immutable value handed into the core; no
//! core module reads `env` or the working directory itself.
//!
//! Configuration precedence (highest wins):
//! 1. CLI flags
//! 2. Environment (`BEADS_DB`, `BEADS_DIR`, `BEADS_SYNC_BRANCH`,
//!    `BEADS_NO_DAEMON`, `BD_NO_AUTO_IMPORT`)
//! 3. Project config (`.beads/config.yaml`)
//! 4. DB config table
//! 5. Defaults

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStorage;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory that anchors a beads workspace.
pub const BEADS_DIR_NAME: &str = ".beads";
/// Default database filename.
pub const DEFAULT_DB_FILENAME: &str = "beads.db";
/// Default JSONL export filename.
pub const DEFAULT_JSONL_FILENAME: &str = "issues.jsonl";
/// Legacy JSONL filename, migrated on first resolution.
pub const LEGACY_JSONL_FILENAME: &str = "beads.jsonl";
/// Redirect file: first non-comment line points at another `.beads` dir.
pub const REDIRECT_FILENAME: &str = "redirect";
/// Project config filename.
pub const CONFIG_FILENAME: &str = "config.yaml";
/// Daemon socket filename.
pub const SOCKET_FILENAME: &str = "bd.sock";
/// Default sync branch.
pub const DEFAULT_SYNC_BRANCH: &str = "beads-sync";

/// DB config key holding the issue prefix.
pub const CONFIG_ISSUE_PREFIX: &str = "issue_prefix";
/// DB config key for the sync branch.
pub const CONFIG_SYNC_BRANCH: &str = "sync.branch";
/// DB config key for the hierarchy depth limit.
pub const CONFIG_MAX_DEPTH: &str = "hierarchy.max-depth";
/// DB config key for tombstone retention in days.
pub const CONFIG_RETENTION_DAYS: &str = "deletions.retention-days";

/// `metadata.json`: names of the database and JSONL files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    pub database: String,
    pub jsonl_export: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            database: DEFAULT_DB_FILENAME.to_string(),
            jsonl_export: DEFAULT_JSONL_FILENAME.to_string(),
        }
    }
}

impl Metadata {
    /// Load `metadata.json` from the beads directory; defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(beads_dir: &Path) -> Result<Self> {
        let path = beads_dir.join("metadata.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let mut metadata: Self = serde_json::from_str(&contents)?;
        if metadata.database.trim().is_empty() {
            metadata.database = DEFAULT_DB_FILENAME.to_string();
        }
        if metadata.jsonl_export.trim().is_empty() {
            metadata.jsonl_export = DEFAULT_JSONL_FILENAME.to_string();
        }
        Ok(metadata)
    }

    /// Write `metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, beads_dir: &Path) -> Result<()> {
        let path = beads_dir.join("metadata.json");
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents + "\n")?;
        Ok(())
    }
}

/// Project config loaded from `.beads/config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProjectConfig {
    /// Dedicated branch carrying the `.beads/` subtree.
    pub sync_branch: Option<String>,
    /// Hierarchy depth limit for child issues.
    pub max_depth: Option<usize>,
    /// Tombstone retention in days before pruning.
    pub retention_days: Option<u64>,
}

impl ProjectConfig {
    /// Load from `.beads/config.yaml`; defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid YAML.
    pub fn load(beads_dir: &Path) -> Result<Self> {
        let path = beads_dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

/// Environment overrides, read exactly once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub db: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub sync_branch: Option<String>,
    pub no_daemon: bool,
    pub no_auto_import: bool,
}

impl EnvOverrides {
    /// Capture the beads-relevant environment.
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |key: &str| {
            env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            db: non_empty("BEADS_DB").map(PathBuf::from),
            dir: non_empty("BEADS_DIR").map(PathBuf::from),
            sync_branch: non_empty("BEADS_SYNC_BRANCH"),
            no_daemon: non_empty("BEADS_NO_DAEMON").is_some_and(|v| v != "0"),
            no_auto_import: non_empty("BD_NO_AUTO_IMPORT").is_some_and(|v| v != "0"),
        }
    }
}

/// Immutable view of a resolved workspace.
///
/// Carries every path and override the core needs, so the core never touches
/// global state.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory containing `.beads` (usually the repo root).
    pub root: PathBuf,
    /// The resolved `.beads` directory (after redirects).
    pub beads_dir: PathBuf,
    /// Database path.
    pub db_path: PathBuf,
    /// Canonical JSONL export path.
    pub jsonl_path: PathBuf,
    /// Metadata document the paths came from.
    pub metadata: Metadata,
    /// Project config from `config.yaml`.
    pub project: ProjectConfig,
    /// Sync branch override from env (`BEADS_SYNC_BRANCH`), highest precedence.
    pub sync_branch_env: Option<String>,
    /// Bypass the daemon for this invocation.
    pub no_daemon: bool,
    /// Skip auto-import for this invocation.
    pub no_auto_import: bool,
}

impl Workspace {
    /// Resolve a workspace starting from `start` (or the cwd).
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` when no `.beads` directory is found.
    pub fn resolve(start: Option<&Path>, env_overrides: &EnvOverrides) -> Result<Self> {
        let beads_dir = discover_beads_dir(start, env_overrides.dir.as_deref())?;
        let beads_dir = follow_redirect(&beads_dir)?;
        let root = beads_dir
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        migrate_legacy_jsonl(&beads_dir)?;

        let metadata = Metadata::load(&beads_dir)?;
        let project = ProjectConfig::load(&beads_dir)?;

        let db_path = env_overrides
            .db
            .clone()
            .unwrap_or_else(|| join_relative(&beads_dir, &metadata.database));
        let jsonl_path = join_relative(&beads_dir, &metadata.jsonl_export);

        Ok(Self {
            root,
            beads_dir,
            db_path,
            jsonl_path,
            metadata,
            project,
            sync_branch_env: env_overrides.sync_branch.clone(),
            no_daemon: env_overrides.no_daemon,
            no_auto_import: env_overrides.no_auto_import,
        })
    }

    /// Open the workspace's database.
    ///
    /// # Errors
    ///
    /// `DbNotInitialized` when the database file is missing.
    pub fn open_storage(&self) -> Result<SqliteStorage> {
        if !self.db_path.exists() {
            return Err(BeadsError::DbNotInitialized {
                path: self.beads_dir.clone(),
            });
        }
        SqliteStorage::open(&self.db_path)
    }

    /// Resolve the sync branch: env > config.yaml > DB config > default.
    ///
    /// # Errors
    ///
    /// Propagates DB config lookup failures.
    pub fn sync_branch(&self, storage: &SqliteStorage) -> Result<String> {
        if let Some(branch) = &self.sync_branch_env {
            return Ok(branch.clone());
        }
        if let Some(branch) = &self.project.sync_branch {
            return Ok(branch.clone());
        }
        if let Some(branch) = storage.get_config(CONFIG_SYNC_BRANCH)? {
            return Ok(branch);
        }
        Ok(DEFAULT_SYNC_BRANCH.to_string())
    }

    /// Hierarchy depth limit: config.yaml > DB config > default 3.
    ///
    /// # Errors
    ///
    /// Propagates DB config lookup failures.
    pub fn max_depth(&self, storage: &SqliteStorage) -> Result<usize> {
        if let Some(depth) = self.project.max_depth {
            return Ok(depth);
        }
        if let Some(raw) = storage.get_config(CONFIG_MAX_DEPTH)? {
            if let Ok(depth) = raw.parse() {
                return Ok(depth);
            }
        }
        Ok(crate::util::id::DEFAULT_MAX_DEPTH)
    }

    /// Tombstone retention days: config.yaml > DB config > default 90.
    ///
    /// # Errors
    ///
    /// Propagates DB config lookup failures.
    pub fn retention_days(&self, storage: &SqliteStorage) -> Result<u64> {
        if let Some(days) = self.project.retention_days {
            return Ok(days);
        }
        if let Some(raw) = storage.get_config(CONFIG_RETENTION_DAYS)? {
            if let Ok(days) = raw.parse() {
                return Ok(days);
            }
        }
        Ok(crate::model::DEFAULT_TOMBSTONE_RETENTION_DAYS)
    }

    /// Daemon socket path for this workspace.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.beads_dir.join(SOCKET_FILENAME)
    }
}

fn join_relative(beads_dir: &Path, name: &str) -> PathBuf {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        candidate
    } else {
        beads_dir.join(candidate)
    }
}

/// Walk up from `start` (or the cwd) looking for a `.beads` directory.
/// An explicit env/dir override wins when it exists.
fn discover_beads_dir(start: Option<&Path>, dir_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = dir_override {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    Err(BeadsError::NotInitialized)
}

/// Honor a `redirect` file: its first non-comment, non-empty line names an
/// alternate `.beads` location (absolute, or relative to the current one).
/// Supports monorepo and shared-worktree layouts.
fn follow_redirect(beads_dir: &Path) -> Result<PathBuf> {
    let redirect = beads_dir.join(REDIRECT_FILENAME);
    if !redirect.is_file() {
        return Ok(beads_dir.to_path_buf());
    }
    let contents = fs::read_to_string(&redirect)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let target = PathBuf::from(line);
        let target = if target.is_absolute() {
            target
        } else {
            beads_dir.join(target)
        };
        if target.is_dir() {
            tracing::debug!(from = %beads_dir.display(), to = %target.display(), "following .beads redirect");
            return Ok(target);
        }
        return Err(BeadsError::Config(format!(
            "redirect target does not exist: {}",
            target.display()
        )));
    }
    Ok(beads_dir.to_path_buf())
}

/// Rename legacy `beads.jsonl` to `issues.jsonl` when only the former exists.
fn migrate_legacy_jsonl(beads_dir: &Path) -> Result<()> {
    let legacy = beads_dir.join(LEGACY_JSONL_FILENAME);
    let canonical = beads_dir.join(DEFAULT_JSONL_FILENAME);
    if legacy.is_file() && !canonical.exists() {
        tracing::info!(
            from = %legacy.display(),
            to = %canonical.display(),
            "migrating legacy JSONL filename"
        );
        fs::rename(&legacy, &canonical)?;
    }
    Ok(())
}

/// Initialize a fresh `.beads` directory under `root`.
///
/// # Errors
///
/// `AlreadyInitialized` when a database already exists and `force` is unset.
pub fn init_workspace(root: &Path, prefix: &str, force: bool) -> Result<Workspace> {
    let beads_dir = root.join(BEADS_DIR_NAME);
    fs::create_dir_all(&beads_dir)?;

    let db_path = beads_dir.join(DEFAULT_DB_FILENAME);
    if db_path.exists() && !force {
        return Err(BeadsError::AlreadyInitialized { path: beads_dir });
    }
    if db_path.exists() {
        fs::remove_file(&db_path)?;
        // WAL sidecars from the old database must not leak into the new one
        for suffix in ["-wal", "-shm"] {
            let sidecar = beads_dir.join(format!("{DEFAULT_DB_FILENAME}{suffix}"));
            if sidecar.exists() {
                fs::remove_file(&sidecar)?;
            }
        }
    }

    let metadata = Metadata::default();
    metadata.save(&beads_dir)?;

    let mut storage = SqliteStorage::open(&db_path)?;
    storage.set_config(CONFIG_ISSUE_PREFIX, prefix)?;
    drop(storage);

    Workspace::resolve(Some(root), &EnvOverrides::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discover_walks_up() {
        let td = TempDir::new().unwrap();
        let beads = td.path().join(".beads");
        fs::create_dir_all(&beads).unwrap();
        let nested = td.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = discover_beads_dir(Some(&nested), None).unwrap();
        assert_eq!(found, beads);
    }

    #[test]
    fn discover_fails_without_workspace() {
        let td = TempDir::new().unwrap();
        let err = discover_beads_dir(Some(td.path()), None).unwrap_err();
        assert!(matches!(err, BeadsError::NotInitialized));
    }

    #[test]
    fn redirect_points_elsewhere() {
        let td = TempDir::new().unwrap();
        let primary = td.path().join(".beads");
        let shared = td.path().join("shared-beads");
        fs::create_dir_all(&primary).unwrap();
        fs::create_dir_all(&shared).unwrap();
        fs::write(
            primary.join(REDIRECT_FILENAME),
            format!("# shared store\n{}\n", shared.display()),
        )
        .unwrap();

        let resolved = follow_redirect(&primary).unwrap();
        assert_eq!(resolved, shared);
    }

    #[test]
    fn legacy_jsonl_is_migrated() {
        let td = TempDir::new().unwrap();
        let beads = td.path().join(".beads");
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join(LEGACY_JSONL_FILENAME), "{}\n").unwrap();

        migrate_legacy_jsonl(&beads).unwrap();
        assert!(beads.join(DEFAULT_JSONL_FILENAME).is_file());
        assert!(!beads.join(LEGACY_JSONL_FILENAME).exists());
    }

    #[test]
    fn metadata_defaults_and_roundtrip() {
        let td = TempDir::new().unwrap();
        let metadata = Metadata::load(td.path()).unwrap();
        assert_eq!(metadata.database, DEFAULT_DB_FILENAME);

        let custom = Metadata {
            database: "other.db".to_string(),
            jsonl_export: "export.jsonl".to_string(),
        };
        custom.save(td.path()).unwrap();
        assert_eq!(Metadata::load(td.path()).unwrap(), custom);
    }

    #[test]
    fn init_then_resolve() {
        let td = TempDir::new().unwrap();
        let ws = init_workspace(td.path(), "bd", false).unwrap();
        assert!(ws.db_path.is_file());
        assert_eq!(ws.jsonl_path, ws.beads_dir.join(DEFAULT_JSONL_FILENAME));

        let err = init_workspace(td.path(), "bd", false).unwrap_err();
        assert!(matches!(err, BeadsError::AlreadyInitialized { .. }));

        // force reinitializes
        init_workspace(td.path(), "bd", true).unwrap();
    }

    #[test]
    fn project_config_parses_kebab_keys() {
        let td = TempDir::new().unwrap();
        fs::write(
            td.path().join(CONFIG_FILENAME),
            "sync-branch: team-sync\nmax-depth: 5\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load(td.path()).unwrap();
        assert_eq!(cfg.sync_branch.as_deref(), Some("team-sync"));
        assert_eq!(cfg.max_depth, Some(5));
    }
}
