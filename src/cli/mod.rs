//! CLI definitions.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Git-native issue tracker for AI coding agents and distributed teams.
#[derive(Debug, Parser)]
#[command(name = "bd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit JSON on stdout (always on when stdout is not a terminal).
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Errors only.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Database path override.
    #[arg(long, global = true, env = "BEADS_DB")]
    pub db: Option<PathBuf>,

    /// Actor recorded on mutations (defaults to $USER).
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Skip the staleness-gated auto-import before the command runs.
    #[arg(long, global = true)]
    pub no_auto_import: bool,

    /// Skip the dirty flush after mutating commands.
    #[arg(long, global = true)]
    pub no_auto_flush: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a .beads workspace in the current directory.
    Init(InitArgs),
    /// Create an issue.
    Create(CreateArgs),
    /// Update fields on existing issues.
    Update(UpdateArgs),
    /// Close issues.
    Close(IdsArgs),
    /// Reopen closed issues.
    Reopen(IdsArgs),
    /// Delete issues (tombstone; deletion propagates across clones).
    Delete(DeleteArgs),
    /// Show issues in full.
    Show(IdsArgs),
    /// List issues.
    List(ListArgs),
    /// Issues ready to work on.
    Ready(ReadyArgs),
    /// Issues blocked by dependencies or status.
    Blocked,
    /// Manage dependency edges.
    Dep {
        #[command(subcommand)]
        command: DepCommand,
    },
    /// Manage labels.
    Label {
        #[command(subcommand)]
        command: LabelCommand,
    },
    /// Add a comment to an issue.
    Comment(CommentArgs),
    /// Get or set configuration keys.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Rename the issue prefix across the whole database.
    RenamePrefix(RenamePrefixArgs),
    /// Export the database to JSONL.
    Export(ExportArgs),
    /// Import JSONL into the database.
    Import(ImportArgs),
    /// Synchronize with the sync branch (import, export, commit, push).
    Sync(SyncArgs),
    /// Git merge driver entry (`bd merge %A %O %A %B`).
    Merge(MergeArgs),
    /// Manage git hooks.
    Hooks {
        #[command(subcommand)]
        command: HooksCommand,
    },
    /// Manage the per-database daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Issue ID prefix (2-16 URL-safe characters).
    #[arg(default_value = "bd")]
    pub prefix: String,
    /// Reinitialize even if a database exists.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Issue title.
    pub title: String,
    #[arg(short, long)]
    pub description: Option<String>,
    /// Priority 0-4 (or P0-P4).
    #[arg(short, long)]
    pub priority: Option<String>,
    /// Issue type: task, bug, feature, epic, chore.
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,
    #[arg(short, long)]
    pub assignee: Option<String>,
    /// Attach labels.
    #[arg(short, long)]
    pub label: Vec<String>,
    /// Create as a child of this issue.
    #[arg(long)]
    pub parent: Option<String>,
    /// Canonical URL of an external counterpart.
    #[arg(long)]
    pub external_ref: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct UpdateArgs {
    /// Issue IDs (full or unambiguous fragment).
    pub ids: Vec<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(long)]
    pub design: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(short, long)]
    pub status: Option<String>,
    #[arg(short, long)]
    pub priority: Option<String>,
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,
    #[arg(short, long)]
    pub assignee: Option<String>,
}

#[derive(Debug, Args)]
pub struct IdsArgs {
    /// Issue IDs (full or unambiguous fragment).
    #[arg(required = true)]
    pub ids: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Reason recorded on the tombstone.
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct ListArgs {
    #[arg(short, long)]
    pub status: Option<String>,
    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,
    #[arg(short, long)]
    pub assignee: Option<String>,
    #[arg(short, long)]
    pub label: Option<String>,
    /// Include tombstones.
    #[arg(long)]
    pub all: bool,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ReadyArgs {
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum DepCommand {
    /// Add an edge: <from> depends on <to>.
    Add {
        from: String,
        to: String,
        /// blocks, parent-child, related, duplicates, discovered-from.
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// Remove an edge.
    Remove {
        from: String,
        to: String,
        #[arg(short = 't', long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// List all cycles in the blocks graph.
    Cycles,
}

#[derive(Debug, Subcommand)]
pub enum LabelCommand {
    /// Attach a label.
    Add { id: String, label: String },
    /// Detach a label.
    Remove { id: String, label: String },
}

#[derive(Debug, Args)]
pub struct CommentArgs {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show one key or all keys.
    Get { key: Option<String> },
    /// Set a key.
    Set { key: String, value: String },
    /// Delete a key.
    Unset { key: String },
}

#[derive(Debug, Args)]
pub struct RenamePrefixArgs {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Args, Default)]
pub struct ExportArgs {
    /// Rewrite the whole file instead of flushing dirty records.
    #[arg(long)]
    pub full: bool,
    /// Output path (defaults to the workspace JSONL).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default)]
pub struct ImportArgs {
    /// Input path (defaults to the workspace JSONL).
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// Import even when the staleness probe says nothing changed.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args, Default)]
pub struct SyncArgs {
    /// Remote to sync with.
    #[arg(long, default_value = "origin")]
    pub remote: String,
    /// After a detected force-push: adopt the remote branch.
    #[arg(long)]
    pub accept_remote: bool,
    /// Local JSONL is authoritative for the worktree (delete propagation).
    #[arg(long)]
    pub force_overwrite: bool,
    /// Skip the push.
    #[arg(long)]
    pub no_push: bool,
    /// Sync branch override (highest precedence).
    #[arg(long, env = "BEADS_SYNC_BRANCH")]
    pub branch: Option<String>,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Ours (%A).
    pub ours: PathBuf,
    /// Base (%O).
    pub base: PathBuf,
    /// Output, rewritten in place (%A).
    pub output: PathBuf,
    /// Theirs (%B).
    pub theirs: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum HooksCommand {
    /// Install the recommended git hooks (versioned, non-destructive).
    Install,
    /// Show the installed hook version.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Run {
        /// Idle shutdown in seconds.
        #[arg(long, default_value_t = 600)]
        idle_timeout: u64,
    },
    /// Start a detached daemon if none is responsive.
    Start,
    /// Stop a running daemon.
    Stop,
    /// Daemon health and registry info.
    Status,
}
