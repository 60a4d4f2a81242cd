//! `bd init`.

use crate::cli::InitArgs;
use crate::cli::commands::{GlobalOpts, emit};
use crate::config::init_workspace;
use crate::error::{BeadsError, Result};

pub fn execute(args: &InitArgs, globals: &GlobalOpts) -> Result<()> {
    if args.prefix.len() < 2 || args.prefix.len() > 16 {
        return Err(BeadsError::validation(
            "prefix",
            "must be 2-16 characters",
        ));
    }
    if !args
        .prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(BeadsError::validation(
            "prefix",
            "must be URL-safe (alphanumerics and underscore)",
        ));
    }

    let cwd = std::env::current_dir()?;
    let workspace = init_workspace(&cwd, &args.prefix, args.force)?;

    emit(
        globals.use_json(),
        &serde_json::json!({
            "beads_dir": workspace.beads_dir,
            "database": workspace.db_path,
            "jsonl": workspace.jsonl_path,
            "prefix": args.prefix,
        }),
        || {
            format!(
                "Initialized beads workspace at {} (prefix '{}')",
                workspace.beads_dir.display(),
                args.prefix
            )
        },
    );
    Ok(())
}
