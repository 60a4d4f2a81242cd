//! `bd config` and `bd rename-prefix`.

use crate::cli::{ConfigCommand, RenamePrefixArgs};
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported};
use crate::error::{BeadsError, Result};

pub fn execute(command: &ConfigCommand, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = workspace.open_storage()?;

    match command {
        ConfigCommand::Get { key: Some(key) } => {
            let value = storage.get_config(key)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"key": key, "value": value}),
                || value.clone().unwrap_or_else(|| "(unset)".to_string()),
            );
        }
        ConfigCommand::Get { key: None } => {
            let all = storage.get_all_config()?;
            let sorted: std::collections::BTreeMap<_, _> = all.into_iter().collect();
            emit(globals.use_json(), &sorted, || {
                sorted
                    .iter()
                    .map(|(k, v)| format!("{k} = {v}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        ConfigCommand::Set { key, value } => {
            storage.set_config(key, value)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"key": key, "value": value}),
                || format!("{key} = {value}"),
            );
        }
        ConfigCommand::Unset { key } => {
            let removed = storage.delete_config(key)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"key": key, "removed": removed}),
                || {
                    if removed {
                        format!("Unset {key}")
                    } else {
                        format!("{key} was not set")
                    }
                },
            );
        }
    }
    Ok(())
}

pub fn rename_prefix(args: &RenamePrefixArgs, globals: &GlobalOpts) -> Result<()> {
    if args.new.len() < 2 || args.new.len() > 16 {
        return Err(BeadsError::validation("prefix", "must be 2-16 characters"));
    }
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;
    let renamed = storage.rename_prefix(&args.old, &args.new)?;

    emit(
        globals.use_json(),
        &serde_json::json!({"old": args.old, "new": args.new, "renamed": renamed}),
        || format!("Renamed {renamed} issues from '{}-' to '{}-'", args.old, args.new),
    );
    Ok(())
}
