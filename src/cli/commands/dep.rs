//! `bd dep add|remove|cycles`.

use chrono::Utc;

use crate::cli::DepCommand;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported, resolve};
use crate::error::Result;
use crate::model::Dependency;

pub fn execute(command: &DepCommand, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    match command {
        DepCommand::Add { from, to, dep_type } => {
            let from = resolve(&storage, from)?;
            let to = resolve(&storage, to)?;
            let dep = Dependency {
                issue_id: from.clone(),
                depends_on_id: to.clone(),
                dep_type: dep_type.parse()?,
                created_at: Utc::now(),
                created_by: Some(globals.actor()),
            };
            storage.add_dependency(&dep)?;
            emit(globals.use_json(), &dep, || {
                format!("{from} now depends on {to} ({})", dep.dep_type)
            });
        }
        DepCommand::Remove { from, to, dep_type } => {
            let from = resolve(&storage, from)?;
            let to = resolve(&storage, to)?;
            let removed = storage.remove_dependency(&from, &to, &dep_type.parse()?)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"removed": removed}),
                || {
                    if removed {
                        format!("Removed dependency {from} -> {to}")
                    } else {
                        "No such dependency".to_string()
                    }
                },
            );
        }
        DepCommand::Cycles => {
            let cycles = storage.detect_all_cycles()?;
            emit(globals.use_json(), &cycles, || {
                if cycles.is_empty() {
                    "No cycles in the blocks graph".to_string()
                } else {
                    cycles
                        .iter()
                        .map(|cycle| cycle.join(" -> "))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            });
        }
    }
    Ok(())
}
