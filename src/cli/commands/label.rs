//! `bd label add|remove`.

use crate::cli::LabelCommand;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported, resolve};
use crate::error::Result;

pub fn execute(command: &LabelCommand, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    match command {
        LabelCommand::Add { id, label } => {
            let id = resolve(&storage, id)?;
            let added = storage.add_label(&id, label)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"id": id, "label": label, "added": added}),
                || {
                    if added {
                        format!("Labeled {id} with '{label}'")
                    } else {
                        format!("{id} already has '{label}'")
                    }
                },
            );
        }
        LabelCommand::Remove { id, label } => {
            let id = resolve(&storage, id)?;
            let removed = storage.remove_label(&id, label)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"id": id, "label": label, "removed": removed}),
                || {
                    if removed {
                        format!("Removed '{label}' from {id}")
                    } else {
                        format!("{id} does not have '{label}'")
                    }
                },
            );
        }
    }
    Ok(())
}
