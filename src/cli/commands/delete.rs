//! `bd delete`: tombstone, never a row removal.

use crate::cli::DeleteArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported, resolve};
use crate::error::Result;

pub fn execute(args: &DeleteArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;
    let actor = globals.actor();

    let mut deleted = Vec::new();
    for input in &args.ids {
        let id = resolve(&storage, input)?;
        let issue = storage.delete_issue(&id, Some(&actor), args.reason.as_deref())?;
        deleted.push(issue.id);
    }

    emit(globals.use_json(), &deleted, || {
        format!("Deleted (tombstoned): {}", deleted.join(", "))
    });
    Ok(())
}
