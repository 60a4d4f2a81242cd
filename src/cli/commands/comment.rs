//! `bd comment`.

use crate::cli::CommentArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported, resolve};
use crate::error::Result;

pub fn execute(args: &CommentArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    let id = resolve(&storage, &args.id)?;
    let comment = storage.add_comment(&id, &globals.actor(), &args.text)?;

    emit(globals.use_json(), &comment, || {
        format!("Commented on {id}")
    });
    Ok(())
}
