//! `bd close` and `bd reopen`.

use crate::cli::IdsArgs;
use crate::cli::commands::{GlobalOpts, emit, issue_line, load_workspace, open_storage_imported, resolve};
use crate::error::Result;
use crate::hooks::{HookEvent, fire_user_hook};

pub fn close(args: &IdsArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    let mut closed = Vec::new();
    for input in &args.ids {
        let id = resolve(&storage, input)?;
        let issue = storage.close_issue(&id)?;
        fire_user_hook(&workspace.beads_dir, HookEvent::Close, &issue);
        closed.push(issue);
    }

    emit(globals.use_json(), &closed, || {
        closed.iter().map(issue_line).collect::<Vec<_>>().join("\n")
    });
    Ok(())
}

pub fn reopen(args: &IdsArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    let mut reopened = Vec::new();
    for input in &args.ids {
        let id = resolve(&storage, input)?;
        let issue = storage.reopen_issue(&id)?;
        fire_user_hook(&workspace.beads_dir, HookEvent::Update, &issue);
        reopened.push(issue);
    }

    emit(globals.use_json(), &reopened, || {
        reopened.iter().map(issue_line).collect::<Vec<_>>().join("\n")
    });
    Ok(())
}
