//! `bd ready`.

use crate::cli::ReadyArgs;
use crate::cli::commands::{GlobalOpts, emit, issue_line, load_workspace, open_storage_imported};
use crate::error::Result;

pub fn execute(args: &ReadyArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let storage = open_storage_imported(&workspace)?;
    let ready = storage.get_ready_issues(args.limit)?;

    emit(globals.use_json(), &ready, || {
        if ready.is_empty() {
            "Nothing ready".to_string()
        } else {
            ready.iter().map(issue_line).collect::<Vec<_>>().join("\n")
        }
    });
    Ok(())
}
