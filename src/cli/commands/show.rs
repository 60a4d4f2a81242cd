//! `bd show`.

use crate::cli::IdsArgs;
use crate::cli::commands::{GlobalOpts, emit, issue_details, load_workspace, open_storage_imported, resolve};
use crate::error::{BeadsError, Result};

pub fn execute(args: &IdsArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let storage = open_storage_imported(&workspace)?;

    let mut issues = Vec::new();
    for input in &args.ids {
        let id = resolve(&storage, input)?;
        let issue = storage
            .get_issue(&id)?
            .ok_or(BeadsError::IssueNotFound { id })?;
        issues.push(issue);
    }

    emit(globals.use_json(), &issues, || {
        issues.iter().map(issue_details).collect::<Vec<_>>().join("\n")
    });
    Ok(())
}
