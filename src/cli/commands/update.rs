//! `bd update`.

use crate::cli::UpdateArgs;
use crate::cli::commands::{GlobalOpts, emit, issue_line, load_workspace, open_storage_imported, resolve};
use crate::error::{BeadsError, Result};
use crate::hooks::{HookEvent, fire_user_hook};
use crate::storage::IssueUpdate;

pub fn execute(args: &UpdateArgs, globals: &GlobalOpts) -> Result<()> {
    if args.ids.is_empty() {
        return Err(BeadsError::validation("ids", "at least one issue ID required"));
    }

    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;

    let update = IssueUpdate {
        title: args.title.clone(),
        description: args.description.clone().map(Some),
        design: args.design.clone().map(Some),
        notes: args.notes.clone().map(Some),
        status: match &args.status {
            Some(raw) => Some(raw.parse()?),
            None => None,
        },
        priority: match &args.priority {
            Some(raw) => Some(raw.parse()?),
            None => None,
        },
        issue_type: match &args.issue_type {
            Some(raw) => Some(raw.parse()?),
            None => None,
        },
        assignee: args.assignee.clone().map(Some),
        ..Default::default()
    };

    let mut updated = Vec::new();
    for input in &args.ids {
        let id = resolve(&storage, input)?;
        let issue = storage.update_issue(&id, &update)?;
        fire_user_hook(&workspace.beads_dir, HookEvent::Update, &issue);
        updated.push(issue);
    }

    emit(globals.use_json(), &updated, || {
        updated.iter().map(issue_line).collect::<Vec<_>>().join("\n")
    });
    Ok(())
}
