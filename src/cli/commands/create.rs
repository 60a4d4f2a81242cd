//! `bd create`.

use chrono::Utc;

use crate::cli::CreateArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported, resolve};
use crate::config::CONFIG_ISSUE_PREFIX;
use crate::error::Result;
use crate::hooks::{HookEvent, fire_user_hook};
use crate::model::Issue;
use crate::sync::read_issue_map;
use crate::util::id::{IdGenerator, check_child_depth, child_id};
use crate::validation::require_valid;

pub fn execute(args: &CreateArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;
    let actor = globals.actor();
    let now = Utc::now();

    let id = if let Some(parent_input) = &args.parent {
        // Child create: parent must exist or be resurrectable from the
        // working-tree JSONL; depth is bounded.
        let parent_id = match resolve(&storage, parent_input) {
            Ok(id) => id,
            Err(_) => parent_input.clone(),
        };
        check_child_depth(&parent_id, workspace.max_depth(&storage)?)?;
        let jsonl = read_issue_map(&workspace.jsonl_path).unwrap_or_default();
        storage.ensure_parent_exists(&parent_id, |id| jsonl.get(id).cloned())?;
        child_id(&parent_id, storage.next_child_index(&parent_id)?)
    } else {
        let prefix = storage
            .get_config(CONFIG_ISSUE_PREFIX)?
            .unwrap_or_else(|| "bd".to_string());
        let generator = IdGenerator::with_prefix(prefix);
        let count = storage.count_issues()?;
        generator.generate(
            &args.title,
            args.description.as_deref(),
            Some(&actor),
            now,
            count,
            |candidate| storage.id_exists(candidate).unwrap_or(true),
        )?
    };

    let mut issue = Issue::new(id, args.title.clone(), now);
    issue.description.clone_from(&args.description);
    issue.assignee.clone_from(&args.assignee);
    issue.external_ref.clone_from(&args.external_ref);
    issue.created_by = Some(actor);
    issue.labels.clone_from(&args.label);
    issue.labels.sort();
    issue.labels.dedup();
    if let Some(priority) = &args.priority {
        issue.priority = priority.parse()?;
    }
    if let Some(issue_type) = &args.issue_type {
        issue.issue_type = issue_type.parse()?;
    }
    require_valid(&issue)?;

    storage.create_issue(&issue)?;
    fire_user_hook(&workspace.beads_dir, HookEvent::Create, &issue);

    emit(globals.use_json(), &issue, || {
        format!("Created {} - {}", issue.id, issue.title)
    });
    Ok(())
}
