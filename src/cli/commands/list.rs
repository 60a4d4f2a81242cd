//! `bd list` and `bd blocked`.

use crate::cli::ListArgs;
use crate::cli::commands::{GlobalOpts, emit, issue_line, load_workspace, open_storage_imported};
use crate::error::Result;
use crate::storage::ListFilters;

pub fn execute(args: &ListArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let storage = open_storage_imported(&workspace)?;

    let filters = ListFilters {
        status: match &args.status {
            Some(raw) => Some(raw.parse()?),
            None => None,
        },
        issue_type: match &args.issue_type {
            Some(raw) => Some(raw.parse()?),
            None => None,
        },
        assignee: args.assignee.clone(),
        label: args.label.clone(),
        include_tombstones: args.all,
        limit: args.limit,
    };
    let issues = storage.list_issues(&filters)?;

    emit(globals.use_json(), &issues, || {
        if issues.is_empty() {
            "No issues found".to_string()
        } else {
            issues.iter().map(issue_line).collect::<Vec<_>>().join("\n")
        }
    });
    Ok(())
}

pub fn blocked(globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let storage = open_storage_imported(&workspace)?;
    let blocked = storage.get_blocked_issues()?;

    let rendered: Vec<serde_json::Value> = blocked
        .iter()
        .map(|(issue, blockers)| {
            serde_json::json!({
                "issue": issue,
                "blocked_by": blockers,
            })
        })
        .collect();

    emit(globals.use_json(), &rendered, || {
        if blocked.is_empty() {
            "Nothing is blocked".to_string()
        } else {
            blocked
                .iter()
                .map(|(issue, blockers)| {
                    if blockers.is_empty() {
                        format!("{}  (status blocked)", issue_line(issue))
                    } else {
                        format!("{}  blocked by {}", issue_line(issue), blockers.join(", "))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    });
    Ok(())
}
