//! `bd hooks install|status`.

use crate::cli::HooksCommand;
use crate::cli::commands::{GlobalOpts, emit, load_workspace};
use crate::error::Result;
use crate::hooks::{install_git_hooks, installed_hooks_version};

pub fn execute(command: &HooksCommand, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;

    match command {
        HooksCommand::Install => {
            let written = install_git_hooks(&workspace.root)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"installed": written}),
                || {
                    if written.is_empty() {
                        "No hooks installed (existing non-beads hooks preserved)".to_string()
                    } else {
                        format!("Installed hooks: {}", written.join(", "))
                    }
                },
            );
        }
        HooksCommand::Status => {
            let version = installed_hooks_version(&workspace.root)?;
            emit(
                globals.use_json(),
                &serde_json::json!({"version": version.as_ref().map(ToString::to_string)}),
                || match &version {
                    Some(v) => format!("bd hooks version {v}"),
                    None => "No beads hooks installed".to_string(),
                },
            );
        }
    }
    Ok(())
}
