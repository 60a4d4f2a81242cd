//! `bd sync`.

use crate::cli::SyncArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace};
use crate::error::Result;
use crate::sync::engine::{SyncEngine, SyncOptions};
use crate::util::cancel::CancelToken;

pub fn execute(args: &SyncArgs, globals: &GlobalOpts) -> Result<()> {
    let mut workspace = load_workspace(globals)?;
    if let Some(branch) = &args.branch {
        workspace.sync_branch_env = Some(branch.clone());
    }
    let mut storage = workspace.open_storage()?;

    let options = SyncOptions {
        remote: args.remote.clone(),
        accept_remote: args.accept_remote,
        force_overwrite: args.force_overwrite,
        no_push: args.no_push,
        cancel: CancelToken::new(),
    };

    let engine = SyncEngine::new(&workspace);
    let report = engine.run(&mut storage, &options)?;

    emit(
        globals.use_json(),
        &serde_json::json!({
            "branch": report.branch,
            "fetched": report.fetched,
            "imported": report.imported.as_ref().map(|s| serde_json::json!({
                "created": s.created,
                "updated": s.updated,
                "resurrected": s.resurrected,
                "remapped": s.remapped.len(),
            })),
            "exported_records": report.exported_records,
            "committed": report.committed,
            "pushed": report.pushed,
            "remote_sha": report.remote_sha,
        }),
        || {
            let mut parts = vec![format!("Synced '{}'", report.branch)];
            if let Some(stats) = &report.imported {
                parts.push(format!(
                    "imported {}+{}",
                    stats.created, stats.updated
                ));
            }
            if report.committed {
                parts.push("committed".to_string());
            }
            if report.pushed {
                parts.push("pushed".to_string());
            }
            parts.join(", ")
        },
    );
    Ok(())
}
