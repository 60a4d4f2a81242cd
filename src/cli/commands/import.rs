//! `bd import`.

use crate::cli::ImportArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace};
use crate::error::Result;
use crate::sync::import::{AutoImportOutcome, ImportOptions, auto_import_if_stale, import_file};
use crate::util::cancel::CancelToken;

pub fn execute(args: &ImportArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = workspace.open_storage()?;
    let input = args.input.clone().unwrap_or_else(|| workspace.jsonl_path.clone());
    let cancel = CancelToken::new();

    let options = ImportOptions {
        // An explicit input file still resurrects parents from the
        // workspace JSONL.
        resurrection_source: Some(workspace.jsonl_path.clone()),
    };

    let outcome = if args.force || args.input.is_some() {
        import_file(&mut storage, &input, &options, &cancel)?
    } else {
        auto_import_if_stale(&mut storage, &input, &options, &cancel)?
    };

    match outcome {
        AutoImportOutcome::NoChange => emit(
            globals.use_json(),
            &serde_json::json!({"changed": false}),
            || "Nothing to import".to_string(),
        ),
        AutoImportOutcome::Imported(stats) => {
            if stats.needs_full_export() {
                // Remapped IDs must be written back out.
                let retention = workspace.retention_days(&storage)?;
                crate::sync::export::export_full(
                    &mut storage,
                    &workspace.jsonl_path,
                    Some(retention),
                )?;
            }
            emit(
                globals.use_json(),
                &serde_json::json!({
                    "changed": true,
                    "created": stats.created,
                    "updated": stats.updated,
                    "skipped": stats.skipped,
                    "tombstone_skipped": stats.tombstone_skipped,
                    "resurrected": stats.resurrected,
                    "remapped": stats.remapped,
                }),
                || {
                    format!(
                        "Imported: {} created, {} updated, {} skipped, {} resurrected",
                        stats.created, stats.updated, stats.skipped, stats.resurrected
                    )
                },
            );
        }
    }
    Ok(())
}
