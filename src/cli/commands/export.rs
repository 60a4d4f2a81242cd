//! `bd export`.

use crate::cli::ExportArgs;
use crate::cli::commands::{GlobalOpts, emit, load_workspace, open_storage_imported};
use crate::error::Result;
use crate::sync::export::{export_dirty, export_full};

pub fn execute(args: &ExportArgs, globals: &GlobalOpts) -> Result<()> {
    let workspace = load_workspace(globals)?;
    let mut storage = open_storage_imported(&workspace)?;
    let output = args.output.clone().unwrap_or_else(|| workspace.jsonl_path.clone());

    let result = if args.full || args.output.is_some() {
        // An explicit output path always gets the whole picture.
        let retention = workspace.retention_days(&storage)?;
        Some(export_full(&mut storage, &output, Some(retention))?)
    } else {
        export_dirty(&mut storage, &output)?
    };

    match result {
        Some(result) => emit(
            globals.use_json(),
            &serde_json::json!({
                "path": output,
                "records": result.total_records,
                "flushed": result.exported_ids.len(),
                "content_hash": result.content_hash,
                "pruned_tombstones": result.pruned_tombstones,
            }),
            || {
                format!(
                    "Exported {} records to {} ({} flushed)",
                    result.total_records,
                    output.display(),
                    result.exported_ids.len()
                )
            },
        ),
        None => emit(
            globals.use_json(),
            &serde_json::json!({"path": output, "flushed": 0}),
            || "Nothing to export".to_string(),
        ),
    }
    Ok(())
}
