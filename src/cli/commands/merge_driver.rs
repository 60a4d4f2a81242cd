//! `bd merge`: the git merge driver entry.
//!
//! Registered as `merge.beads.driver = "bd merge %A %O %A %B"`; the
//! repeated %A signals in-place output.

use crate::cli::MergeArgs;
use crate::cli::commands::{GlobalOpts, emit};
use crate::error::Result;
use crate::sync::merge::merge_files;

pub fn execute(args: &MergeArgs, globals: &GlobalOpts) -> Result<()> {
    let stats = merge_files(&args.ours, &args.base, &args.theirs, &args.output)?;

    emit(
        globals.use_json(),
        &serde_json::json!({
            "output": args.output,
            "unchanged": stats.unchanged,
            "one_sided": stats.one_sided,
            "field_merged": stats.field_merged,
            "added": stats.added,
            "deleted": stats.deleted,
            "dropped_no_id": stats.dropped_no_id,
        }),
        || {
            format!(
                "Merged into {}: {} unchanged, {} one-sided, {} field-merged, {} added, {} deleted",
                args.output.display(),
                stats.unchanged,
                stats.one_sided,
                stats.field_merged,
                stats.added,
                stats.deleted
            )
        },
    );
    Ok(())
}
