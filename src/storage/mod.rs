//! Transactional persistence for issues, dependencies, labels, comments,
//! config, metadata, the dirty set and tombstones.
//!
//! `SqliteStorage` is the on-disk backend; tests run the same code against
//! an in-memory connection via [`SqliteStorage::open_memory`]. Helpers with
//! a `_tx` suffix operate inside an already-open transaction and exist so
//! multi-record operations (imports, batch creates) stay atomic.

pub mod schema;
pub mod sqlite;

pub use sqlite::{
    IssueUpdate, ListFilters, MutationContext, SqliteStorage, insert_issue_tx, issue_exists_tx,
    resurrect_parent, sync_comments_tx, sync_dependencies_tx, sync_labels_tx, upsert_issue_tx,
};
