//! `SQLite` storage implementation.
//!
//! One connection per store, WAL journal, immediate-lock write transactions.
//! The store owns all issue records and the dirty set; every mutation runs
//! through [`SqliteStorage::mutate`] so dirty tracking cannot be skipped.

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Dependency, DependencyType, EpicStatus, Issue, IssueType, Priority,
    RESURRECTED_PREFIX, Status,
};
use crate::storage::schema::apply_schema;
use crate::util::hash::content_hash;
use crate::util::id::next_child_index;
use crate::util::time::format_ts;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    path: PathBuf,
}

/// Side effects collected during a mutation: dirty IDs with the content hash
/// observed at mutation time.
#[derive(Debug, Default)]
pub struct MutationContext {
    dirty: HashMap<String, String>,
}

impl MutationContext {
    /// Record an issue as dirty with its post-mutation content hash.
    pub fn mark_dirty(&mut self, issue_id: &str, hash: &str) {
        self.dirty.insert(issue_id.to_string(), hash.to_string());
    }
}

/// Partial update for an issue. `None` leaves a field untouched;
/// `Some(None)` on clearable fields clears them.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub pinned: Option<bool>,
}

impl IssueUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.external_ref.is_none()
            && self.pinned.is_none()
    }
}

/// Filters for listing issues.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub include_tombstones: bool,
    pub limit: Option<usize>,
}

impl SqliteStorage {
    /// Open the database at `path`, creating and migrating as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, Some(30_000))
    }

    /// Open with an explicit busy timeout in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory database for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a mutation under one write-exclusive transaction.
    ///
    /// The transaction begins with immediate lock acquisition, so writers
    /// serialize; `f` sees its own writes; any error rolls everything back.
    /// Dirty IDs recorded in the context are flushed before commit.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and from the commit itself. A busy
    /// database surfaces as `DatabaseLocked`.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let path = self.path.clone();
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|e| map_busy(e, &path))?;
        let mut ctx = MutationContext::default();

        let result = f(&tx, &mut ctx)?;

        let marked_at = format_ts(Utc::now());
        for (id, hash) in &ctx.dirty {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, content_hash, marked_at) VALUES (?, ?, ?)",
                rusqlite::params![id, hash, marked_at],
            )?;
        }

        tx.commit().map_err(|e| map_busy(e, &path))?;
        tracing::debug!(op, dirty = ctx.dirty.len(), "mutation committed");
        Ok(result)
    }

    // ========================================================================
    // Issue CRUD
    // ========================================================================

    /// Create a new issue.
    ///
    /// # Errors
    ///
    /// `IdCollision` when the ID exists, `DuplicateExternalRef` when the
    /// external ref is taken by a live issue.
    pub fn create_issue(&mut self, issue: &Issue) -> Result<()> {
        self.create_issues(std::slice::from_ref(issue))
    }

    /// Create a batch of issues under one transaction.
    ///
    /// # Errors
    ///
    /// Rolls back the whole batch on the first failure.
    pub fn create_issues(&mut self, issues: &[Issue]) -> Result<()> {
        self.mutate("create_issues", |tx, ctx| {
            for issue in issues {
                if issue_exists_tx(tx, &issue.id)? {
                    return Err(BeadsError::IdCollision {
                        id: issue.id.clone(),
                    });
                }
                if let Some(external_ref) = &issue.external_ref {
                    if let Some(existing) = find_live_external_ref_tx(tx, external_ref)? {
                        return Err(BeadsError::DuplicateExternalRef {
                            external_ref: external_ref.clone(),
                            existing,
                        });
                    }
                }
                let hash = insert_issue_tx(tx, issue)?;
                sync_labels_tx(tx, &issue.id, &issue.labels)?;
                sync_dependencies_tx(tx, &issue.id, &issue.dependencies)?;
                ctx.mark_dirty(&issue.id, &hash);
            }
            Ok(())
        })
    }

    /// Update an issue's fields, bumping `updated_at` monotonically.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the ID does not exist.
    #[allow(clippy::too_many_lines)]
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        if let Some(title) = &updates.title {
            issue.title.clone_from(title);
        }
        if let Some(description) = &updates.description {
            issue.description.clone_from(description);
        }
        if let Some(design) = &updates.design {
            issue.design.clone_from(design);
        }
        if let Some(criteria) = &updates.acceptance_criteria {
            issue.acceptance_criteria.clone_from(criteria);
        }
        if let Some(notes) = &updates.notes {
            issue.notes.clone_from(notes);
        }
        if let Some(priority) = updates.priority {
            issue.priority = priority;
        }
        if let Some(issue_type) = &updates.issue_type {
            issue.issue_type = issue_type.clone();
        }
        if let Some(assignee) = &updates.assignee {
            issue.assignee.clone_from(assignee);
        }
        if let Some(external_ref) = &updates.external_ref {
            issue.external_ref.clone_from(external_ref);
        }
        if let Some(pinned) = updates.pinned {
            issue.pinned = pinned;
        }
        if let Some(status) = &updates.status {
            issue.status = status.clone();
            if issue.status.is_terminal() {
                issue.closed_at.get_or_insert(Utc::now());
            } else {
                issue.closed_at = None;
            }
        }

        // updated_at is strictly monotone non-decreasing even under clock skew
        let now = Utc::now();
        issue.updated_at = issue.updated_at.max(now);

        let hash = content_hash(&issue);
        issue.content_hash = Some(hash.clone());

        let stored = issue.clone();
        self.mutate("update_issue", move |tx, ctx| {
            if let Some(external_ref) = &stored.external_ref {
                if let Some(existing) = find_live_external_ref_tx(tx, external_ref)? {
                    if existing != stored.id {
                        return Err(BeadsError::DuplicateExternalRef {
                            external_ref: external_ref.clone(),
                            existing,
                        });
                    }
                }
            }
            update_issue_row_tx(tx, &stored)?;
            ctx.mark_dirty(&stored.id, &hash);
            Ok(())
        })?;

        Ok(issue)
    }

    /// Close an issue: status=closed, `closed_at` stamped.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the ID does not exist.
    pub fn close_issue(&mut self, id: &str) -> Result<Issue> {
        self.update_issue(
            id,
            &IssueUpdate {
                status: Some(Status::Closed),
                ..Default::default()
            },
        )
    }

    /// Reopen a closed issue.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the ID does not exist.
    pub fn reopen_issue(&mut self, id: &str) -> Result<Issue> {
        self.update_issue(
            id,
            &IssueUpdate {
                status: Some(Status::Open),
                ..Default::default()
            },
        )
    }

    /// Delete an issue by turning it into a tombstone.
    ///
    /// Tombstones stay in the table (and JSONL) so deletions propagate
    /// deterministically across clones.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the ID does not exist.
    pub fn delete_issue(
        &mut self,
        id: &str,
        deleted_by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        issue.tombstone(Utc::now(), deleted_by, reason);
        let hash = content_hash(&issue);
        issue.content_hash = Some(hash.clone());

        let stored = issue.clone();
        self.mutate("delete_issue", move |tx, ctx| {
            update_issue_row_tx(tx, &stored)?;
            ctx.mark_dirty(&stored.id, &hash);
            Ok(())
        })?;

        Ok(issue)
    }

    /// Fetch a single issue with labels, dependencies and comments attached.
    ///
    /// # Errors
    ///
    /// Propagates database errors; a missing ID yields `Ok(None)`.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let issue = self
            .conn
            .prepare(&format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"))?
            .query_row([id], issue_from_row)
            .optional()?;

        let Some(mut issue) = issue else {
            return Ok(None);
        };
        issue.labels = self.get_labels(id)?;
        issue.dependencies = self.get_dependencies_full(id)?;
        issue.comments = self.get_comments(id)?;
        Ok(Some(issue))
    }

    /// Whether an ID exists (tombstones included).
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM issues WHERE id = ?")?
            .exists([id])?)
    }

    /// All IDs, tombstones included, ascending.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Count of live (non-tombstone) issues.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE status != 'tombstone'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// List issues matching the filters, ascending by ID.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filters.include_tombstones {
            sql.push_str(" AND status != 'tombstone'");
        }
        if let Some(status) = &filters.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(issue_type) = &filters.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(assignee) = &filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if let Some(label) = &filters.label {
            sql.push_str(" AND id IN (SELECT issue_id FROM labels WHERE label = ?)");
            params.push(Box::new(label.clone()));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| &**p).collect();
        let issues = stmt
            .query_map(refs.as_slice(), issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// Issues ready to work: status open and no `blocks` edge pointing at an
    /// open or in-progress issue.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_ready_issues(&self, limit: Option<usize>) -> Result<Vec<Issue>> {
        let mut sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i
             WHERE i.status = 'open'
               AND NOT EXISTS (
                 SELECT 1 FROM dependencies d
                 JOIN issues b ON b.id = d.depends_on_id
                 WHERE d.issue_id = i.id
                   AND d.type = 'blocks'
                   AND b.status IN ('open', 'in_progress')
               )
             ORDER BY i.priority, i.id"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// Blocked issues with the IDs of their live blockers.
    ///
    /// Includes both explicit status=blocked and dependency-blocked issues.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_blocked_issues(&self) -> Result<Vec<(Issue, Vec<String>)>> {
        let issues = self.list_issues(&ListFilters::default())?;
        let mut blocked = Vec::new();
        for issue in issues {
            if issue.status.is_terminal() {
                continue;
            }
            let blockers = self.live_blockers(&issue.id)?;
            if issue.status == Status::Blocked || !blockers.is_empty() {
                blocked.push((issue, blockers));
            }
        }
        Ok(blocked)
    }

    fn live_blockers(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id FROM dependencies d
             JOIN issues b ON b.id = d.depends_on_id
             WHERE d.issue_id = ? AND d.type = 'blocks'
               AND b.status IN ('open', 'in_progress')
             ORDER BY b.id",
        )?;
        let ids = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Issues that became ready because a blocker closed at or after `since`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn newly_unblocked(&self, since: DateTime<Utc>) -> Result<Vec<Issue>> {
        let since = format_ts(since);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i
             WHERE i.status = 'open'
               AND NOT EXISTS (
                 SELECT 1 FROM dependencies d
                 JOIN issues b ON b.id = d.depends_on_id
                 WHERE d.issue_id = i.id AND d.type = 'blocks'
                   AND b.status IN ('open', 'in_progress')
               )
               AND EXISTS (
                 SELECT 1 FROM dependencies d
                 JOIN issues b ON b.id = d.depends_on_id
                 WHERE d.issue_id = i.id AND d.type = 'blocks'
                   AND b.status = 'closed' AND b.closed_at >= ?
               )
             ORDER BY i.id"
        ))?;
        let issues = stmt
            .query_map([since], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// Epics whose children are all closed (and that have at least one).
    ///
    /// Hierarchy comes from the ID structure: children of `P` are `P.k...`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn epics_eligible_for_close(&self) -> Result<Vec<EpicStatus>> {
        let epics = self.list_issues(&ListFilters {
            issue_type: Some(IssueType::Epic),
            ..Default::default()
        })?;
        let all_ids = self.get_all_ids()?;
        let mut out = Vec::new();
        for epic in epics {
            if epic.status.is_terminal() {
                continue;
            }
            let prefix = format!("{}.", epic.id);
            let children: Vec<&String> =
                all_ids.iter().filter(|id| id.starts_with(&prefix)).collect();
            if children.is_empty() {
                continue;
            }
            let mut closed = 0usize;
            for child in &children {
                let status: String = self.conn.query_row(
                    "SELECT status FROM issues WHERE id = ?",
                    [child.as_str()],
                    |row| row.get(0),
                )?;
                if status == "closed" || status == "tombstone" {
                    closed += 1;
                }
            }
            let total = children.len();
            out.push(EpicStatus {
                epic,
                total_children: total,
                closed_children: closed,
                eligible_for_close: closed == total,
            });
        }
        Ok(out)
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    /// Add a dependency edge.
    ///
    /// # Errors
    ///
    /// `SelfDependency`, `DependencyNotFound`, or `DependencyCycle` when a
    /// `blocks` edge would close a loop.
    pub fn add_dependency(&mut self, dep: &Dependency) -> Result<()> {
        if dep.issue_id == dep.depends_on_id {
            return Err(BeadsError::SelfDependency {
                id: dep.issue_id.clone(),
            });
        }
        if !self.id_exists(&dep.issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: dep.issue_id.clone(),
            });
        }
        if !self.id_exists(&dep.depends_on_id)? {
            return Err(BeadsError::DependencyNotFound {
                id: dep.depends_on_id.clone(),
            });
        }
        if dep.dep_type.is_blocking() {
            if let Some(path) = self.find_cycle_path(&dep.issue_id, &dep.depends_on_id)? {
                return Err(BeadsError::DependencyCycle { path });
            }
        }

        let dep = dep.clone();
        let hash = self.hash_of(&dep.issue_id)?;
        self.mutate("add_dependency", move |tx, ctx| {
            tx.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    dep.issue_id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    format_ts(dep.created_at),
                    dep.created_by,
                ],
            )?;
            ctx.mark_dirty(&dep.issue_id, &hash);
            Ok(())
        })
    }

    /// Remove a dependency edge.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
    ) -> Result<bool> {
        let hash = self.hash_of(issue_id)?;
        let issue_id = issue_id.to_string();
        let depends_on_id = depends_on_id.to_string();
        let dep_type = dep_type.as_str().to_string();
        self.mutate("remove_dependency", move |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ? AND type = ?",
                rusqlite::params![issue_id, depends_on_id, dep_type],
            )?;
            if removed > 0 {
                ctx.mark_dirty(&issue_id, &hash);
            }
            Ok(removed > 0)
        })
    }

    /// Outgoing edges for an issue.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_dependencies_full(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies WHERE issue_id = ? ORDER BY depends_on_id, type",
        )?;
        let deps = stmt
            .query_map([issue_id], dependency_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deps)
    }

    /// All edges grouped by source issue.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies ORDER BY issue_id, depends_on_id, type",
        )?;
        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for dep in stmt.query_map([], dependency_from_row)? {
            let dep = dep?;
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    /// Walk `blocks` edges from `start` looking for `target`; returns the
    /// cycle path that adding `start -> target` would create.
    fn find_cycle_path(&self, start: &str, target: &str) -> Result<Option<String>> {
        // Adding start->target creates a cycle iff target can already reach start.
        let mut stack = vec![vec![target.to_string()]];
        let mut seen = HashSet::new();
        while let Some(path) = stack.pop() {
            let current = path.last().cloned().unwrap_or_default();
            if current == start {
                let mut full = vec![start.to_string(), target.to_string()];
                full.extend(path.into_iter().skip(1));
                return Ok(Some(full.join(" -> ")));
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            let mut stmt = self.conn.prepare(
                "SELECT depends_on_id FROM dependencies WHERE issue_id = ? AND type = 'blocks'",
            )?;
            let nexts = stmt
                .query_map([current.as_str()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for next in nexts {
                let mut next_path = path.clone();
                next_path.push(next);
                stack.push(next_path);
            }
        }
        Ok(None)
    }

    /// All cycles in the `blocks` graph, via Tarjan's SCC.
    ///
    /// Cycles are detected, never auto-broken.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn detect_all_cycles(&self) -> Result<Vec<Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id FROM dependencies WHERE type = 'blocks'",
        )?;
        let edges: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut nodes: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for (from, to) in &edges {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
            for node in [from.as_str(), to.as_str()] {
                if seen.insert(node) {
                    nodes.push(node);
                }
            }
        }

        Ok(tarjan_sccs(&nodes, &adjacency)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || adjacency
                        .get(scc[0].as_str())
                        .is_some_and(|next| next.contains(&scc[0].as_str()))
            })
            .collect())
    }

    // ========================================================================
    // Labels and comments
    // ========================================================================

    /// Attach a label; returns false when it was already present.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the issue does not exist.
    pub fn add_label(&mut self, issue_id: &str, label: &str) -> Result<bool> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        let hash = self.hash_of(issue_id)?;
        let issue_id = issue_id.to_string();
        let label = label.to_string();
        self.mutate("add_label", move |tx, ctx| {
            let added = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
            if added > 0 {
                ctx.mark_dirty(&issue_id, &hash);
            }
            Ok(added > 0)
        })
    }

    /// Remove a label; returns false when it was not present.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn remove_label(&mut self, issue_id: &str, label: &str) -> Result<bool> {
        let hash = self.hash_of(issue_id)?;
        let issue_id = issue_id.to_string();
        let label = label.to_string();
        self.mutate("remove_label", move |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                rusqlite::params![issue_id, label],
            )?;
            if removed > 0 {
                ctx.mark_dirty(&issue_id, &hash);
            }
            Ok(removed > 0)
        })
    }

    /// Labels for one issue, sorted.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(labels)
    }

    /// All labels grouped by issue.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })? {
            let (issue_id, label) = row?;
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    /// Append a comment.
    ///
    /// # Errors
    ///
    /// `IssueNotFound` when the issue does not exist.
    pub fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if !self.id_exists(issue_id)? {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        let hash = self.hash_of(issue_id)?;
        let now = Utc::now();
        let issue_id_owned = issue_id.to_string();
        let author_owned = author.to_string();
        let text_owned = text.to_string();
        let id = self.mutate("add_comment", move |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id_owned, author_owned, text_owned, format_ts(now)],
            )?;
            ctx.mark_dirty(&issue_id_owned, &hash);
            Ok(tx.last_insert_rowid())
        })?;

        Ok(Comment {
            id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            body: text.to_string(),
            created_at: now,
        })
    }

    /// Comments for one issue, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at
             FROM comments WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map([issue_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    /// All comments grouped by issue.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments ORDER BY issue_id, id",
        )?;
        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in stmt.query_map([], comment_from_row)? {
            let comment = comment?;
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    // ========================================================================
    // Config and metadata
    // ========================================================================

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .prepare("SELECT value FROM config WHERE key = ?")?
            .query_row([key], |row| row.get(0))
            .optional()?)
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn delete_config(&mut self, key: &str) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM config WHERE key = ?", [key])? > 0)
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })? {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?")?
            .query_row([key], |row| row.get(0))
            .optional()?)
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn delete_metadata(&mut self, key: &str) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM metadata WHERE key = ?", [key])? > 0)
    }

    /// Set a metadata key inside an open transaction.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn set_metadata_tx(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // Dirty set and export hashes
    // ========================================================================

    /// Dirty entries as `(issue_id, content_hash_at_mutation)`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_dirty_entries(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, content_hash FROM dirty_issues ORDER BY issue_id")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Clear dirty rows only where the stored hash still matches what was
    /// exported, so a mutation racing the export stays dirty.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn clear_dirty_matching(&mut self, exported: &[(String, String)]) -> Result<usize> {
        let mut cleared = 0;
        let tx = self.conn.transaction()?;
        for (id, hash) in exported {
            cleared += tx.execute(
                "DELETE FROM dirty_issues WHERE issue_id = ? AND content_hash = ?",
                [id, hash],
            )?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    /// Drop the whole dirty set (full export).
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn clear_all_dirty(&mut self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM dirty_issues", [])?)
    }

    /// Record per-issue export hashes.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn set_export_hashes(&mut self, hashes: &[(String, String)]) -> Result<()> {
        let now = format_ts(Utc::now());
        let tx = self.conn.transaction()?;
        for (id, hash) in hashes {
            tx.execute(
                "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at)
                 VALUES (?, ?, ?)",
                rusqlite::params![id, hash, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .prepare("SELECT content_hash FROM export_hashes WHERE issue_id = ?")?
            .query_row([issue_id], |row| row.get(0))
            .optional()?)
    }

    /// # Errors
    ///
    /// Propagates database errors.
    pub fn clear_all_export_hashes(&mut self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM export_hashes", [])?)
    }

    // ========================================================================
    // Export support
    // ========================================================================

    /// Every non-ephemeral issue, hydrated with relations, ascending by ID.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn get_all_issues_for_export(&self) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE ephemeral = 0 ORDER BY id"
        ))?;
        let mut issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut labels = self.get_all_labels()?;
        let mut deps = self.get_all_dependency_records()?;
        let mut comments = self.get_all_comments()?;
        for issue in &mut issues {
            issue.labels = labels.remove(&issue.id).unwrap_or_default();
            issue.dependencies = deps.remove(&issue.id).unwrap_or_default();
            issue.comments = comments.remove(&issue.id).unwrap_or_default();
        }
        Ok(issues)
    }

    // ========================================================================
    // Identity support
    // ========================================================================

    /// IDs whose hash portion contains the substring, for partial lookup.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn find_ids_by_hash(&self, hash_substring: &str) -> Result<Vec<String>> {
        let ids = self.get_all_ids()?;
        Ok(crate::util::id::find_matching_ids(&ids, hash_substring))
    }

    /// Next child index under `parent_id`, reconstructed from stored IDs.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn next_child_index(&self, parent_id: &str) -> Result<u32> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues WHERE id LIKE ?")?;
        let pattern = format!("{parent_id}.%");
        let ids = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(next_child_index(parent_id, ids.iter().map(String::as_str)))
    }

    /// Ensure `parent_id` exists before a child create.
    ///
    /// Missing parents are resurrected from the working-tree JSONL when
    /// present there: closed, priority 4, original title, description marked.
    ///
    /// # Errors
    ///
    /// `MissingParent` when the parent is nowhere to be found.
    pub fn ensure_parent_exists<F>(&mut self, parent_id: &str, jsonl_lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<Issue>,
    {
        if self.id_exists(parent_id)? {
            return Ok(());
        }
        let Some(from_jsonl) = jsonl_lookup(parent_id) else {
            return Err(BeadsError::MissingParent {
                id: parent_id.to_string(),
            });
        };
        let resurrected = resurrect_parent(&from_jsonl, Utc::now());
        tracing::info!(id = %parent_id, "resurrecting missing parent from JSONL");
        self.create_issue(&resurrected)
    }

    /// Rename the issue prefix, cascading across issues, dependencies,
    /// labels, comments, dirty rows, export hashes and config.
    ///
    /// # Errors
    ///
    /// Rolls the whole rename back on any failure.
    pub fn rename_prefix(&mut self, old: &str, new: &str) -> Result<usize> {
        let old_like = format!("{old}-%");
        let offset = i64::try_from(old.len() + 1).unwrap_or(i64::MAX);
        let old_owned = old.to_string();
        let new_owned = new.to_string();
        self.mutate("rename_prefix", move |tx, _ctx| {
            let set = |table: &str, column: &str| -> Result<usize> {
                Ok(tx.execute(
                    &format!(
                        "UPDATE {table} SET {column} = ? || substr({column}, ?)
                         WHERE {column} LIKE ?"
                    ),
                    rusqlite::params![new_owned, offset, old_like],
                )?)
            };
            let renamed = set("issues", "id")?;
            set("dependencies", "issue_id")?;
            set("dependencies", "depends_on_id")?;
            set("labels", "issue_id")?;
            set("comments", "issue_id")?;
            set("dirty_issues", "issue_id")?;
            set("export_hashes", "issue_id")?;
            tx.execute(
                "UPDATE config SET value = ? WHERE key = 'issue_prefix'",
                [&new_owned],
            )?;
            Ok(renamed)
        })
    }

    fn hash_of(&self, issue_id: &str) -> Result<String> {
        let issue = self
            .get_issue(issue_id)?
            .ok_or_else(|| BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            })?;
        Ok(content_hash(&issue))
    }
}

/// Build the resurrection record for a parent found in the JSONL.
#[must_use]
pub fn resurrect_parent(from_jsonl: &Issue, now: DateTime<Utc>) -> Issue {
    let mut issue = from_jsonl.clone();
    issue.status = Status::Closed;
    issue.priority = Priority::BACKLOG;
    issue.closed_at = Some(now);
    issue.updated_at = now;
    let description = issue.description.take().unwrap_or_default();
    issue.description = Some(if description.is_empty() {
        RESURRECTED_PREFIX.to_string()
    } else {
        format!("{RESURRECTED_PREFIX} {description}")
    });
    issue.dependencies.clear();
    issue.comments.clear();
    issue.content_hash = Some(content_hash(&issue));
    issue
}

fn map_busy(err: rusqlite::Error, path: &Path) -> BeadsError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked =>
        {
            BeadsError::DatabaseLocked {
                path: path.to_path_buf(),
            }
        }
        _ => BeadsError::Database(err),
    }
}

// ============================================================================
// Row mapping and transaction-scoped helpers
// ============================================================================

const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, acceptance_criteria, \
     notes, status, priority, issue_type, assignee, created_at, created_by, updated_at, \
     closed_at, external_ref, deleted_at, deleted_by, delete_reason, original_type, pinned, \
     ephemeral, source_repo";

fn empty_to_none(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn parse_dt(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[allow(clippy::needless_pass_by_value)]
fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    let status: String = row.get(7)?;
    let issue_type: String = row.get(9)?;
    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        title: row.get(2)?,
        description: empty_to_none(row.get(3)?),
        design: empty_to_none(row.get(4)?),
        acceptance_criteria: empty_to_none(row.get(5)?),
        notes: empty_to_none(row.get(6)?),
        status: status.parse().unwrap_or(Status::Open),
        priority: Priority(row.get(8)?),
        issue_type: issue_type.parse().unwrap_or_default(),
        assignee: empty_to_none(row.get(10)?),
        created_at: parse_dt(&row.get::<_, String>(11)?),
        created_by: empty_to_none(row.get(12)?),
        updated_at: parse_dt(&row.get::<_, String>(13)?),
        closed_at: row.get::<_, Option<String>>(14)?.map(|s| parse_dt(&s)),
        external_ref: empty_to_none(row.get(15)?),
        deleted_at: row.get::<_, Option<String>>(16)?.map(|s| parse_dt(&s)),
        deleted_by: empty_to_none(row.get(17)?),
        delete_reason: empty_to_none(row.get(18)?),
        original_type: empty_to_none(row.get(19)?),
        pinned: row.get::<_, i64>(20)? != 0,
        ephemeral: row.get::<_, i64>(21)? != 0,
        source_repo: empty_to_none(row.get(22)?),
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn dependency_from_row(row: &rusqlite::Row) -> rusqlite::Result<Dependency> {
    let dep_type: String = row.get(2)?;
    Ok(Dependency {
        issue_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dep_type: dep_type.parse().unwrap_or(DependencyType::Related),
        created_at: parse_dt(&row.get::<_, String>(3)?),
        created_by: row.get(4)?,
    })
}

#[allow(clippy::needless_pass_by_value)]
fn comment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_dt(&row.get::<_, String>(4)?),
    })
}

/// Whether an ID exists, inside a transaction.
///
/// # Errors
///
/// Propagates database errors.
pub fn issue_exists_tx(tx: &Transaction<'_>, id: &str) -> Result<bool> {
    Ok(tx.prepare("SELECT 1 FROM issues WHERE id = ?")?.exists([id])?)
}

fn find_live_external_ref_tx(tx: &Transaction<'_>, external_ref: &str) -> Result<Option<String>> {
    Ok(tx
        .prepare("SELECT id FROM issues WHERE external_ref = ? AND status != 'tombstone'")?
        .query_row([external_ref], |row| row.get(0))
        .optional()?)
}

/// Insert a fresh issue row; returns its content hash.
///
/// # Errors
///
/// Propagates database errors.
pub fn insert_issue_tx(tx: &Transaction<'_>, issue: &Issue) -> Result<String> {
    let hash = issue
        .content_hash
        .clone()
        .unwrap_or_else(|| content_hash(issue));
    let params = issue_params(issue, &hash);
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| &**p).collect();
    tx.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        refs.as_slice(),
    )?;
    Ok(hash)
}

fn update_issue_row_tx(tx: &Transaction<'_>, issue: &Issue) -> Result<()> {
    let hash = issue
        .content_hash
        .clone()
        .unwrap_or_else(|| content_hash(issue));
    let params = issue_params(issue, &hash);
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| &**p).collect();
    tx.execute(
        "UPDATE issues SET content_hash=?2, title=?3, description=?4, design=?5,
             acceptance_criteria=?6, notes=?7, status=?8, priority=?9, issue_type=?10,
             assignee=?11, created_at=?12, created_by=?13, updated_at=?14, closed_at=?15,
             external_ref=?16, deleted_at=?17, deleted_by=?18, delete_reason=?19,
             original_type=?20, pinned=?21, ephemeral=?22, source_repo=?23
         WHERE id=?1",
        refs.as_slice(),
    )?;
    Ok(())
}

/// Insert-or-replace an issue row during import; returns true when created.
///
/// # Errors
///
/// Propagates database errors.
pub fn upsert_issue_tx(tx: &Transaction<'_>, issue: &Issue) -> Result<bool> {
    let existed = issue_exists_tx(tx, &issue.id)?;
    if existed {
        update_issue_row_tx(tx, issue)?;
    } else {
        insert_issue_tx(tx, issue)?;
    }
    Ok(!existed)
}

fn issue_params(issue: &Issue, hash: &str) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(issue.id.clone()),
        Box::new(hash.to_string()),
        Box::new(issue.title.clone()),
        Box::new(issue.description.clone().unwrap_or_default()),
        Box::new(issue.design.clone().unwrap_or_default()),
        Box::new(issue.acceptance_criteria.clone().unwrap_or_default()),
        Box::new(issue.notes.clone().unwrap_or_default()),
        Box::new(issue.status.as_str().to_string()),
        Box::new(issue.priority.0),
        Box::new(issue.issue_type.as_str().to_string()),
        Box::new(issue.assignee.clone()),
        Box::new(format_ts(issue.created_at)),
        Box::new(issue.created_by.clone().unwrap_or_default()),
        Box::new(format_ts(issue.updated_at)),
        Box::new(issue.closed_at.map(format_ts)),
        Box::new(issue.external_ref.clone()),
        Box::new(issue.deleted_at.map(format_ts)),
        Box::new(issue.deleted_by.clone().unwrap_or_default()),
        Box::new(issue.delete_reason.clone().unwrap_or_default()),
        Box::new(issue.original_type.clone().unwrap_or_default()),
        Box::new(i64::from(issue.pinned)),
        Box::new(i64::from(issue.ephemeral)),
        Box::new(issue.source_repo.clone().unwrap_or_default()),
    ]
}

/// Replace an issue's labels inside a transaction.
///
/// # Errors
///
/// Propagates database errors.
pub fn sync_labels_tx(tx: &Transaction<'_>, issue_id: &str, labels: &[String]) -> Result<()> {
    tx.execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
    for label in labels {
        tx.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
            [issue_id, label],
        )?;
    }
    Ok(())
}

/// Replace an issue's outgoing dependency edges inside a transaction.
///
/// # Errors
///
/// Propagates database errors.
pub fn sync_dependencies_tx(
    tx: &Transaction<'_>,
    issue_id: &str,
    deps: &[Dependency],
) -> Result<()> {
    tx.execute("DELETE FROM dependencies WHERE issue_id = ?", [issue_id])?;
    for dep in deps {
        tx.execute(
            "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
             VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                format_ts(dep.created_at),
                dep.created_by,
            ],
        )?;
    }
    Ok(())
}

/// Merge imported comments into a transaction: keyed by (author, body,
/// `created_at`) so repeated imports stay idempotent.
///
/// # Errors
///
/// Propagates database errors.
pub fn sync_comments_tx(tx: &Transaction<'_>, issue_id: &str, comments: &[Comment]) -> Result<()> {
    for comment in comments {
        let exists = tx
            .prepare(
                "SELECT 1 FROM comments WHERE issue_id = ? AND author = ? AND text = ? AND created_at = ?",
            )?
            .exists(rusqlite::params![
                issue_id,
                comment.author,
                comment.body,
                format_ts(comment.created_at)
            ])?;
        if !exists {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    comment.author,
                    comment.body,
                    format_ts(comment.created_at)
                ],
            )?;
        }
    }
    Ok(())
}

/// Iterative Tarjan strongly-connected components.
fn tarjan_sccs(nodes: &[&str], adjacency: &HashMap<&str, Vec<&str>>) -> Vec<Vec<String>> {
    #[derive(Default, Clone)]
    struct NodeState {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }

    let mut states: HashMap<&str, NodeState> = nodes
        .iter()
        .map(|&n| (n, NodeState::default()))
        .collect();
    let mut index = 0usize;
    let mut stack: Vec<&str> = Vec::new();
    let mut sccs: Vec<Vec<String>> = Vec::new();
    let empty: Vec<&str> = Vec::new();

    for &root in nodes {
        if states[root].index.is_some() {
            continue;
        }
        // Explicit DFS frames: (node, next-neighbor-offset)
        let mut frames: Vec<(&str, usize)> = vec![(root, 0)];
        while let Some((node, offset)) = frames.pop() {
            if offset == 0 {
                if let Some(state) = states.get_mut(node) {
                    state.index = Some(index);
                    state.lowlink = index;
                    state.on_stack = true;
                }
                index += 1;
                stack.push(node);
            }
            let neighbors = adjacency.get(node).unwrap_or(&empty);
            let mut descended = false;
            for (i, &next) in neighbors.iter().enumerate().skip(offset) {
                let next_state = states.get(next).cloned().unwrap_or_default();
                if next_state.index.is_none() {
                    frames.push((node, i + 1));
                    frames.push((next, 0));
                    descended = true;
                    break;
                } else if next_state.on_stack {
                    let low = states[node].lowlink.min(next_state.index.unwrap_or(0));
                    if let Some(s) = states.get_mut(node) {
                        s.lowlink = low;
                    }
                }
            }
            if descended {
                continue;
            }
            // All neighbors processed: maybe pop an SCC, then fold into parent
            let node_state = states[node].clone();
            if node_state.index == Some(node_state.lowlink) {
                let mut scc = Vec::new();
                while let Some(top) = stack.pop() {
                    if let Some(s) = states.get_mut(top) {
                        s.on_stack = false;
                    }
                    scc.push(top.to_string());
                    if top == node {
                        break;
                    }
                }
                scc.sort();
                sccs.push(scc);
            }
            if let Some(&(parent, _)) = frames.last() {
                let low = states[parent].lowlink.min(states[node].lowlink);
                if let Some(s) = states.get_mut(parent) {
                    s.lowlink = low;
                }
            }
        }
    }
    sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn make_issue(id: &str, title: &str) -> Issue {
        Issue::new(id, title, ts(1_700_000_000))
    }

    fn store_with(issues: &[Issue]) -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issues(issues).unwrap();
        storage
    }

    #[test]
    fn create_and_get_roundtrip() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut issue = make_issue("bd-abc123", "Test");
        issue.description = Some("desc".to_string());
        issue.labels = vec!["backend".to_string()];
        storage.create_issue(&issue).unwrap();

        let fetched = storage.get_issue("bd-abc123").unwrap().unwrap();
        assert_eq!(fetched.title, "Test");
        assert_eq!(fetched.description.as_deref(), Some("desc"));
        assert_eq!(fetched.labels, vec!["backend"]);
        assert!(storage.get_issue("bd-zzz999").unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_collision() {
        let mut storage = store_with(&[make_issue("bd-abc123", "One")]);
        let err = storage.create_issue(&make_issue("bd-abc123", "Two")).unwrap_err();
        assert!(matches!(err, BeadsError::IdCollision { .. }));
    }

    #[test]
    fn duplicate_live_external_ref_rejected() {
        let mut a = make_issue("bd-aaa111", "A");
        a.external_ref = Some("https://example.com/1".to_string());
        let mut storage = store_with(&[a]);

        let mut b = make_issue("bd-bbb222", "B");
        b.external_ref = Some("https://example.com/1".to_string());
        let err = storage.create_issue(&b).unwrap_err();
        assert!(matches!(err, BeadsError::DuplicateExternalRef { .. }));
    }

    #[test]
    fn mutation_marks_dirty_with_hash() {
        let mut storage = store_with(&[make_issue("bd-abc123", "T")]);
        let dirty = storage.get_dirty_entries().unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, "bd-abc123");
        let issue = storage.get_issue("bd-abc123").unwrap().unwrap();
        assert_eq!(dirty[0].1, content_hash(&issue));
    }

    #[test]
    fn clear_dirty_respects_hash_race() {
        let mut storage = store_with(&[make_issue("bd-abc123", "T")]);
        let exported = storage.get_dirty_entries().unwrap();

        // Concurrent mutation after the export snapshot
        storage
            .update_issue(
                "bd-abc123",
                &IssueUpdate {
                    title: Some("Changed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let cleared = storage.clear_dirty_matching(&exported).unwrap();
        assert_eq!(cleared, 0, "stale hash must not clear the newer dirty row");
        assert_eq!(storage.get_dirty_entries().unwrap().len(), 1);
    }

    #[test]
    fn update_bumps_updated_at_monotonically() {
        let mut storage = store_with(&[make_issue("bd-abc123", "T")]);
        let before = storage.get_issue("bd-abc123").unwrap().unwrap().updated_at;
        let after = storage
            .update_issue(
                "bd-abc123",
                &IssueUpdate {
                    notes: Some(Some("n".to_string())),
                    ..Default::default()
                },
            )
            .unwrap()
            .updated_at;
        assert!(after >= before);
    }

    #[test]
    fn close_sets_closed_at_and_reopen_clears_it() {
        let mut storage = store_with(&[make_issue("bd-abc123", "T")]);
        let closed = storage.close_issue("bd-abc123").unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!(closed.closed_at.is_some());

        let reopened = storage.reopen_issue("bd-abc123").unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert!(reopened.closed_at.is_none());
    }

    #[test]
    fn delete_leaves_a_tombstone() {
        let mut storage = store_with(&[make_issue("bd-abc123", "Original")]);
        storage
            .delete_issue("bd-abc123", Some("alice"), Some("obsolete"))
            .unwrap();

        let tomb = storage.get_issue("bd-abc123").unwrap().unwrap();
        assert_eq!(tomb.status, Status::Tombstone);
        assert!(tomb.deleted_at.is_some());
        assert_eq!(tomb.deleted_by.as_deref(), Some("alice"));
        assert_eq!(tomb.title, crate::model::TOMBSTONE_TITLE);
        // tombstones are excluded from counts
        assert_eq!(storage.count_issues().unwrap(), 0);
        assert_eq!(storage.get_all_ids().unwrap().len(), 1);
    }

    #[test]
    fn ready_excludes_dependency_blocked() {
        let mut storage = store_with(&[
            make_issue("bd-aaa111", "Blocker"),
            make_issue("bd-bbb222", "Dependent"),
            make_issue("bd-ccc333", "Free"),
        ]);
        storage
            .add_dependency(&Dependency {
                issue_id: "bd-bbb222".to_string(),
                depends_on_id: "bd-aaa111".to_string(),
                dep_type: DependencyType::Blocks,
                created_at: ts(0),
                created_by: None,
            })
            .unwrap();

        let ready: Vec<String> = storage
            .get_ready_issues(None)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert!(ready.contains(&"bd-aaa111".to_string()));
        assert!(ready.contains(&"bd-ccc333".to_string()));
        assert!(!ready.contains(&"bd-bbb222".to_string()));
    }

    #[test]
    fn explicit_blocked_status_never_ready() {
        let mut storage = store_with(&[make_issue("bd-aaa111", "T")]);
        storage
            .update_issue(
                "bd-aaa111",
                &IssueUpdate {
                    status: Some(Status::Blocked),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(storage.get_ready_issues(None).unwrap().is_empty());
        let blocked = storage.get_blocked_issues().unwrap();
        assert_eq!(blocked.len(), 1);
    }

    #[test]
    fn closing_blocker_makes_dependent_newly_unblocked() {
        let mut storage = store_with(&[
            make_issue("bd-aaa111", "Blocker"),
            make_issue("bd-bbb222", "Dependent"),
        ]);
        storage
            .add_dependency(&Dependency {
                issue_id: "bd-bbb222".to_string(),
                depends_on_id: "bd-aaa111".to_string(),
                dep_type: DependencyType::Blocks,
                created_at: ts(0),
                created_by: None,
            })
            .unwrap();
        assert!(storage.get_ready_issues(None).unwrap().iter().all(|i| i.id != "bd-bbb222"));

        let since = Utc::now() - chrono::Duration::seconds(1);
        storage.close_issue("bd-aaa111").unwrap();

        let ready: Vec<String> = storage
            .get_ready_issues(None)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert!(ready.contains(&"bd-bbb222".to_string()));

        let newly: Vec<String> = storage
            .newly_unblocked(since)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(newly, vec!["bd-bbb222".to_string()]);
    }

    #[test]
    fn cycle_rejected_on_add() {
        let mut storage = store_with(&[make_issue("bd-aaa111", "A"), make_issue("bd-bbb222", "B")]);
        let dep = |from: &str, to: &str| Dependency {
            issue_id: from.to_string(),
            depends_on_id: to.to_string(),
            dep_type: DependencyType::Blocks,
            created_at: ts(0),
            created_by: None,
        };
        storage.add_dependency(&dep("bd-aaa111", "bd-bbb222")).unwrap();
        let err = storage.add_dependency(&dep("bd-bbb222", "bd-aaa111")).unwrap_err();
        assert!(matches!(err, BeadsError::DependencyCycle { .. }));
    }

    #[test]
    fn detect_all_cycles_via_import_path() {
        // Cycles can arrive via import (which bypasses add_dependency checks)
        let mut storage = store_with(&[
            make_issue("bd-aaa111", "A"),
            make_issue("bd-bbb222", "B"),
            make_issue("bd-ccc333", "C"),
        ]);
        let dep = |from: &str, to: &str| Dependency {
            issue_id: from.to_string(),
            depends_on_id: to.to_string(),
            dep_type: DependencyType::Blocks,
            created_at: ts(0),
            created_by: None,
        };
        storage.add_dependency(&dep("bd-aaa111", "bd-bbb222")).unwrap();
        storage.add_dependency(&dep("bd-bbb222", "bd-ccc333")).unwrap();
        storage
            .mutate("inject_cycle", |tx, _| {
                tx.execute(
                    "INSERT INTO dependencies (issue_id, depends_on_id, type, created_at)
                     VALUES ('bd-ccc333', 'bd-aaa111', 'blocks', '2026-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let cycles = storage.detect_all_cycles().unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn epics_eligible_when_children_closed() {
        let mut epic = make_issue("bd-epic11", "Epic");
        epic.issue_type = IssueType::Epic;
        let mut storage = store_with(&[
            epic,
            make_issue("bd-epic11.1", "Child one"),
            make_issue("bd-epic11.2", "Child two"),
        ]);

        let eligible = storage.epics_eligible_for_close().unwrap();
        assert!(!eligible[0].eligible_for_close);

        storage.close_issue("bd-epic11.1").unwrap();
        storage.close_issue("bd-epic11.2").unwrap();
        let eligible = storage.epics_eligible_for_close().unwrap();
        assert!(eligible[0].eligible_for_close);
        assert_eq!(eligible[0].closed_children, 2);
    }

    #[test]
    fn child_index_reconstruction() {
        let storage = store_with(&[
            make_issue("bd-abc123", "Parent"),
            make_issue("bd-abc123.1", "C1"),
            make_issue("bd-abc123.3", "C3"),
            make_issue("bd-abc123.2.4", "Grandchild"),
        ]);
        assert_eq!(storage.next_child_index("bd-abc123").unwrap(), 4);
        assert_eq!(storage.next_child_index("bd-abc123.2").unwrap(), 5);
        assert_eq!(storage.next_child_index("bd-zzz999").unwrap(), 1);
    }

    #[test]
    fn parent_resurrection_from_jsonl() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut parent = make_issue("bd-parent1", "Original parent title");
        parent.description = Some("context".to_string());

        storage
            .ensure_parent_exists("bd-parent1", |id| {
                (id == "bd-parent1").then(|| parent.clone())
            })
            .unwrap();

        let resurrected = storage.get_issue("bd-parent1").unwrap().unwrap();
        assert_eq!(resurrected.status, Status::Closed);
        assert_eq!(resurrected.priority, Priority::BACKLOG);
        assert_eq!(resurrected.title, "Original parent title");
        assert!(resurrected
            .description
            .as_deref()
            .unwrap()
            .starts_with(RESURRECTED_PREFIX));
        assert!(resurrected.closed_at.is_some());
    }

    #[test]
    fn parent_resurrection_fails_without_source() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let err = storage.ensure_parent_exists("bd-ghost99", |_| None).unwrap_err();
        assert!(matches!(err, BeadsError::MissingParent { .. }));
    }

    #[test]
    fn rename_prefix_cascades() {
        let mut storage = store_with(&[
            make_issue("bd-aaa111", "A"),
            make_issue("bd-bbb222", "B"),
        ]);
        storage
            .add_dependency(&Dependency {
                issue_id: "bd-aaa111".to_string(),
                depends_on_id: "bd-bbb222".to_string(),
                dep_type: DependencyType::Blocks,
                created_at: ts(0),
                created_by: None,
            })
            .unwrap();
        storage.add_label("bd-aaa111", "x").unwrap();
        storage.set_config("issue_prefix", "bd").unwrap();

        let renamed = storage.rename_prefix("bd", "proj").unwrap();
        assert_eq!(renamed, 2);
        assert!(storage.id_exists("proj-aaa111").unwrap());
        assert!(!storage.id_exists("bd-aaa111").unwrap());
        let deps = storage.get_dependencies_full("proj-aaa111").unwrap();
        assert_eq!(deps[0].depends_on_id, "proj-bbb222");
        assert_eq!(storage.get_labels("proj-aaa111").unwrap(), vec!["x"]);
        assert_eq!(
            storage.get_config("issue_prefix").unwrap().as_deref(),
            Some("proj")
        );
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let result: Result<()> = storage.mutate("failing_op", |tx, ctx| {
            insert_issue_tx(tx, &make_issue("bd-abc123", "T"))?;
            ctx.mark_dirty("bd-abc123", "hash");
            Err(BeadsError::Config("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!storage.id_exists("bd-abc123").unwrap());
        assert!(storage.get_dirty_entries().unwrap().is_empty());
    }

    #[test]
    fn metadata_roundtrip() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.set_metadata("sync.remote_sha", "abc").unwrap();
        assert_eq!(
            storage.get_metadata("sync.remote_sha").unwrap().as_deref(),
            Some("abc")
        );
        assert!(storage.delete_metadata("sync.remote_sha").unwrap());
        assert!(storage.get_metadata("sync.remote_sha").unwrap().is_none());
    }

    #[test]
    fn export_skips_ephemerals() {
        let mut eph = make_issue("bd-eph1", "Ephemeral");
        eph.ephemeral = true;
        let storage = store_with(&[make_issue("bd-abc123", "Keep"), eph]);
        let exported = storage.get_all_issues_for_export().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].id, "bd-abc123");
    }

    #[test]
    fn list_filters_work() {
        let mut bug = make_issue("bd-bug001", "Bug");
        bug.issue_type = IssueType::Bug;
        bug.assignee = Some("alice".to_string());
        let mut storage = store_with(&[bug, make_issue("bd-task01", "Task")]);
        storage.add_label("bd-task01", "infra").unwrap();

        let bugs = storage
            .list_issues(&ListFilters {
                issue_type: Some(IssueType::Bug),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(bugs.len(), 1);

        let labelled = storage
            .list_issues(&ListFilters {
                label: Some("infra".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(labelled[0].id, "bd-task01");

        let limited = storage
            .list_issues(&ListFilters {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
