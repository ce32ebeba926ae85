use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditFilter};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::phase::{PhaseDefinition, PhaseRegistry};
use crate::trace::{
    ArtifactRef, MatrixSnapshot, ProjectTrace, TraceArtifact, TraceChange, TraceLink,
    TraceabilityMatrix,
};
use crate::workflow::{GateReview, PhaseInstance, ProjectWorkflow, WorkflowChange};

/// Async-safe handle to the gate database.
///
/// Wraps `GateDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<GateDb>>,
}

impl DbHandle {
    pub fn new(db: GateDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> WorkflowResult<R>
    where
        F: FnOnce(&GateDb) -> WorkflowResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| WorkflowError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Revision counters are kept per project and per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Workflow,
    Trace,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Trace => "trace",
        }
    }
}

pub struct GateDb {
    conn: Connection,
}

impl GateDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS phase_definitions (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    sort_order INTEGER NOT NULL UNIQUE,
                    entry_criteria TEXT NOT NULL DEFAULT '[]',
                    exit_criteria TEXT NOT NULL DEFAULT '[]',
                    required_deliverables TEXT NOT NULL DEFAULT '[]',
                    is_gate INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS phase_instances (
                    id TEXT PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    phase_definition_id TEXT NOT NULL REFERENCES phase_definitions(id),
                    status TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    review_id TEXT,
                    completion_percentage INTEGER NOT NULL DEFAULT 0
                        CHECK (completion_percentage BETWEEN 0 AND 100),
                    UNIQUE(project_id, phase_definition_id)
                );

                CREATE TABLE IF NOT EXISTS gate_reviews (
                    id TEXT PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    phase_instance_id TEXT NOT NULL REFERENCES phase_instances(id),
                    title TEXT NOT NULL,
                    scope TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    comments TEXT NOT NULL DEFAULT '',
                    next_phase_allowed INTEGER NOT NULL DEFAULT 0,
                    opened_by TEXT NOT NULL,
                    reviewed_by TEXT,
                    created_at TEXT NOT NULL,
                    reviewed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS trace_artifacts (
                    project_id INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    artifact_id TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    registered_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, kind, artifact_id)
                );

                CREATE TABLE IF NOT EXISTS trace_links (
                    id TEXT PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    source_kind TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    target_kind TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    link_type TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    deactivated_at TEXT
                );

                CREATE TABLE IF NOT EXISTS matrix_snapshots (
                    id TEXT PRIMARY KEY,
                    project_id INTEGER NOT NULL,
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    matrix TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS audit_entries (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    project_id INTEGER NOT NULL,
                    entity_type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    previous_value TEXT,
                    new_value TEXT,
                    comments TEXT,
                    user_id TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS revisions (
                    project_id INTEGER NOT NULL,
                    scope TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    PRIMARY KEY (project_id, scope)
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_phase_instances_in_flight
                    ON phase_instances(project_id)
                    WHERE status IN ('active', 'under_review');
                CREATE UNIQUE INDEX IF NOT EXISTS idx_gate_reviews_open
                    ON gate_reviews(phase_instance_id)
                    WHERE status = 'in_progress';
                CREATE UNIQUE INDEX IF NOT EXISTS idx_trace_links_active
                    ON trace_links(project_id, source_kind, source_id, target_kind, target_id, link_type)
                    WHERE active = 1;
                CREATE INDEX IF NOT EXISTS idx_phase_instances_project ON phase_instances(project_id);
                CREATE INDEX IF NOT EXISTS idx_gate_reviews_project ON gate_reviews(project_id);
                CREATE INDEX IF NOT EXISTS idx_trace_links_project ON trace_links(project_id);
                CREATE INDEX IF NOT EXISTS idx_audit_entries_project ON audit_entries(project_id);

                CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
                BEFORE UPDATE ON audit_entries
                BEGIN
                    SELECT RAISE(ABORT, 'audit entries are append-only');
                END;

                CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
                BEFORE DELETE ON audit_entries
                BEGIN
                    SELECT RAISE(ABORT, 'audit entries are append-only');
                END;
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Phase definitions ─────────────────────────────────────────────

    /// Register the deployment's phase definitions. A definition already
    /// stored with different content is an error: definitions never change.
    pub fn sync_phase_definitions(&self, registry: &PhaseRegistry) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for definition in registry.phases() {
            match get_phase_definition(&tx, &definition.id)? {
                Some(stored) if stored == *definition => {}
                Some(_) => bail!(
                    "Phase definition '{}' differs from the one stored in the database; definitions cannot change once registered",
                    definition.id
                ),
                None => {
                    tx.execute(
                        "INSERT INTO phase_definitions (id, name, sort_order, entry_criteria, exit_criteria, required_deliverables, is_gate)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            definition.id,
                            definition.name,
                            definition.sort_order,
                            serde_json::to_string(&definition.entry_criteria)?,
                            serde_json::to_string(&definition.exit_criteria)?,
                            serde_json::to_string(&definition.required_deliverables)?,
                            definition.is_gate,
                        ],
                    )
                    .with_context(|| format!("Failed to insert phase definition {}", definition.id))?;
                }
            }
        }
        tx.commit().context("Failed to commit phase definitions")?;
        Ok(())
    }

    pub fn list_phase_definitions(&self) -> Result<Vec<PhaseDefinition>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, sort_order, entry_criteria, exit_criteria, required_deliverables, is_gate
                 FROM phase_definitions ORDER BY sort_order",
            )
            .context("Failed to prepare list_phase_definitions")?;
        let rows = stmt
            .query_map([], PhaseDefinitionRow::from_row)
            .context("Failed to query phase definitions")?;
        let mut definitions = Vec::new();
        for row in rows {
            let r = row.context("Failed to read phase definition row")?;
            definitions.push(r.into_definition()?);
        }
        Ok(definitions)
    }

    // ── Workflow ──────────────────────────────────────────────────────

    /// Load a project's phases and reviews in one read transaction.
    pub fn load_workflow(&self, project_id: i64) -> WorkflowResult<ProjectWorkflow> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin read transaction")?;
        let revision = current_revision(&tx, project_id, Scope::Workflow)?;

        let mut stmt = tx
            .prepare(
                "SELECT pi.id, pi.project_id, pi.phase_definition_id, pd.name, pd.sort_order, pi.status,
                        pi.started_at, pi.completed_at, pi.review_id, pi.completion_percentage
                 FROM phase_instances pi
                 JOIN phase_definitions pd ON pd.id = pi.phase_definition_id
                 WHERE pi.project_id = ?1
                 ORDER BY pd.sort_order",
            )
            .context("Failed to prepare phase instance query")?;
        let rows = stmt
            .query_map(params![project_id], PhaseInstanceRow::from_row)
            .context("Failed to query phase instances")?;
        let mut phases = Vec::new();
        for row in rows {
            let r = row.context("Failed to read phase instance row")?;
            phases.push(r.into_phase_instance()?);
        }
        drop(stmt);

        let mut stmt = tx
            .prepare(
                "SELECT id, project_id, phase_instance_id, title, scope, status, outcome, comments,
                        next_phase_allowed, opened_by, reviewed_by, created_at, reviewed_at
                 FROM gate_reviews WHERE project_id = ?1
                 ORDER BY created_at, rowid",
            )
            .context("Failed to prepare gate review query")?;
        let rows = stmt
            .query_map(params![project_id], GateReviewRow::from_row)
            .context("Failed to query gate reviews")?;
        let mut reviews = Vec::new();
        for row in rows {
            let r = row.context("Failed to read gate review row")?;
            reviews.push(r.into_review()?);
        }
        drop(stmt);
        tx.commit().context("Failed to end read transaction")?;

        Ok(ProjectWorkflow {
            project_id,
            revision,
            phases,
            reviews,
        })
    }

    /// Project owning a phase instance.
    pub fn project_for_phase(&self, phase_instance_id: Uuid) -> WorkflowResult<i64> {
        self.conn
            .query_row(
                "SELECT project_id FROM phase_instances WHERE id = ?1",
                params![phase_instance_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up phase instance")?
            .ok_or_else(|| WorkflowError::not_found("Phase instance", phase_instance_id))
    }

    /// Project owning a gate review.
    pub fn project_for_review(&self, review_id: Uuid) -> WorkflowResult<i64> {
        self.conn
            .query_row(
                "SELECT project_id FROM gate_reviews WHERE id = ?1",
                params![review_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up gate review")?
            .ok_or_else(|| WorkflowError::not_found("Gate review", review_id))
    }

    /// Apply a planned workflow change atomically, together with its audit
    /// entries, if the workflow revision has not moved since planning.
    pub fn commit_workflow(&self, change: &WorkflowChange) -> WorkflowResult<i64> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;
        check_revision(&tx, change.project_id, Scope::Workflow, change.expected_revision)?;

        for phase in &change.inserted_phases {
            tx.execute(
                "INSERT INTO phase_instances (id, project_id, phase_definition_id, status, started_at, completed_at, review_id, completion_percentage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    phase.id.to_string(),
                    phase.project_id,
                    phase.phase_definition_id,
                    phase.status.as_str(),
                    phase.started_at.map(|t| t.to_rfc3339()),
                    phase.completed_at.map(|t| t.to_rfc3339()),
                    phase.review_id.map(|id| id.to_string()),
                    phase.completion_percentage,
                ],
            )
            .with_context(|| format!("Failed to insert phase instance {}", phase.phase_name))?;
        }
        for phase in &change.updated_phases {
            let updated = tx
                .execute(
                    "UPDATE phase_instances
                     SET status = ?1, started_at = ?2, completed_at = ?3, review_id = ?4, completion_percentage = ?5
                     WHERE id = ?6",
                    params![
                        phase.status.as_str(),
                        phase.started_at.map(|t| t.to_rfc3339()),
                        phase.completed_at.map(|t| t.to_rfc3339()),
                        phase.review_id.map(|id| id.to_string()),
                        phase.completion_percentage,
                        phase.id.to_string(),
                    ],
                )
                .with_context(|| format!("Failed to update phase instance {}", phase.phase_name))?;
            if updated != 1 {
                return Err(WorkflowError::not_found("Phase instance", phase.id));
            }
        }
        for review in &change.inserted_reviews {
            tx.execute(
                "INSERT INTO gate_reviews (id, project_id, phase_instance_id, title, scope, status, outcome, comments,
                                           next_phase_allowed, opened_by, reviewed_by, created_at, reviewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    review.id.to_string(),
                    review.project_id,
                    review.phase_instance_id.to_string(),
                    review.title,
                    review.scope,
                    review.status.as_str(),
                    review.outcome.as_str(),
                    review.comments,
                    review.next_phase_allowed,
                    review.opened_by,
                    review.reviewed_by,
                    review.created_at.to_rfc3339(),
                    review.reviewed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to insert gate review")?;
        }
        for review in &change.updated_reviews {
            let updated = tx
                .execute(
                    "UPDATE gate_reviews
                     SET status = ?1, outcome = ?2, comments = ?3, next_phase_allowed = ?4, reviewed_by = ?5, reviewed_at = ?6
                     WHERE id = ?7",
                    params![
                        review.status.as_str(),
                        review.outcome.as_str(),
                        review.comments,
                        review.next_phase_allowed,
                        review.reviewed_by,
                        review.reviewed_at.map(|t| t.to_rfc3339()),
                        review.id.to_string(),
                    ],
                )
                .context("Failed to update gate review")?;
            if updated != 1 {
                return Err(WorkflowError::not_found("Gate review", review.id));
            }
        }

        insert_audit(&tx, &change.audit)?;
        let revision = bump_revision(&tx, change.project_id, Scope::Workflow, change.expected_revision)?;
        tx.commit().context("Failed to commit workflow change")?;
        Ok(revision)
    }

    // ── Traceability ──────────────────────────────────────────────────

    pub fn load_trace(&self, project_id: i64) -> WorkflowResult<ProjectTrace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin read transaction")?;
        let revision = current_revision(&tx, project_id, Scope::Trace)?;

        let mut stmt = tx
            .prepare(
                "SELECT project_id, kind, artifact_id, title, registered_at
                 FROM trace_artifacts WHERE project_id = ?1
                 ORDER BY kind, artifact_id",
            )
            .context("Failed to prepare artifact query")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(TraceArtifactRow {
                    project_id: row.get(0)?,
                    kind: row.get(1)?,
                    artifact_id: row.get(2)?,
                    title: row.get(3)?,
                    registered_at: row.get(4)?,
                })
            })
            .context("Failed to query artifacts")?;
        let mut artifacts = Vec::new();
        for row in rows {
            let r = row.context("Failed to read artifact row")?;
            artifacts.push(r.into_artifact()?);
        }
        drop(stmt);

        let mut stmt = tx
            .prepare(
                "SELECT id, project_id, source_kind, source_id, target_kind, target_id, link_type,
                        active, created_by, created_at, deactivated_at
                 FROM trace_links WHERE project_id = ?1
                 ORDER BY created_at, rowid",
            )
            .context("Failed to prepare link query")?;
        let rows = stmt
            .query_map(params![project_id], TraceLinkRow::from_row)
            .context("Failed to query links")?;
        let mut links = Vec::new();
        for row in rows {
            let r = row.context("Failed to read link row")?;
            links.push(r.into_link()?);
        }
        drop(stmt);
        tx.commit().context("Failed to end read transaction")?;

        Ok(ProjectTrace {
            project_id,
            revision,
            artifacts,
            links,
        })
    }

    /// Project owning a trace link.
    pub fn project_for_link(&self, link_id: Uuid) -> WorkflowResult<i64> {
        self.conn
            .query_row(
                "SELECT project_id FROM trace_links WHERE id = ?1",
                params![link_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up trace link")?
            .ok_or_else(|| WorkflowError::not_found("Trace link", link_id))
    }

    pub fn commit_trace(&self, change: &TraceChange) -> WorkflowResult<i64> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")?;
        check_revision(&tx, change.project_id, Scope::Trace, change.expected_revision)?;

        for artifact in &change.inserted_artifacts {
            tx.execute(
                "INSERT INTO trace_artifacts (project_id, kind, artifact_id, title, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    artifact.project_id,
                    artifact.kind.as_str(),
                    artifact.artifact_id,
                    artifact.title,
                    artifact.registered_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to insert artifact {}", artifact.reference()))?;
        }
        for link in &change.inserted_links {
            tx.execute(
                "INSERT INTO trace_links (id, project_id, source_kind, source_id, target_kind, target_id, link_type,
                                          active, created_by, created_at, deactivated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    link.id.to_string(),
                    link.project_id,
                    link.source.kind.as_str(),
                    link.source.id,
                    link.target.kind.as_str(),
                    link.target.id,
                    link.link_type.as_str(),
                    link.active,
                    link.created_by,
                    link.created_at.to_rfc3339(),
                    link.deactivated_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to insert trace link")?;
        }
        for link in &change.updated_links {
            let updated = tx
                .execute(
                    "UPDATE trace_links SET active = ?1, deactivated_at = ?2 WHERE id = ?3",
                    params![
                        link.active,
                        link.deactivated_at.map(|t| t.to_rfc3339()),
                        link.id.to_string(),
                    ],
                )
                .context("Failed to update trace link")?;
            if updated != 1 {
                return Err(WorkflowError::not_found("Trace link", link.id));
            }
        }
        for snapshot in &change.inserted_snapshots {
            tx.execute(
                "INSERT INTO matrix_snapshots (id, project_id, created_by, created_at, matrix)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.id.to_string(),
                    snapshot.project_id,
                    snapshot.created_by,
                    snapshot.created_at.to_rfc3339(),
                    serde_json::to_string(&snapshot.matrix).context("Failed to serialize matrix")?,
                ],
            )
            .context("Failed to insert matrix snapshot")?;
        }

        insert_audit(&tx, &change.audit)?;
        let revision = bump_revision(&tx, change.project_id, Scope::Trace, change.expected_revision)?;
        tx.commit().context("Failed to commit trace change")?;
        Ok(revision)
    }

    pub fn list_snapshots(&self, project_id: i64) -> WorkflowResult<Vec<MatrixSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, created_by, created_at, matrix
                 FROM matrix_snapshots WHERE project_id = ?1
                 ORDER BY created_at, rowid",
            )
            .context("Failed to prepare list_snapshots")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(SnapshotRow {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    created_by: row.get(2)?,
                    created_at: row.get(3)?,
                    matrix: row.get(4)?,
                })
            })
            .context("Failed to query matrix snapshots")?;
        let mut snapshots = Vec::new();
        for row in rows {
            let r = row.context("Failed to read matrix snapshot row")?;
            snapshots.push(r.into_snapshot()?);
        }
        Ok(snapshots)
    }

    // ── Audit ─────────────────────────────────────────────────────────

    /// A project's audit entries in insertion order.
    pub fn audit_trail(&self, project_id: i64, filter: &AuditFilter) -> WorkflowResult<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, entity_type, entity_id, action, previous_value, new_value,
                        comments, user_id, timestamp
                 FROM audit_entries
                 WHERE project_id = ?1
                   AND (?2 IS NULL OR entity_type = ?2)
                   AND (?3 IS NULL OR entity_id = ?3)
                 ORDER BY seq",
            )
            .context("Failed to prepare audit_trail")?;
        let rows = stmt
            .query_map(
                params![
                    project_id,
                    filter.entity_type.map(|t| t.as_str()),
                    filter.entity_id,
                ],
                AuditEntryRow::from_row,
            )
            .context("Failed to query audit entries")?;
        let mut entries = Vec::new();
        for row in rows {
            let r = row.context("Failed to read audit entry row")?;
            entries.push(r.into_entry()?);
        }
        Ok(entries)
    }

    pub fn revision(&self, project_id: i64, scope: Scope) -> WorkflowResult<i64> {
        current_revision(&self.conn, project_id, scope)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Transaction helpers ───────────────────────────────────────────────

fn current_revision(conn: &Connection, project_id: i64, scope: Scope) -> WorkflowResult<i64> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM revisions WHERE project_id = ?1 AND scope = ?2",
            params![project_id, scope.as_str()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read revision")?;
    Ok(version.unwrap_or(0))
}

fn check_revision(tx: &Connection, project_id: i64, scope: Scope, expected: i64) -> WorkflowResult<()> {
    if current_revision(tx, project_id, scope)? != expected {
        return Err(WorkflowError::ConcurrentModification {
            project_id,
            scope: scope.as_str().to_string(),
        });
    }
    Ok(())
}

fn bump_revision(tx: &Connection, project_id: i64, scope: Scope, expected: i64) -> WorkflowResult<i64> {
    let next = expected + 1;
    tx.execute(
        "INSERT INTO revisions (project_id, scope, version) VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id, scope) DO UPDATE SET version = excluded.version",
        params![project_id, scope.as_str(), next],
    )
    .context("Failed to bump revision")?;
    Ok(next)
}

fn insert_audit(tx: &Connection, entries: &[AuditEntry]) -> WorkflowResult<()> {
    for entry in entries {
        tx.execute(
            "INSERT INTO audit_entries (id, project_id, entity_type, entity_id, action, previous_value, new_value,
                                        comments, user_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id.to_string(),
                entry.project_id,
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.action.as_str(),
                entry.previous_value,
                entry.new_value,
                entry.comments,
                entry.user_id,
                entry.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            WorkflowError::AuditWriteFailure(
                anyhow::Error::new(e).context(format!("Failed to record {}", entry.action.as_str())),
            )
        })?;
    }
    Ok(())
}

fn get_phase_definition(conn: &Connection, id: &str) -> Result<Option<PhaseDefinition>> {
    let row = conn
        .query_row(
            "SELECT id, name, sort_order, entry_criteria, exit_criteria, required_deliverables, is_gate
             FROM phase_definitions WHERE id = ?1",
            params![id],
            PhaseDefinitionRow::from_row,
        )
        .optional()
        .context("Failed to query phase definition")?;
    row.map(PhaseDefinitionRow::into_definition).transpose()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid UUID in database: {}", value))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", value))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str, what: &str) -> Result<T> {
    T::from_str(value)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to parse {}", what))
}

// ── Row types ─────────────────────────────────────────────────────────

struct PhaseDefinitionRow {
    id: String,
    name: String,
    sort_order: i32,
    entry_criteria: String,
    exit_criteria: String,
    required_deliverables: String,
    is_gate: bool,
}

impl PhaseDefinitionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            sort_order: row.get(2)?,
            entry_criteria: row.get(3)?,
            exit_criteria: row.get(4)?,
            required_deliverables: row.get(5)?,
            is_gate: row.get(6)?,
        })
    }

    fn into_definition(self) -> Result<PhaseDefinition> {
        Ok(PhaseDefinition {
            entry_criteria: serde_json::from_str(&self.entry_criteria)
                .context("Failed to parse entry criteria JSON")?,
            exit_criteria: serde_json::from_str(&self.exit_criteria)
                .context("Failed to parse exit criteria JSON")?,
            required_deliverables: serde_json::from_str(&self.required_deliverables)
                .context("Failed to parse required deliverables JSON")?,
            id: self.id,
            name: self.name,
            sort_order: self.sort_order,
            is_gate: self.is_gate,
        })
    }
}

struct PhaseInstanceRow {
    id: String,
    project_id: i64,
    phase_definition_id: String,
    phase_name: String,
    sort_order: i32,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    review_id: Option<String>,
    completion_percentage: u8,
}

impl PhaseInstanceRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            phase_definition_id: row.get(2)?,
            phase_name: row.get(3)?,
            sort_order: row.get(4)?,
            status: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            review_id: row.get(8)?,
            completion_percentage: row.get(9)?,
        })
    }

    fn into_phase_instance(self) -> Result<PhaseInstance> {
        Ok(PhaseInstance {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id,
            phase_definition_id: self.phase_definition_id,
            phase_name: self.phase_name,
            sort_order: self.sort_order,
            status: parse_enum(&self.status, "phase status")?,
            started_at: self.started_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            review_id: self.review_id.as_deref().map(parse_uuid).transpose()?,
            completion_percentage: self.completion_percentage,
        })
    }
}

struct GateReviewRow {
    id: String,
    project_id: i64,
    phase_instance_id: String,
    title: String,
    scope: String,
    status: String,
    outcome: String,
    comments: String,
    next_phase_allowed: bool,
    opened_by: String,
    reviewed_by: Option<String>,
    created_at: String,
    reviewed_at: Option<String>,
}

impl GateReviewRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            phase_instance_id: row.get(2)?,
            title: row.get(3)?,
            scope: row.get(4)?,
            status: row.get(5)?,
            outcome: row.get(6)?,
            comments: row.get(7)?,
            next_phase_allowed: row.get(8)?,
            opened_by: row.get(9)?,
            reviewed_by: row.get(10)?,
            created_at: row.get(11)?,
            reviewed_at: row.get(12)?,
        })
    }

    fn into_review(self) -> Result<GateReview> {
        Ok(GateReview {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id,
            phase_instance_id: parse_uuid(&self.phase_instance_id)?,
            title: self.title,
            scope: self.scope,
            status: parse_enum(&self.status, "review status")?,
            outcome: parse_enum(&self.outcome, "review outcome")?,
            comments: self.comments,
            next_phase_allowed: self.next_phase_allowed,
            opened_by: self.opened_by,
            reviewed_by: self.reviewed_by,
            created_at: parse_time(&self.created_at)?,
            reviewed_at: self.reviewed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

struct TraceArtifactRow {
    project_id: i64,
    kind: String,
    artifact_id: String,
    title: String,
    registered_at: String,
}

impl TraceArtifactRow {
    fn into_artifact(self) -> Result<TraceArtifact> {
        Ok(TraceArtifact {
            project_id: self.project_id,
            kind: parse_enum(&self.kind, "artifact kind")?,
            artifact_id: self.artifact_id,
            title: self.title,
            registered_at: parse_time(&self.registered_at)?,
        })
    }
}

struct TraceLinkRow {
    id: String,
    project_id: i64,
    source_kind: String,
    source_id: String,
    target_kind: String,
    target_id: String,
    link_type: String,
    active: bool,
    created_by: String,
    created_at: String,
    deactivated_at: Option<String>,
}

impl TraceLinkRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            source_kind: row.get(2)?,
            source_id: row.get(3)?,
            target_kind: row.get(4)?,
            target_id: row.get(5)?,
            link_type: row.get(6)?,
            active: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
            deactivated_at: row.get(10)?,
        })
    }

    fn into_link(self) -> Result<TraceLink> {
        Ok(TraceLink {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id,
            source: ArtifactRef::new(parse_enum(&self.source_kind, "artifact kind")?, self.source_id),
            target: ArtifactRef::new(parse_enum(&self.target_kind, "artifact kind")?, self.target_id),
            link_type: parse_enum(&self.link_type, "link type")?,
            active: self.active,
            created_by: self.created_by,
            created_at: parse_time(&self.created_at)?,
            deactivated_at: self.deactivated_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

struct SnapshotRow {
    id: String,
    project_id: i64,
    created_by: String,
    created_at: String,
    matrix: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<MatrixSnapshot> {
        let matrix: TraceabilityMatrix =
            serde_json::from_str(&self.matrix).context("Failed to parse stored matrix JSON")?;
        Ok(MatrixSnapshot {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id,
            created_by: self.created_by,
            created_at: parse_time(&self.created_at)?,
            matrix,
        })
    }
}

struct AuditEntryRow {
    id: String,
    project_id: i64,
    entity_type: String,
    entity_id: String,
    action: String,
    previous_value: Option<String>,
    new_value: Option<String>,
    comments: Option<String>,
    user_id: String,
    timestamp: String,
}

impl AuditEntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            action: row.get(4)?,
            previous_value: row.get(5)?,
            new_value: row.get(6)?,
            comments: row.get(7)?,
            user_id: row.get(8)?,
            timestamp: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry> {
        Ok(AuditEntry {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id,
            entity_type: parse_enum(&self.entity_type, "audit entity type")?,
            entity_id: self.entity_id,
            action: parse_enum(&self.action, "audit action")?,
            previous_value: self.previous_value,
            new_value: self.new_value,
            comments: self.comments,
            user_id: self.user_id,
            timestamp: parse_time(&self.timestamp)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
