//! Workflow service: the single entry point for every engine operation.
//!
//! Mutating operations hold the project's async lock while they load a
//! snapshot, plan the change and commit it together with its audit entries.
//! Commits also carry the revision they were planned against, so writers in
//! other processes sharing the database are caught as
//! `ConcurrentModification`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditEntry, AuditExport, AuditFilter};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::phase::PhaseRegistry;
use crate::server::ws::{WsMessage, broadcast_message};
use crate::store::DbHandle;
use crate::trace::{
    self, ArtifactKind, ArtifactRef, LinkType, MatrixSnapshot, ProjectTrace, TraceArtifact,
    TraceChange, TraceLink, TraceabilityMatrix,
};
use crate::workflow::{
    BottleneckReport, GateReview, PhaseInstance, PhaseView, ProjectWorkflow, ReviewOutcome,
    WorkflowChange, WorkflowSummary, bottleneck, engine, review,
};

/// Per-project async locks. Different projects never contend.
///
/// Entries live only while some caller holds or waits on them.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    /// Wait for exclusive access to `project_id`.
    pub async fn acquire(&self, project_id: i64) -> WorkflowResult<ProjectGuard> {
        let lock = {
            let mut map = self.inner.lock().map_err(|_| WorkflowError::LockPoisoned)?;
            map.entry(project_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(ProjectGuard {
            project_id,
            guard: Some(guard),
            locks: self.clone(),
        })
    }

    /// Remove the entry if the map holds the only reference.
    fn prune(&self, project_id: i64) {
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        if map
            .get(&project_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&project_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }
}

/// Held for the duration of one mutation; prunes the lock map on drop.
pub struct ProjectGuard {
    project_id: i64,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    locks: ProjectLocks,
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(self.project_id);
    }
}

#[derive(Clone)]
pub struct WorkflowService {
    db: DbHandle,
    registry: Arc<PhaseRegistry>,
    locks: ProjectLocks,
    events: Option<broadcast::Sender<String>>,
}

impl WorkflowService {
    pub fn new(db: DbHandle, registry: Arc<PhaseRegistry>) -> Self {
        Self {
            db,
            registry,
            locks: ProjectLocks::default(),
            events: None,
        }
    }

    /// Publish committed changes on a broadcast channel.
    pub fn with_events(mut self, tx: broadcast::Sender<String>) -> Self {
        self.events = Some(tx);
        self
    }

    fn actor(user_id: &str) -> WorkflowResult<Actor> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(WorkflowError::InvalidInput("user id must not be empty".to_string()));
        }
        Ok(Actor::new(user_id))
    }

    fn publish(&self, messages: Vec<WsMessage>) {
        if let Some(tx) = &self.events {
            for msg in &messages {
                broadcast_message(tx, msg);
            }
        }
    }

    fn log_commit(operation: &str, audit: &[AuditEntry]) {
        for entry in audit {
            info!(
                project_id = entry.project_id,
                entity = entry.entity_type.as_str(),
                entity_id = %entry.entity_id,
                action = entry.action.as_str(),
                user = %entry.user_id,
                "{} committed", operation
            );
        }
    }

    fn log_rejection(operation: &str, project_id: i64, err: &WorkflowError) {
        warn!(project_id, kind = err.kind(), error = %err, "{} rejected", operation);
    }

    // ── Workflow plumbing ─────────────────────────────────────────────

    async fn load_workflow(&self, project_id: i64) -> WorkflowResult<ProjectWorkflow> {
        debug!(project_id, "Loading workflow snapshot");
        self.db.call(move |db| db.load_workflow(project_id)).await
    }

    async fn initialized_workflow(&self, project_id: i64) -> WorkflowResult<ProjectWorkflow> {
        let workflow = self.load_workflow(project_id).await?;
        if !workflow.is_initialized() {
            return Err(WorkflowError::not_found("Workflow for project", project_id));
        }
        Ok(workflow)
    }

    /// Lock the project, plan against a fresh snapshot and commit.
    async fn mutate_workflow<F>(
        &self,
        operation: &'static str,
        project_id: i64,
        user_id: &str,
        plan: F,
    ) -> WorkflowResult<(WorkflowChange, ProjectWorkflow)>
    where
        F: FnOnce(&ProjectWorkflow, &PhaseRegistry, &Actor) -> WorkflowResult<WorkflowChange>
            + Send
            + 'static,
    {
        let actor = Self::actor(user_id)?;
        let _guard = self.locks.acquire(project_id).await?;

        let registry = self.registry.clone();
        let result = self
            .db
            .call(move |db| {
                let mut workflow = db.load_workflow(project_id)?;
                let change = plan(&workflow, &*registry, &actor)?;
                db.commit_workflow(&change)?;
                change.apply_to(&mut workflow);
                Ok((change, workflow))
            })
            .await;

        match &result {
            Ok((change, _)) => Self::log_commit(operation, &change.audit),
            Err(err) => Self::log_rejection(operation, project_id, err),
        }
        result
    }

    async fn project_for_phase(&self, phase_instance_id: Uuid) -> WorkflowResult<i64> {
        self.db
            .call(move |db| db.project_for_phase(phase_instance_id))
            .await
    }

    async fn project_for_review(&self, review_id: Uuid) -> WorkflowResult<i64> {
        self.db.call(move |db| db.project_for_review(review_id)).await
    }

    fn phase_events(change: &WorkflowChange) -> Vec<WsMessage> {
        let mut messages: Vec<WsMessage> = change
            .inserted_reviews
            .iter()
            .map(|review| WsMessage::ReviewOpened {
                review: review.clone(),
            })
            .collect();
        messages.extend(change.updated_reviews.iter().map(|review| WsMessage::ReviewCompleted {
            review: review.clone(),
        }));
        messages.extend(change.updated_phases.iter().map(|phase| WsMessage::PhaseUpdated {
            phase: phase.clone(),
        }));
        messages
    }

    // ── Workflow operations ───────────────────────────────────────────

    /// Create the project's phase instances; the entry phase starts active.
    pub async fn initialize_workflow(&self, project_id: i64, user_id: &str) -> WorkflowResult<Vec<PhaseView>> {
        let (change, workflow) = self
            .mutate_workflow("initialize", project_id, user_id, |wf, registry, actor| {
                engine::initialize(wf, registry, actor)
            })
            .await?;
        self.publish(vec![WsMessage::WorkflowInitialized {
            project_id,
            phases: change.inserted_phases,
        }]);
        Ok(workflow.views())
    }

    pub async fn phases(&self, project_id: i64) -> WorkflowResult<Vec<PhaseView>> {
        Ok(self.initialized_workflow(project_id).await?.views())
    }

    pub async fn summary(&self, project_id: i64) -> WorkflowResult<WorkflowSummary> {
        let workflow = self.load_workflow(project_id).await?;
        Ok(WorkflowSummary::from(&workflow))
    }

    /// The phase that is active or under review, if any.
    pub async fn current_phase(&self, project_id: i64) -> WorkflowResult<Option<PhaseInstance>> {
        let workflow = self.initialized_workflow(project_id).await?;
        Ok(workflow.current_phase().cloned())
    }

    pub async fn bottlenecks(&self, project_id: i64) -> WorkflowResult<BottleneckReport> {
        let workflow = self.initialized_workflow(project_id).await?;
        Ok(bottleneck::detect(&workflow, Utc::now()))
    }

    pub async fn submit_for_review(
        &self,
        phase_instance_id: Uuid,
        title: &str,
        scope: &str,
        user_id: &str,
    ) -> WorkflowResult<GateReview> {
        let project_id = self.project_for_phase(phase_instance_id).await?;
        let (title, scope) = (title.to_string(), scope.to_string());
        let (change, _) = self
            .mutate_workflow("submit_for_review", project_id, user_id, move |wf, _, actor| {
                engine::submit_for_review(wf, phase_instance_id, &title, &scope, actor)
            })
            .await?;
        self.publish(Self::phase_events(&change));
        change
            .inserted_reviews
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::Storage(anyhow::anyhow!("review missing from committed change")))
    }

    pub async fn complete_review(
        &self,
        review_id: Uuid,
        outcome: ReviewOutcome,
        comments: &str,
        next_phase_allowed: bool,
        user_id: &str,
    ) -> WorkflowResult<GateReview> {
        let project_id = self.project_for_review(review_id).await?;
        let comments = comments.to_string();
        let (change, workflow) = self
            .mutate_workflow("complete_review", project_id, user_id, move |wf, _, actor| {
                engine::complete_review(wf, review_id, outcome, &comments, next_phase_allowed, actor)
            })
            .await?;
        self.publish(Self::phase_events(&change));
        review::get_review(&workflow, review_id)
    }

    /// Lock an approved phase and activate the next one.
    pub async fn activate_next_phase(
        &self,
        current_phase_id: Uuid,
        comments: &str,
        user_id: &str,
    ) -> WorkflowResult<Vec<PhaseView>> {
        let project_id = self.project_for_phase(current_phase_id).await?;
        let comments = comments.to_string();
        let (change, workflow) = self
            .mutate_workflow("activate_next_phase", project_id, user_id, move |wf, _, actor| {
                engine::activate_next_phase(wf, current_phase_id, &comments, actor)
            })
            .await?;
        self.publish(Self::phase_events(&change));
        Ok(workflow.views())
    }

    pub async fn request_transition(
        &self,
        project_id: i64,
        current_phase_id: Uuid,
        target_phase_id: Uuid,
        comments: &str,
        user_id: &str,
    ) -> WorkflowResult<Vec<PhaseView>> {
        let comments = comments.to_string();
        let (change, workflow) = self
            .mutate_workflow("request_transition", project_id, user_id, move |wf, _, actor| {
                engine::request_transition(wf, current_phase_id, target_phase_id, &comments, actor)
            })
            .await?;
        self.publish(Self::phase_events(&change));
        Ok(workflow.views())
    }

    pub async fn update_progress(
        &self,
        phase_instance_id: Uuid,
        percentage: u8,
        user_id: &str,
    ) -> WorkflowResult<PhaseInstance> {
        let project_id = self.project_for_phase(phase_instance_id).await?;
        let (change, workflow) = self
            .mutate_workflow("update_progress", project_id, user_id, move |wf, _, actor| {
                engine::update_progress(wf, phase_instance_id, percentage, actor)
            })
            .await?;
        self.publish(Self::phase_events(&change));
        workflow
            .phase(phase_instance_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("Phase instance", phase_instance_id))
    }

    // ── Gate reviews ──────────────────────────────────────────────────

    pub async fn active_reviews(&self, project_id: i64) -> WorkflowResult<Vec<GateReview>> {
        let workflow = self.load_workflow(project_id).await?;
        Ok(review::list_active_reviews(&workflow))
    }

    pub async fn review_history(&self, phase_instance_id: Uuid) -> WorkflowResult<Vec<GateReview>> {
        let project_id = self.project_for_phase(phase_instance_id).await?;
        let workflow = self.load_workflow(project_id).await?;
        review::review_history(&workflow, phase_instance_id)
    }

    pub async fn get_review(&self, review_id: Uuid) -> WorkflowResult<GateReview> {
        let project_id = self.project_for_review(review_id).await?;
        let workflow = self.load_workflow(project_id).await?;
        review::get_review(&workflow, review_id)
    }

    // ── Traceability ──────────────────────────────────────────────────

    async fn mutate_trace<F>(
        &self,
        operation: &'static str,
        project_id: i64,
        user_id: &str,
        plan: F,
    ) -> WorkflowResult<TraceChange>
    where
        F: FnOnce(&ProjectTrace, &Actor) -> WorkflowResult<TraceChange> + Send + 'static,
    {
        let actor = Self::actor(user_id)?;
        let _guard = self.locks.acquire(project_id).await?;

        let result = self
            .db
            .call(move |db| {
                let trace = db.load_trace(project_id)?;
                let change = plan(&trace, &actor)?;
                if !change.is_empty() {
                    db.commit_trace(&change)?;
                }
                Ok(change)
            })
            .await;

        match &result {
            Ok(change) => Self::log_commit(operation, &change.audit),
            Err(err) => Self::log_rejection(operation, project_id, err),
        }
        result
    }

    async fn load_trace(&self, project_id: i64) -> WorkflowResult<ProjectTrace> {
        debug!(project_id, "Loading trace snapshot");
        self.db.call(move |db| db.load_trace(project_id)).await
    }

    /// Register a traceability node; re-registration returns the stored one.
    pub async fn register_artifact(
        &self,
        project_id: i64,
        kind: ArtifactKind,
        artifact_id: &str,
        title: &str,
        user_id: &str,
    ) -> WorkflowResult<TraceArtifact> {
        let (id, title) = (artifact_id.to_string(), title.to_string());
        let change = self
            .mutate_trace("register_artifact", project_id, user_id, move |trace, actor| {
                trace::register_artifact(trace, kind, &id, &title, actor)
            })
            .await?;
        if let Some(artifact) = change.inserted_artifacts.into_iter().next() {
            self.publish(vec![WsMessage::ArtifactRegistered {
                artifact: artifact.clone(),
            }]);
            return Ok(artifact);
        }
        let node = ArtifactRef::new(kind, artifact_id.trim());
        self.load_trace(project_id)
            .await?
            .artifact(&node)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found("Artifact", node))
    }

    pub async fn add_link(
        &self,
        project_id: i64,
        source: ArtifactRef,
        target: ArtifactRef,
        link_type: LinkType,
        user_id: &str,
    ) -> WorkflowResult<TraceLink> {
        let change = self
            .mutate_trace("add_link", project_id, user_id, move |trace, actor| {
                trace::add_link(trace, source, target, link_type, actor)
            })
            .await?;
        let link = change
            .inserted_links
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::Storage(anyhow::anyhow!("link missing from committed change")))?;
        self.publish(vec![WsMessage::LinkAdded { link: link.clone() }]);
        Ok(link)
    }

    pub async fn deactivate_link(&self, link_id: Uuid, user_id: &str) -> WorkflowResult<TraceLink> {
        let project_id = self.db.call(move |db| db.project_for_link(link_id)).await?;
        let change = self
            .mutate_trace("deactivate_link", project_id, user_id, move |trace, actor| {
                trace::deactivate_link(trace, link_id, actor)
            })
            .await?;
        let link = change
            .updated_links
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::Storage(anyhow::anyhow!("link missing from committed change")))?;
        self.publish(vec![WsMessage::LinkDeactivated { link: link.clone() }]);
        Ok(link)
    }

    pub async fn links(&self, project_id: i64) -> WorkflowResult<Vec<TraceLink>> {
        Ok(self.load_trace(project_id).await?.links)
    }

    pub async fn traceability_matrix(&self, project_id: i64) -> WorkflowResult<TraceabilityMatrix> {
        Ok(self.load_trace(project_id).await?.matrix(Utc::now()))
    }

    pub async fn save_matrix_snapshot(&self, project_id: i64, user_id: &str) -> WorkflowResult<MatrixSnapshot> {
        let change = self
            .mutate_trace("save_matrix_snapshot", project_id, user_id, |trace, actor| {
                Ok(trace::snapshot_matrix(trace, actor))
            })
            .await?;
        let snapshot = change
            .inserted_snapshots
            .into_iter()
            .next()
            .ok_or_else(|| WorkflowError::Storage(anyhow::anyhow!("snapshot missing from committed change")))?;
        self.publish(vec![WsMessage::MatrixSnapshotSaved {
            project_id,
            snapshot_id: snapshot.id,
        }]);
        Ok(snapshot)
    }

    pub async fn matrix_snapshots(&self, project_id: i64) -> WorkflowResult<Vec<MatrixSnapshot>> {
        self.db.call(move |db| db.list_snapshots(project_id)).await
    }

    // ── Audit ─────────────────────────────────────────────────────────

    pub async fn audit_trail(&self, project_id: i64, filter: AuditFilter) -> WorkflowResult<Vec<AuditEntry>> {
        self.db
            .call(move |db| db.audit_trail(project_id, &filter))
            .await
    }

    /// Write the project's full audit trail to a JSON file with its digest.
    pub async fn export_audit(&self, project_id: i64, path: PathBuf) -> WorkflowResult<AuditExport> {
        let export = self
            .db
            .call(move |db| {
                let entries = db.audit_trail(project_id, &AuditFilter::default())?;
                let export = AuditExport::build(project_id, entries, Utc::now())?;
                export.write(&path)?;
                Ok(export)
            })
            .await?;
        info!(project_id, entries = export.entry_count, "Audit trail exported");
        Ok(export)
    }
}
