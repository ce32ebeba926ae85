//! Design-control traceability.
//!
//! Artifacts (user needs, design inputs and outputs, verification and
//! validation records) are registered per project and joined by typed,
//! directed links. Planning functions here validate a request against a
//! `ProjectTrace` snapshot and return the `TraceChange` to commit.

pub mod graph;
pub mod matrix;
pub mod models;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{Actor, AuditAction, AuditEntry, EntityType};
use crate::errors::{WorkflowError, WorkflowResult};

pub use graph::TraceGraph;
pub use matrix::{MatrixSnapshot, TraceabilityMatrix};
pub use models::{ArtifactKind, ArtifactRef, LinkType, TraceArtifact, TraceLink};

/// Consistent snapshot of one project's traceability records.
#[derive(Debug, Clone)]
pub struct ProjectTrace {
    pub project_id: i64,
    pub revision: i64,
    pub artifacts: Vec<TraceArtifact>,
    pub links: Vec<TraceLink>,
}

impl ProjectTrace {
    pub fn empty(project_id: i64) -> Self {
        Self {
            project_id,
            revision: 0,
            artifacts: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn artifact(&self, node: &ArtifactRef) -> Option<&TraceArtifact> {
        self.artifacts
            .iter()
            .find(|a| a.kind == node.kind && a.artifact_id == node.id)
    }

    pub fn link(&self, link_id: Uuid) -> Option<&TraceLink> {
        self.links.iter().find(|l| l.id == link_id)
    }

    pub fn active_links(&self) -> impl Iterator<Item = &TraceLink> {
        self.links.iter().filter(|l| l.active)
    }

    pub fn graph(&self) -> TraceGraph {
        TraceGraph::build(&self.artifacts, &self.links)
    }

    pub fn matrix(&self, now: DateTime<Utc>) -> TraceabilityMatrix {
        matrix::generate(self.project_id, &self.graph(), now)
    }
}

/// The writes one traceability operation makes.
#[derive(Debug, Clone, Default)]
pub struct TraceChange {
    pub project_id: i64,
    pub expected_revision: i64,
    pub inserted_artifacts: Vec<TraceArtifact>,
    pub inserted_links: Vec<TraceLink>,
    pub updated_links: Vec<TraceLink>,
    pub inserted_snapshots: Vec<MatrixSnapshot>,
    pub audit: Vec<AuditEntry>,
}

impl TraceChange {
    fn for_trace(trace: &ProjectTrace) -> Self {
        Self {
            project_id: trace.project_id,
            expected_revision: trace.revision,
            ..Default::default()
        }
    }

    /// Nothing to write, e.g. an artifact registered a second time.
    pub fn is_empty(&self) -> bool {
        self.inserted_artifacts.is_empty()
            && self.inserted_links.is_empty()
            && self.updated_links.is_empty()
            && self.inserted_snapshots.is_empty()
    }

    pub fn apply_to(&self, trace: &mut ProjectTrace) {
        trace.artifacts.extend(self.inserted_artifacts.iter().cloned());
        for link in &self.updated_links {
            if let Some(existing) = trace.links.iter_mut().find(|l| l.id == link.id) {
                *existing = link.clone();
            }
        }
        trace.links.extend(self.inserted_links.iter().cloned());
        trace.revision += 1;
    }
}

/// Register a node. Registering an existing (kind, id) changes nothing.
pub fn register_artifact(
    trace: &ProjectTrace,
    kind: ArtifactKind,
    artifact_id: &str,
    title: &str,
    actor: &Actor,
) -> WorkflowResult<TraceChange> {
    let artifact_id = artifact_id.trim();
    if artifact_id.is_empty() {
        return Err(WorkflowError::InvalidInput(
            "artifact id must not be empty".to_string(),
        ));
    }
    let mut change = TraceChange::for_trace(trace);
    if trace.artifact(&ArtifactRef::new(kind, artifact_id)).is_some() {
        return Ok(change);
    }

    let artifact = TraceArtifact {
        project_id: trace.project_id,
        kind,
        artifact_id: artifact_id.to_string(),
        title: title.trim().to_string(),
        registered_at: actor.at,
    };
    change.audit.push(
        AuditEntry::by(
            actor,
            trace.project_id,
            EntityType::TraceArtifact,
            artifact.reference(),
            AuditAction::ArtifactRegistered,
        )
        .values(None, Some(&artifact.title)),
    );
    change.inserted_artifacts.push(artifact);
    Ok(change)
}

/// Add a directed link after endpoint, type, duplicate and cycle checks.
pub fn add_link(
    trace: &ProjectTrace,
    source: ArtifactRef,
    target: ArtifactRef,
    link_type: LinkType,
    actor: &Actor,
) -> WorkflowResult<TraceChange> {
    for node in [&source, &target] {
        if trace.artifact(node).is_none() {
            return Err(WorkflowError::not_found("Artifact", node));
        }
    }
    link_type.validate_endpoints(source.kind, target.kind)?;

    if trace
        .active_links()
        .any(|l| l.source == source && l.target == target && l.link_type == link_type)
    {
        return Err(WorkflowError::DuplicateLink {
            source_ref: source.to_string(),
            target_ref: target.to_string(),
            link_type: link_type.to_string(),
        });
    }
    if trace.graph().would_create_cycle(&source, &target) {
        return Err(WorkflowError::CycleDetected {
            source_ref: source.to_string(),
            target_ref: target.to_string(),
        });
    }

    let link = TraceLink {
        id: Uuid::new_v4(),
        project_id: trace.project_id,
        source,
        target,
        link_type,
        active: true,
        created_by: actor.user_id.clone(),
        created_at: actor.at,
        deactivated_at: None,
    };
    let mut change = TraceChange::for_trace(trace);
    change.audit.push(
        AuditEntry::by(
            actor,
            trace.project_id,
            EntityType::TraceLink,
            link.id,
            AuditAction::LinkAdded,
        )
        .values(
            None,
            Some(&format!("{} {} {}", link.source, link.link_type, link.target)),
        ),
    );
    change.inserted_links.push(link);
    Ok(change)
}

/// Deactivate an active link. Links are never deleted.
pub fn deactivate_link(trace: &ProjectTrace, link_id: Uuid, actor: &Actor) -> WorkflowResult<TraceChange> {
    let existing = trace
        .link(link_id)
        .ok_or_else(|| WorkflowError::not_found("Trace link", link_id))?;
    if !existing.active {
        return Err(WorkflowError::InvalidTransition(format!(
            "link {} is already inactive",
            link_id
        )));
    }

    let mut link = existing.clone();
    link.active = false;
    link.deactivated_at = Some(actor.at);

    let mut change = TraceChange::for_trace(trace);
    change.audit.push(
        AuditEntry::by(
            actor,
            trace.project_id,
            EntityType::TraceLink,
            link.id,
            AuditAction::LinkDeactivated,
        )
        .values(Some("active"), Some("inactive")),
    );
    change.updated_links.push(link);
    Ok(change)
}

/// Generate the current matrix and record it as a snapshot.
pub fn snapshot_matrix(trace: &ProjectTrace, actor: &Actor) -> TraceChange {
    let snapshot = MatrixSnapshot {
        id: Uuid::new_v4(),
        project_id: trace.project_id,
        created_by: actor.user_id.clone(),
        created_at: actor.at,
        matrix: trace.matrix(actor.at),
    };
    let mut change = TraceChange::for_trace(trace);
    change.audit.push(
        AuditEntry::by(
            actor,
            trace.project_id,
            EntityType::MatrixSnapshot,
            snapshot.id,
            AuditAction::MatrixSnapshotSaved,
        )
        .values(None, Some(&format!("{} rows", snapshot.matrix.matrix_data.len()))),
    );
    change.inserted_snapshots.push(snapshot);
    change
}
