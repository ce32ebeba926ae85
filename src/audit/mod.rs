//! Append-only activity/audit records.
//!
//! Every state transition the engine commits carries one or more
//! `AuditEntry` values. The store writes them in the same transaction as the
//! transition itself, so a transition without a trace cannot exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub mod export;
pub use export::AuditExport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Workflow,
    PhaseInstance,
    GateReview,
    TraceArtifact,
    TraceLink,
    MatrixSnapshot,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::PhaseInstance => "phase_instance",
            Self::GateReview => "gate_review",
            Self::TraceArtifact => "trace_artifact",
            Self::TraceLink => "trace_link",
            Self::MatrixSnapshot => "matrix_snapshot",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow" => Ok(Self::Workflow),
            "phase_instance" => Ok(Self::PhaseInstance),
            "gate_review" => Ok(Self::GateReview),
            "trace_artifact" => Ok(Self::TraceArtifact),
            "trace_link" => Ok(Self::TraceLink),
            "matrix_snapshot" => Ok(Self::MatrixSnapshot),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowInitialized,
    PhaseCreated,
    PhaseActivated,
    SubmittedForReview,
    ReviewOpened,
    ReviewCompleted,
    PhaseApproved,
    ReturnedForRework,
    PhaseLocked,
    ProgressUpdated,
    ArtifactRegistered,
    LinkAdded,
    LinkDeactivated,
    MatrixSnapshotSaved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowInitialized => "workflow_initialized",
            Self::PhaseCreated => "phase_created",
            Self::PhaseActivated => "phase_activated",
            Self::SubmittedForReview => "submitted_for_review",
            Self::ReviewOpened => "review_opened",
            Self::ReviewCompleted => "review_completed",
            Self::PhaseApproved => "phase_approved",
            Self::ReturnedForRework => "returned_for_rework",
            Self::PhaseLocked => "phase_locked",
            Self::ProgressUpdated => "progress_updated",
            Self::ArtifactRegistered => "artifact_registered",
            Self::LinkAdded => "link_added",
            Self::LinkDeactivated => "link_deactivated",
            Self::MatrixSnapshotSaved => "matrix_snapshot_saved",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_initialized" => Ok(Self::WorkflowInitialized),
            "phase_created" => Ok(Self::PhaseCreated),
            "phase_activated" => Ok(Self::PhaseActivated),
            "submitted_for_review" => Ok(Self::SubmittedForReview),
            "review_opened" => Ok(Self::ReviewOpened),
            "review_completed" => Ok(Self::ReviewCompleted),
            "phase_approved" => Ok(Self::PhaseApproved),
            "returned_for_rework" => Ok(Self::ReturnedForRework),
            "phase_locked" => Ok(Self::PhaseLocked),
            "progress_updated" => Ok(Self::ProgressUpdated),
            "artifact_registered" => Ok(Self::ArtifactRegistered),
            "link_added" => Ok(Self::LinkAdded),
            "link_deactivated" => Ok(Self::LinkDeactivated),
            "matrix_snapshot_saved" => Ok(Self::MatrixSnapshotSaved),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub project_id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl AuditEntry {
    pub fn new(
        project_id: i64,
        entity_type: EntityType,
        entity_id: impl ToString,
        action: AuditAction,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            entity_type,
            entity_id: entity_id.to_string(),
            action,
            previous_value: None,
            new_value: None,
            user_id: user_id.to_string(),
            timestamp,
            comments: None,
        }
    }

    /// Entry stamped with the actor's identity and clock.
    pub fn by(
        actor: &Actor,
        project_id: i64,
        entity_type: EntityType,
        entity_id: impl ToString,
        action: AuditAction,
    ) -> Self {
        Self::new(project_id, entity_type, entity_id, action, &actor.user_id, actor.at)
    }

    /// Attach the before/after values of the recorded change.
    pub fn values(mut self, previous: Option<&str>, new: Option<&str>) -> Self {
        self.previous_value = previous.map(str::to_string);
        self.new_value = new.map(str::to_string);
        self
    }

    /// Attach free-text comments; blank input is dropped.
    pub fn with_comments(mut self, comments: &str) -> Self {
        let trimmed = comments.trim();
        self.comments = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }
}

/// Who performs an operation, and the instant it is recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub at: DateTime<Utc>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::at(user_id, Utc::now())
    }

    pub fn at(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            at,
        }
    }
}

/// Narrows an audit trail query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_values_builder() {
        let entry = AuditEntry::new(
            7,
            EntityType::PhaseInstance,
            "abc",
            AuditAction::PhaseApproved,
            "qa.lead",
            Utc::now(),
        )
        .values(Some("under_review"), Some("approved"));
        assert_eq!(entry.previous_value.as_deref(), Some("under_review"));
        assert_eq!(entry.new_value.as_deref(), Some("approved"));
        assert_eq!(entry.entity_id, "abc");
    }

    #[test]
    fn test_blank_comments_are_dropped() {
        let actor = Actor::new("qa.lead");
        let entry = AuditEntry::by(&actor, 1, EntityType::Workflow, 1, AuditAction::PhaseLocked)
            .with_comments("   ");
        assert!(entry.comments.is_none());
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("comments").is_none());
        assert_eq!(json["userId"], "qa.lead");
    }

    #[test]
    fn test_action_strings_roundtrip() {
        for action in [
            AuditAction::WorkflowInitialized,
            AuditAction::ReturnedForRework,
            AuditAction::LinkDeactivated,
            AuditAction::MatrixSnapshotSaved,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()).unwrap(), action);
        }
        assert!(AuditAction::from_str("deleted").is_err());
    }


    #[test]
    fn test_entity_type_serializes_snake_case() {
        let json = serde_json::to_string(&EntityType::PhaseInstance).unwrap();
        assert_eq!(json, "\"phase_instance\"");
    }
}
