//! Typed error taxonomy for the workflow engine.
//!
//! Every engine operation returns `WorkflowError`. All variants are
//! recoverable by the caller (retry or user correction); none are raised as
//! panics. Application glue (CLI, config, server bootstrap) keeps using
//! `anyhow` and wraps these where needed.

use thiserror::Error;

/// Errors from workflow, gate review, and traceability operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow already initialized for project {project_id}")]
    AlreadyInitialized { project_id: i64 },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Sequence violation: blocked by phase '{blocking_phase}'")]
    SequenceViolation { blocking_phase: String },

    #[error("Review {review_id} is already open for phase instance {phase_instance_id}")]
    ReviewAlreadyOpen {
        phase_instance_id: String,
        review_id: String,
    },

    #[error("Link {source_ref} -> {target_ref} would create a cycle")]
    CycleDetected {
        source_ref: String,
        target_ref: String,
    },

    #[error("Concurrent modification of {scope} state for project {project_id}; retry the operation")]
    ConcurrentModification { project_id: i64, scope: String },

    #[error("Audit write failed, transition rolled back: {0}")]
    AuditWriteFailure(#[source] anyhow::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("An active {link_type} link {source_ref} -> {target_ref} already exists")]
    DuplicateLink {
        source_ref: String,
        target_ref: String,
        link_type: String,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable snake_case name of the variant, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized { .. } => "already_initialized",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::SequenceViolation { .. } => "sequence_violation",
            Self::ReviewAlreadyOpen { .. } => "review_already_open",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::AuditWriteFailure(_) => "audit_write_failure",
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidLink(_) => "invalid_link",
            Self::DuplicateLink { .. } => "duplicate_link",
            Self::LockPoisoned => "lock_poisoned",
            Self::Storage(_) => "storage",
        }
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
