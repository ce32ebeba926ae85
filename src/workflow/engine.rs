//! Planning of every mutating workflow operation.
//!
//! Each function validates an operation against a `ProjectWorkflow` snapshot
//! and returns the `WorkflowChange` that carries it out, audit entries
//! included. Nothing here touches storage; the store commits a change
//! atomically against the revision it was planned from.

use uuid::Uuid;

use super::models::{
    GateReview, PhaseInstance, PhaseStatus, ProjectWorkflow, ReviewOutcome, ReviewStatus,
};
use super::state_machine::{validate_review_transition, validate_transition};
use crate::audit::{Actor, AuditAction, AuditEntry, EntityType};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::phase::PhaseRegistry;

/// The writes one operation makes, committed as a single unit.
#[derive(Debug, Clone, Default)]
pub struct WorkflowChange {
    pub project_id: i64,
    /// Workflow revision the change was planned against.
    pub expected_revision: i64,
    pub inserted_phases: Vec<PhaseInstance>,
    pub updated_phases: Vec<PhaseInstance>,
    pub inserted_reviews: Vec<GateReview>,
    pub updated_reviews: Vec<GateReview>,
    pub audit: Vec<AuditEntry>,
}

impl WorkflowChange {
    fn for_workflow(workflow: &ProjectWorkflow) -> Self {
        Self {
            project_id: workflow.project_id,
            expected_revision: workflow.revision,
            ..Default::default()
        }
    }

    /// Apply the change to an in-memory snapshot, as a commit would.
    pub fn apply_to(&self, workflow: &mut ProjectWorkflow) {
        for phase in &self.updated_phases {
            if let Some(existing) = workflow.phases.iter_mut().find(|p| p.id == phase.id) {
                *existing = phase.clone();
            }
        }
        workflow.phases.extend(self.inserted_phases.iter().cloned());
        workflow.phases.sort_by_key(|p| p.sort_order);

        for review in &self.updated_reviews {
            if let Some(existing) = workflow.reviews.iter_mut().find(|r| r.id == review.id) {
                *existing = review.clone();
            }
        }
        workflow.reviews.extend(self.inserted_reviews.iter().cloned());
        workflow.revision += 1;
    }
}

fn phase_at(workflow: &ProjectWorkflow, phase_instance_id: Uuid) -> WorkflowResult<usize> {
    workflow
        .phase_index(phase_instance_id)
        .ok_or_else(|| WorkflowError::not_found("Phase instance", phase_instance_id))
}

fn status_entry(
    actor: &Actor,
    phase: &PhaseInstance,
    action: AuditAction,
    from: PhaseStatus,
) -> AuditEntry {
    AuditEntry::by(actor, phase.project_id, EntityType::PhaseInstance, phase.id, action)
        .values(Some(from.as_str()), Some(phase.status.as_str()))
}

/// Create one instance per registered phase; the entry phase starts active.
pub fn initialize(
    workflow: &ProjectWorkflow,
    registry: &PhaseRegistry,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    if workflow.is_initialized() {
        return Err(WorkflowError::AlreadyInitialized {
            project_id: workflow.project_id,
        });
    }

    let mut change = WorkflowChange::for_workflow(workflow);
    change.audit.push(
        AuditEntry::by(
            actor,
            workflow.project_id,
            EntityType::Workflow,
            workflow.project_id,
            AuditAction::WorkflowInitialized,
        )
        .values(None, Some(&format!("{} phases", registry.len()))),
    );

    for (index, definition) in registry.phases().iter().enumerate() {
        let mut phase = PhaseInstance {
            id: Uuid::new_v4(),
            project_id: workflow.project_id,
            phase_definition_id: definition.id.clone(),
            phase_name: definition.name.clone(),
            sort_order: definition.sort_order,
            status: PhaseStatus::NotStarted,
            started_at: None,
            completed_at: None,
            review_id: None,
            completion_percentage: 0,
        };
        change.audit.push(
            AuditEntry::by(
                actor,
                workflow.project_id,
                EntityType::PhaseInstance,
                phase.id,
                AuditAction::PhaseCreated,
            )
            .values(None, Some(phase.status.as_str())),
        );

        if index == 0 {
            validate_transition(phase.status, PhaseStatus::Active)?;
            phase.status = PhaseStatus::Active;
            phase.started_at = Some(actor.at);
            change
                .audit
                .push(status_entry(actor, &phase, AuditAction::PhaseActivated, PhaseStatus::NotStarted));
        }
        change.inserted_phases.push(phase);
    }

    Ok(change)
}

/// Open a gate review on an active phase and move the phase under review.
pub fn submit_for_review(
    workflow: &ProjectWorkflow,
    phase_instance_id: Uuid,
    title: &str,
    scope: &str,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    let index = phase_at(workflow, phase_instance_id)?;
    let current = &workflow.phases[index];

    if let Some(open) = workflow.open_review_for(phase_instance_id) {
        return Err(WorkflowError::ReviewAlreadyOpen {
            phase_instance_id: phase_instance_id.to_string(),
            review_id: open.id.to_string(),
        });
    }
    if current.status != PhaseStatus::Active {
        return Err(WorkflowError::InvalidTransition(format!(
            "phase '{}' is {}; only an active phase can be submitted for review",
            current.phase_name, current.status
        )));
    }
    if title.trim().is_empty() {
        return Err(WorkflowError::InvalidInput(
            "review title must not be empty".to_string(),
        ));
    }
    validate_transition(current.status, PhaseStatus::UnderReview)?;

    let mut review = GateReview {
        id: Uuid::new_v4(),
        project_id: workflow.project_id,
        phase_instance_id,
        title: title.trim().to_string(),
        scope: scope.trim().to_string(),
        status: ReviewStatus::Scheduled,
        outcome: ReviewOutcome::Pending,
        comments: String::new(),
        next_phase_allowed: false,
        opened_by: actor.user_id.clone(),
        reviewed_by: None,
        created_at: actor.at,
        reviewed_at: None,
    };
    validate_review_transition(review.status, ReviewStatus::InProgress)?;
    review.status = ReviewStatus::InProgress;

    let mut phase = current.clone();
    phase.status = PhaseStatus::UnderReview;
    phase.review_id = Some(review.id);

    let mut change = WorkflowChange::for_workflow(workflow);
    change
        .audit
        .push(status_entry(actor, &phase, AuditAction::SubmittedForReview, current.status));
    change.audit.push(
        AuditEntry::by(
            actor,
            workflow.project_id,
            EntityType::GateReview,
            review.id,
            AuditAction::ReviewOpened,
        )
        .values(None, Some(review.status.as_str()))
        .with_comments(&review.title),
    );
    change.updated_phases.push(phase);
    change.inserted_reviews.push(review);
    Ok(change)
}

/// Resolve an in-progress review into an approval or a rework loop.
pub fn complete_review(
    workflow: &ProjectWorkflow,
    review_id: Uuid,
    outcome: ReviewOutcome,
    comments: &str,
    next_phase_allowed: bool,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    let existing = workflow
        .review(review_id)
        .ok_or_else(|| WorkflowError::not_found("Gate review", review_id))?;

    validate_review_transition(existing.status, ReviewStatus::Completed)?;
    let target = match outcome {
        ReviewOutcome::Approved => PhaseStatus::Approved,
        ReviewOutcome::Rejected => PhaseStatus::Active,
        ReviewOutcome::Pending => {
            return Err(WorkflowError::InvalidTransition(
                "a review cannot be completed with outcome pending".to_string(),
            ));
        }
    };

    let index = phase_at(workflow, existing.phase_instance_id)?;
    let current = &workflow.phases[index];
    validate_transition(current.status, target)?;

    let mut review = existing.clone();
    review.status = ReviewStatus::Completed;
    review.outcome = outcome;
    review.comments = comments.trim().to_string();
    review.next_phase_allowed = outcome == ReviewOutcome::Approved && next_phase_allowed;
    review.reviewed_by = Some(actor.user_id.clone());
    review.reviewed_at = Some(actor.at);

    let mut phase = current.clone();
    phase.status = target;
    let action = match outcome {
        ReviewOutcome::Approved => {
            phase.completed_at = Some(actor.at);
            phase.completion_percentage = 100;
            AuditAction::PhaseApproved
        }
        _ => {
            phase.review_id = None;
            AuditAction::ReturnedForRework
        }
    };

    let mut change = WorkflowChange::for_workflow(workflow);
    change.audit.push(
        AuditEntry::by(
            actor,
            workflow.project_id,
            EntityType::GateReview,
            review.id,
            AuditAction::ReviewCompleted,
        )
        .values(Some(existing.status.as_str()), Some(outcome.as_str()))
        .with_comments(comments),
    );
    change
        .audit
        .push(status_entry(actor, &phase, action, current.status));
    change.updated_phases.push(phase);
    change.updated_reviews.push(review);
    Ok(change)
}

/// Lock an approved phase and start its successor.
pub fn activate_next_phase(
    workflow: &ProjectWorkflow,
    current_phase_id: Uuid,
    comments: &str,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    let index = phase_at(workflow, current_phase_id)?;
    let current = &workflow.phases[index];

    if current.status != PhaseStatus::Approved {
        return Err(WorkflowError::SequenceViolation {
            blocking_phase: current.phase_name.clone(),
        });
    }
    let next = workflow.phases.get(index + 1).ok_or_else(|| {
        WorkflowError::InvalidTransition(format!(
            "phase '{}' is the final phase; there is no next phase to activate",
            current.phase_name
        ))
    })?;

    let approving = current.review_id.and_then(|id| workflow.review(id));
    if approving.is_some_and(|r| !r.next_phase_allowed) {
        return Err(WorkflowError::SequenceViolation {
            blocking_phase: current.phase_name.clone(),
        });
    }
    if next.status != PhaseStatus::NotStarted {
        return Err(WorkflowError::SequenceViolation {
            blocking_phase: next.phase_name.clone(),
        });
    }
    if !workflow.can_start(index + 1) {
        let blocking = workflow
            .blocking_phase(index + 1)
            .map(|p| p.phase_name.clone())
            .unwrap_or_else(|| current.phase_name.clone());
        return Err(WorkflowError::SequenceViolation {
            blocking_phase: blocking,
        });
    }
    validate_transition(current.status, PhaseStatus::Locked)?;
    validate_transition(next.status, PhaseStatus::Active)?;

    let mut locked = current.clone();
    locked.status = PhaseStatus::Locked;
    let mut activated = next.clone();
    activated.status = PhaseStatus::Active;
    activated.started_at = Some(actor.at);

    let mut change = WorkflowChange::for_workflow(workflow);
    change.audit.push(
        status_entry(actor, &locked, AuditAction::PhaseLocked, current.status).with_comments(comments),
    );
    change.audit.push(
        status_entry(actor, &activated, AuditAction::PhaseActivated, next.status)
            .with_comments(comments),
    );
    change.updated_phases.push(locked);
    change.updated_phases.push(activated);
    Ok(change)
}

/// Explicit transition request: the target must be the immediate successor.
pub fn request_transition(
    workflow: &ProjectWorkflow,
    current_phase_id: Uuid,
    target_phase_id: Uuid,
    comments: &str,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    let index = phase_at(workflow, current_phase_id)?;
    let target_index = phase_at(workflow, target_phase_id)?;
    if target_index != index + 1 {
        return Err(WorkflowError::SequenceViolation {
            blocking_phase: workflow.phases[index].phase_name.clone(),
        });
    }
    activate_next_phase(workflow, current_phase_id, comments, actor)
}

/// Record work progress on the active phase.
pub fn update_progress(
    workflow: &ProjectWorkflow,
    phase_instance_id: Uuid,
    percentage: u8,
    actor: &Actor,
) -> WorkflowResult<WorkflowChange> {
    if percentage > 100 {
        return Err(WorkflowError::InvalidInput(format!(
            "completion percentage must be between 0 and 100, got {}",
            percentage
        )));
    }
    let index = phase_at(workflow, phase_instance_id)?;
    let current = &workflow.phases[index];
    if current.status != PhaseStatus::Active {
        return Err(WorkflowError::InvalidTransition(format!(
            "progress can only be recorded on an active phase; '{}' is {}",
            current.phase_name, current.status
        )));
    }

    let mut phase = current.clone();
    phase.completion_percentage = percentage;

    let mut change = WorkflowChange::for_workflow(workflow);
    change.audit.push(
        AuditEntry::by(
            actor,
            workflow.project_id,
            EntityType::PhaseInstance,
            phase.id,
            AuditAction::ProgressUpdated,
        )
        .values(
            Some(&current.completion_percentage.to_string()),
            Some(&percentage.to_string()),
        ),
    );
    change.updated_phases.push(phase);
    Ok(change)
}
