//! Gate review coordinator queries.

use uuid::Uuid;

use super::models::{GateReview, ProjectWorkflow};
use crate::errors::{WorkflowError, WorkflowResult};

/// All in-progress reviews across the project's phases, in phase order.
pub fn list_active_reviews(workflow: &ProjectWorkflow) -> Vec<GateReview> {
    let mut active: Vec<GateReview> = workflow
        .reviews
        .iter()
        .filter(|r| r.is_open())
        .cloned()
        .collect();
    active.sort_by_key(|r| {
        let order = workflow.phase(r.phase_instance_id).map(|p| p.sort_order);
        (order, r.created_at)
    });
    active
}

/// Every review ever opened on a phase instance, oldest first.
pub fn review_history(
    workflow: &ProjectWorkflow,
    phase_instance_id: Uuid,
) -> WorkflowResult<Vec<GateReview>> {
    if workflow.phase(phase_instance_id).is_none() {
        return Err(WorkflowError::not_found("Phase instance", phase_instance_id));
    }
    let mut history: Vec<GateReview> = workflow
        .reviews
        .iter()
        .filter(|r| r.phase_instance_id == phase_instance_id)
        .cloned()
        .collect();
    history.sort_by_key(|r| r.created_at);
    Ok(history)
}

pub fn get_review(workflow: &ProjectWorkflow, review_id: Uuid) -> WorkflowResult<GateReview> {
    workflow
        .review(review_id)
        .cloned()
        .ok_or_else(|| WorkflowError::not_found("Gate review", review_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Actor;
    use crate::workflow::engine;
    use crate::workflow::models::fixtures::workflow;
    use crate::workflow::models::{PhaseStatus, ReviewOutcome};
    use chrono::{Duration, Utc};

    #[test]
    fn test_active_reviews_and_history() {
        let mut wf = workflow(&[("Planning", PhaseStatus::Active), ("Inputs", PhaseStatus::NotStarted)]);
        let phase_id = wf.phases[0].id;
        let t0 = Utc::now();

        let first = engine::submit_for_review(&wf, phase_id, "First", "", &Actor::at("a", t0)).unwrap();
        let first_id = first.inserted_reviews[0].id;
        first.apply_to(&mut wf);
        assert_eq!(list_active_reviews(&wf).len(), 1);

        engine::complete_review(&wf, first_id, ReviewOutcome::Rejected, "", true, &Actor::at("b", t0))
            .unwrap()
            .apply_to(&mut wf);
        assert!(list_active_reviews(&wf).is_empty());

        let later = Actor::at("a", t0 + Duration::minutes(5));
        engine::submit_for_review(&wf, phase_id, "Second", "", &later)
            .unwrap()
            .apply_to(&mut wf);

        let history = review_history(&wf, phase_id).unwrap();
        let titles: Vec<&str> = history.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(list_active_reviews(&wf)[0].title, "Second");
        assert_eq!(get_review(&wf, first_id).unwrap().reviewed_by.as_deref(), Some("b"));
    }

    #[test]
    fn test_history_for_unknown_phase_is_not_found() {
        let wf = workflow(&[("Planning", PhaseStatus::Active)]);
        assert!(matches!(
            review_history(&wf, Uuid::new_v4()),
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(get_review(&wf, Uuid::new_v4()).is_err());
    }
}
