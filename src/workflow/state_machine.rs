//! Exhaustive transition tables for phase instances and gate reviews.

use super::models::{PhaseStatus, ReviewStatus};
use crate::errors::{WorkflowError, WorkflowResult};

/// Statuses a phase instance may move to from `from`.
pub fn allowed_transitions(from: PhaseStatus) -> &'static [PhaseStatus] {
    use PhaseStatus::*;
    match from {
        NotStarted => &[Active],
        Active => &[UnderReview],
        UnderReview => &[Approved, Active],
        Approved => &[Locked],
        Locked => &[],
    }
}

pub fn can_transition(from: PhaseStatus, to: PhaseStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn validate_transition(from: PhaseStatus, to: PhaseStatus) -> WorkflowResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition(format!(
            "phase cannot move from {} to {}",
            from, to
        )))
    }
}

pub fn allowed_review_transitions(from: ReviewStatus) -> &'static [ReviewStatus] {
    use ReviewStatus::*;
    match from {
        Scheduled => &[InProgress],
        InProgress => &[Completed],
        Completed => &[],
    }
}

pub fn validate_review_transition(from: ReviewStatus, to: ReviewStatus) -> WorkflowResult<()> {
    if allowed_review_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition(format!(
            "review cannot move from {} to {}",
            from, to
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PhaseStatus; 5] = [
        PhaseStatus::NotStarted,
        PhaseStatus::Active,
        PhaseStatus::UnderReview,
        PhaseStatus::Approved,
        PhaseStatus::Locked,
    ];

    #[test]
    fn test_forward_path_is_allowed() {
        use PhaseStatus::*;
        assert!(can_transition(NotStarted, Active));
        assert!(can_transition(Active, UnderReview));
        assert!(can_transition(UnderReview, Approved));
        assert!(can_transition(Approved, Locked));
    }

    #[test]
    fn test_rework_loop_is_the_only_backward_edge() {
        let rank = |s: PhaseStatus| ALL.iter().position(|x| *x == s).unwrap();
        for from in ALL {
            for to in allowed_transitions(from) {
                if rank(*to) < rank(from) {
                    assert_eq!((from, *to), (PhaseStatus::UnderReview, PhaseStatus::Active));
                }
            }
        }
    }

    #[test]
    fn test_locked_is_terminal() {
        assert!(allowed_transitions(PhaseStatus::Locked).is_empty());
        let err = validate_transition(PhaseStatus::Locked, PhaseStatus::Active).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[test]
    fn test_cannot_skip_review() {
        assert!(validate_transition(PhaseStatus::Active, PhaseStatus::Approved).is_err());
        assert!(validate_transition(PhaseStatus::NotStarted, PhaseStatus::UnderReview).is_err());
    }

    #[test]
    fn test_review_transitions() {
        assert!(validate_review_transition(ReviewStatus::Scheduled, ReviewStatus::InProgress).is_ok());
        assert!(validate_review_transition(ReviewStatus::InProgress, ReviewStatus::Completed).is_ok());
        assert!(validate_review_transition(ReviewStatus::Completed, ReviewStatus::InProgress).is_err());
    }
}
