use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    Active,
    UnderReview,
    Approved,
    Locked,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Locked => "locked",
        }
    }

    /// Approved or locked: the phase no longer holds back its successors.
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Approved | Self::Locked)
    }

    /// Active or under review: the project's single in-flight phase.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Active | Self::UnderReview)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "active" => Ok(Self::Active),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "locked" => Ok(Self::Locked),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid review status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    Rejected,
    Pending,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "pending" => Ok(Self::Pending),
            _ => Err(format!("Invalid review outcome: {}", s)),
        }
    }
}

/// Per-project materialization of one phase definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseInstance {
    pub id: Uuid,
    pub project_id: i64,
    pub phase_definition_id: String,
    pub phase_name: String,
    pub sort_order: i32,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Weak reference to the review currently attached to this phase.
    pub review_id: Option<Uuid>,
    pub completion_percentage: u8,
}

/// A formal review of one phase instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReview {
    pub id: Uuid,
    pub project_id: i64,
    pub phase_instance_id: Uuid,
    pub title: String,
    pub scope: String,
    pub status: ReviewStatus,
    pub outcome: ReviewOutcome,
    pub comments: String,
    pub next_phase_allowed: bool,
    pub opened_by: String,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl GateReview {
    pub fn is_open(&self) -> bool {
        self.status == ReviewStatus::InProgress
    }
}

/// Consistent snapshot of one project's workflow state.
///
/// `phases` is always sorted by `sort_order`. `revision` is the store
/// revision the snapshot was read at; commits planned from it carry it back
/// for the optimistic check.
#[derive(Debug, Clone)]
pub struct ProjectWorkflow {
    pub project_id: i64,
    pub revision: i64,
    pub phases: Vec<PhaseInstance>,
    pub reviews: Vec<GateReview>,
}

impl ProjectWorkflow {
    pub fn empty(project_id: i64) -> Self {
        Self {
            project_id,
            revision: 0,
            phases: Vec::new(),
            reviews: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.phases.is_empty()
    }

    pub fn phase_index(&self, phase_instance_id: Uuid) -> Option<usize> {
        self.phases.iter().position(|p| p.id == phase_instance_id)
    }

    pub fn phase(&self, phase_instance_id: Uuid) -> Option<&PhaseInstance> {
        self.phases.iter().find(|p| p.id == phase_instance_id)
    }

    pub fn review(&self, review_id: Uuid) -> Option<&GateReview> {
        self.reviews.iter().find(|r| r.id == review_id)
    }

    /// The in-progress review for a phase instance, if any.
    pub fn open_review_for(&self, phase_instance_id: Uuid) -> Option<&GateReview> {
        self.reviews
            .iter()
            .find(|r| r.phase_instance_id == phase_instance_id && r.is_open())
    }

    /// Derived "current phase": the instance that is active or under review.
    pub fn current_phase(&self) -> Option<&PhaseInstance> {
        self.phases.iter().find(|p| p.status.is_in_flight())
    }

    /// True iff every phase ordered before `index` is approved or locked.
    pub fn can_start(&self, index: usize) -> bool {
        self.phases[..index.min(self.phases.len())]
            .iter()
            .all(|p| p.status.is_cleared())
    }

    /// The nearest earlier phase that is not yet approved or locked.
    pub fn blocking_phase(&self, index: usize) -> Option<&PhaseInstance> {
        self.phases[..index.min(self.phases.len())]
            .iter()
            .rev()
            .find(|p| !p.status.is_cleared())
    }

    /// Phase views with the derived gating fields.
    pub fn views(&self) -> Vec<PhaseView> {
        self.phases
            .iter()
            .enumerate()
            .map(|(index, phase)| {
                let can_start = self.can_start(index);
                PhaseView {
                    phase: phase.clone(),
                    can_start,
                    is_blocked: phase.status == PhaseStatus::NotStarted && !can_start,
                    blocking_phase: self.blocking_phase(index).map(|p| p.phase_name.clone()),
                }
            })
            .collect()
    }

    /// Average completion across all phases, 0 when uninitialized.
    pub fn overall_progress(&self) -> u8 {
        if self.phases.is_empty() {
            return 0;
        }
        let total: u32 = self
            .phases
            .iter()
            .map(|p| u32::from(p.completion_percentage))
            .sum();
        let count = self.phases.len() as u32;
        ((total + count / 2) / count) as u8
    }
}

/// Phase instance plus the gating fields the UI needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseView {
    #[serde(flatten)]
    pub phase: PhaseInstance,
    pub can_start: bool,
    pub is_blocked: bool,
    pub blocking_phase: Option<String>,
}

/// Project-level summary: the derived current phase and overall progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub project_id: i64,
    pub initialized: bool,
    pub current_phase: Option<PhaseInstance>,
    pub overall_progress: u8,
    pub approved_phases: usize,
    pub total_phases: usize,
}

impl From<&ProjectWorkflow> for WorkflowSummary {
    fn from(workflow: &ProjectWorkflow) -> Self {
        Self {
            project_id: workflow.project_id,
            initialized: workflow.is_initialized(),
            current_phase: workflow.current_phase().cloned(),
            overall_progress: workflow.overall_progress(),
            approved_phases: workflow
                .phases
                .iter()
                .filter(|p| p.status.is_cleared())
                .count(),
            total_phases: workflow.phases.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn phase(project_id: i64, name: &str, sort_order: i32, status: PhaseStatus) -> PhaseInstance {
        PhaseInstance {
            id: Uuid::new_v4(),
            project_id,
            phase_definition_id: name.to_lowercase().replace(' ', "_"),
            phase_name: name.to_string(),
            sort_order,
            status,
            started_at: None,
            completed_at: None,
            review_id: None,
            completion_percentage: 0,
        }
    }

    pub fn workflow(statuses: &[(&str, PhaseStatus)]) -> ProjectWorkflow {
        ProjectWorkflow {
            project_id: 1,
            revision: 1,
            phases: statuses
                .iter()
                .enumerate()
                .map(|(i, (name, status))| phase(1, name, i as i32 + 1, *status))
                .collect(),
            reviews: Vec::new(),
        }
    }
}
