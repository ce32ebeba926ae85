//! Bottleneck detection.
//!
//! A bottleneck is a phase sitting under review. A blocked phase is one that
//! has not started because an earlier phase is not yet approved. The two are
//! reported separately and recomputed from the snapshot on every call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{PhaseStatus, ProjectWorkflow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleneckPhase {
    pub phase_instance_id: Uuid,
    pub phase_name: String,
    pub sort_order: i32,
    pub review_id: Option<Uuid>,
    pub review_title: Option<String>,
    /// Seconds since the open review was created.
    pub waiting_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedPhase {
    pub phase_instance_id: Uuid,
    pub phase_name: String,
    pub sort_order: i32,
    pub blocking_phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleneckReport {
    pub project_id: i64,
    pub active_bottlenecks: usize,
    pub bottleneck_phases: Vec<BottleneckPhase>,
    pub blocked_phases: Vec<BlockedPhase>,
    pub workflow_blocked: bool,
}

pub fn detect(workflow: &ProjectWorkflow, now: DateTime<Utc>) -> BottleneckReport {
    let bottleneck_phases: Vec<BottleneckPhase> = workflow
        .phases
        .iter()
        .filter(|p| p.status == PhaseStatus::UnderReview)
        .map(|p| {
            let review = workflow.open_review_for(p.id);
            BottleneckPhase {
                phase_instance_id: p.id,
                phase_name: p.phase_name.clone(),
                sort_order: p.sort_order,
                review_id: review.map(|r| r.id),
                review_title: review.map(|r| r.title.clone()),
                waiting_seconds: review
                    .map(|r| (now - r.created_at).num_seconds().max(0))
                    .unwrap_or(0),
            }
        })
        .collect();

    let blocked_phases = workflow
        .phases
        .iter()
        .enumerate()
        .filter(|(i, p)| p.status == PhaseStatus::NotStarted && !workflow.can_start(*i))
        .map(|(i, p)| BlockedPhase {
            phase_instance_id: p.id,
            phase_name: p.phase_name.clone(),
            sort_order: p.sort_order,
            blocking_phase: workflow.blocking_phase(i).map(|b| b.phase_name.clone()),
        })
        .collect();

    BottleneckReport {
        project_id: workflow.project_id,
        active_bottlenecks: bottleneck_phases.len(),
        workflow_blocked: !bottleneck_phases.is_empty(),
        bottleneck_phases,
        blocked_phases,
    }
}
