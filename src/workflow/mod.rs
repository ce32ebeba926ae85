//! Sequential phase-gated workflow.
//!
//! - `models`: phase instances, gate reviews, project snapshots
//! - `state_machine`: the allowed status transitions
//! - `engine`: validation and planning of every mutating operation
//! - `review`: gate review queries
//! - `bottleneck`: phases awaiting review and phases blocked by prerequisites

pub mod bottleneck;
pub mod engine;
pub mod models;
pub mod review;
pub mod state_machine;

pub use bottleneck::BottleneckReport;
pub use engine::WorkflowChange;
pub use models::{
    GateReview, PhaseInstance, PhaseStatus, PhaseView, ProjectWorkflow, ReviewOutcome,
    ReviewStatus, WorkflowSummary,
};
