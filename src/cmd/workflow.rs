//! Workflow commands: init, phases, status, bottlenecks, reviews and advancement.

use anyhow::{Context, Result};
use console::{StyledObject, style};
use uuid::Uuid;

use phasegate::workflow::{
    BottleneckReport, GateReview, PhaseInstance, PhaseStatus, PhaseView, ReviewOutcome,
    WorkflowSummary,
};

use super::{CmdContext, parse_arg};

fn status_style(status: PhaseStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        PhaseStatus::NotStarted => s.dim(),
        PhaseStatus::Active => s.cyan().bold(),
        PhaseStatus::UnderReview => s.yellow().bold(),
        PhaseStatus::Approved => s.green(),
        PhaseStatus::Locked => s.green().dim(),
    }
}

fn print_phase_table(phases: &[PhaseView]) {
    println!();
    println!(
        "{:<6} {:<28} {:<14} {:<6} {:<38} Gate",
        "Order", "Phase", "Status", "Done", "Instance"
    );
    println!(
        "{:<6} {:<28} {:<14} {:<6} {:<38} ----",
        "-----", "----------------------------", "------------", "----", "--------------------------------------"
    );
    for view in phases {
        let phase = &view.phase;
        let gate = match (&view.blocking_phase, view.can_start) {
            (Some(blocker), _) => style(format!("blocked by {}", blocker)).red().to_string(),
            (None, true) => style("open").green().to_string(),
            (None, false) => String::new(),
        };
        println!(
            "{:<6} {:<28} {:<14} {:>4}%  {:<38} {}",
            phase.sort_order,
            phase.phase_name,
            status_style(phase.status),
            phase.completion_percentage,
            phase.id,
            gate
        );
    }
    println!();
}

fn print_review(review: &GateReview) {
    println!();
    println!("{} {}", style("Review").bold(), review.id);
    println!("  Title:    {}", review.title);
    if !review.scope.is_empty() {
        println!("  Scope:    {}", review.scope);
    }
    println!("  Status:   {}", review.status);
    let outcome = match review.outcome {
        ReviewOutcome::Approved => style(review.outcome.as_str()).green(),
        ReviewOutcome::Rejected => style(review.outcome.as_str()).red(),
        ReviewOutcome::Pending => style(review.outcome.as_str()).dim(),
    };
    println!("  Outcome:  {}", outcome);
    if !review.comments.is_empty() {
        println!("  Comments: {}", review.comments);
    }
    if let Some(reviewer) = &review.reviewed_by {
        println!("  Reviewer: {}", reviewer);
    }
    println!();
}

pub async fn cmd_init(ctx: &CmdContext, project: i64) -> Result<()> {
    let service = ctx.service()?;
    let user = ctx.user()?;
    let phases = service.initialize_workflow(project, &user).await?;
    ctx.emit(&phases, |phases| {
        println!();
        println!(
            "{} workflow for project {} ({} phases)",
            style("Initialized").green().bold(),
            project,
            phases.len()
        );
        print_phase_table(phases);
    })
}

pub async fn cmd_phases(ctx: &CmdContext, project: i64) -> Result<()> {
    let phases = ctx.service()?.phases(project).await?;
    ctx.emit(&phases, |phases| print_phase_table(phases))
}

pub async fn cmd_status(ctx: &CmdContext, project: i64) -> Result<()> {
    let summary = ctx.service()?.summary(project).await?;
    ctx.emit(&summary, |summary: &WorkflowSummary| {
        println!();
        println!("{}", style(format!("Project {}", summary.project_id)).bold().cyan());
        if !summary.initialized {
            println!("Workflow: not initialized (run 'phasegate init {}')", summary.project_id);
            println!();
            return;
        }
        match &summary.current_phase {
            Some(phase) => println!(
                "Current:  {} ({})",
                phase.phase_name,
                status_style(phase.status)
            ),
            None => println!("Current:  none"),
        }
        println!(
            "Progress: {}% ({}/{} phases cleared)",
            summary.overall_progress, summary.approved_phases, summary.total_phases
        );
        println!();
    })
}

pub async fn cmd_bottlenecks(ctx: &CmdContext, project: i64) -> Result<()> {
    let report = ctx.service()?.bottlenecks(project).await?;
    ctx.emit(&report, |report: &BottleneckReport| {
        println!();
        if report.bottleneck_phases.is_empty() {
            println!("{}", style("No phases waiting on review.").green());
        } else {
            println!("{}", style("Waiting on review").yellow().bold());
            for b in &report.bottleneck_phases {
                println!(
                    "  {:<28} {:<32} {}h waiting",
                    b.phase_name,
                    b.review_title.as_deref().unwrap_or("-"),
                    b.waiting_seconds / 3600
                );
            }
        }
        if !report.blocked_phases.is_empty() {
            println!();
            println!("{}", style("Blocked by prerequisites").red().bold());
            for b in &report.blocked_phases {
                println!(
                    "  {:<28} blocked by {}",
                    b.phase_name,
                    b.blocking_phase.as_deref().unwrap_or("-")
                );
            }
        }
        println!();
        println!("Workflow blocked: {}", report.workflow_blocked);
        println!();
    })
}

pub async fn cmd_submit(ctx: &CmdContext, phase: Uuid, title: &str, scope: &str) -> Result<()> {
    let service = ctx.service()?;
    let user = ctx.user()?;
    let review = service.submit_for_review(phase, title, scope, &user).await?;
    ctx.emit(&review, print_review)
}

pub async fn cmd_review(
    ctx: &CmdContext,
    review: Uuid,
    outcome: &str,
    comments: &str,
    next_phase_allowed: bool,
) -> Result<()> {
    let outcome: ReviewOutcome = parse_arg(outcome)?;
    let service = ctx.service()?;
    let user = ctx.user()?;
    let completed = service
        .complete_review(review, outcome, comments, next_phase_allowed, &user)
        .await?;
    ctx.emit(&completed, print_review)
}

pub async fn cmd_advance(
    ctx: &CmdContext,
    project: i64,
    from: Uuid,
    to: Option<Uuid>,
    comments: &str,
) -> Result<()> {
    let service = ctx.service()?;
    let user = ctx.user()?;
    let target = match to {
        Some(target) => Some(target),
        None => {
            let phases = service.phases(project).await?;
            let index = phases
                .iter()
                .position(|v| v.phase.id == from)
                .with_context(|| format!("Phase {} does not belong to project {}", from, project))?;
            phases.get(index + 1).map(|v| v.phase.id)
        }
    };
    // Without a successor the engine reports the final phase.
    let phases = match target {
        Some(target) => {
            service
                .request_transition(project, from, target, comments, &user)
                .await?
        }
        None => service.activate_next_phase(from, comments, &user).await?,
    };
    ctx.emit(&phases, |phases| {
        if let Some(active) = phases.iter().find(|v| v.phase.status == PhaseStatus::Active) {
            println!();
            println!(
                "{} {}",
                style("Activated").green().bold(),
                active.phase.phase_name
            );
        }
        print_phase_table(phases);
    })
}

pub async fn cmd_progress(ctx: &CmdContext, phase: Uuid, percentage: u8) -> Result<()> {
    let service = ctx.service()?;
    let user = ctx.user()?;
    let updated = service.update_progress(phase, percentage, &user).await?;
    ctx.emit(&updated, |phase: &PhaseInstance| {
        println!(
            "{}: {}% complete",
            phase.phase_name, phase.completion_percentage
        );
    })
}

pub async fn cmd_reviews(ctx: &CmdContext, phase: Uuid) -> Result<()> {
    let history = ctx.service()?.review_history(phase).await?;
    ctx.emit(&history, |history| {
        if history.is_empty() {
            println!("No reviews recorded for phase {}", phase);
        }
        for review in history {
            print_review(review);
        }
    })
}
