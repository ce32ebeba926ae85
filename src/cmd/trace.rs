//! Traceability commands: `phasegate trace register|link|unlink|links|matrix`.

use anyhow::Result;
use console::style;

use phasegate::trace::matrix::CoverageStatus;
use phasegate::trace::{ArtifactKind, ArtifactRef, LinkType, TraceLink, TraceabilityMatrix};

use super::super::TraceCommands;
use super::{CmdContext, parse_arg};

fn print_link(link: &TraceLink) {
    let state = if link.active {
        style("active").green()
    } else {
        style("inactive").dim()
    };
    println!(
        "  {}  {} -[{}]-> {}  {}",
        link.id, link.source, link.link_type, link.target, state
    );
}

fn print_matrix(matrix: &TraceabilityMatrix) {
    println!();
    println!(
        "{}",
        style(format!("Traceability matrix, project {}", matrix.project_id))
            .bold()
            .cyan()
    );
    println!();
    println!("{:<30} {:>8} {:>6}  Status", "Coverage", "Covered", "%");
    for (key, stat) in &matrix.coverage_statistics {
        let status = match stat.status {
            CoverageStatus::Complete => style(stat.status.as_str()).green(),
            CoverageStatus::Partial => style(stat.status.as_str()).yellow(),
            CoverageStatus::NoItems => style(stat.status.as_str()).dim(),
        };
        println!(
            "{:<30} {:>3}/{:<4} {:>5}%  {}",
            key, stat.covered, stat.total, stat.percentage, status
        );
    }

    if !matrix.matrix_data.is_empty() {
        println!();
        for row in &matrix.matrix_data {
            println!("{}", style(&row.user_need).bold());
            for (label, ids) in [
                ("design inputs", &row.design_inputs),
                ("design outputs", &row.design_outputs),
                ("verifications", &row.verifications),
                ("validations", &row.validations),
            ] {
                if !ids.is_empty() {
                    println!("  {:<15} {}", label, ids.join(", "));
                }
            }
        }
    }

    println!();
    if matrix.gap_analysis.is_empty() {
        println!("{}", style("No gaps.").green());
    } else {
        println!("{} ({})", style("Gaps").red().bold(), matrix.gap_analysis.len());
        for gap in &matrix.gap_analysis {
            println!("  {}:{}  missing {}", gap.node_type, gap.node_id, gap.missing_relation);
        }
    }
    println!();
}

pub async fn cmd_trace(ctx: &CmdContext, command: TraceCommands) -> Result<()> {
    let service = ctx.service()?;
    match command {
        TraceCommands::Register {
            project,
            kind,
            id,
            title,
        } => {
            let kind: ArtifactKind = parse_arg(&kind)?;
            let user = ctx.user()?;
            let artifact = service
                .register_artifact(project, kind, &id, &title, &user)
                .await?;
            ctx.emit(&artifact, |artifact| {
                println!("{} {}", style("Registered").green().bold(), artifact.reference());
            })
        }
        TraceCommands::Link {
            project,
            source,
            target,
            link_type,
        } => {
            let source: ArtifactRef = parse_arg(&source)?;
            let target: ArtifactRef = parse_arg(&target)?;
            let link_type: LinkType = parse_arg(&link_type)?;
            let user = ctx.user()?;
            let link = service
                .add_link(project, source, target, link_type, &user)
                .await?;
            ctx.emit(&link, |link| {
                println!("{}", style("Linked").green().bold());
                print_link(link);
            })
        }
        TraceCommands::Unlink { link } => {
            let user = ctx.user()?;
            let link = service.deactivate_link(link, &user).await?;
            ctx.emit(&link, |link| {
                println!("{}", style("Deactivated").yellow().bold());
                print_link(link);
            })
        }
        TraceCommands::Links { project } => {
            let links = service.links(project).await?;
            ctx.emit(&links, |links| {
                if links.is_empty() {
                    println!("No links for project {}", project);
                }
                for link in links {
                    print_link(link);
                }
            })
        }
        TraceCommands::Matrix { project, save } => {
            if save {
                let user = ctx.user()?;
                let snapshot = service.save_matrix_snapshot(project, &user).await?;
                ctx.emit(&snapshot, |snapshot| {
                    print_matrix(&snapshot.matrix);
                    println!("{} {}", style("Saved snapshot").green().bold(), snapshot.id);
                })
            } else {
                let matrix = service.traceability_matrix(project).await?;
                ctx.emit(&matrix, print_matrix)
            }
        }
    }
}
