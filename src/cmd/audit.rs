//! Audit trail commands: `phasegate audit show|export|verify`.

use std::path::Path;

use anyhow::Result;
use console::style;

use phasegate::audit::{AuditEntry, AuditExport, AuditFilter, EntityType};

use super::super::AuditCommands;
use super::{CmdContext, parse_arg};

fn print_entries(entries: &[AuditEntry]) {
    println!();
    if entries.is_empty() {
        println!("No audit entries.");
        println!();
        return;
    }
    for entry in entries {
        let change = match (&entry.previous_value, &entry.new_value) {
            (Some(prev), Some(new)) => format!("{} -> {}", prev, new),
            (None, Some(new)) => new.clone(),
            (Some(prev), None) => format!("{} -> (none)", prev),
            (None, None) => String::new(),
        };
        println!(
            "{}  {:<12} {:<22} {:<16} {}",
            style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.user_id,
            entry.action.as_str(),
            entry.entity_type.as_str(),
            change
        );
        if let Some(comments) = &entry.comments {
            println!("    {}", style(comments).italic());
        }
    }
    println!();
}

pub async fn cmd_audit(ctx: &CmdContext, command: AuditCommands) -> Result<()> {
    match command {
        AuditCommands::Show {
            project,
            entity_type,
            entity_id,
        } => {
            let entity_type = entity_type
                .as_deref()
                .map(parse_arg::<EntityType>)
                .transpose()?;
            let filter = AuditFilter {
                entity_type,
                entity_id,
            };
            let entries = ctx.service()?.audit_trail(project, filter).await?;
            ctx.emit(&entries, |entries| print_entries(entries))
        }
        AuditCommands::Export { project, output } => {
            let export = ctx.service()?.export_audit(project, output.clone()).await?;
            ctx.emit(&export, |export| {
                println!(
                    "{} {} entries to {}",
                    style("Exported").green().bold(),
                    export.entry_count,
                    output.display()
                );
                println!("sha256: {}", export.sha256);
            })
        }
        AuditCommands::Verify { file } => verify_export(ctx, &file),
    }
}

fn verify_export(ctx: &CmdContext, file: &Path) -> Result<()> {
    let export = AuditExport::load(file)?;
    if !export.verify()? {
        anyhow::bail!(
            "{} does not match its recorded sha256 digest",
            file.display()
        );
    }
    ctx.emit(&export.sha256, |sha256| {
        println!(
            "{} {} entries for project {}",
            style("Verified").green().bold(),
            export.entry_count,
            export.project_id
        );
        println!("sha256: {}", sha256);
    })
}
