//! Configuration view and validation commands: `phasegate config`.

use anyhow::Result;
use console::style;

use phasegate::config::PhasegateToml;

use super::super::ConfigCommands;
use super::CmdContext;

pub fn cmd_config(ctx: &CmdContext, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &ctx.config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            let toml = &ctx.config.toml;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(toml)?);
                return Ok(());
            }
            println!();
            println!("{}", style("phasegate configuration").bold().cyan());
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(toml)?);
            match ctx.config.user() {
                Some(user) => println!("\nActing user: {}", user),
                None => println!("\nActing user: (none)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = ctx.config.toml.validate();
            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow().bold());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                anyhow::bail!("{} configuration problem(s) found", warnings.len());
            }
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    config_path.display()
                );
            }
            PhasegateToml::default().save(config_path)?;
            println!("{} {}", style("Created").green().bold(), config_path.display());
        }
    }

    Ok(())
}
