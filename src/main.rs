use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use phasegate::config::{CliOverrides, PhasegateConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Phase-gated design-control workflow engine")]
pub struct Cli {
    /// Path to phasegate.toml (defaults to .phasegate/phasegate.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides config and PHASEGATE_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user recorded in the audit trail
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Print JSON instead of formatted tables
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the phase instances for a project
    Init { project: i64 },
    /// List a project's phases with gating state
    Phases { project: i64 },
    /// Show the current phase and overall progress
    Status { project: i64 },
    /// Show phases stuck in review and phases blocked by prerequisites
    Bottlenecks { project: i64 },
    /// Submit an active phase for gate review
    Submit {
        phase: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        scope: String,
    },
    /// Complete an in-progress gate review
    Review {
        review: Uuid,
        /// approved or rejected
        #[arg(long)]
        outcome: String,
        #[arg(long, default_value = "")]
        comments: String,
        /// Approve the phase but hold back activation of the next one
        #[arg(long)]
        hold_next: bool,
    },
    /// Lock an approved phase and activate its successor
    Advance {
        project: i64,
        /// The approved phase instance
        #[arg(long)]
        from: Uuid,
        /// The successor to activate; must be the next phase in order
        #[arg(long)]
        to: Option<Uuid>,
        #[arg(long, default_value = "")]
        comments: String,
    },
    /// Record completion progress on the active phase
    Progress { phase: Uuid, percentage: u8 },
    /// List a phase's review history
    Reviews { phase: Uuid },
    /// Traceability artifacts, links and the coverage matrix
    Trace {
        #[command(subcommand)]
        command: TraceCommands,
    },
    /// Inspect or export the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Run the HTTP API and WebSocket event feed
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable permissive CORS for local front-end development
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum TraceCommands {
    /// Register a user need, design input/output, verification or validation
    Register {
        project: i64,
        kind: String,
        id: String,
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Link two artifacts, given as kind:id
    Link {
        project: i64,
        source: String,
        target: String,
        /// derives_from, implements, verifies or validates
        #[arg(long = "type")]
        link_type: String,
    },
    /// Deactivate a link
    Unlink { link: Uuid },
    /// List a project's links
    Links { project: i64 },
    /// Show coverage statistics and gaps
    Matrix {
        project: i64,
        /// Persist the matrix as an immutable snapshot
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    Show {
        project: i64,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
    },
    Export {
        project: i64,
        output: PathBuf,
    },
    /// Check an exported file against its recorded digest
    Verify { file: PathBuf },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default phasegate.toml
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let port = match &cli.command {
        Commands::Serve { port, .. } => *port,
        _ => None,
    };
    let config = PhasegateConfig::resolve(
        cli.config.as_deref(),
        CliOverrides {
            db: cli.db.clone(),
            user: cli.user.clone(),
            port,
            verbose: cli.verbose,
        },
    )?;

    let mut logging = config.logging();
    if !cli.verbose && !matches!(cli.command, Commands::Serve { .. }) {
        logging.level = tracing::Level::WARN;
    }
    let _guard = phasegate::logging::init(&logging)?;

    let ctx = cmd::CmdContext::new(config, cli.json);
    match cli.command {
        Commands::Init { project } => cmd::cmd_init(&ctx, project).await?,
        Commands::Phases { project } => cmd::cmd_phases(&ctx, project).await?,
        Commands::Status { project } => cmd::cmd_status(&ctx, project).await?,
        Commands::Bottlenecks { project } => cmd::cmd_bottlenecks(&ctx, project).await?,
        Commands::Submit {
            phase,
            title,
            scope,
        } => cmd::cmd_submit(&ctx, phase, &title, &scope).await?,
        Commands::Review {
            review,
            outcome,
            comments,
            hold_next,
        } => cmd::cmd_review(&ctx, review, &outcome, &comments, !hold_next).await?,
        Commands::Advance {
            project,
            from,
            to,
            comments,
        } => cmd::cmd_advance(&ctx, project, from, to, &comments).await?,
        Commands::Progress { phase, percentage } => {
            cmd::cmd_progress(&ctx, phase, percentage).await?
        }
        Commands::Reviews { phase } => cmd::cmd_reviews(&ctx, phase).await?,
        Commands::Trace { command } => cmd::cmd_trace(&ctx, command).await?,
        Commands::Audit { command } => cmd::cmd_audit(&ctx, command).await?,
        Commands::Serve { dev, .. } => cmd::cmd_serve(&ctx, dev).await?,
        Commands::Config { command } => cmd::cmd_config(&ctx, command)?,
    }

    Ok(())
}
