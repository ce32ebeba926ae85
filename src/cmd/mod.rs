//! CLI command implementations.
//!
//! | Module     | Commands handled                                          |
//! |------------|-----------------------------------------------------------|
//! | `workflow` | `Init`, `Phases`, `Status`, `Bottlenecks`, `Submit`, `Review`, `Advance`, `Progress`, `Reviews` |
//! | `trace`    | `Trace`                                                   |
//! | `audit`    | `Audit`                                                   |
//! | `serve`    | `Serve`                                                   |
//! | `config`   | `Config`                                                  |

pub mod audit;
pub mod config;
pub mod serve;
pub mod trace;
pub mod workflow;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use serve::cmd_serve;
pub use trace::cmd_trace;
pub use workflow::{
    cmd_advance, cmd_bottlenecks, cmd_init, cmd_phases, cmd_progress, cmd_review, cmd_reviews,
    cmd_status, cmd_submit,
};

use anyhow::{Context, Result};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use phasegate::config::PhasegateConfig;
use phasegate::phase::PhaseRegistry;
use phasegate::service::WorkflowService;
use phasegate::store::{DbHandle, GateDb};

/// Resolved configuration plus output mode, shared by every command.
pub struct CmdContext {
    pub config: PhasegateConfig,
    pub json: bool,
}

impl CmdContext {
    pub fn new(config: PhasegateConfig, json: bool) -> Self {
        Self { config, json }
    }

    /// Open the database and sync the phase catalog.
    pub fn service(&self) -> Result<WorkflowService> {
        let registry = PhaseRegistry::load_or_default(self.config.phases_file())
            .context("Failed to load phase definitions")?;
        let db = GateDb::new(self.config.db_path()).context("Failed to open gate database")?;
        db.sync_phase_definitions(&registry)
            .context("Failed to sync phase definitions")?;
        Ok(WorkflowService::new(DbHandle::new(db), Arc::new(registry)))
    }

    pub fn user(&self) -> Result<String> {
        self.config.user().context(
            "No user identity: pass --user, set identity.default_user, or set PHASEGATE_USER",
        )
    }

    /// Print `value` as pretty JSON when `--json` is set; otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("Failed to serialize output")?
            );
        } else {
            human(value);
        }
        Ok(())
    }
}

pub fn parse_arg<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    T::from_str(value.trim()).map_err(anyhow::Error::msg)
}
