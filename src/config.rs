//! Configuration for phasegate.
//!
//! Settings come from `.phasegate/phasegate.toml`, then environment
//! variables, then CLI flags, each layer overriding the previous one.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3150
//! dev_mode = false
//!
//! [database]
//! path = ".phasegate/phasegate.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! directory = ".phasegate/logs"
//!
//! [workflow]
//! phases_file = ".phasegate/phases.json"
//!
//! [identity]
//! default_user = "qa.lead"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::{LoggingConfig, parse_level};
use crate::server::ServerConfig;

/// Directory holding the config file and default database.
pub const CONFIG_DIR: &str = ".phasegate";
pub const CONFIG_FILE: &str = "phasegate.toml";

pub const ENV_DB: &str = "PHASEGATE_DB";
pub const ENV_PORT: &str = "PHASEGATE_PORT";
pub const ENV_LOG: &str = "PHASEGATE_LOG";
pub const ENV_USER: &str = "PHASEGATE_USER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS for local front-end development.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3150
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    Path::new(CONFIG_DIR).join("phasegate.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// JSON phase catalog; the built-in design-control phases when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentitySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user: Option<String>,
}

/// The complete phasegate.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasegateToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub identity: IdentitySection,
}

impl PhasegateToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasegate.toml")
    }

    /// Load the file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize phasegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = lookup(ENV_DB) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_PORT, port))?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level.trim().to_string();
        }
        if let Some(user) = lookup(ENV_USER) {
            self.identity.default_user = Some(user.trim().to_string());
        }
        Ok(())
    }

    /// Return human-readable problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port must be non-zero".to_string());
        }
        if self.server.host.trim().is_empty() {
            warnings.push("server.host must not be empty".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            warnings.push("database.path must not be empty".to_string());
        }
        if parse_level(&self.logging.level).is_none() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected trace, debug, info, warn or error",
                self.logging.level
            ));
        }
        if let Some(file) = &self.workflow.phases_file
            && !file.exists()
        {
            warnings.push(format!("workflow.phases_file {} does not exist", file.display()));
        }
        if let Some(user) = &self.identity.default_user
            && user.trim().is_empty()
        {
            warnings.push("identity.default_user must not be blank".to_string());
        }

        warnings
    }
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

/// Fully layered configuration used by the CLI and server.
#[derive(Debug, Clone)]
pub struct PhasegateConfig {
    pub config_path: PathBuf,
    pub toml: PhasegateToml,
    pub cli_user: Option<String>,
    pub verbose: bool,
}

impl PhasegateConfig {
    /// Default config file location relative to the working directory.
    pub fn default_path() -> PathBuf {
        Path::new(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Layer file, process environment and CLI overrides.
    pub fn resolve(config_path: Option<&Path>, overrides: CliOverrides) -> Result<Self> {
        Self::resolve_with(config_path, overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(config_path: Option<&Path>, overrides: CliOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        let mut toml = PhasegateToml::load_or_default(&config_path)?;
        toml.apply_env(&env)?;

        if let Some(db) = overrides.db {
            toml.database.path = db;
        }
        if let Some(port) = overrides.port {
            toml.server.port = port;
        }

        Ok(Self {
            config_path,
            toml,
            cli_user: overrides.user.filter(|u| !u.trim().is_empty()),
            verbose: overrides.verbose,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.toml.database.path
    }

    pub fn phases_file(&self) -> Option<&Path> {
        self.toml.workflow.phases_file.as_deref()
    }

    /// Acting user: `--user`, then the configured default, then `$USER`.
    pub fn user(&self) -> Option<String> {
        self.user_with(|key| std::env::var(key).ok())
    }

    fn user_with<F>(&self, env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.cli_user
            .clone()
            .or_else(|| self.toml.identity.default_user.clone())
            .or_else(|| env("USER"))
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }

    pub fn logging(&self) -> LoggingConfig {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            parse_level(&self.toml.logging.level).unwrap_or(tracing::Level::INFO)
        };
        LoggingConfig {
            level,
            use_json: self.toml.logging.json,
            directory: self.toml.logging.directory.clone(),
        }
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.toml.server.host.clone(),
            port: self.toml.server.port,
            db_path: self.toml.database.path.clone(),
            phases_file: self.toml.workflow.phases_file.clone(),
            dev_mode: self.toml.server.dev_mode,
        }
    }
}
