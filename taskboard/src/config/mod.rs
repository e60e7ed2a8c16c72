//! Configuration for the taskboard client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::{ProjectId, TaskStatus};

use crate::board::{BoardSettings, Scope};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    board: BoardFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    url: Option<String>,
    project_id: Option<u64>,
    request_timeout_secs: Option<u64>,
    page_limit: Option<u32>,
}

/// `[board]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BoardFileConfig {
    spacing: Option<f64>,
    event_buffer: Option<usize>,
    reconcile_after_commit: Option<bool>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the task server. `None` runs the offline demo board.
    pub api_url: Option<String>,
    /// Project to scope the board to. `None` shows every task.
    pub project_id: Option<ProjectId>,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Board tunables.
    pub board: BoardSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            project_id: None,
            request_timeout: Duration::from_secs(10),
            board: BoardSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if a resolved value is out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli.api_url.clone().or_else(|| file.api.url.clone()),
            project_id: cli
                .project
                .or(file.api.project_id)
                .map(ProjectId::new),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            board: BoardSettings {
                spacing: file.board.spacing.unwrap_or(defaults.board.spacing),
                event_buffer: file
                    .board
                    .event_buffer
                    .unwrap_or(defaults.board.event_buffer),
                page_limit: file.api.page_limit.unwrap_or(defaults.board.page_limit),
                reconcile_after_commit: file
                    .board
                    .reconcile_after_commit
                    .unwrap_or(defaults.board.reconcile_after_commit),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.board.spacing.is_finite() || self.board.spacing <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "board.spacing must be a positive number, got {}",
                self.board.spacing
            )));
        }
        if self.board.page_limit == 0 {
            return Err(ConfigError::Invalid("api.page_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The board scope this configuration selects.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        match self.project_id {
            Some(project) => Scope::Project(project),
            None => Scope::Global,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Kanban task board client")]
pub struct CliArgs {
    /// Base URL of the task server (e.g. `http://127.0.0.1:8080`).
    #[arg(long, env = "TASKBOARD_API_URL")]
    pub api_url: Option<String>,

    /// Project to scope the board to.
    #[arg(long)]
    pub project: Option<u64>,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Board operations available from the command line.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print every column in display order.
    List,
    /// Move a task to a column and index, as a drag would.
    Move {
        /// Id of the task to move.
        #[arg(long)]
        task: u64,
        /// Destination column (`todo`, `in_progress`, `done`).
        #[arg(long)]
        to: TaskStatus,
        /// Display index in the destination column.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Change a task's status without choosing a slot.
    Status {
        /// Id of the task.
        #[arg(long)]
        task: u64,
        /// New status.
        #[arg(long)]
        to: TaskStatus,
    },
    /// Delete a task.
    Delete {
        /// Id of the task.
        #[arg(long)]
        task: u64,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
