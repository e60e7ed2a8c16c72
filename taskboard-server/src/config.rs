//! Task server settings.
//!
//! Values come from the command line (or its environment variables), then the
//! `[server]` table of `taskboard-server/config.toml` under the user config
//! directory, then built-in defaults. Page limits are checked while they are
//! resolved, so a `ServerConfig` always holds a usable pair.

use std::path::{Path, PathBuf};

use taskboard_proto::api::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

/// Directory under the user config dir holding `config.toml`.
const CONFIG_DIR_NAME: &str = "taskboard-server";

/// Address used when neither the command line nor the file names one.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Why the server could not be configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists (or was named explicitly) but could not be read.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// File that was opened.
        path: PathBuf,
        /// The I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for the `[server]` table.
    #[error("malformed settings file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting parsed but cannot be used.
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// On-disk settings; every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SettingsFile {
    server: ServerTable,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerTable {
    bind_addr: Option<String>,
    default_limit: Option<u32>,
    max_limit: Option<u32>,
}

/// Command line of `taskboard-server`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskboard REST task server")]
pub struct ServerCliArgs {
    /// Listen address, e.g. `0.0.0.0:9000`.
    #[arg(short, long, env = "TASKBOARD_ADDR")]
    pub bind: Option<String>,

    /// Settings file to use instead of the per-user one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Page size for list requests that do not pass `limit`.
    #[arg(long)]
    pub default_limit: Option<u32>,

    /// Largest page size a list request may ask for.
    #[arg(long)]
    pub max_limit: Option<u32>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "TASKBOARD_SERVER_LOG")]
    pub log_level: String,
}

/// Page sizes for `GET /api/v1/tasks`. Both are at least 1 and the default
/// never exceeds the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    default: u32,
    max: u32,
}

impl PageLimits {
    /// Checks a default/maximum pair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero limit or a default above
    /// the maximum.
    pub fn new(default: u32, max: u32) -> Result<Self, ConfigError> {
        if default == 0 || max == 0 {
            return Err(ConfigError::Invalid(
                "page limits must be at least 1".to_string(),
            ));
        }
        if default > max {
            return Err(ConfigError::Invalid(format!(
                "default_limit ({default}) exceeds max_limit ({max})"
            )));
        }
        Ok(Self { default, max })
    }

    /// Page size when a request names none.
    #[must_use]
    pub const fn default_limit(self) -> u32 {
        self.default
    }

    /// Largest page size honoured.
    #[must_use]
    pub const fn max_limit(self) -> u32 {
        self.max
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: DEFAULT_LIST_LIMIT,
            max: MAX_LIST_LIMIT,
        }
    }
}

/// Settings the server runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: String,
    /// List page sizes.
    pub limits: PageLimits,
    /// Fallback tracing filter.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            limits: PageLimits::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads the settings file (the explicit one, or the per-user one if it
    /// exists) and combines it with the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file is missing, any file is
    /// unreadable or malformed, or the page limits are unusable.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_settings(path)?,
            None => match user_settings_path() {
                Some(path) => read_settings_if_present(&path)?,
                None => SettingsFile::default(),
            },
        };
        Self::resolve(cli, file)
    }

    /// Picks each setting from the command line, then the file, then the
    /// default, and checks the resulting page limits.
    fn resolve(cli: &ServerCliArgs, file: SettingsFile) -> Result<Self, ConfigError> {
        let ServerTable {
            bind_addr,
            default_limit,
            max_limit,
        } = file.server;
        let fallback = PageLimits::default();
        let limits = PageLimits::new(
            cli.default_limit
                .or(default_limit)
                .unwrap_or(fallback.default_limit()),
            cli.max_limit.or(max_limit).unwrap_or(fallback.max_limit()),
        )?;

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            limits,
            log_level: cli.log_level.clone(),
        })
    }
}

fn user_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.toml"))
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn read_settings_if_present(path: &Path) -> Result<SettingsFile, ConfigError> {
    match read_settings(path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(SettingsFile::default())
        }
        other => other,
    }
}
