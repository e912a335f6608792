//! Configuration system for sysPass
//!
//! Loads configuration from a TOML file. Every section is optional and
//! falls back to its defaults.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main sysPass configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub accounts: AccountsConfig,
    pub links: LinksConfig,
    pub events: EventsConfig,
    pub tasks: TasksConfig,
    pub plugins: PluginsConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            server: raw.server.unwrap_or_default().into(),
            storage: raw.storage.unwrap_or_default().into(),
            logging: raw.logging.unwrap_or_default().try_into()?,
            security: raw.security.unwrap_or_default().try_into()?,
            accounts: raw.accounts.unwrap_or_default().try_into()?,
            links: raw.links.unwrap_or_default().into(),
            events: raw.events.unwrap_or_default().try_into()?,
            tasks: raw.tasks.unwrap_or_default().into(),
            plugins: raw.plugins.unwrap_or_default().into(),
        })
    }

    /// Render as TOML, e.g. for the installer to write out
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&RawConfig::from(self))
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syspass")
            .join("config.toml")
    }

    /// Per-user data directory holding the vault, exports and tasks
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syspass")
    }

    /// Get the default vault path
    pub fn default_storage_path() -> PathBuf {
        Self::default_data_dir().join("vault.enc")
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).as_ref())
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the web UI and API
    pub bind: String,
    /// Shown in page titles
    pub site_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            site_name: "sysPass".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Encrypted vault file
    pub path: PathBuf,
    /// Where web exports are written. They hold plaintext secrets.
    pub exports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: Config::default_storage_path(),
            exports_dir: Config::default_data_dir().join("exports"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Format: "json" or "pretty"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}

/// Login tracking and session settings
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// How far back failed attempts count
    pub track_window: Duration,
    /// Attempts within the window before requests are delayed
    pub track_max_attempts: usize,
    /// Delay added per attempt once the limit is reached
    pub track_sleep_per_attempt: Duration,
    /// Tracks older than this are pruned. Never shorter than the window.
    pub track_retention: Duration,
    pub session_timeout: Duration,
    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            track_window: Duration::from_secs(600),
            track_max_attempts: 10,
            track_sleep_per_attempt: Duration::from_millis(500),
            track_retention: Duration::from_secs(7 * 86400),
            session_timeout: Duration::from_secs(86400),
            min_password_length: 8,
        }
    }
}

/// Account behaviour
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    pub page_size: usize,
    /// Allow listing accounts the user cannot open
    pub global_search: bool,
    /// Secondary group membership grants group access
    pub full_group_access: bool,
    pub expire_enabled: bool,
    pub expire_days: i64,
    pub history_enabled: bool,
    pub max_file_size_kb: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            page_size: 12,
            global_search: false,
            full_group_access: false,
            expire_enabled: false,
            expire_days: 120,
            history_enabled: true,
            max_file_size_kb: 1024,
        }
    }
}

/// Public link settings
#[derive(Debug, Clone)]
pub struct LinksConfig {
    pub enabled: bool,
    pub default_ttl: Duration,
    /// 0 means unlimited
    pub max_views: u32,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(15 * 60),
            max_views: 3,
        }
    }
}

/// Which events reach the log and notifications
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Empty means every event is logged
    pub log_events: Vec<String>,
    pub notify_events: Vec<String>,
    /// Audit log rows kept in the vault; the oldest go first
    pub max_rows: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_events: Vec::new(),
            notify_events: Vec::new(),
            max_rows: 10_000,
        }
    }
}

/// Background task settings
#[derive(Debug, Clone)]
pub struct TasksConfig {
    pub dir: PathBuf,
    pub poll_interval: Duration,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            dir: Config::default_data_dir().join("tasks"),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginsConfig {
    /// Plugin names to enable on load
    pub enabled: Vec<String>,
}
