//! Raw configuration types for TOML parsing

use super::*;
use serde::{Deserialize, Serialize};

/// Raw configuration as parsed from TOML
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub server: Option<RawServerConfig>,
    pub storage: Option<RawStorageConfig>,
    pub logging: Option<RawLoggingConfig>,
    pub security: Option<RawSecurityConfig>,
    pub accounts: Option<RawAccountsConfig>,
    pub links: Option<RawLinksConfig>,
    pub events: Option<RawEventsConfig>,
    pub tasks: Option<RawTasksConfig>,
    pub plugins: Option<RawPluginsConfig>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawServerConfig {
    pub bind: Option<String>,
    pub site_name: Option<String>,
}

impl From<RawServerConfig> for ServerConfig {
    fn from(raw: RawServerConfig) -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind: raw.bind.unwrap_or(defaults.bind),
            site_name: raw.site_name.unwrap_or(defaults.site_name),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawStorageConfig {
    pub path: Option<String>,
    pub exports_dir: Option<String>,
}

impl From<RawStorageConfig> for StorageConfig {
    fn from(raw: RawStorageConfig) -> Self {
        let defaults = StorageConfig::default();
        Self {
            path: raw.path.map(|p| expand_path(&p)).unwrap_or(defaults.path),
            exports_dir: raw
                .exports_dir
                .map(|p| expand_path(&p))
                .unwrap_or(defaults.exports_dir),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl TryFrom<RawLoggingConfig> for LoggingConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLoggingConfig) -> Result<Self, Self::Error> {
        let format = match raw.format.as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown log format: {}",
                    other
                )))
            }
        };

        Ok(Self {
            level: raw.level.unwrap_or_else(|| "info".to_string()),
            format,
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawSecurityConfig {
    pub track_window_secs: Option<u64>,
    pub track_max_attempts: Option<usize>,
    pub track_sleep_ms_per_attempt: Option<u64>,
    pub track_retention_secs: Option<u64>,
    pub session_timeout_secs: Option<u64>,
    pub min_password_length: Option<usize>,
}

impl TryFrom<RawSecurityConfig> for SecurityConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSecurityConfig) -> Result<Self, Self::Error> {
        let defaults = SecurityConfig::default();
        let config = Self {
            track_window: raw
                .track_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.track_window),
            track_max_attempts: raw.track_max_attempts.unwrap_or(defaults.track_max_attempts),
            track_sleep_per_attempt: raw
                .track_sleep_ms_per_attempt
                .map(Duration::from_millis)
                .unwrap_or(defaults.track_sleep_per_attempt),
            track_retention: raw
                .track_retention_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.track_retention),
            session_timeout: raw
                .session_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_timeout),
            min_password_length: raw.min_password_length.unwrap_or(defaults.min_password_length),
        };

        if config.track_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "track_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawAccountsConfig {
    pub page_size: Option<usize>,
    pub global_search: Option<bool>,
    pub full_group_access: Option<bool>,
    pub expire_enabled: Option<bool>,
    pub expire_days: Option<i64>,
    pub history_enabled: Option<bool>,
    pub max_file_size_kb: Option<usize>,
}

impl TryFrom<RawAccountsConfig> for AccountsConfig {
    type Error = ConfigError;

    fn try_from(raw: RawAccountsConfig) -> Result<Self, Self::Error> {
        let defaults = AccountsConfig::default();
        let config = Self {
            page_size: raw.page_size.unwrap_or(defaults.page_size),
            global_search: raw.global_search.unwrap_or(defaults.global_search),
            full_group_access: raw.full_group_access.unwrap_or(defaults.full_group_access),
            expire_enabled: raw.expire_enabled.unwrap_or(defaults.expire_enabled),
            expire_days: raw.expire_days.unwrap_or(defaults.expire_days),
            history_enabled: raw.history_enabled.unwrap_or(defaults.history_enabled),
            max_file_size_kb: raw.max_file_size_kb.unwrap_or(defaults.max_file_size_kb),
        };

        if config.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".to_string()));
        }
        if config.expire_days <= 0 {
            return Err(ConfigError::Invalid("expire_days must be positive".to_string()));
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawLinksConfig {
    pub enabled: Option<bool>,
    pub default_ttl_minutes: Option<u64>,
    pub max_views: Option<u32>,
}

impl From<RawLinksConfig> for LinksConfig {
    fn from(raw: RawLinksConfig) -> Self {
        let defaults = LinksConfig::default();
        Self {
            enabled: raw.enabled.unwrap_or(defaults.enabled),
            default_ttl: raw
                .default_ttl_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.default_ttl),
            max_views: raw.max_views.unwrap_or(defaults.max_views),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawEventsConfig {
    #[serde(default)]
    pub log_events: Vec<String>,
    #[serde(default)]
    pub notify_events: Vec<String>,
    pub max_rows: Option<usize>,
}

impl TryFrom<RawEventsConfig> for EventsConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEventsConfig) -> Result<Self, Self::Error> {
        let max_rows = raw.max_rows.unwrap_or(EventsConfig::default().max_rows);
        if max_rows == 0 {
            return Err(ConfigError::Invalid("events max_rows must be at least 1".to_string()));
        }
        Ok(Self {
            log_events: raw.log_events,
            notify_events: raw.notify_events,
            max_rows,
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawTasksConfig {
    pub dir: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl From<RawTasksConfig> for TasksConfig {
    fn from(raw: RawTasksConfig) -> Self {
        let defaults = TasksConfig::default();
        Self {
            dir: raw.dir.map(|d| expand_path(&d)).unwrap_or(defaults.dir),
            poll_interval: raw
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct RawPluginsConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
}

impl From<RawPluginsConfig> for PluginsConfig {
    fn from(raw: RawPluginsConfig) -> Self {
        Self {
            enabled: raw.enabled,
        }
    }
}

impl From<&Config> for RawConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: Some(RawServerConfig {
                bind: Some(config.server.bind.clone()),
                site_name: Some(config.server.site_name.clone()),
            }),
            storage: Some(RawStorageConfig {
                path: Some(config.storage.path.display().to_string()),
                exports_dir: Some(config.storage.exports_dir.display().to_string()),
            }),
            logging: Some(RawLoggingConfig {
                level: Some(config.logging.level.clone()),
                format: Some(
                    match config.logging.format {
                        LogFormat::Json => "json",
                        LogFormat::Pretty => "pretty",
                    }
                    .to_string(),
                ),
            }),
            security: Some(RawSecurityConfig {
                track_window_secs: Some(config.security.track_window.as_secs()),
                track_max_attempts: Some(config.security.track_max_attempts),
                track_sleep_ms_per_attempt: Some(
                    config.security.track_sleep_per_attempt.as_millis() as u64,
                ),
                track_retention_secs: Some(config.security.track_retention.as_secs()),
                session_timeout_secs: Some(config.security.session_timeout.as_secs()),
                min_password_length: Some(config.security.min_password_length),
            }),
            accounts: Some(RawAccountsConfig {
                page_size: Some(config.accounts.page_size),
                global_search: Some(config.accounts.global_search),
                full_group_access: Some(config.accounts.full_group_access),
                expire_enabled: Some(config.accounts.expire_enabled),
                expire_days: Some(config.accounts.expire_days),
                history_enabled: Some(config.accounts.history_enabled),
                max_file_size_kb: Some(config.accounts.max_file_size_kb),
            }),
            links: Some(RawLinksConfig {
                enabled: Some(config.links.enabled),
                default_ttl_minutes: Some(config.links.default_ttl.as_secs() / 60),
                max_views: Some(config.links.max_views),
            }),
            events: Some(RawEventsConfig {
                log_events: config.events.log_events.clone(),
                notify_events: config.events.notify_events.clone(),
                max_rows: Some(config.events.max_rows),
            }),
            tasks: Some(RawTasksConfig {
                dir: Some(config.tasks.dir.display().to_string()),
                poll_interval_ms: Some(config.tasks.poll_interval.as_millis() as u64),
            }),
            plugins: Some(RawPluginsConfig {
                enabled: config.plugins.enabled.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "0.0.0.0:9000"
site_name = "ACME Vault"

[storage]
path = "/var/lib/syspass/vault.enc"

[logging]
level = "debug"
format = "json"

[security]
track_max_attempts = 5
track_sleep_ms_per_attempt = 250
track_retention_secs = 86400

[accounts]
page_size = 25
full_group_access = true

[links]
max_views = 0

[events]
log_events = ["login.*", "delete.account"]
max_rows = 500

[plugins]
enabled = ["expiry-notifier"]
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.site_name, "ACME Vault");
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/syspass/vault.enc"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.security.track_max_attempts, 5);
        assert_eq!(config.security.track_sleep_per_attempt, Duration::from_millis(250));
        assert_eq!(config.security.track_window, Duration::from_secs(600));
        assert_eq!(config.accounts.page_size, 25);
        assert!(config.accounts.full_group_access);
        assert!(config.accounts.history_enabled);
        assert_eq!(config.links.max_views, 0);
        assert_eq!(config.events.log_events.len(), 2);
        assert_eq!(config.events.max_rows, 500);
        assert_eq!(config.security.track_retention, Duration::from_secs(86400));
        assert_eq!(config.plugins.enabled, vec!["expiry-notifier"]);
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.accounts.page_size, 12);
        assert_eq!(config.links.default_ttl, Duration::from_secs(900));
        assert!(config.events.log_events.is_empty());
        assert_eq!(config.events.max_rows, 10_000);
        assert!(!config.tasks.dir.starts_with(std::env::temp_dir()));
        assert!(!config.storage.exports_dir.starts_with(std::env::temp_dir()));
        assert!(config.storage.exports_dir.ends_with("syspass/exports"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::parse("[logging]\nformat = \"xml\"").is_err());
        assert!(Config::parse("[accounts]\npage_size = 0").is_err());
        assert!(Config::parse("[security]\ntrack_max_attempts = 0").is_err());
        assert!(Config::parse("[events]\nmax_rows = 0").is_err());
        assert!(Config::parse("[server\n").is_err());
    }

    #[test]
    fn test_home_expansion() {
        let config = Config::parse("[storage]\npath = \"~/vault.enc\"").unwrap();
        assert!(!config.storage.path.starts_with("~"));
        assert!(config.storage.path.ends_with("vault.enc"));
    }

    #[test]
    fn test_toml_roundtrip_keeps_settings() {
        let mut config = Config::default();
        config.accounts.expire_enabled = true;
        config.plugins.enabled = vec!["expiry-notifier".to_string()];

        let rendered = config.to_toml().unwrap();
        let parsed = Config::parse(&rendered).unwrap();
        assert!(parsed.accounts.expire_enabled);
        assert_eq!(parsed.plugins.enabled, config.plugins.enabled);
        assert_eq!(parsed.storage.path, config.storage.path);
        assert_eq!(parsed.storage.exports_dir, config.storage.exports_dir);
    }
}
