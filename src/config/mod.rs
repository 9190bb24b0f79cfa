//! Configuration loading for the HR sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `HRSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconciliation::LeaveCodeTable;

const ENV_PREFIX: &str = "HRSYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `HRSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Download both systems in parallel (headless automation only)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: bool,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_download_retry_delay_ms")]
    pub download_retry_delay_ms: u64,
    #[serde(default = "default_leaves_months_ago")]
    pub leaves_months_ago: u32,
    /// Directory receiving leave import files before upload
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Comma separated `code=description` pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_codes: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub retry_scheduler: RetrySchedulerConfig,
}

/// Logins of the two HR systems.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payroll_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payroll_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payroll_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timekeeping_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timekeeping_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timekeeping_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timekeeping_company: Option<String>,
}

impl Credentials {
    /// Environment variables of required credentials that are not set.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("HRSYNC_PAYROLL_USER", &self.payroll_user),
            ("HRSYNC_PAYROLL_PASSWORD", &self.payroll_password),
            ("HRSYNC_TIMEKEEPING_USER", &self.timekeeping_user),
            ("HRSYNC_TIMEKEEPING_PASSWORD", &self.timekeeping_password),
            ("HRSYNC_TIMEKEEPING_COMPANY", &self.timekeeping_company),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Retry scheduler configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetrySchedulerConfig {
    #[serde(default = "default_retry_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_retry_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_retry_poll_interval_seconds(),
            shutdown_timeout_seconds: default_retry_shutdown_timeout_seconds(),
        }
    }
}

impl RetrySchedulerConfig {
    /// Validate retry scheduler bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3600).contains(&self.poll_interval_seconds) {
            return Err(ConfigError::InvalidRetryPollInterval {
                value: self.poll_interval_seconds,
            });
        }
        if !(1..=300).contains(&self.shutdown_timeout_seconds) {
            return Err(ConfigError::InvalidRetryShutdownTimeout {
                value: self.shutdown_timeout_seconds,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            concurrent_downloads: default_concurrent_downloads(),
            download_attempts: default_download_attempts(),
            download_retry_delay_ms: default_download_retry_delay_ms(),
            leaves_months_ago: default_leaves_months_ago(),
            upload_dir: default_upload_dir(),
            leave_codes: None,
            credentials: Credentials::default(),
            retry_scheduler: RetrySchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parsed leave code table, when one is configured.
    pub fn leave_code_table(&self) -> Option<LeaveCodeTable> {
        self.leave_codes
            .as_deref()
            .map(LeaveCodeTable::parse)
            .filter(|table| !table.is_empty())
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.credentials.payroll_password.is_some() {
            config.credentials.payroll_password = Some(REDACTED.to_string());
        }
        if config.credentials.timekeeping_password.is_some() {
            config.credentials.timekeeping_password = Some(REDACTED.to_string());
        }
        if let Some((scheme, rest)) = config.database_url.split_once("://")
            && let Some((_, host)) = rest.rsplit_once('@')
        {
            config.database_url = format!("{scheme}://{REDACTED}@{host}");
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates bounds of the loaded values. Missing credentials are not an
    /// error here; they fail the sync job that needs them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }
        if !(1..=10).contains(&self.download_attempts) {
            return Err(ConfigError::InvalidDownloadAttempts {
                value: self.download_attempts,
            });
        }
        if self.leaves_months_ago > 24 {
            return Err(ConfigError::InvalidLeavesMonthsAgo {
                value: self.leaves_months_ago,
            });
        }

        self.retry_scheduler.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://hr-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_concurrent_downloads() -> bool {
    true
}

fn default_download_attempts() -> u32 {
    3
}

fn default_download_retry_delay_ms() -> u64 {
    2000
}

fn default_leaves_months_ago() -> u32 {
    2
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_retry_poll_interval_seconds() -> u64 {
    60
}

fn default_retry_shutdown_timeout_seconds() -> u64 {
    10
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be positive, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("download attempts must be between 1 and 10, got {value}")]
    InvalidDownloadAttempts { value: u32 },
    #[error("leaves months ago must not exceed 24, got {value}")]
    InvalidLeavesMonthsAgo { value: u32 },
    #[error("retry scheduler poll interval must be between 1 and 3600 seconds, got {value}")]
    InvalidRetryPollInterval { value: u64 },
    #[error("retry scheduler shutdown timeout must be between 1 and 300 seconds, got {value}")]
    InvalidRetryShutdownTimeout { value: u64 },
}

/// Loads configuration using layered `.env` files and `HRSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration. Process variables win over
    /// every `.env` layer.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = take_number(
            &mut layered,
            "DB_MAX_CONNECTIONS",
            default_db_max_connections,
        )?;
        let db_acquire_timeout_ms = take_number(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        )?;

        let concurrent_downloads = match layered.remove("CONCURRENT_DOWNLOADS") {
            Some(value) => parse_bool("CONCURRENT_DOWNLOADS", &value)?,
            None => default_concurrent_downloads(),
        };
        let download_attempts = take_number(
            &mut layered,
            "DOWNLOAD_ATTEMPTS",
            default_download_attempts,
        )?;
        let download_retry_delay_ms = take_number(
            &mut layered,
            "DOWNLOAD_RETRY_DELAY_MS",
            default_download_retry_delay_ms,
        )?;
        let leaves_months_ago = take_number(
            &mut layered,
            "LEAVES_MONTHS_AGO",
            default_leaves_months_ago,
        )?;
        let upload_dir = layered
            .remove("UPLOAD_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_upload_dir);
        let leave_codes = non_empty(layered.remove("LEAVE_CODES"));

        let credentials = Credentials {
            payroll_url: non_empty(layered.remove("PAYROLL_URL")),
            payroll_user: non_empty(layered.remove("PAYROLL_USER")),
            payroll_password: non_empty(layered.remove("PAYROLL_PASSWORD")),
            timekeeping_url: non_empty(layered.remove("TIMEKEEPING_URL")),
            timekeeping_user: non_empty(layered.remove("TIMEKEEPING_USER")),
            timekeeping_password: non_empty(layered.remove("TIMEKEEPING_PASSWORD")),
            timekeeping_company: non_empty(layered.remove("TIMEKEEPING_COMPANY")),
        };

        let retry_scheduler = RetrySchedulerConfig {
            poll_interval_seconds: take_number(
                &mut layered,
                "RETRY_POLL_INTERVAL_SECONDS",
                default_retry_poll_interval_seconds,
            )?,
            shutdown_timeout_seconds: take_number(
                &mut layered,
                "RETRY_SHUTDOWN_TIMEOUT_SECONDS",
                default_retry_shutdown_timeout_seconds,
            )?,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            concurrent_downloads,
            download_attempts,
            download_retry_delay_ms,
            leaves_months_ago,
            upload_dir,
            leave_codes,
            credentials,
            retry_scheduler,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Removes `key` and parses it, falling back to `default` when unset or empty.
fn take_number<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default()),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_retry_scheduler_validation() {
        let mut config = RetrySchedulerConfig::default();
        assert!(config.validate().is_ok());

        config.poll_interval_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryPollInterval { value: 0 })
        ));

        config.poll_interval_seconds = 60;
        config.shutdown_timeout_seconds = 301;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryShutdownTimeout { value: 301 })
        ));
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        let config = AppConfig {
            log_format: "xml".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogFormat { .. })
        ));
    }

    #[test]
    fn test_missing_credentials_are_listed() {
        let credentials = Credentials {
            payroll_user: Some("rh".to_string()),
            payroll_password: Some("secret".to_string()),
            timekeeping_user: Some("ponto".to_string()),
            ..Credentials::default()
        };
        assert_eq!(
            credentials.missing(),
            vec!["HRSYNC_TIMEKEEPING_PASSWORD", "HRSYNC_TIMEKEEPING_COMPANY"]
        );
    }

    #[test]
    fn test_redacted_json_masks_secrets() {
        let config = AppConfig {
            database_url: "postgres://sync:hunter2@db:5432/hr".to_string(),
            credentials: Credentials {
                payroll_password: Some("hunter2".to_string()),
                timekeeping_password: Some("hunter3".to_string()),
                ..Credentials::default()
            },
            ..AppConfig::default()
        };

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("hunter3"));
        assert!(json.contains("[REDACTED]@db:5432/hr"));
    }

    #[test]
    fn test_leave_code_table_from_config() {
        let config = AppConfig {
            leave_codes: Some("10=FERIAS,20=LICENCA".to_string()),
            ..AppConfig::default()
        };
        let table = config.leave_code_table().unwrap();
        assert_eq!(table.get("010"), Some("FERIAS"));

        let empty = AppConfig {
            leave_codes: Some(" , ".to_string()),
            ..AppConfig::default()
        };
        assert!(empty.leave_code_table().is_none());
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("X", "True").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
