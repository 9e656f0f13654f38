// ABOUTME: Configuration for the sync engine - optional TOML file plus environment overrides
// ABOUTME: Holds source/target connection settings, retry policy and watcher timeouts

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::utils::RetryPolicy;

/// Problems found while validating a loaded configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("source URI is not set (set MONGO_URI or [source].uri)")]
    MissingSourceUri,

    #[error("target user is not set (set PG_USER or [target].user)")]
    MissingTargetUser,

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("retry.max_attempts must be at least 1")]
    NoAttempts,

    #[error("retry.backoff_secs must contain at least one delay")]
    NoBackoff,

    #[error("sslmode={sslmode} requires certificate verification; drop --allow-self-signed-certs or use sslmode=require")]
    InsecureVerifyMode { sslmode: SslMode },
}

/// TLS mode for the target connection, named after libpq's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// Whether the mode promises a verified server certificate.
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }

    pub fn parse(value: &str) -> Option<SslMode> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Some(SslMode::Disable),
            "allow" | "prefer" => Some(SslMode::Prefer),
            "require" => Some(SslMode::Require),
            "verify-ca" => Some(SslMode::VerifyCa),
            "verify-full" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub uri: String,
    pub database: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database: "agencia_viajes".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub sslmode: SslMode,
    /// Skip certificate verification (self-signed targets).
    pub accept_invalid_certs: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6543,
            database: "postgres".to_string(),
            user: String::new(),
            password: String::new(),
            sslmode: SslMode::Require,
            accept_invalid_certs: false,
        }
    }
}

impl TargetConfig {
    /// Connection description safe to log.
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{} (sslmode={})",
            self.user, self.host, self.port, self.database, self.sslmode
        )
    }
}

// Manual Debug so the password never reaches logs
impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("sslmode", &self.sslmode)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay before attempt n+1 is `backoff_secs[n-1]`, repeating the last entry.
    pub backoff_secs: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: vec![1, 2, 4],
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub stop_timeout_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 5,
        }
    }
}

impl WatcherConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub retry: RetryConfig,
    pub watcher: WatcherConfig,
}

impl SyncConfig {
    /// Load from an optional TOML file, apply process environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`SyncConfig::load`] with an injectable environment lookup.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<SyncConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => SyncConfig::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<SyncConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Override file values with environment variables.
    ///
    /// `PG_*` names win over the bare libpq-style names (`host`, `user`, ...)
    /// still found in older deployments.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |keys: &[&str]| keys.iter().find_map(|k| env(k).filter(|v| !v.is_empty()));

        if let Some(uri) = lookup(&["MONGO_URI"]) {
            self.source.uri = uri;
        }
        if let Some(db) = lookup(&["MONGO_DATABASE"]) {
            self.source.database = db;
        }
        if let Some(host) = lookup(&["PG_HOST", "host"]) {
            self.target.host = host;
        }
        if let Some(port) = lookup(&["PG_PORT", "port"]) {
            self.target.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "PG_PORT",
                    value: port.clone(),
                })?;
        }
        if let Some(db) = lookup(&["PG_DATABASE", "dbname"]) {
            self.target.database = db;
        }
        if let Some(user) = lookup(&["PG_USER", "user"]) {
            self.target.user = user;
        }
        if let Some(password) = lookup(&["PG_PASSWORD", "password"]) {
            self.target.password = password;
        }
        if let Some(mode) = lookup(&["PG_SSLMODE"]) {
            self.target.sslmode = SslMode::parse(&mode).ok_or(ConfigError::InvalidValue {
                key: "PG_SSLMODE",
                value: mode.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.uri.trim().is_empty() {
            return Err(ConfigError::MissingSourceUri);
        }
        if self.source.database.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "source.database",
                value: self.source.database.clone(),
            });
        }
        if self.target.user.trim().is_empty() {
            return Err(ConfigError::MissingTargetUser);
        }
        if self.target.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "target.port",
                value: "0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.retry.backoff_secs.is_empty() {
            return Err(ConfigError::NoBackoff);
        }
        if self.target.accept_invalid_certs && self.target.sslmode.verifies_certificate() {
            return Err(ConfigError::InsecureVerifyMode {
                sslmode: self.target.sslmode,
            });
        }
        Ok(())
    }
}
