//! Service configuration.
//!
//! Defaults suit local runs. `SyncConfig::from_env` overrides them from
//! `REGISTRY_SYNC_*` variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REGISTRY_SYNC_LISTEN_ADDR` | `listen_addr` |
//! | `REGISTRY_SYNC_AUDIT_LOG` | `audit_log_path` |
//! | `REGISTRY_SYNC_GITHUB_TOKEN` | `github_token` |
//! | `REGISTRY_SYNC_SOURCE_HOST` | `source_host` |
//! | `REGISTRY_SYNC_MAX_VERSIONS` | `limits.max_versions_per_entry` |
//! | `REGISTRY_SYNC_MAX_FILES` | `limits.max_source_files` |
//! | `REGISTRY_SYNC_MAX_FILE_BYTES` | `limits.max_file_bytes` |
//! | `REGISTRY_SYNC_GITHUB_RETRIES` | `github_max_retries` |
//! | `REGISTRY_SYNC_GITHUB_BACKOFF_MS` | `github_initial_backoff_ms` |
//! | `REGISTRY_SYNC_OPEN_DATA_PREFIXES` | `open_data_prefixes` (comma separated) |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::github::RetryConfig;

const ENV_PREFIX: &str = "REGISTRY_SYNC_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {variable}: {reason}")]
    InvalidValue {
        variable: String,
        value: String,
        reason: String,
    },
}

/// Size and volume limits applied to every reconciled version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VersionLimits {
    /// Maximum number of versions one entry may hold.
    pub max_versions_per_entry: usize,
    /// Maximum number of source files in one version.
    pub max_source_files: usize,
    /// Maximum size of a single source file.
    pub max_file_bytes: usize,
}

impl Default for VersionLimits {
    fn default() -> Self {
        VersionLimits {
            max_versions_per_entry: 1024,
            max_source_files: 1000,
            max_file_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub listen_addr: SocketAddr,
    pub audit_log_path: PathBuf,
    pub github_token: Option<String>,
    /// Host prefix of catalog paths (`github.com/org/repo`).
    pub source_host: String,
    pub limits: VersionLimits,
    pub github_max_retries: u32,
    pub github_initial_backoff_ms: u64,
    /// URL prefixes of test data considered publicly accessible. Empty
    /// disables the open-data check.
    pub open_data_prefixes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            audit_log_path: PathBuf::from("audit.jsonl"),
            github_token: None,
            source_host: "github.com".to_string(),
            limits: VersionLimits::default(),
            github_max_retries: RetryConfig::DEFAULT.max_retries,
            github_initial_backoff_ms: RetryConfig::DEFAULT.initial_delay.as_millis() as u64,
            open_data_prefixes: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Loads defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads defaults overridden by `lookup(variable_name)`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        let mut config = SyncConfig::default();
        if let Some((name, value)) = var("LISTEN_ADDR") {
            config.listen_addr = parse(&name, &value)?;
        }
        if let Some((_, value)) = var("AUDIT_LOG") {
            config.audit_log_path = PathBuf::from(value);
        }
        if let Some((_, value)) = var("GITHUB_TOKEN") {
            config.github_token = Some(value).filter(|t| !t.is_empty());
        }
        if let Some((_, value)) = var("SOURCE_HOST") {
            config.source_host = value;
        }
        if let Some((name, value)) = var("MAX_VERSIONS") {
            config.limits.max_versions_per_entry = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_FILES") {
            config.limits.max_source_files = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_FILE_BYTES") {
            config.limits.max_file_bytes = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("GITHUB_RETRIES") {
            config.github_max_retries = parse(&name, &value)?;
        }
        if let Some((name, value)) = var("GITHUB_BACKOFF_MS") {
            config.github_initial_backoff_ms = parse(&name, &value)?;
        }
        if let Some((_, value)) = var("OPEN_DATA_PREFIXES") {
            config.open_data_prefixes = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(config)
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_audit_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log_path = path.into();
        self
    }

    pub fn with_source_host(mut self, host: impl Into<String>) -> Self {
        self.source_host = host.into();
        self
    }

    pub fn with_limits(mut self, limits: VersionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_open_data_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.open_data_prefixes = prefixes;
        self
    }

    /// Retry settings for GitHub requests.
    pub fn retry_config(&self) -> RetryConfig {
        let initial_delay = Duration::from_millis(self.github_initial_backoff_ms);
        RetryConfig::new(
            self.github_max_retries,
            initial_delay,
            initial_delay.saturating_mul(8),
            2.0,
        )
    }
}

fn parse<T>(variable: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        variable: variable.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
