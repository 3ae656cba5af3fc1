//! Application settings loading from config.toml
//!
//! Every section and field has a default, so an absent file or a partial file
//! is valid. The file location comes from `NOVEL_WRITER_CONFIG` and falls back to
//! `./config.toml`.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Token to point conversion
    pub billing: BillingConfig,
    /// Outbound AI call settings
    pub ai: AiConfig,
    /// Subscription scheduler settings
    pub scheduler: SchedulerConfig,
    /// Administrator seeded into an empty database
    pub admin: AdminConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:5000`
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Billing settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BillingConfig {
    /// Tokens that cost one point
    pub tokens_per_point: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            tokens_per_point: 100,
        }
    }
}

/// Outbound AI call settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    /// Timeout for a whole non-streaming call, and for connecting when streaming
    pub request_timeout_secs: u64,
}

impl AiConfig {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 180,
        }
    }
}

/// Subscription scheduler settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Run the background distribution job
    pub enabled: bool,
    /// Seconds between ticks
    pub tick_interval_secs: u64,
    /// JSON file receiving one entry per granted user
    pub distribution_log_path: PathBuf,
}

impl SchedulerConfig {
    /// Tick interval as a [`Duration`], never shorter than one second.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 60,
            distribution_log_path: PathBuf::from("logs/points_distribution.json"),
        }
    }
}

/// Bootstrap administrator account
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdminConfig {
    /// Username of the seeded administrator
    pub username: String,
    /// Initial password; the account is flagged for a password change
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// Loads application configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_config(&contents)
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;

    if config.billing.tokens_per_point == 0 {
        return Err(Error::Config {
            message: "billing.tokens_per_point must be at least 1".to_string(),
        });
    }

    Ok(config)
}

/// Loads configuration from `NOVEL_WRITER_CONFIG` or `./config.toml`.
///
/// A missing file is not an error; the defaults are used instead.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var("NOVEL_WRITER_CONFIG").map_or_else(
        |_| PathBuf::from("config.toml"),
        PathBuf::from,
    );

    if path.exists() {
        tracing::info!("Loading configuration from {:?}", path);
        load_config(&path)
    } else {
        tracing::info!("No configuration file at {:?}, using defaults", path);
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [server]
            bind_address = "0.0.0.0:8080"

            [billing]
            tokens_per_point = 50

            [ai]
            request_timeout_secs = 30

            [scheduler]
            enabled = false
            tick_interval_secs = 10
            distribution_log_path = "/tmp/points.json"

            [admin]
            username = "root"
            password = "changeme"
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.billing.tokens_per_point, 50);
        assert_eq!(config.ai.request_timeout(), Duration::from_secs(30));
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(10));
        assert_eq!(
            config.scheduler.distribution_log_path,
            PathBuf::from("/tmp/points.json")
        );
        assert_eq!(config.admin.username, "root");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = parse_config("[billing]\ntokens_per_point = 10\n").unwrap();
        assert_eq!(config.billing.tokens_per_point, 10);
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.ai.request_timeout_secs, 180);
        assert!(config.scheduler.enabled);
        assert_eq!(config.admin.password, "admin");
    }

    #[test]
    fn test_zero_ratio_rejected() {
        let result = parse_config("[billing]\ntokens_per_point = 0\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_tick_interval_clamped() {
        let config = parse_config("[scheduler]\ntick_interval_secs = 0\n").unwrap();
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
    }
}
