//! # Service Configuration
//!
//! Runtime configuration for the storage layer and the engines.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ZDRINK_DATABASE_PATH=/var/lib/zdrink/zdrink.db                     │
//! │     ZDRINK_PROVIDER_TIMEOUT_MS=8000                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     zdrink.toml                                                        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "./data/zdrink.db"
//! max_connections = 5
//!
//! [payment]
//! provider_timeout_ms = 10000
//!
//! [orders]
//! number_prefix = "ORD"
//!
//! [membership]
//! recharge_gift_threshold = 10000   # cents
//! recharge_gift_rate_bps = 1000     # +10% stored value
//! recharge_points_rate_bps = 15000  # 1.5 points per currency unit
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zdrink_core::membership::RechargePolicy;
use zdrink_core::{Money, Rate, ORDER_NUMBER_PREFIX};

use crate::pool::DbConfig;

// =============================================================================
// Errors
// =============================================================================

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/zdrink.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Upper bound on any single provider call.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,
}

fn default_provider_timeout() -> u64 {
    10_000
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            provider_timeout_ms: default_provider_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettings {
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,
}

fn default_number_prefix() -> String {
    ORDER_NUMBER_PREFIX.to_string()
}

impl Default for OrderSettings {
    fn default() -> Self {
        OrderSettings {
            number_prefix: default_number_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSettings {
    #[serde(default = "default_gift_threshold")]
    pub recharge_gift_threshold: i64,

    #[serde(default = "default_gift_rate")]
    pub recharge_gift_rate_bps: i64,

    #[serde(default = "default_points_rate")]
    pub recharge_points_rate_bps: i64,
}

fn default_gift_threshold() -> i64 {
    RechargePolicy::default().gift_threshold.cents()
}

fn default_gift_rate() -> i64 {
    RechargePolicy::default().gift_rate.bps()
}

fn default_points_rate() -> i64 {
    RechargePolicy::default().points_rate.bps()
}

impl Default for MembershipSettings {
    fn default() -> Self {
        MembershipSettings {
            recharge_gift_threshold: default_gift_threshold(),
            recharge_gift_rate_bps: default_gift_rate(),
            recharge_points_rate_bps: default_points_rate(),
        }
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// The subset of configuration the engines read at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub order_number_prefix: String,
    pub provider_timeout: Duration,
    pub recharge_policy: RechargePolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        ServiceConfig::default().engine_settings()
    }
}

// =============================================================================
// Service Configuration
// =============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub payment: PaymentSettings,

    #[serde(default)]
    pub orders: OrderSettings,

    #[serde(default)]
    pub membership: MembershipSettings,
}

impl ServiceConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file, when `path` exists
    /// 3. `ZDRINK_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading service config from file");
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_toml(&contents)?
            }
            Some(path) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, no file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `ZDRINK_*` overrides read through `lookup`.
    ///
    /// A variable that is set but does not parse is an error, not a silent
    /// fallback.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        }

        if let Some(path) = lookup("ZDRINK_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("ZDRINK_MAX_CONNECTIONS") {
            self.database.max_connections = parse("ZDRINK_MAX_CONNECTIONS", raw)?;
        }
        if let Some(raw) = lookup("ZDRINK_PROVIDER_TIMEOUT_MS") {
            self.payment.provider_timeout_ms = parse("ZDRINK_PROVIDER_TIMEOUT_MS", raw)?;
        }
        if let Some(prefix) = lookup("ZDRINK_ORDER_PREFIX") {
            self.orders.number_prefix = prefix;
        }
        if let Some(raw) = lookup("ZDRINK_RECHARGE_GIFT_THRESHOLD") {
            self.membership.recharge_gift_threshold =
                parse("ZDRINK_RECHARGE_GIFT_THRESHOLD", raw)?;
        }
        if let Some(raw) = lookup("ZDRINK_RECHARGE_GIFT_RATE_BPS") {
            self.membership.recharge_gift_rate_bps = parse("ZDRINK_RECHARGE_GIFT_RATE_BPS", raw)?;
        }
        if let Some(raw) = lookup("ZDRINK_RECHARGE_POINTS_RATE_BPS") {
            self.membership.recharge_points_rate_bps =
                parse("ZDRINK_RECHARGE_POINTS_RATE_BPS", raw)?;
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.payment.provider_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "payment.provider_timeout_ms must be greater than 0".into(),
            ));
        }
        let prefix = self.orders.number_prefix.trim();
        if prefix.is_empty() || prefix.len() > 8 || !prefix.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ConfigError::Invalid(
                "orders.number_prefix must be 1-8 uppercase ASCII letters".into(),
            ));
        }
        let m = &self.membership;
        if m.recharge_gift_threshold < 0 || m.recharge_gift_rate_bps < 0 || m.recharge_points_rate_bps < 0
        {
            return Err(ConfigError::Invalid(
                "membership recharge settings must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Pool configuration for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            order_number_prefix: self.orders.number_prefix.trim().to_string(),
            provider_timeout: Duration::from_millis(self.payment.provider_timeout_ms),
            recharge_policy: RechargePolicy {
                gift_threshold: Money::from_cents(self.membership.recharge_gift_threshold),
                gift_rate: Rate::from_bps(self.membership.recharge_gift_rate_bps),
                points_rate: Rate::from_bps(self.membership.recharge_points_rate_bps),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orders.number_prefix, "ORD");
        let settings = config.engine_settings();
        assert_eq!(settings.provider_timeout, Duration::from_secs(10));
        assert_eq!(settings.recharge_policy, RechargePolicy::default());
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = ServiceConfig::from_toml(
            r#"
            [payment]
            provider_timeout_ms = 2500

            [orders]
            number_prefix = "ZD"
            "#,
        )
        .unwrap();
        assert_eq!(config.payment.provider_timeout_ms, 2500);
        assert_eq!(config.orders.number_prefix, "ZD");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ZDRINK_DATABASE_PATH", "/tmp/zd.db"),
            ("ZDRINK_PROVIDER_TIMEOUT_MS", "1500"),
        ]);
        let mut config = ServiceConfig::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/zd.db"));
        assert_eq!(config.payment.provider_timeout_ms, 1500);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "ZDRINK_MAX_CONNECTIONS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k) if k == "ZDRINK_MAX_CONNECTIONS"));
    }

    #[test]
    fn test_validation() {
        let mut config = ServiceConfig::default();
        config.orders.number_prefix = "ord".into();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.payment.provider_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("zdrink-missing-{}.toml", uuid::Uuid::new_v4()));
        let mut config = match path.exists() {
            true => unreachable!(),
            false => ServiceConfig::default(),
        };
        config.apply_env_overrides(|_| None).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.path, default_database_path());
    }
}
