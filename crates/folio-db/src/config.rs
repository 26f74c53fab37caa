//! Engine configuration.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use chrono::Duration;
use folio_core::OrderPolicy;
use serde::{Deserialize, Serialize};
use std::env;

use crate::pool::DbConfig;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: String,

    /// Pool size
    pub max_connections: u32,

    /// Minutes after placement during which an order may be cancelled
    pub cancel_window_minutes: i64,

    /// Return window for categories without their own override
    pub return_window_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: "./folio_dev.db".to_string(),
            max_connections: 5,
            cancel_window_minutes: folio_core::lifecycle::DEFAULT_CANCEL_WINDOW_MINUTES,
            return_window_days: folio_core::lifecycle::DEFAULT_RETURN_WINDOW_DAYS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            database_path: lookup("FOLIO_DATABASE_PATH").unwrap_or(defaults.database_path),

            max_connections: lookup("FOLIO_MAX_CONNECTIONS")
                .unwrap_or_else(|| defaults.max_connections.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FOLIO_MAX_CONNECTIONS".to_string()))?,

            cancel_window_minutes: lookup("FOLIO_CANCEL_WINDOW_MINUTES")
                .unwrap_or_else(|| defaults.cancel_window_minutes.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FOLIO_CANCEL_WINDOW_MINUTES".to_string()))?,

            return_window_days: lookup("FOLIO_RETURN_WINDOW_DAYS")
                .unwrap_or_else(|| defaults.return_window_days.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FOLIO_RETURN_WINDOW_DAYS".to_string()))?,
        };

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue("FOLIO_MAX_CONNECTIONS".to_string()));
        }
        if config.cancel_window_minutes < 0 {
            return Err(ConfigError::InvalidValue(
                "FOLIO_CANCEL_WINDOW_MINUTES".to_string(),
            ));
        }
        if config.return_window_days < 0 {
            return Err(ConfigError::InvalidValue("FOLIO_RETURN_WINDOW_DAYS".to_string()));
        }

        Ok(config)
    }

    /// Lifecycle windows for the order service.
    pub fn policy(&self) -> OrderPolicy {
        OrderPolicy {
            cancel_window: Duration::minutes(self.cancel_window_minutes),
            default_return_window_days: self.return_window_days,
        }
    }

    /// Database settings.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database_path).pool_size(self.max_connections)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.policy(), OrderPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FOLIO_DATABASE_PATH", "/var/lib/folio/folio.db"),
            ("FOLIO_CANCEL_WINDOW_MINUTES", "45"),
            ("FOLIO_RETURN_WINDOW_DAYS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, "/var/lib/folio/folio.db");
        assert_eq!(config.policy().cancel_window, Duration::minutes(45));
        assert_eq!(config.policy().default_return_window_days, 10);
        assert_eq!(config.db_config().pool_size, 5);
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_lookup(lookup(&[("FOLIO_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("FOLIO_MAX_CONNECTIONS"));

        assert!(EngineConfig::from_lookup(lookup(&[("FOLIO_RETURN_WINDOW_DAYS", "-1")])).is_err());
    }
}
