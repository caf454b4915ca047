//! Layered configuration for the predictor CLI.
//!
//! Sources, highest priority first:
//! 1. `DATABASE_URL`
//! 2. `PREDICTOR_*` environment variables
//! 3. `predictor.toml` in the working directory
//! 4. Built-in defaults

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "predictor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("'{field}' is not configured; set it in {file} or the environment", file = CONFIG_FILE)]
    NotConfigured { field: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("PREDICTOR_"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::NotConfigured {
                field: "database_url".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.acquire_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "acquire_timeout_secs".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_database_url_are_rejected() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        let err = AppConfig::from_figment(&figment).unwrap_err();
        assert!(matches!(err, ConfigError::NotConfigured { ref field } if field == "database_url"));
    }

    #[test]
    fn zero_connections_are_rejected() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Serialized::default("database_url", "postgres://localhost/grades"))
            .merge(Serialized::default("max_connections", 0));
        let err = AppConfig::from_figment(&figment).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_connections"));
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                database_url = "postgres://file/grades"
                max_connections = 3
                acquire_timeout_secs = 10
                "#,
            )?;
            jail.set_env("DATABASE_URL", "postgres://env/grades");
            jail.set_env("PREDICTOR_MAX_CONNECTIONS", "9");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.database_url, "postgres://env/grades");
            assert_eq!(config.max_connections, 9);
            assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
            Ok(())
        });
    }

    #[test]
    fn file_values_fill_unset_fields() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "acquire_timeout_secs = 30")?;
            jail.set_env("DATABASE_URL", "postgres://env/grades");
            jail.set_env("PREDICTOR_MAX_CONNECTIONS", "5");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.max_connections, 5);
            assert_eq!(config.acquire_timeout_secs, 30);
            Ok(())
        });
    }
}
