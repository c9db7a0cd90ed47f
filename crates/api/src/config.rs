//! Process configuration read from environment variables.

use std::net::SocketAddr;

use thiserror::Error;
use walletd_observability::{LogFormat, TracingConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required when {because}")]
    Missing { key: &'static str, because: &'static str },

    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres-backed stores when true, in-memory otherwise.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub tracing: TracingConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let bind_addr = parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?;
        let use_persistent_stores = parse_or(&lookup, "USE_PERSISTENT_STORES", false)?;
        let database_max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let format = parse_or(&lookup, "LOG_FORMAT", LogFormat::Json)?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL",
                because: "USE_PERSISTENT_STORES=true",
            });
        }
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let mut tracing = TracingConfig {
            format,
            ..TracingConfig::default()
        };
        if let Some(filter) = lookup("RUST_LOG") {
            tracing.default_filter = filter;
        }

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            database_max_connections,
            tracing,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            tracing: TracingConfig::default(),
        }
    }
}

/// Parse `key` if present, otherwise fall back to `default`.
fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn persistent_stores_require_database_url() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "DATABASE_URL", .. }));

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/walletd"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.database_max_connections, 4);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = config(&[("USE_PERSISTENT_STORES", "yes")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "USE_PERSISTENT_STORES", .. }));

        let err = config(&[("BIND_ADDR", "localhost")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BIND_ADDR", .. }));

        let err = config(&[("DATABASE_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DATABASE_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn log_settings_flow_into_tracing_config() {
        let cfg = config(&[("LOG_FORMAT", "pretty"), ("RUST_LOG", "walletd=debug")]).unwrap();
        assert_eq!(cfg.tracing.format, LogFormat::Pretty);
        assert_eq!(cfg.tracing.default_filter, "walletd=debug");
    }
}
