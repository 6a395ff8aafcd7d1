//! Daemon configuration loaded from environment variables.

use std::time::Duration;

use common::StoreId;
use sync::SyncConfig;
use sync::config::{DEFAULT_CONNECTOR_TIMEOUT, DEFAULT_MIN_ORDER_AGE, DEFAULT_TRACKING_DELAY};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SOURCE_STORE_ID is not a valid store id: {0}")]
    InvalidSourceStoreId(String),

    #[error("SOURCE_STORE_ID is required when DATABASE_URL is set")]
    MissingSourceStoreId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Daemon configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` `text` or `json` (default: `text`)
/// - `DATABASE_URL` Postgres URL; unset runs against an in-memory repository
/// - `SOURCE_STORE_ID` the source store (required with a database)
/// - `POLL_INTERVAL_SECS` seconds between cycles (default: `60`)
/// - `CONNECTOR_TIMEOUT_SECS` per-call connector timeout (default: `30`)
/// - `MIN_ORDER_AGE_SECS` settle delay before routing (default: `300`)
/// - `TRACKING_DELAY_SECS` delay before polling tracking (default: `300`)
/// - `RUN_ONCE` run a single cycle and exit (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub source_store_id: Option<StoreId>,
    pub poll_interval: Duration,
    pub connector_timeout: Duration,
    pub min_order_age: Duration,
    pub tracking_delay: Duration,
    pub run_once: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let source_store_id = match lookup("SOURCE_STORE_ID").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<StoreId>()
                    .map_err(|_| ConfigError::InvalidSourceStoreId(raw.clone()))?,
            ),
            None => None,
        };
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if database_url.is_some() && source_store_id.is_none() {
            return Err(ConfigError::MissingSourceStoreId);
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url,
            source_store_id,
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            connector_timeout: secs("CONNECTOR_TIMEOUT_SECS", defaults.connector_timeout),
            min_order_age: secs("MIN_ORDER_AGE_SECS", defaults.min_order_age),
            tracking_delay: secs("TRACKING_DELAY_SECS", defaults.tracking_delay),
            run_once: lookup("RUN_ONCE")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine settings for the given source store.
    pub fn sync_config(&self, source_store_id: StoreId) -> SyncConfig {
        SyncConfig::new(source_store_id)
            .with_connector_timeout(self.connector_timeout)
            .with_min_order_age(self.min_order_age)
            .with_tracking_delay(self.tracking_delay)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            source_store_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connector_timeout: DEFAULT_CONNECTOR_TIMEOUT,
            min_order_age: DEFAULT_MIN_ORDER_AGE,
            tracking_delay: DEFAULT_TRACKING_DELAY,
            run_once: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.connector_timeout, Duration::from_secs(30));
        assert_eq!(config.min_order_age, Duration::from_secs(300));
        assert_eq!(config.tracking_delay, Duration::from_secs(300));
        assert!(config.database_url.is_none());
        assert!(!config.run_once);
    }

    #[test]
    fn test_overrides() {
        let id = StoreId::new();
        let config = load(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/sync"),
            ("SOURCE_STORE_ID", &id.to_string()),
            ("POLL_INTERVAL_SECS", "15"),
            ("MIN_ORDER_AGE_SECS", "0"),
            ("RUN_ONCE", "true"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.source_store_id, Some(id));
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert!(config.run_once);

        let sync = config.sync_config(id);
        assert_eq!(sync.min_order_age, Duration::ZERO);
        assert_eq!(sync.connector_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config = load(&[("PORT", "http"), ("TRACKING_DELAY_SECS", "soon")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.tracking_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_database_requires_source_store() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/sync")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSourceStoreId));

        let err = load(&[("SOURCE_STORE_ID", "main")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSourceStoreId(_)));
    }
}
