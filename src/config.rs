use std::env;

use crate::database::error::{DatabaseError, DatabaseResult};

/// Process configuration, read once from the environment at startup.
///
/// The interval values are only seeds and fallbacks: the live values come
/// from the warehouse `settings` table and are re-read by the scheduler on
/// every iteration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JWT signing key (HS256).
    pub secret_key: String,
    /// Secret-box key material for credential fields at rest.
    pub encryption_key: String,
    /// Warehouse DSN, e.g. `postgres://pgfleet@localhost/pgfleet_stats`.
    pub local_db_dsn: String,
    pub listen_addr: String,
    pub allowed_origins: Vec<String>,
    pub collect_interval: u64,
    pub size_update_interval: u64,
    pub db_check_interval: u64,
    pub retention_months: i64,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> DatabaseResult<Self> {
        let secret_key = require("SECRET_KEY")?;
        let encryption_key = require("ENCRYPTION_KEY")?;
        let local_db_dsn = require("LOCAL_DB_DSN")?;

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            secret_key,
            encryption_key,
            local_db_dsn,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            allowed_origins,
            collect_interval: parse_env("COLLECT_INTERVAL", 600),
            size_update_interval: parse_env("SIZE_UPDATE_INTERVAL", 1800),
            db_check_interval: parse_env("DB_CHECK_INTERVAL", 1800),
            retention_months: parse_env("RETENTION_MONTHS", 12),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require(name: &str) -> DatabaseResult<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            DatabaseError::ValidationError(format!("{} environment variable is not set", name))
        })
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
