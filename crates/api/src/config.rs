//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use gateway::GatewayConfig;
use thiserror::Error;
use topup::{ReconcilerConfig, TopupConfig};
use topup_store::LedgerPolicy;

/// Upper bound for `GATEWAY_MAX_RETRIES`.
pub const MAX_GATEWAY_RETRIES: u32 = 10;

/// Configuration that must not be used to start the server.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set to a non-blank value")]
    MissingSecret(&'static str),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT` — bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `json` for JSON lines, anything else for text
/// - `DATABASE_URL` — PostgreSQL URL; when unset the in-memory store is used
/// - `DB_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `JWT_SECRET` — HS256 secret for bearer tokens (required)
/// - `GATEWAY_BASE_URL` — charge endpoint; when unset the in-memory gateway is used
/// - `GATEWAY_SERVER_KEY` — charge credential and notification signing key (required)
/// - `GATEWAY_TIMEOUT_SECS`, `GATEWAY_MAX_RETRIES` (at most 10), `GATEWAY_SUCCESS_STATUS`
/// - `TOPUP_MIN_AMOUNT`, `TOPUP_MAX_AMOUNT`, `SUPPLIER_CREDIT_LIMIT`
/// - `RECONCILE_INTERVAL_SECS` (at least 1), `ORPHAN_AFTER_SECS`, `MAX_CHARGE_ATTEMPTS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub gateway_base_url: Option<String>,
    pub gateway_server_key: String,
    pub gateway_timeout_secs: u64,
    pub gateway_max_retries: u32,
    pub gateway_success_status: u16,
    pub topup_min_amount: i64,
    pub topup_max_amount: i64,
    pub supplier_credit_limit: i64,
    pub reconcile_interval_secs: u64,
    pub orphan_after_secs: i64,
    pub max_charge_attempts: i32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS").unwrap_or(defaults.db_max_connections),
            jwt_secret: non_empty("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            gateway_base_url: non_empty("GATEWAY_BASE_URL"),
            gateway_server_key: non_empty("GATEWAY_SERVER_KEY").unwrap_or(defaults.gateway_server_key),
            gateway_timeout_secs: parse_var(&lookup, "GATEWAY_TIMEOUT_SECS").unwrap_or(defaults.gateway_timeout_secs),
            gateway_max_retries: parse_var(&lookup, "GATEWAY_MAX_RETRIES")
                .unwrap_or(defaults.gateway_max_retries)
                .min(MAX_GATEWAY_RETRIES),
            gateway_success_status: parse_var(&lookup, "GATEWAY_SUCCESS_STATUS").unwrap_or(defaults.gateway_success_status),
            topup_min_amount: parse_var(&lookup, "TOPUP_MIN_AMOUNT").unwrap_or(defaults.topup_min_amount),
            topup_max_amount: parse_var(&lookup, "TOPUP_MAX_AMOUNT").unwrap_or(defaults.topup_max_amount),
            supplier_credit_limit: parse_var(&lookup, "SUPPLIER_CREDIT_LIMIT").unwrap_or(defaults.supplier_credit_limit),
            reconcile_interval_secs: parse_var(&lookup, "RECONCILE_INTERVAL_SECS")
                .unwrap_or(defaults.reconcile_interval_secs)
                .max(1),
            orphan_after_secs: parse_var(&lookup, "ORPHAN_AFTER_SECS").unwrap_or(defaults.orphan_after_secs),
            max_charge_attempts: parse_var(&lookup, "MAX_CHARGE_ATTEMPTS").unwrap_or(defaults.max_charge_attempts),
        }
    }

    /// Rejects configuration the server must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret("JWT_SECRET"));
        }
        if self.gateway_server_key.trim().is_empty() {
            return Err(ConfigError::MissingSecret("GATEWAY_SERVER_KEY"));
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the HTTP gateway, if a base URL is configured.
    pub fn gateway_config(&self) -> Option<GatewayConfig> {
        self.gateway_base_url.as_ref().map(|url| GatewayConfig {
            timeout: Duration::from_secs(self.gateway_timeout_secs),
            max_retries: self.gateway_max_retries,
            success_status: self.gateway_success_status,
            ..GatewayConfig::new(url.clone(), self.gateway_server_key.clone())
        })
    }

    pub fn topup_config(&self) -> TopupConfig {
        TopupConfig {
            min_amount: self.topup_min_amount,
            max_amount: self.topup_max_amount,
        }
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy::with_credit_limit(self.supplier_credit_limit)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            orphan_after: chrono::Duration::seconds(self.orphan_after_secs),
            max_charge_attempts: self.max_charge_attempts,
            ..ReconcilerConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 10,
            jwt_secret: String::new(),
            gateway_base_url: None,
            gateway_server_key: String::new(),
            gateway_timeout_secs: 10,
            gateway_max_retries: 2,
            gateway_success_status: 201,
            topup_min_amount: 10_000,
            topup_max_amount: 100_000_000,
            supplier_credit_limit: 0,
            reconcile_interval_secs: 60,
            orphan_after_secs: 300,
            max_charge_attempts: 3,
        }
    }
}
