//! Application configuration loaded from environment variables.

use std::str::FromStr;

use domain::{CheckoutConfig, MergePolicy};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn from_param(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `CART_MERGE_POLICY`: `absorb` or `keep` (default: `absorb`)
/// - `ORDER_NUMBER_ATTEMPTS`: order numbers tried per checkout (default: `3`)
/// - `CHECKOUT_CONFLICT_RETRIES`: re-runs after a stock conflict (default: `1`)
/// - `ADMIN_PRINCIPALS`: comma-separated principals allowed to change order status
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub merge_policy: MergePolicy,
    pub checkout: CheckoutConfig,
    pub admin_principals: Vec<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::from_param(&v))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            merge_policy: parse_var(&lookup, "CART_MERGE_POLICY").unwrap_or(defaults.merge_policy),
            checkout: CheckoutConfig {
                order_number_attempts: parse_var(&lookup, "ORDER_NUMBER_ATTEMPTS")
                    .unwrap_or(defaults.checkout.order_number_attempts),
                conflict_retries: parse_var(&lookup, "CHECKOUT_CONFLICT_RETRIES")
                    .unwrap_or(defaults.checkout.conflict_retries),
            },
            admin_principals: lookup("ADMIN_PRINCIPALS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
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
            database_max_connections: 10,
            merge_policy: MergePolicy::default(),
            checkout: CheckoutConfig::default(),
            admin_principals: Vec::new(),
        }
    }
}
