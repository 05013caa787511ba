//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub gate: GateConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Minimum accepted top-up amount
    #[serde(default = "default_min_topup")]
    pub min_topup_amount: i64,

    /// Minutes before an unpaid top-up request expires
    #[serde(default = "default_topup_ttl")]
    pub topup_ttl_minutes: i64,

    /// Maximum cancelled + expired top-ups per user per day
    #[serde(default = "default_daily_failure_cap")]
    pub daily_failure_cap: i64,

    /// Destination accounts shown to the user, per payment method
    #[serde(default)]
    pub topup_accounts: TopUpAccounts,
}

fn default_min_topup() -> i64 {
    5000
}

fn default_topup_ttl() -> i64 {
    30
}

fn default_daily_failure_cap() -> i64 {
    3
}

/// Destination account identifiers for manual transfers
#[derive(Debug, Deserialize, Clone)]
pub struct TopUpAccounts {
    #[serde(default = "default_gopay_account")]
    pub gopay: String,

    #[serde(default = "default_bri_account")]
    pub bri: String,

    #[serde(default = "default_bank_jago_account")]
    pub bank_jago: String,

    #[serde(default = "default_crypto_usdt_account")]
    pub crypto_usdt: String,
}

fn default_gopay_account() -> String {
    "085700000000".to_string()
}

fn default_bri_account() -> String {
    "000000000000000".to_string()
}

fn default_bank_jago_account() -> String {
    "100000000000".to_string()
}

fn default_crypto_usdt_account() -> String {
    "TBA".to_string()
}

/// Admission gate configuration for the rate-limited upstream
#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    /// Number of concurrent upstream calls allowed
    #[serde(default = "default_upstream_slots")]
    pub upstream_slots: usize,

    /// Seconds a charge may wait for a slot before giving up
    #[serde(default = "default_gate_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_upstream_slots() -> usize {
    1
}

fn default_gate_acquire_timeout() -> u64 {
    120
}

impl GateConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("billing.min_topup_amount", 5000)?
            .set_default("billing.topup_ttl_minutes", 30)?
            .set_default("billing.daily_failure_cap", 3)?
            .set_default("gate.upstream_slots", 1)?
            .set_default("gate.acquire_timeout_secs", 120)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with GIGABILL_ prefix
            .add_source(
                Environment::with_prefix("GIGABILL")
                    .separator("__")
                    .try_parsing(true),
            )
            // Support legacy environment variables
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("GIGABILL").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            min_topup_amount: 5000,
            topup_ttl_minutes: 30,
            daily_failure_cap: 3,
            topup_accounts: TopUpAccounts::default(),
        }
    }
}

impl Default for TopUpAccounts {
    fn default() -> Self {
        Self {
            gopay: default_gopay_account(),
            bri: default_bri_account(),
            bank_jago: default_bank_jago_account(),
            crypto_usdt: default_crypto_usdt_account(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            upstream_slots: 1,
            acquire_timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_billing_config() {
        let config = BillingConfig::default();
        assert_eq!(config.min_topup_amount, 5000);
        assert_eq!(config.topup_ttl_minutes, 30);
        assert_eq!(config.daily_failure_cap, 3);
    }

    #[test]
    fn test_default_gate_config() {
        let config = GateConfig::default();
        assert_eq!(config.upstream_slots, 1);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(120));
    }
}
