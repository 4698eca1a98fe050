//! Configuration module for subscription-service.

use crate::billing::{DailySchedule, LockSettings};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub billing_job: BillingJobConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct BillingJobConfig {
    pub enabled: bool,
    /// Daily trigger time, `HH:MM` UTC.
    pub schedule: String,
    pub lock_key: String,
    pub lock_ttl_secs: u64,
    pub lock_max_attempts: u32,
    pub lock_initial_backoff_ms: u64,
}

impl Default for BillingJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "00:00".to_string(),
            lock_key: "billing_job_lock".to_string(),
            lock_ttl_secs: 600,
            lock_max_attempts: 3,
            lock_initial_backoff_ms: 1000,
        }
    }
}

impl BillingJobConfig {
    pub fn schedule(&self) -> Result<DailySchedule, AppError> {
        DailySchedule::parse(&self.schedule)
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            key: self.lock_key.clone(),
            ttl: Duration::from_secs(self.lock_ttl_secs),
            retry: RetryConfig::doubling(
                self.lock_max_attempts,
                Duration::from_millis(self.lock_initial_backoff_ms),
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = BillingJobConfig::default();

        let billing_job = BillingJobConfig {
            enabled: env_parse("BILLING_JOB_ENABLED", defaults.enabled),
            schedule: env::var("BILLING_SCHEDULE_UTC").unwrap_or(defaults.schedule),
            lock_key: env::var("BILLING_LOCK_KEY").unwrap_or(defaults.lock_key),
            lock_ttl_secs: env_parse("BILLING_LOCK_TTL_SECS", defaults.lock_ttl_secs),
            lock_max_attempts: env_parse("BILLING_LOCK_MAX_ATTEMPTS", defaults.lock_max_attempts),
            lock_initial_backoff_ms: env_parse(
                "BILLING_LOCK_INITIAL_BACKOFF_MS",
                defaults.lock_initial_backoff_ms,
            ),
        };
        // Fail at startup rather than at the first trigger
        billing_job.schedule()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "subscription-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://redis:6379".to_string()),
            },
            billing_job,
        })
    }
}
