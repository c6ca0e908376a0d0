//! Process configuration, loaded once from the environment at startup.
//!
//! Mirrors the env-var-only configuration style of the source system: no
//! config file format, just `DATABASE_URL` / `API_KEY_ENCRYPTION_SECRET` /
//! `WEBHOOK_BASE_URL` / `PORT` plus the poller and webhook-sweeper tunables.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_key_encryption_secret: String,
    pub webhook_base_url: Option<String>,
    pub port: u16,

    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_poll_attempts: u32,
    pub poll_batch_cap: usize,

    pub webhook_sweep_interval: Duration,
    pub webhook_max_attempts: u32,
    pub webhook_timeout: Duration,
    /// Base and cap for the attempt-indexed retry backoff (30 s ×
    /// 2^attempts, capped). Broken out from fixed constants so tests can
    /// drive a full retry sequence without waiting on real minutes.
    pub webhook_retry_base: Duration,
    pub webhook_retry_cap: Duration,

    /// Per-job-kind concurrency caps for the work queue, e.g. `generateVideo -> 4`.
    /// Kinds absent from this map have no cap.
    pub job_kind_concurrency: HashMap<String, usize>,
}

impl Config {
    /// Load configuration from the process environment. Does not read a
    /// `.env` file itself — the binary entrypoint calls `dotenvy::dotenv()`
    /// before this, the same ordering `ob-poc-web-server` uses.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require("DATABASE_URL")?;
        let api_key_encryption_secret = require("API_KEY_ENCRYPTION_SECRET")?;
        let webhook_base_url = std::env::var("WEBHOOK_BASE_URL").ok().filter(|s| !s.is_empty());
        let port = parse_or("PORT", 8080)?;

        let poll_interval = Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 10)?);
        let initial_backoff = Duration::from_secs(parse_or("INITIAL_BACKOFF_SECS", 5)?);
        let backoff_multiplier = parse_or("BACKOFF_MULTIPLIER", 1.5)?;
        let max_poll_attempts = parse_or("MAX_POLL_ATTEMPTS", 100)?;
        let poll_batch_cap = parse_or("POLL_BATCH_CAP", 50)?;

        let webhook_sweep_interval = Duration::from_secs(parse_or("WEBHOOK_SWEEP_INTERVAL_SECS", 30)?);
        let webhook_max_attempts = parse_or("WEBHOOK_MAX_ATTEMPTS", 5)?;
        let webhook_timeout = Duration::from_secs(parse_or("WEBHOOK_TIMEOUT_SECS", 30)?);
        let webhook_retry_base = Duration::from_secs(parse_or("WEBHOOK_RETRY_BASE_SECS", 30)?);
        let webhook_retry_cap = Duration::from_secs(parse_or("WEBHOOK_RETRY_CAP_SECS", 3600)?);

        Ok(Self {
            database_url,
            api_key_encryption_secret,
            webhook_base_url,
            port,
            poll_interval,
            initial_backoff,
            backoff_multiplier,
            max_poll_attempts,
            poll_batch_cap,
            webhook_sweep_interval,
            webhook_max_attempts,
            webhook_timeout,
            webhook_retry_base,
            webhook_retry_cap,
            job_kind_concurrency: default_concurrency_caps(),
        })
    }
}

fn default_concurrency_caps() -> HashMap<String, usize> {
    // Conservative defaults protecting provider rate limits; installations
    // override by constructing `Config` directly rather than through env,
    // since this isn't a single scalar env var.
    HashMap::from([
        ("generateVideo".to_string(), 4),
        ("generateImage".to_string(), 8),
        ("generateAudio".to_string(), 8),
    ])
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key.to_string(), raw)),
        Err(_) => Ok(default),
    }
}
