//! Engine configuration: defaults plus environment overrides.

use std::time::Duration;

use log::warn;

use crate::sync::{
    BACKGROUND_SYNC_INTERVAL_SECS, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS, OUTBOX_MAX_ATTEMPTS,
};

const ENV_LOCAL_CACHE: &str = "STUDYDECK_LOCAL_CACHE";
const ENV_RETRY_MAX_ATTEMPTS: &str = "STUDYDECK_RETRY_MAX_ATTEMPTS";
const ENV_RETRY_BASE_DELAY_MS: &str = "STUDYDECK_RETRY_BASE_DELAY_MS";
const ENV_ATTEMPT_TIMEOUT_SECS: &str = "STUDYDECK_ATTEMPT_TIMEOUT_SECS";
const ENV_SYNC_INTERVAL_SECS: &str = "STUDYDECK_SYNC_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Deadline for a single attempt. `None` leaves it to the transport.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            attempt_timeout: Some(Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Dual-write against a local cache (default). When false, repositories
    /// read and write the remote service directly.
    pub local_cache_enabled: bool,
    pub retry: RetryConfig,
    pub background_interval: Duration,
    /// Replays before an outbox entry is dead-lettered.
    pub outbox_max_attempts: u32,
    /// Pull cards group by group instead of with a single query.
    pub pull_cards_per_group: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_cache_enabled: true,
            retry: RetryConfig::default(),
            background_interval: Duration::from_secs(BACKGROUND_SYNC_INTERVAL_SECS),
            outbox_max_attempts: OUTBOX_MAX_ATTEMPTS,
            pull_cards_per_group: false,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `STUDYDECK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = read_parsed(&lookup, ENV_LOCAL_CACHE, parse_flag) {
            config.local_cache_enabled = value;
        }
        if let Some(value) = read_parsed(&lookup, ENV_RETRY_MAX_ATTEMPTS, |v| v.parse::<u32>().ok())
        {
            config.retry.max_attempts = value.max(1);
        }
        if let Some(value) = read_parsed(&lookup, ENV_RETRY_BASE_DELAY_MS, |v| v.parse::<u64>().ok())
        {
            config.retry.base_delay = Duration::from_millis(value);
        }
        if let Some(value) =
            read_parsed(&lookup, ENV_ATTEMPT_TIMEOUT_SECS, |v| v.parse::<u64>().ok())
        {
            config.retry.attempt_timeout = (value > 0).then(|| Duration::from_secs(value));
        }
        if let Some(value) = read_parsed(&lookup, ENV_SYNC_INTERVAL_SECS, |v| v.parse::<u64>().ok())
        {
            config.background_interval = Duration::from_secs(value.max(1));
        }

        config
    }
}

fn read_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = parse(trimmed);
    if parsed.is_none() {
        warn!("[Config] Ignoring invalid value '{}' for {}", trimmed, key);
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
