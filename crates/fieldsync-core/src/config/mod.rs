//! Engine tuning configuration.
//!
//! Operator policy (auto sync, retries, strategy) lives in the persisted
//! `SyncPreferences`. `EngineConfig` holds the host-level knobs: timeouts,
//! pauses, and backoff, loadable from a JSON file and environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const ENV_ITEM_TIMEOUT_MS: &str = "FIELDSYNC_ITEM_TIMEOUT_MS";
const ENV_THROTTLE_PAUSE_MS: &str = "FIELDSYNC_THROTTLE_PAUSE_MS";
const ENV_RETRY_BACKOFF_BASE_MS: &str = "FIELDSYNC_RETRY_BACKOFF_BASE_MS";
const ENV_RETRY_BACKOFF_MAX_MS: &str = "FIELDSYNC_RETRY_BACKOFF_MAX_MS";
const ENV_EVENT_CAPACITY: &str = "FIELDSYNC_EVENT_CAPACITY";

/// Host-level engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound for one remote call; exceeding it counts as a failure
    pub item_timeout_ms: u64,
    /// Pause inserted between items while over the bandwidth limit
    pub throttle_pause_ms: u64,
    /// First retry delay; doubles per failure. Zero disables backoff
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Buffered events per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            item_timeout_ms: 5_000,
            throttle_pause_ms: 1_000,
            retry_backoff_base_ms: 2_000,
            retry_backoff_max_ms: 5 * 60 * 1_000,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub const fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub const fn throttle_pause(&self) -> Duration {
        Duration::from_millis(self.throttle_pause_ms)
    }

    /// Delay before the next attempt after `retry_count` failures
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        if self.retry_backoff_base_ms == 0 || retry_count == 0 {
            return Duration::ZERO;
        }
        let exponent = retry_count.saturating_sub(1).min(20);
        let delay = self
            .retry_backoff_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.retry_backoff_max_ms);
        Duration::from_millis(delay)
    }

    /// Parse a JSON config document
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidInput(format!("invalid engine config: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Apply `FIELDSYNC_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = parse_env_u64(&lookup, ENV_ITEM_TIMEOUT_MS)? {
            self.item_timeout_ms = value;
        }
        if let Some(value) = parse_env_u64(&lookup, ENV_THROTTLE_PAUSE_MS)? {
            self.throttle_pause_ms = value;
        }
        if let Some(value) = parse_env_u64(&lookup, ENV_RETRY_BACKOFF_BASE_MS)? {
            self.retry_backoff_base_ms = value;
        }
        if let Some(value) = parse_env_u64(&lookup, ENV_RETRY_BACKOFF_MAX_MS)? {
            self.retry_backoff_max_ms = value;
        }
        if let Some(value) = parse_env_u64(&lookup, ENV_EVENT_CAPACITY)? {
            self.event_capacity = usize::try_from(value).unwrap_or(usize::MAX);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.item_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "item_timeout_ms must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidInput(
                "event_capacity must be positive".to_string(),
            ));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(Error::InvalidInput(
                "retry_backoff_max_ms must not be below retry_backoff_base_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer")))
}
