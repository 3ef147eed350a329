//! File-backed factory configuration.
//!
//! ```json
//! {
//!   "base_url": "https://api.example.com/v1",
//!   "timeout_ms": 5000,
//!   "headers": { "x-client": "courier" },
//!   "log_level": "debug",
//!   "retry": { "attempts": 3, "backoff": "exponential", "delay_ms": 200 }
//! }
//! ```

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::features::retry::{ExponentialBackoff, RetryPolicy, linear_backoff};
use crate::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Factory settings loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Prefix for relative request URLs.
    pub base_url: Option<String>,
    /// Default timeout; absent or zero disables it.
    pub timeout_ms: Option<u64>,
    /// Headers set on every request.
    pub headers: BTreeMap<String, String>,
    pub log_level: Option<LogLevel>,
    pub credentials: Option<Credentials>,
    pub user_agent: Option<String>,
    /// When present, the factory registers the retry feature with this policy.
    pub retry: Option<RetrySettings>,
}

impl FactoryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid factory config: {e}")))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Retry section of [`FactoryConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    /// Fixed delay, linear step, or exponential initial delay.
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 500,
            backoff: BackoffKind::default(),
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        let policy = RetryPolicy::new(self.attempts);
        match self.backoff {
            BackoffKind::Fixed => policy.delay(delay),
            BackoffKind::Linear => policy.backoff(linear_backoff(delay, max)),
            BackoffKind::Exponential => policy.backoff(
                ExponentialBackoff {
                    initial: delay,
                    multiplier: self.multiplier,
                    max,
                    jitter: self.jitter,
                }
                .into(),
            ),
        }
    }
}
