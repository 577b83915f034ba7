//! Polling and retry policies.
//!
//! Both are plain serde structs so they can be set from the config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how long to wait on a transcription job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay before the first status check, and between checks
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Status checks allowed before giving up with a timeout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay multiplier per check (1.0 = fixed interval)
    #[serde(default = "default_poll_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on a single delay
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: u64,
}

fn default_interval() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    90
} // 15 min at the fixed interval
fn default_poll_multiplier() -> f64 {
    1.0
}
fn default_max_interval() -> u64 {
    60
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_poll_multiplier(),
            max_interval_seconds: default_max_interval(),
        }
    }
}

impl PollPolicy {
    /// Delay before status check `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(
            self.interval_seconds as f64 * 1000.0,
            self.backoff_multiplier,
            self.max_interval_seconds as f64 * 1000.0,
            attempt,
        )
    }

    /// Longest total wait before a timeout is raised
    pub fn max_wait(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_for_attempt(a)).sum()
    }
}

/// Automatic retry for transient stage failures (upload, fetch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_retry_attempts() -> u32 {
    1
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt; retries are left to the caller
    pub fn none() -> Self {
        Self::default()
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(
            self.initial_delay_ms as f64,
            self.backoff_multiplier,
            self.max_delay_ms as f64,
            attempt,
        )
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

fn backoff(initial_ms: f64, multiplier: f64, max_ms: f64, attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::from_millis(initial_ms.min(max_ms) as u64);
    }

    let delay = initial_ms * multiplier.powi((attempt - 1) as i32);
    Duration::from_millis(delay.min(max_ms) as u64)
}
