//! Scheduler configuration.
//!
//! `SchedulerConfig::default()` の値は単体で安全に動くもの（retry は上限あり）。
//! `from_env()` は `TANDEM_*` 環境変数で上書きします（.env の読み込みは binary 側）。

use std::env;
use std::time::Duration;

use super::retry::RetryPolicy;

pub const ENV_POLL_INTERVAL_MS: &str = "TANDEM_CONSTRAINT_POLL_INTERVAL_MS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "TANDEM_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MULTIPLIER: &str = "TANDEM_RETRY_MULTIPLIER";
pub const ENV_MAX_ATTEMPTS: &str = "TANDEM_MAX_ATTEMPTS";
pub const ENV_BLOCKED_TIMEOUT_MS: &str = "TANDEM_BLOCKED_TIMEOUT_MS";
pub const ENV_MAX_CONCURRENT_JOBS: &str = "TANDEM_MAX_CONCURRENT_JOBS";

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often a Blocked job re-checks its constraints.
    pub constraint_poll_interval: Duration,

    /// Backoff and attempt cap for `Outcome::Retry`.
    pub retry: RetryPolicy,

    /// Fail a job that stays Blocked this long. `None` waits indefinitely.
    pub blocked_timeout: Option<Duration>,

    /// Job executions allowed at once across all chains.
    pub max_concurrent_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            constraint_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            blocked_timeout: None,
            max_concurrent_jobs: 4,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `TANDEM_*` variables. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>(ENV_POLL_INTERVAL_MS) {
            config.constraint_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(ENV_RETRY_BASE_DELAY_MS) {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(m) = env_parse::<f64>(ENV_RETRY_MULTIPLIER) {
            config.retry.multiplier = m;
        }
        if let Some(n) = env_parse::<u32>(ENV_MAX_ATTEMPTS) {
            config.retry.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>(ENV_BLOCKED_TIMEOUT_MS) {
            config.blocked_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(n) = env_parse::<usize>(ENV_MAX_CONCURRENT_JOBS) {
            config.max_concurrent_jobs = n.max(1);
        }
        config
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.constraint_poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_blocked_timeout(mut self, timeout: Duration) -> Self {
        self.blocked_timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
