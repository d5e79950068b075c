//! Decision model: what to do after a job asks to be retried.
//!
//! Deciders are pure: given the attempts so far they return the next action.
//! The scheduler carries the decision out.

use std::time::Duration;

use crate::app::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Re-attempt the job after a delay.
    Retry { delay: Duration, reason: String },

    /// Stop retrying; the job becomes `Failed`.
    GiveUp { reason: String },
}

pub trait Decider: Send + Sync {
    /// # Arguments
    /// * `attempts` - executions made so far, including the one that asked to retry
    /// * `reason` - the reason the job gave
    fn decide(&self, attempts: u32, reason: &str) -> Decision;
}

/// Attempt-capped retries with the backoff from a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, attempts: u32, reason: &str) -> Decision {
        let max_attempts = self.retry_policy.max_attempts;
        if attempts >= max_attempts {
            Decision::GiveUp {
                reason: format!("retry cap reached ({attempts}/{max_attempts}): {reason}"),
            }
        } else {
            let delay = self.retry_policy.next_delay(attempts);
            Decision::Retry {
                delay,
                reason: format!(
                    "retry attempt {}/{} after {:?}: {reason}",
                    attempts + 1,
                    max_attempts,
                    delay
                ),
            }
        }
    }
}
