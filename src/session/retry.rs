use std::time::Duration;

use crate::config::RetryConfig;

/// Bounded exponential backoff for re-arming failed sessions.
///
/// The session itself never reconnects; the caller consults this policy
/// between attempts. The same discipline covers transient token endpoint
/// failures, so there is exactly one retry curve in the system.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_delay_secs),
            cap: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based). `None` once
    /// the attempt budget is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exponent);
        Some(delay.min(self.cap))
    }
}
