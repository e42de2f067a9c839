use std::cmp;
use std::future::Future;
use std::time::Duration;

use tokio::time::{delay_for, timeout};

use super::error::Error;

/// Bounds applied to every remote call.
#[derive(Debug, Clone)]
pub struct Policy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Policy {
    /// Wait before attempt `retry + 1`, doubling from `base_delay` up to `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        cmp::min(self.max_delay, self.base_delay.checked_mul(factor).unwrap_or(self.max_delay))
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up. Each attempt is bounded by `policy.timeout`.
pub async fn with_retry<F, T, Fut>(policy: &Policy, op: &str, mut f: F) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
    F: FnMut() -> Fut,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let e = match timeout(policy.timeout, f()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout { op: op.to_string(), after: policy.timeout },
        };
        if !e.is_retryable() || attempt >= policy.max_attempts {
            return Err(e);
        }
        let wait = policy.backoff(attempt);
        tracing::warn!(op, attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying");
        delay_for(wait).await;
    }
}
