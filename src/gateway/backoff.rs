//! Bounded exponential backoff for gateway connects
//!
//! A fixed attempt budget with the base delay doubling each attempt and a
//! small jitter. There is deliberately no unbounded retry loop: after the
//! budget is spent the error surfaces as that room's failure.

use crate::error::Result;
use crate::gateway::BoxedGateway;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Retry policy for gateway connection attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Fraction of the delay randomized away (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based; attempt 1 has no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doubled = self
            .base_delay
            .saturating_mul(1u32 << (attempt - 2).min(16));
        doubled.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = self.jitter_factor.min(1.0);
        let scale = 1.0 - rand::thread_rng().gen_range(0.0..factor);
        delay.mul_f64(scale)
    }
}

/// Connect a gateway under the given retry policy
///
/// Retries only errors classified as retryable; anything else surfaces
/// immediately. On final failure the gateway is left untouched for the caller
/// to drop; no handle is retained anywhere.
pub async fn connect_with_backoff(
    gateway: &mut BoxedGateway,
    policy: &RetryPolicy,
    target: &str,
) -> Result<()> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match gateway.connect().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(%target, attempt, "gateway connected after retry");
                }
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(%target, attempt, max_attempts = attempts, error = %e, "gateway connect failed, retrying");
                let delay = policy.jittered(policy.delay_for_attempt(attempt + 1));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
