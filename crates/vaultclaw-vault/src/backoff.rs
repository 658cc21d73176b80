//! In-process exponential backoff for a single transient call.
//!
//! This is for retrying within one tick. Failures that should survive across
//! ticks go to the error queue instead.

use std::future::Future;
use std::time::Duration;
use vaultclaw_core::config::RecoveryConfig;
use vaultclaw_core::{Result, VaultClawError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: u32, max: Duration, attempts: u32) -> Self {
        Self {
            base,
            multiplier,
            max,
            attempts: attempts.max(1),
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.backoff_max_ms),
            config.backoff_attempts,
        )
    }

    /// Wait before retry number `retry` (1-based): base × multiplier^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Run `op` up to `policy.attempts` times, sleeping between attempts.
/// Only `Upstream` errors are retried; anything else returns at once.
pub async fn retry_with_backoff<T, F, Fut>(policy: &BackoffPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e @ VaultClawError::Upstream(_)) if attempt < policy.attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "⚠️ {what} failed (attempt {attempt}/{}), retrying in {delay:?}: {e}",
                    policy.attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
