//! Shared retry combinator for transient failures.
//!
//! Every site that can hit a transient error (embedding calls, flaky I/O)
//! goes through [`retry_with_backoff`] so attempt counts and delays are not
//! duplicated with slightly different constants across the codebase.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Backoff schedule: `base_delay * 2^attempt` between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op`, retrying on [`EngineError::TransientItem`] with exponential
/// backoff. Any other error returns immediately. Once attempts are
/// exhausted the transient error is elevated to a permanent one so callers
/// stop retrying.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(EngineError::permanent(
                    op_name,
                    format!("gave up after {} attempts: {err}", policy.max_attempts),
                ));
            }
            Err(err) => return Err(err),
        }
    }
}
