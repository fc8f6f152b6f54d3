use std::future::Future;
use std::time::Duration;

use tourbook_core::CoreResult;
use tourbook_store::app_config::RetryConfig;

/// Bounded retry for operations that failed on a row-lock timeout.
///
/// Only wrap operations that are safe to run twice. Creating a booking is not.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && tries < self.retries => {
                    tries += 1;
                    tracing::warn!(operation, attempt = tries, "lock timeout, retrying");
                    tokio::time::sleep(self.backoff * tries).await;
                }
                other => return other,
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            retries: config.lock_timeout_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}
