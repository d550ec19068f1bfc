//! Exponential backoff with jitter for calls to external collaborators.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::provider::ProviderError;

/// Retry knobs. `retries` is the total number of calls, not the number of
/// calls after the first one.
pub struct RetryOptions<E> {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E: 'static> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 2000,
            factor: 2.0,
            should_retry: Arc::new(|_: &E| true),
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            factor: self.factor,
            should_retry: Arc::clone(&self.should_retry),
        }
    }
}

impl<E> RetryOptions<E> {
    pub fn with_should_retry(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Arc::new(f);
        self
    }

    /// Un-jittered delay after the given 1-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Run `op` until it succeeds, the classifier declines the error, or
/// `retries` calls have been made. The last error is returned as-is.
pub async fn with_retry<T, E, F, Fut>(mut op: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let retries = options.retries.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !(options.should_retry)(&err) || attempt >= retries {
                    return Err(err);
                }

                let backoff = options.backoff(attempt);
                let jitter = rand::rng().random_range(0.5..=1.0);
                let delay = backoff.mul_f64(jitter);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry classifier for catalog provider calls. Rate limits, server errors
/// and transport blips are retried; unrecognised failures are retried too.
pub fn should_retry_provider_error(err: &ProviderError) -> bool {
    err.is_retryable()
}

impl RetryOptions<ProviderError> {
    /// Default timing with the provider classifier.
    pub fn for_provider() -> Self {
        Self::default().with_should_retry(should_retry_provider_error)
    }
}
