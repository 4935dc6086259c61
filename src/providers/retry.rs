use std::future::Future;
use std::time::Duration;

use super::types::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay before retrying after `error`. A server-sent `Retry-After`
    /// lengthens the backoff but never past `max_delay`.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.delay_for(attempt);
        match error {
            ProviderError::RateLimited {
                retry_after_secs: Some(secs),
            } => Duration::from_secs(*secs).max(backoff).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Run `op`, retrying retryable failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && e.is_retryable() => {
                let delay = config.delay_after(attempt, &e);
                tracing::warn!(
                    "Chat completion failed (attempt {}/{}). Retrying in {}ms: {}",
                    attempt + 1,
                    config.max_retries + 1,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for(3), Duration::from_millis(8000));
        assert_eq!(config.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(config.delay_for(40), Duration::from_millis(10_000));
    }

    #[test]
    fn retry_after_lengthens_backoff_up_to_the_cap() {
        let config = RetryConfig::default();
        let limited = |secs| ProviderError::RateLimited {
            retry_after_secs: Some(secs),
        };

        assert_eq!(config.delay_after(0, &limited(5)), Duration::from_secs(5));
        assert_eq!(config.delay_after(0, &limited(60)), Duration::from_millis(10_000));
        assert_eq!(config.delay_after(1, &limited(0)), Duration::from_millis(2000));
        assert_eq!(
            config.delay_after(0, &ProviderError::RateLimited { retry_after_secs: None }),
            Duration::from_millis(1000)
        );
        assert_eq!(
            config.delay_after(2, &ProviderError::NetworkError("reset".into())),
            Duration::from_millis(4000)
        );
    }

    #[tokio::test]
    async fn rate_limited_retry_waits_for_retry_after() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(2),
            ..fast()
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = std::time::Instant::now();
        let result = with_retry(&config, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::RateLimited {
                    retry_after_secs: Some(1),
                })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast(), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::RateLimited { retry_after_secs: None })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::NetworkError("reset".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::NetworkError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::ContentFiltered("policy".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::ContentFiltered(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
