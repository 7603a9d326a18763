//! Bounded retry for read-only adapter queries.
//!
//! Mirrors the reference implementation's `query_retry` decorator: wrap a
//! fallible async operation, retry transient failures up to a bound, and
//! either return a default value or re-raise once exhausted.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// What happens once `max_attempts` have been exhausted.
#[derive(Debug, Clone)]
pub enum OnExhaustion<T> {
    /// Swallow the error and return this value.
    ReturnDefault(T),
    /// Propagate the last error.
    Reraise,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy<T> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub on_exhaustion: OnExhaustion<T>,
}

impl<T: Clone> RetryPolicy<T> {
    pub fn reraise(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            on_exhaustion: OnExhaustion::Reraise,
        }
    }

    pub fn return_default(max_attempts: u32, base_delay: Duration, default: T) -> Self {
        Self {
            max_attempts,
            base_delay,
            on_exhaustion: OnExhaustion::ReturnDefault(default),
        }
    }

    /// Run `op`, retrying on `Err` up to `max_attempts` times with a fixed
    /// delay between attempts. On exhaustion, either returns the configured
    /// default or the last error, per `on_exhaustion`.
    pub async fn run<F, Fut, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "retryable query failed");
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.base_delay).await;
                    }
                }
            }
        }

        match &self.on_exhaustion {
            OnExhaustion::ReturnDefault(default) => Ok(default.clone()),
            OnExhaustion::Reraise => Err(last_err.expect("at least one attempt was made")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn return_default_after_exhaustion() {
        let policy = RetryPolicy::return_default(3, Duration::from_millis(1), (0i32, 0i32));
        let calls = AtomicU32::new(0);
        let result: Result<(i32, i32), &str> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("transient")
            })
            .await;
        assert_eq!(result.unwrap(), (0, 0));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reraise_after_exhaustion() {
        let policy: RetryPolicy<i32> = RetryPolicy::reraise(2, Duration::from_millis(1));
        let result = policy.run(|| async { Err::<i32, _>("still failing") }).await;
        assert_eq!(result.unwrap_err(), "still failing");
    }

    #[tokio::test]
    async fn succeeds_without_exhausting_attempts() {
        let policy = RetryPolicy::reraise(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
