use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::{DownloaderError, Result};

/// Exponential backoff settings for a single URL
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(secs)
    }
}

/// Errors we know retrying cannot fix
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DownloaderError>()
        .map_or(false, |e| !e.is_retryable())
}

/// Run `op` until it succeeds, fails permanently or runs out of retries.
///
/// `op` receives the 1-based attempt number. Returns the final result together
/// with the number of attempts made.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> (Result<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(err) => {
                if is_permanent(&err) {
                    tracing::debug!("Not retrying permanent failure: {:#}", err);
                    return (Err(err), attempt);
                }

                if attempt >= policy.max_attempts() {
                    return (Err(err), attempt);
                }

                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "Attempt {}/{} failed: {:#}. Retrying in {:.1}s",
                    attempt,
                    policy.max_attempts(),
                    err,
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    fn transient() -> anyhow::Error {
        DownloaderError::ToolFailed {
            code: "status 1".into(),
            stderr: "ERROR: HTTP Error 503".into(),
        }
        .into()
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let (result, attempts) = retry_with_backoff(&fast_policy(3), |_| {
            calls += 1;
            let fail = calls < 3;
            async move {
                if fail {
                    Err(transient())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (result, attempts): (Result<()>, u32) =
            retry_with_backoff(&fast_policy(2), |_| async { Err(transient()) }).await;

        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (result, attempts): (Result<()>, u32) = retry_with_backoff(&fast_policy(5), |_| async {
            Err(DownloaderError::Unavailable("ERROR: Private video".into()).into())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_untyped_errors_are_retried() {
        let (result, attempts): (Result<()>, u32) =
            retry_with_backoff(&fast_policy(1), |_| async { Err(anyhow::anyhow!("broken pipe")) })
                .await;

        assert!(result.is_err());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_no_retry_policy() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
