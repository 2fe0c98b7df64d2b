//! Fixed-delay retry combinator for upstream calls

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default pause between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);
/// Pre-call throttle required by the document provider.
pub const DOCUMENT_THROTTLE: Duration = Duration::from_millis(400);

/// Retry configuration for one upstream call site
///
/// Delays are fixed; there is no backoff growth.
///
/// # Example
///
/// ```
/// use calsync_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed()
///     .with_max_attempts(3)
///     .with_delay(Duration::from_millis(1000))
///     .with_throttle(Duration::from_millis(400));
/// assert!(policy.has_attempts_remaining(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay between a failure and the next attempt
    #[serde(with = "duration_millis")]
    pub delay: Duration,

    /// Sleep before every attempt, including the first
    #[serde(default, with = "option_duration_millis")]
    pub throttle: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed()
    }
}

impl RetryPolicy {
    /// 3 attempts, 1 second apart, no throttle
    pub fn fixed() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            throttle: None,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            throttle: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// The last failure is returned unchanged.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, op, |_| true).await
}

/// Like [`retry`], but a failure for which `should_retry` is false is
/// returned immediately.
pub async fn retry_if<F, Fut, T, E, P>(policy: &RetryPolicy, mut op: F, should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        if let Some(throttle) = policy.throttle {
            tokio::time::sleep(throttle).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(&e) || !policy.has_attempts_remaining(attempt) {
                    return Err(e);
                }
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Upstream call failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fixed_defaults() {
        let policy = RetryPolicy::fixed();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(1000));
        assert!(policy.throttle.is_none());
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::fixed().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed();

        let counter = calls.clone();
        let result: Result<&str, String> = retry(&policy, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {n}"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_fails_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed();
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), String> = retry(&policy, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {n}"))
            }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two delays between three attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_if_stops_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed();

        let counter = calls.clone();
        let result: Result<(), String> = retry_if(
            &policy,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("not found".to_string())
                }
            },
            |e| e != "not found",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_applies_before_each_attempt() {
        let policy = RetryPolicy::fixed()
            .with_delay(Duration::from_millis(1000))
            .with_throttle(DOCUMENT_THROTTLE);
        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<u32, String> = retry(&policy, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Err("flaky".into())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        // throttle + delay + throttle
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1800) && elapsed < Duration::from_millis(1900));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::fixed().with_throttle(Duration::from_millis(400));

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
