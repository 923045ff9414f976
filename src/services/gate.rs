use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a single call to an external ML/LLM provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else {
            ProviderError::Connection(err.to_string())
        }
    }
}

impl ProviderError {
    /// Map a non-success HTTP status to a provider error
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => ProviderError::RateLimited,
            408 => ProviderError::Timeout,
            401 | 403 => ProviderError::Unauthorized(message),
            _ => ProviderError::Api { status, message },
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited
            | ProviderError::Timeout
            | ProviderError::Connection(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Unauthorized(_) | ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// Hard failure surfaced by the gate; never retried
#[derive(Debug, Error)]
pub enum GateError {
    #[error("{operation} failed: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: ProviderError,
    },
}

impl GateError {
    /// Rejected credentials; every later call would fail the same way
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            GateError::Fatal { source: ProviderError::Unauthorized(_), .. }
        )
    }
}

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    RetryableFailure(ProviderError),
    FatalFailure(ProviderError),
}

/// Retry, backoff and timeout parameters for external calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to every attempt; keep it below the caller's request budget
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            call_timeout: Duration::from_millis(700),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: base * 2^attempt, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wraps calls to external providers with bounded retries, exponential
/// backoff and a per-attempt timeout.
///
/// Exhausted retries yield `Ok(None)`; callers treat absence as an expected
/// outcome. Fatal failures yield `Err` on the first attempt.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    policy: RetryPolicy,
}

impl Gate {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn call_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<Option<T>, GateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.policy.max_retries + 1;

        for attempt in 0..attempts {
            match self.attempt(&mut op).await {
                Attempt::Success(value) => {
                    if attempt > 0 {
                        tracing::debug!("{} succeeded on attempt {}", operation, attempt + 1);
                    }
                    return Ok(Some(value));
                }
                Attempt::FatalFailure(source) => {
                    tracing::error!("{} failed with non-retryable error: {}", operation, source);
                    return Err(GateError::Fatal {
                        operation: operation.to_string(),
                        source,
                    });
                }
                Attempt::RetryableFailure(err) => {
                    if attempt + 1 < attempts {
                        let delay = self.policy.backoff(attempt);
                        tracing::warn!(
                            "{} attempt {}/{} failed ({}), retrying in {:?}",
                            operation,
                            attempt + 1,
                            attempts,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        tracing::warn!(
                            "{} gave up after {} attempts, last error: {}",
                            operation,
                            attempts,
                            err
                        );
                    }
                }
            }
        }

        Ok(None)
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.policy.call_timeout, op()).await {
            Err(_) => Attempt::RetryableFailure(ProviderError::Timeout),
            Ok(Ok(value)) => Attempt::Success(value),
            Ok(Err(err)) if err.is_retryable() => Attempt::RetryableFailure(err),
            Ok(Err(err)) => Attempt::FatalFailure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_gate(max_retries: u32) -> Gate {
        Gate::new(RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
        })
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let gate = fast_gate(2);
        let result = gate
            .call_with_retry("test", || async { Ok::<_, ProviderError>("success") })
            .await
            .unwrap();
        assert_eq!(result, Some("success"));
    }

    #[tokio::test]
    async fn test_two_rate_limits_then_success() {
        let gate = fast_gate(2);
        let calls = AtomicU32::new(0);

        let result = gate
            .call_with_retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ProviderError::RateLimited)
                    } else {
                        Ok("success")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Some("success"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_returns_none() {
        let gate = fast_gate(2);
        let calls = AtomicU32::new(0);

        let result: Option<()> = gate
            .call_with_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Connection("reset".into())) }
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let gate = fast_gate(2);
        let calls = AtomicU32::new(0);

        let result: Result<Option<()>, GateError> = gate
            .call_with_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Unauthorized("bad key".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(GateError::Fatal { source: ProviderError::Unauthorized(_), .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out_and_retries() {
        let gate = Gate::new(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            call_timeout: Duration::from_millis(20),
        });
        let calls = AtomicU32::new(0);

        let result = gate
            .call_with_retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Ok::<_, ProviderError>(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Some(2));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            call_timeout: Duration::from_millis(700),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::from_status(429, String::new()).is_retryable());
        assert!(ProviderError::from_status(503, String::new()).is_retryable());
        assert!(!ProviderError::from_status(401, String::new()).is_retryable());
        assert!(!ProviderError::from_status(400, String::new()).is_retryable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_retryable());
    }
}
