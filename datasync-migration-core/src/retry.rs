//! Bounded exponential backoff around single provider calls.

use log::warn;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::aws::{ProviderError, TRANSPORT_ERROR_CODE};

/// Error codes AWS uses for throttling and short-lived service trouble.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    TRANSPORT_ERROR_CODE,
];

/// Message fragments IAM, S3 and DataSync return while a new role is still
/// propagating.
const PROPAGATION_MESSAGES: &[&str] = &[
    "invalid principal",
    "invalid identity",
    "cannot be assumed",
    "unable to assume",
    "not authorized to perform: sts:assumerole",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Decides whether a provider error is worth retrying.
///
/// Identity errors count as transient only inside the propagation window
/// that follows a role creation in this run; otherwise they are real
/// permission problems.
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    role_created_at: Option<Instant>,
    propagation_window: Duration,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            role_created_at: None,
            propagation_window: Duration::from_secs(120),
        }
    }
}

impl ErrorClassifier {
    pub fn with_propagation_window(propagation_window: Duration) -> Self {
        Self {
            role_created_at: None,
            propagation_window,
        }
    }

    pub fn role_created(&mut self, at: Instant) {
        self.role_created_at = Some(at);
    }

    fn within_propagation_window(&self) -> bool {
        self.role_created_at
            .is_some_and(|created| created.elapsed() <= self.propagation_window)
    }

    pub fn classify(&self, err: &ProviderError) -> ErrorClass {
        if TRANSIENT_CODES.contains(&err.code.as_str()) {
            return ErrorClass::Retryable;
        }
        if self.within_propagation_window() {
            let message = err.message.to_ascii_lowercase();
            if PROPAGATION_MESSAGES.iter().any(|m| message.contains(m)) {
                return ErrorClass::Retryable;
            }
        }
        ErrorClass::Fatal
    }
}

/// Outcome of a retried call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: ProviderError,
    pub class: ErrorClass,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails with a fatal error, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut, C>(
    policy: RetryPolicy,
    classify: C,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    C: Fn(&ProviderError) -> ErrorClass,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let class = classify(&error);
                if class == ErrorClass::Fatal || attempt >= max_attempts {
                    return Err(RetryFailure {
                        error,
                        class,
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} (attempt {}/{}), retrying in {:?}",
                    error, attempt, max_attempts, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
