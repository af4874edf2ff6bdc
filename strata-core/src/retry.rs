//! Retrier - Retry an operation while its errors are retryable
//!
//! Used for eventual-consistency windows where a remote API transiently rejects a
//! request that will soon succeed (an IAM role that has not propagated yet, a
//! queue that is not visible yet). The budget is a wall-clock timeout. Once it
//! is spent the operation gets exactly one last attempt, so a call that was
//! about to succeed is never cut off by a sleep that overshot the deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, DelayPolicy};
use crate::deadline::{Deadline, cancelled};
use crate::provider::{ProviderError, ProviderResult};

/// Error returned by [`Retrier::retry`]
#[derive(Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired before an attempt finished
    Cancelled,
    /// The last attempt failed, either with a non-retryable error or after the
    /// budget was exhausted
    Failed(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "operation cancelled while retrying"),
            RetryError::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed(e) => Some(e),
        }
    }
}

/// Signature of an error that should be retried: an optional error code plus a
/// substring of the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableMessage {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl RetryableMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Match on message text alone
    pub fn containing(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn matches(&self, err: &ProviderError) -> bool {
        if let Some(code) = &self.code
            && err.code.as_deref() != Some(code.as_str())
        {
            return false;
        }
        err.message.contains(&self.message)
    }
}

/// Retries an operation until it succeeds, fails with a non-retryable error, or
/// the timeout is spent.
#[derive(Debug, Clone)]
pub struct Retrier {
    timeout: Duration,
    policy: DelayPolicy,
    cancel: Option<CancellationToken>,
}

impl Retrier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            policy: DelayPolicy::default().with_min(Duration::from_millis(500)),
            cancel: None,
        }
    }

    pub fn with_policy(mut self, policy: DelayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `op` until it succeeds or `is_retryable` rejects its error.
    ///
    /// After the timeout elapses `op` runs one final time and that result is
    /// returned as-is. Sleeps never extend past the deadline.
    pub async fn retry<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let deadline = Deadline::after(self.timeout);
        let mut backoff = Backoff::new(self.policy.clone());
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancelled(self.cancel.as_ref()) => return Err(RetryError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Failed(e)),
                Err(e) => debug!("attempt {} failed with retryable error: {}", attempts, e),
            }

            if deadline.has_elapsed() {
                break;
            }
            let delay = backoff.next_delay().min(deadline.remaining());
            tokio::select! {
                biased;
                _ = cancelled(self.cancel.as_ref()) => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if deadline.has_elapsed() {
                break;
            }
        }

        warn!(
            "retry timeout of {:?} exhausted after {} attempts, making a final attempt",
            self.timeout, attempts
        );
        tokio::select! {
            biased;
            _ = cancelled(self.cancel.as_ref()) => Err(RetryError::Cancelled),
            result = op() => result.map_err(RetryError::Failed),
        }
    }

    /// Retry while the error is transient or matches one of `messages`
    pub async fn retry_on<T, F, Fut>(&self, op: F, messages: &[RetryableMessage]) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.retry(op, |e: &ProviderError| {
            e.is_transient() || messages.iter().any(|m| m.matches(e))
        })
        .await
        .map_err(ProviderError::from)
    }

    /// Retry while the error says the resource does not exist yet
    pub async fn retry_when_not_found<T, F, Fut>(&self, op: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.retry(op, ProviderError::is_not_found)
            .await
            .map_err(ProviderError::from)
    }
}
