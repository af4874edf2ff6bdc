//! StateWaiter - Poll a resource until it reaches a target status
//!
//! Long-running remote operations (creating a cluster, starting a stream) finish
//! asynchronously. A [`StateWaiter`] repeatedly calls a refresh function that
//! reports the current [`Observation`] and classifies the reported status:
//!
//! - a status in the target set counts toward `continuous_target_occurrence`
//!   and ends the wait successfully once enough consecutive hits are seen
//! - a status in the pending set keeps polling
//! - any other status ends the wait with [`WaitError::UnexpectedState`]
//!
//! A resource that is not found is tolerated `not_found_checks` times in a row
//! while waiting for it to appear. With an empty target set, not found is the
//! goal (used when waiting for deletion) and the wait returns `Ok(None)`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, DelayPolicy};
use crate::config::format_duration;
use crate::deadline::{Deadline, cancelled};

/// Result of a single refresh call
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T, S> {
    Found { resource: T, status: S },
    NotFound,
}

impl<T, S> Observation<T, S> {
    pub fn found(resource: T, status: S) -> Self {
        Observation::Found { resource, status }
    }
}

/// Error returned by [`StateWaiter::wait`]
#[derive(Debug)]
pub enum WaitError<T, E> {
    /// The resource stayed missing for more than the allowed number of checks
    NotFound { checks: u32 },
    /// The timeout elapsed before the target status was reached
    Timeout {
        timeout: Duration,
        expected: Vec<String>,
        last_status: Option<String>,
        last_resource: Option<T>,
        last_error: Option<String>,
    },
    /// The resource reported a status that is neither pending nor target
    UnexpectedState {
        status: String,
        expected: Vec<String>,
        last_resource: Option<T>,
        last_error: Option<String>,
    },
    Cancelled { last_status: Option<String> },
    /// The refresh function itself failed
    Refresh(E),
}

impl<T, E> WaitError<T, E> {
    /// Last observed resource, when the error carries one
    pub fn last_resource(&self) -> Option<&T> {
        match self {
            WaitError::Timeout { last_resource, .. }
            | WaitError::UnexpectedState { last_resource, .. } => last_resource.as_ref(),
            _ => None,
        }
    }

    pub fn last_status(&self) -> Option<&str> {
        match self {
            WaitError::Timeout { last_status, .. } | WaitError::Cancelled { last_status } => {
                last_status.as_deref()
            }
            WaitError::UnexpectedState { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WaitError::NotFound { .. })
    }

    /// Attach failure reasons extracted from the last observed resource.
    ///
    /// Reasons are joined with `"; "` into the error's `last_error`; an empty
    /// list leaves the error untouched.
    pub fn with_failure_reasons<F, I>(mut self, reasons: F) -> Self
    where
        F: FnOnce(&T) -> I,
        I: IntoIterator<Item = String>,
    {
        if let WaitError::Timeout {
            last_resource: Some(resource),
            last_error,
            ..
        }
        | WaitError::UnexpectedState {
            last_resource: Some(resource),
            last_error,
            ..
        } = &mut self
        {
            let joined = reasons(&*resource)
                .into_iter()
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                *last_error = Some(joined);
            }
        }
        self
    }

    /// Map the refresh error type
    pub fn map_refresh<F, E2>(self, f: F) -> WaitError<T, E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            WaitError::NotFound { checks } => WaitError::NotFound { checks },
            WaitError::Timeout {
                timeout,
                expected,
                last_status,
                last_resource,
                last_error,
            } => WaitError::Timeout {
                timeout,
                expected,
                last_status,
                last_resource,
                last_error,
            },
            WaitError::UnexpectedState {
                status,
                expected,
                last_resource,
                last_error,
            } => WaitError::UnexpectedState {
                status,
                expected,
                last_resource,
                last_error,
            },
            WaitError::Cancelled { last_status } => WaitError::Cancelled { last_status },
            WaitError::Refresh(e) => WaitError::Refresh(f(e)),
        }
    }
}

impl<T, E: fmt::Display> fmt::Display for WaitError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::NotFound { checks } => {
                write!(f, "couldn't find resource ({} retries)", checks)
            }
            WaitError::Timeout {
                timeout,
                expected,
                last_status,
                last_error,
                ..
            } => {
                write!(
                    f,
                    "timeout while waiting for state to become '{}' (last state: '{}', timeout: {})",
                    expected.join(", "),
                    last_status.as_deref().unwrap_or(""),
                    format_duration(*timeout)
                )?;
                if let Some(e) = last_error {
                    write!(f, ": {}", e)?;
                }
                Ok(())
            }
            WaitError::UnexpectedState {
                status,
                expected,
                last_error,
                ..
            } => {
                write!(
                    f,
                    "unexpected state '{}', wanted target '{}'",
                    status,
                    expected.join(", ")
                )?;
                if let Some(e) = last_error {
                    write!(f, ": {}", e)?;
                }
                Ok(())
            }
            WaitError::Cancelled { last_status } => write!(
                f,
                "cancelled while waiting for state (last state: '{}')",
                last_status.as_deref().unwrap_or("")
            ),
            WaitError::Refresh(e) => write!(f, "{}", e),
        }
    }
}

impl<T, E> std::error::Error for WaitError<T, E>
where
    T: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WaitError::Refresh(e) => Some(e),
            _ => None,
        }
    }
}

/// Polls a refresh function until the observed status is in `target`
#[derive(Debug, Clone)]
pub struct StateWaiter<S> {
    pending: Vec<S>,
    target: Vec<S>,
    timeout: Duration,
    delay: Duration,
    policy: DelayPolicy,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
    cancel: Option<CancellationToken>,
}

impl<S> StateWaiter<S>
where
    S: PartialEq + fmt::Display,
{
    pub fn new(
        pending: impl IntoIterator<Item = S>,
        target: impl IntoIterator<Item = S>,
        timeout: Duration,
    ) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            target: target.into_iter().collect(),
            timeout,
            delay: Duration::ZERO,
            policy: DelayPolicy::default(),
            not_found_checks: 20,
            continuous_target_occurrence: 1,
            cancel: None,
        }
    }

    /// Wait this long before the first poll
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_policy(mut self, policy: DelayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Number of consecutive target observations required (at least 1)
    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `refresh` until the target status is reached.
    ///
    /// Returns the last observed resource, or `None` when the target set is
    /// empty and the resource disappeared. At least one poll always happens
    /// even with a zero timeout.
    pub async fn wait<T, E, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T, S>, E>>,
    {
        let deadline = Deadline::after(self.timeout);
        let mut backoff = Backoff::new(self.policy.clone());
        let mut last_status: Option<String> = None;
        let mut last_resource: Option<T> = None;
        let mut not_found_ticks = 0u32;
        let mut target_occurrence = 0u32;
        let mut polls = 0u32;

        debug!(
            "waiting up to {} for state to become '{}'",
            format_duration(self.timeout),
            self.expected().join(", ")
        );

        if !self.delay.is_zero() {
            let delay = self.delay.min(deadline.remaining());
            tokio::select! {
                biased;
                _ = cancelled(self.cancel.as_ref()) => {
                    return Err(WaitError::Cancelled { last_status: None });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        loop {
            polls += 1;
            let observation = tokio::select! {
                biased;
                _ = cancelled(self.cancel.as_ref()) => {
                    return Err(WaitError::Cancelled { last_status });
                }
                result = tokio::time::timeout_at(deadline.instant(), refresh()) => match result {
                    Ok(Ok(observation)) => observation,
                    Ok(Err(e)) => return Err(WaitError::Refresh(e)),
                    Err(_) => return Err(self.timeout_error(last_status, last_resource)),
                },
            };

            match observation {
                Observation::NotFound if self.target.is_empty() => {
                    target_occurrence += 1;
                    if target_occurrence >= self.continuous_target_occurrence {
                        debug!("resource is gone after {} polls", polls);
                        return Ok(None);
                    }
                }
                Observation::NotFound => {
                    target_occurrence = 0;
                    not_found_ticks += 1;
                    if not_found_ticks > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: not_found_ticks,
                        });
                    }
                    trace!(
                        "resource not found ({}/{} checks)",
                        not_found_ticks, self.not_found_checks
                    );
                }
                Observation::Found { resource, status } => {
                    not_found_ticks = 0;
                    let status_text = status.to_string();
                    trace!("poll {}: state is '{}'", polls, status_text);

                    if self.target.contains(&status) {
                        target_occurrence += 1;
                        if target_occurrence >= self.continuous_target_occurrence {
                            debug!("reached state '{}' after {} polls", status_text, polls);
                            return Ok(Some(resource));
                        }
                    } else if self.pending.contains(&status) {
                        target_occurrence = 0;
                    } else {
                        warn!(
                            "unexpected state '{}', wanted target '{}'",
                            status_text,
                            self.expected().join(", ")
                        );
                        return Err(WaitError::UnexpectedState {
                            status: status_text,
                            expected: self.expected(),
                            last_resource: Some(resource),
                            last_error: None,
                        });
                    }
                    last_status = Some(status_text);
                    last_resource = Some(resource);
                }
            }

            if deadline.has_elapsed() {
                return Err(self.timeout_error(last_status, last_resource));
            }
            let delay = backoff.next_delay().min(deadline.remaining());
            tokio::select! {
                biased;
                _ = cancelled(self.cancel.as_ref()) => {
                    return Err(WaitError::Cancelled { last_status });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if deadline.has_elapsed() {
                return Err(self.timeout_error(last_status, last_resource));
            }
        }
    }

    /// Like [`wait`](Self::wait), but a missing resource is an error.
    pub async fn until_present<T, E, F, Fut>(&self, refresh: F) -> Result<T, WaitError<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T, S>, E>>,
    {
        self.wait(refresh)
            .await?
            .ok_or(WaitError::NotFound { checks: 0 })
    }

    fn expected(&self) -> Vec<String> {
        self.target.iter().map(|s| s.to_string()).collect()
    }

    fn timeout_error<T, E>(
        &self,
        last_status: Option<String>,
        last_resource: Option<T>,
    ) -> WaitError<T, E> {
        warn!(
            "timed out after {} waiting for state '{}' (last state: '{}')",
            format_duration(self.timeout),
            self.expected().join(", "),
            last_status.as_deref().unwrap_or("")
        );
        WaitError::Timeout {
            timeout: self.timeout,
            expected: self.expected(),
            last_status,
            last_resource,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    struct Snapshot {
        status: &'static str,
        failure_reasons: Vec<String>,
    }

    type Scripted = Observation<Snapshot, &'static str>;

    fn found(status: &'static str) -> Scripted {
        Observation::found(
            Snapshot {
                status,
                failure_reasons: Vec::new(),
            },
            status,
        )
    }

    /// Refresh function that replays a script, repeating the last entry
    fn script(
        entries: Vec<Scripted>,
    ) -> (
        impl FnMut() -> std::future::Ready<Result<Scripted, String>>,
        Arc<Mutex<u32>>,
    ) {
        let queue = Arc::new(Mutex::new(VecDeque::from(entries)));
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let refresh = move || {
            *counter.lock().unwrap() += 1;
            let mut queue = queue.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            std::future::ready(Ok(next))
        };
        (refresh, calls)
    }

    fn waiter(pending: &[&'static str], target: &[&'static str]) -> StateWaiter<&'static str> {
        let _ = env_logger::builder().is_test(true).try_init();
        StateWaiter::new(
            pending.iter().copied(),
            target.iter().copied(),
            Duration::from_secs(60),
        )
        .with_policy(DelayPolicy::fixed(Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_after_pending() {
        let (refresh, calls) = script(vec![found("Creating"), found("Creating"), found("Active")]);

        let result = waiter(&["Creating"], &["Active"]).wait(refresh).await;

        assert_eq!(result.unwrap().unwrap().status, "Active");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_returns_none_when_gone() {
        let (refresh, _) = script(vec![found("Deleting"), Observation::NotFound]);

        let result = waiter(&["Active", "Deleting"], &[]).wait(refresh).await;

        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_tolerated_then_found() {
        let mut entries: Vec<Scripted> = (0..5).map(|_| Observation::NotFound).collect();
        entries.push(found("Active"));
        let (refresh, _) = script(entries);

        let result = waiter(&["Creating"], &["Active"]).wait(refresh).await;

        assert!(result.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_beyond_checks_fails() {
        let (refresh, calls) = script(vec![Observation::NotFound]);

        let result = waiter(&["Creating"], &["Active"])
            .with_not_found_checks(3)
            .wait(refresh)
            .await;

        assert!(matches!(result, Err(WaitError::NotFound { checks: 4 })));
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_counter_resets_when_found() {
        let (refresh, _) = script(vec![
            Observation::NotFound,
            Observation::NotFound,
            found("Creating"),
            Observation::NotFound,
            Observation::NotFound,
            found("Active"),
        ]);

        let result = waiter(&["Creating"], &["Active"])
            .with_not_found_checks(2)
            .wait(refresh)
            .await;

        assert!(result.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_carries_failure_reasons() {
        let failed = Observation::found(
            Snapshot {
                status: "Failed",
                failure_reasons: vec!["quota exceeded".to_string(), "retry later".to_string()],
            },
            "Failed",
        );
        let (refresh, calls) = script(vec![found("Creating"), failed]);

        let err = waiter(&["Creating"], &["Active"])
            .wait(refresh)
            .await
            .unwrap_err()
            .with_failure_reasons(|s| s.failure_reasons.clone());

        assert_eq!(err.last_status(), Some("Failed"));
        assert_eq!(*calls.lock().unwrap(), 2);
        let message = err.to_string();
        assert!(message.contains("unexpected state 'Failed'"), "{}", message);
        assert!(message.ends_with(": quota exceeded; retry later"), "{}", message);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_with_empty_pending() {
        let (refresh, calls) = script(vec![found("stopped")]);

        let err = waiter(&[], &["started"]).wait(refresh).await.unwrap_err();

        assert!(matches!(err, WaitError::UnexpectedState { .. }));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_last_status() {
        let (refresh, _) = script(vec![found("Creating")]);
        let start = Instant::now();

        let err = StateWaiter::new(["Creating"], ["Active"], Duration::from_secs(10))
            .wait(refresh)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.last_status(), Some("Creating"));
        assert_eq!(err.last_resource().map(|s| s.status), Some("Creating"));
        assert_eq!(Instant::now() - start, Duration::from_secs(10));
        assert!(err.to_string().contains("last state: 'Creating'"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_polls_once() {
        let (refresh, calls) = script(vec![found("Active")]);

        let result = StateWaiter::new(["Creating"], ["Active"], Duration::ZERO)
            .wait(refresh)
            .await;

        assert!(result.unwrap().is_some());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_target_requires_consecutive_hits() {
        let (refresh, calls) = script(vec![
            found("notequal"),
            found("equal"),
            found("notequal"),
            found("equal"),
            found("equal"),
            found("equal"),
        ]);

        let result = waiter(&["notequal"], &["equal"])
            .with_continuous_target_occurrence(3)
            .wait(refresh)
            .await;

        assert!(result.unwrap().is_some());
        assert_eq!(*calls.lock().unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_precedes_first_poll() {
        let start = Instant::now();
        let first_poll = Arc::new(Mutex::new(None));
        let recorder = first_poll.clone();

        let result = waiter(&["starting"], &["started"])
            .with_delay(Duration::from_secs(30))
            .wait(move || {
                recorder.lock().unwrap().get_or_insert(Instant::now() - start);
                std::future::ready(Ok::<_, String>(Observation::found((), "started")))
            })
            .await;

        assert!(result.unwrap().is_some());
        assert_eq!(*first_poll.lock().unwrap(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_passes_through() {
        let result = waiter(&["Creating"], &["Active"])
            .wait(|| std::future::ready(Err::<Scripted, _>("AccessDenied".to_string())))
            .await;

        match result {
            Err(WaitError::Refresh(e)) => assert_eq!(e, "AccessDenied"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_wait() {
        let token = CancellationToken::new();
        let (refresh, _) = script(vec![found("Creating")]);
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                token.cancel();
            })
        };

        let err = waiter(&["Creating"], &["Active"])
            .with_cancellation(token)
            .wait(refresh)
            .await
            .unwrap_err();

        canceller.await.unwrap();
        assert!(matches!(err, WaitError::Cancelled { last_status: Some(ref s) } if s == "Creating"));
    }

    #[tokio::test(start_paused = true)]
    async fn until_present_rejects_missing_resource() {
        let (refresh, _) = script(vec![Observation::NotFound]);

        let err = waiter(&["Active"], &[])
            .until_present(refresh)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}
