//! Bounded waits.
//!
//! Every collaborator call is bounded by a timeout, and every asynchronous
//! readiness condition is polled at a fixed interval up to a maximum
//! duration. Expiry turns into a step failure instead of a hang.

use super::CancellationToken;
use crate::config::Timeouts;
use crate::errors::StepError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Fixed-interval poll bounded by a maximum duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between checks.
    pub interval: Duration,
    /// Total time allowed.
    pub max_duration: Duration,
}

impl PollConfig {
    /// Creates a poll configuration.
    #[must_use]
    pub const fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
        }
    }

    /// Poll used while waiting for a component to become ready.
    #[must_use]
    pub const fn readiness(timeouts: &Timeouts) -> Self {
        Self::new(timeouts.poll_interval(), timeouts.ready())
    }

    /// Poll used while waiting for ordinary deletion.
    #[must_use]
    pub const fn deletion(timeouts: &Timeouts) -> Self {
        Self::new(timeouts.poll_interval(), timeouts.delete())
    }
}

/// Polls `check` until it reports `true`, the bound expires or the run is
/// cancelled.
///
/// Errors from `check` are treated as "not yet" and the last one is quoted
/// in the timeout message.
///
/// # Errors
///
/// Returns [`StepError::Timeout`] on expiry and [`StepError::Interrupted`]
/// on cancellation.
pub async fn poll_until<F, Fut>(
    config: PollConfig,
    what: &str,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<(), StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, StepError>>,
{
    let started = Instant::now();
    let deadline = started + config.max_duration;
    let mut last_error: Option<StepError> = None;
    let mut attempts = 0_u32;

    loop {
        if cancel.is_cancelled() {
            return Err(StepError::Interrupted);
        }

        attempts += 1;
        match check().await {
            Ok(true) => {
                debug!(what, attempts, "Condition met");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                debug!(what, attempts, error = %e, "Check failed; will retry");
                last_error = Some(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            let what = match last_error {
                Some(e) => format!("{what} (last error: {e})"),
                None => what.to_string(),
            };
            return Err(StepError::Timeout {
                what,
                after: config.max_duration,
            });
        }

        let pause = config.interval.min(deadline - now);
        tokio::select! {
            () = tokio::time::sleep(pause) => {}
            () = cancel.cancelled() => return Err(StepError::Interrupted),
        }
    }
}

/// Runs `fut` with a timeout.
///
/// # Errors
///
/// Returns the future's own error, or [`StepError::Timeout`] if it did not
/// finish within `limit`.
pub async fn bounded<T, Fut>(limit: Duration, what: &str, fut: Fut) -> Result<T, StepError>
where
    Fut: Future<Output = Result<T, StepError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout {
            what: what.to_string(),
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_poll_succeeds_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = PollConfig::new(Duration::from_secs(1), Duration::from_secs(10));
        let token = CancellationToken::new();

        let counter = calls.clone();
        poll_until(config, "pods ready", &token, move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_last_error() {
        let config = PollConfig::new(Duration::from_secs(2), Duration::from_secs(5));
        let token = CancellationToken::new();

        let err = poll_until(config, "namespace gone", &token, || async {
            Err::<bool, _>(StepError::probe("connection refused"))
        })
        .await
        .unwrap_err();

        match err {
            StepError::Timeout { what, after } => {
                assert!(what.contains("namespace gone"));
                assert!(what.contains("connection refused"));
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_cancellation() {
        let config = PollConfig::new(Duration::from_secs(1), Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel("ctrl-c");

        let err = poll_until(config, "anything", &token, || async { Ok(false) })
            .await
            .unwrap_err();
        assert_eq!(err, StepError::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let err = bounded(Duration::from_secs(3), "kubectl get", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, StepError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StepError::Timeout { .. }));
    }
}
