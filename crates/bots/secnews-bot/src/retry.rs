use std::error::Error;
use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
use tracing::warn;

use crate::error::FmtCompact as _;

const LOG_TARGET: &str = "secnews_bot::retry";

/// How a failing operation is re-attempted.
///
/// Delays grow exponentially from `min_delay` by `factor`, capped at
/// `max_delay`, without jitter. `max_attempts` counts the first try too.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
}

impl RetryPolicy {
    /// Summarization: 3 attempts, 4s..10s.
    pub const SUMMARIZE: Self = Self {
        max_attempts: 3,
        min_delay: Duration::from_secs(4),
        max_delay: Duration::from_secs(10),
        factor: 2.0,
    };

    /// Publishing under rate limiting: 5 attempts, 60s..1h.
    pub const PUBLISH: Self = Self {
        max_attempts: 5,
        min_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(3600),
        factor: 2.0,
    };

    pub fn with_max_attempts(self, max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// attempts run out. The last error is returned as is.
    pub async fn run<T, E, F, Fut, P>(&self, what: &str, op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error,
        P: FnMut(&E) -> bool,
    {
        op.retry(self.backoff())
            .when(retryable)
            .notify(|err: &E, delay: Duration| {
                warn!(
                    target: LOG_TARGET,
                    %what,
                    err = %err.fmt_compact(),
                    delay_secs = delay.as_secs_f32(),
                    "Attempt failed, retrying"
                );
            })
            .await
    }
}

/// Retry on every error.
pub fn always<E>(_: &E) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use snafu::Snafu;
    use tokio::time::Instant;

    use super::*;

    #[derive(Debug, Snafu, PartialEq)]
    enum TestError {
        #[snafu(display("transient"))]
        Transient,
        #[snafu(display("fatal"))]
        Fatal,
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn gives_up_after_max_attempts_with_growing_delays() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let start = Instant::now();

        let res: Result<(), _> = RetryPolicy::SUMMARIZE
            .run(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                },
                always,
            )
            .await;

        assert_eq!(res, Err(TestError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 4s then 8s
        assert_eq!(start.elapsed().as_secs(), 12);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let res: Result<(), _> = RetryPolicy::PUBLISH
            .run(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                },
                |e| *e == TestError::Transient,
            )
            .await;

        assert_eq!(res, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn publish_policy_doubles_from_one_minute() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let start = Instant::now();

        let res = RetryPolicy::PUBLISH
            .run(
                "test",
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 4 {
                        Err(TestError::Transient)
                    } else {
                        Ok(())
                    }
                },
                always,
            )
            .await;

        assert_eq!(res, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 60 + 120 + 240 + 480
        assert_eq!(start.elapsed().as_secs(), 900);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn single_attempt_policy_never_sleeps() {
        let start = Instant::now();

        let res: Result<(), _> = RetryPolicy::PUBLISH
            .with_max_attempts(1)
            .run("test", || async { Err(TestError::Transient) }, always)
            .await;

        assert_eq!(res, Err(TestError::Transient));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
