use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use herocast_core::backoff::compute_delay;
use herocast_core::{Classification, Classify, RetryConfig};
use tokio_util::sync::CancellationToken;

/// Successful outcome of one retry cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOk<T> {
    pub value: T,
    /// Attempt number that produced `value` (1-based).
    pub attempts: u32,
}

/// Failure that ended a retry cycle, carrying the untouched upstream error.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub classification: Classification,
    pub attempts: u32,
    pub exhausted_retryable: bool,
}

#[derive(Debug)]
pub enum RetryTerminal<E> {
    /// The cycle was cancelled; nothing was classified or scheduled after that point.
    Cancelled,
    Failed(RetryFailure<E>),
}

impl<E> RetryTerminal<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Emitted right before the driver sleeps ahead of the next attempt.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// Attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a E,
    pub classification: Classification,
}

/// Runs `op` until it succeeds, fails terminally, exhausts `config.max_attempts` or `cancel`
/// fires.
///
/// Rate-limited failures wait for their suggested duration; every other retryable failure
/// waits for the jittered exponential backoff. `on_retry` observes each scheduled retry before
/// the sleep starts.
pub async fn run_with_retry<T, E, F, Fut, N>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
    mut on_retry: N,
) -> Result<RetryOk<T>, RetryTerminal<E>>
where
    E: Classify + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(RetryNotice<'_, E>),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryTerminal::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => {
                return Ok(RetryOk {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) => error,
        };

        if cancel.is_cancelled() {
            return Err(RetryTerminal::Cancelled);
        }

        let classification = error.classify();
        if !classification.retryable || attempt >= max_attempts {
            tracing::debug!(
                event = "retry_cycle_failed",
                attempt,
                max_attempts,
                category = classification.category.as_str(),
                retryable = classification.retryable,
                error = %error,
                "retry cycle ended with a terminal failure"
            );
            return Err(RetryTerminal::Failed(RetryFailure {
                error,
                classification,
                attempts: attempt,
                exhausted_retryable: classification.retryable,
            }));
        }

        let delay = classification
            .suggested_wait
            .unwrap_or_else(|| compute_delay(attempt, config));

        tracing::warn!(
            event = "retry_scheduled",
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            category = classification.category.as_str(),
            error = %error,
            "attempt failed, retrying after backoff"
        );
        on_retry(RetryNotice {
            attempt,
            delay,
            error: &error,
            classification,
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryTerminal::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herocast_core::{ErrorCategory, ErrorShape};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeError {
        status: Option<u16>,
        message: &'static str,
        retry_after: Option<Duration>,
    }

    impl FakeError {
        fn status(status: u16) -> Self {
            Self {
                status: Some(status),
                message: "",
                retry_after: None,
            }
        }

        fn message(message: &'static str) -> Self {
            Self {
                status: None,
                message,
                retry_after: None,
            }
        }
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake error {:?} {}", self.status, self.message)
        }
    }

    impl Classify for FakeError {
        fn error_shape(&self) -> ErrorShape<'_> {
            ErrorShape {
                status: self.status,
                message: Some(self.message),
                api_code: None,
                retry_after: self.retry_after,
            }
        }
    }

    fn no_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        }
        .with_jitter(0.0)
    }

    fn scripted(
        outcomes: Vec<Result<&'static str, FakeError>>,
    ) -> (
        Arc<Mutex<VecDeque<Result<&'static str, FakeError>>>>,
        Arc<Mutex<Vec<u32>>>,
    ) {
        (
            Arc::new(Mutex::new(outcomes.into_iter().collect())),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let (plan, calls) = scripted(vec![
            Err(FakeError::status(500)),
            Err(FakeError::status(503)),
            Ok("done"),
        ]);
        let mut notices = Vec::new();
        let started = Instant::now();

        let result = run_with_retry(
            &no_jitter(3),
            &CancellationToken::new(),
            |attempt| {
                let plan = Arc::clone(&plan);
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().expect("calls").push(attempt);
                    plan.lock().expect("plan").pop_front().expect("scripted")
                }
            },
            |notice| notices.push((notice.attempt, notice.delay, notice.classification.category)),
        )
        .await
        .expect("third attempt succeeds");

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(*calls.lock().expect("calls"), vec![1, 2, 3]);
        assert_eq!(
            notices,
            vec![
                (1, Duration::from_millis(1000), ErrorCategory::ServerError),
                (2, Duration::from_millis(2000), ErrorCategory::Network),
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_on_first_attempt() {
        let (plan, calls) = scripted(vec![Err(FakeError::status(404))]);
        let mut notices = 0;

        let terminal = run_with_retry(
            &no_jitter(5),
            &CancellationToken::new(),
            |attempt| {
                let plan = Arc::clone(&plan);
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().expect("calls").push(attempt);
                    plan.lock().expect("plan").pop_front().expect("scripted")
                }
            },
            |_| notices += 1,
        )
        .await
        .expect_err("404 is terminal");

        let RetryTerminal::Failed(failure) = terminal else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, FakeError::status(404));
        assert_eq!(failure.classification.category, ErrorCategory::NotFound);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted_retryable);
        assert_eq!(notices, 0);
        assert_eq!(calls.lock().expect("calls").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_error() {
        let (plan, calls) = scripted(vec![
            Err(FakeError::message("network down")),
            Err(FakeError::message("network down")),
            Err(FakeError::status(500)),
        ]);

        let terminal = run_with_retry(
            &no_jitter(3),
            &CancellationToken::new(),
            |attempt| {
                let plan = Arc::clone(&plan);
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().expect("calls").push(attempt);
                    plan.lock().expect("plan").pop_front().expect("scripted")
                }
            },
            |_| {},
        )
        .await
        .expect_err("budget exhausted");

        let RetryTerminal::Failed(failure) = terminal else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, FakeError::status(500));
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted_retryable);
        assert_eq!(calls.lock().expect("calls").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_suggested_duration() {
        let rate_limited = FakeError {
            status: Some(429),
            message: "",
            retry_after: Some(Duration::from_secs(7)),
        };
        let (plan, _calls) = scripted(vec![Err(rate_limited), Ok("ok")]);
        let mut delays = Vec::new();
        let started = Instant::now();

        run_with_retry(
            &no_jitter(3),
            &CancellationToken::new(),
            |_| {
                let plan = Arc::clone(&plan);
                async move { plan.lock().expect("plan").pop_front().expect("scripted") }
            },
            |notice| delays.push(notice.delay),
        )
        .await
        .expect("retry after rate limit");

        assert_eq!(delays, vec![Duration::from_secs(7)]);
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_backoff_stops_further_attempts() {
        let (plan, calls) = scripted(vec![Err(FakeError::status(500)), Ok("late")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let handle = tokio::spawn({
            let plan = Arc::clone(&plan);
            let calls = Arc::clone(&calls);
            async move {
                run_with_retry(
                    &no_jitter(3),
                    &cancel,
                    |attempt| {
                        let plan = Arc::clone(&plan);
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.lock().expect("calls").push(attempt);
                            plan.lock().expect("plan").pop_front().expect("scripted")
                        }
                    },
                    |_| {},
                )
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();

        let terminal = handle
            .await
            .expect("task joins")
            .expect_err("cancelled cycle");
        assert!(terminal.is_cancelled());
        assert_eq!(*calls.lock().expect("calls"), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_in_flight_operation_returns_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let handle = tokio::spawn(async move {
            run_with_retry(
                &no_jitter(3),
                &cancel,
                |_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, FakeError>("never")
                },
                |_| {},
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();

        assert!(handle
            .await
            .expect("task joins")
            .expect_err("cancelled")
            .is_cancelled());
    }
}
