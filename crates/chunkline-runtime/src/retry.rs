//! Abortable retry with exponential back-off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chunkline_protocol::{CancellationToken, JobError, JobResult};
use tracing::warn;

use crate::config::RetryPolicy;

/// Decides whether a failed attempt is worth repeating.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &JobError) -> bool;
}

/// Retries overload and malformed-response failures only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransientErrorClassifier;

impl RetryClassifier for TransientErrorClassifier {
    fn is_retryable(&self, error: &JobError) -> bool {
        matches!(
            error,
            JobError::Overloaded(_) | JobError::MalformedResponse(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based retry number.
    pub attempt: u32,
    pub delay: Duration,
    pub error: JobError,
}

#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Arc<dyn RetryClassifier>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_classifier(policy, Arc::new(TransientErrorClassifier))
    }

    pub fn with_classifier(policy: RetryPolicy, classifier: Arc<dyn RetryClassifier>) -> Self {
        Self { policy, classifier }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires. At most `max_retries + 1` calls are made.
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_retry: R,
    ) -> JobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<T>>,
        R: FnMut(&RetryAttempt),
    {
        let mut retry_count = 0_u32;

        loop {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_cancelled() || cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if !self.classifier.is_retryable(&error) || retry_count >= self.policy.max_retries {
                return Err(error);
            }

            retry_count += 1;
            let attempt = RetryAttempt {
                attempt: retry_count,
                delay: self.policy.delay_for(retry_count),
                error,
            };
            warn!(
                attempt = attempt.attempt,
                delay_ms = attempt.delay.as_millis() as u64,
                error = %attempt.error,
                "retrying after transient failure"
            );
            on_retry(&attempt);

            sleep_or_cancel(attempt.delay, cancel).await?;
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> JobResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::Result;
    use tokio::time::Instant;

    use super::*;

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(max_retries, Duration::from_millis(100)))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() -> Result<()> {
        let calls = &AtomicU32::new(0);
        let mut attempts = Vec::new();
        let started = Instant::now();

        let value = executor(3)
            .run(
                &CancellationToken::new(),
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(JobError::Overloaded("busy".into()))
                    } else {
                        Ok(7)
                    }
                },
                |attempt| attempts.push((attempt.attempt, attempt.delay)),
            )
            .await?;

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            attempts,
            vec![(1, Duration::from_millis(200)), (2, Duration::from_millis(400))]
        );
        assert!(started.elapsed() >= Duration::from_millis(600));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: JobResult<()> = executor(3)
            .run(
                &CancellationToken::new(),
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::MalformedResponse("bad json".into()))
                },
                |_| {},
            )
            .await;

        assert_eq!(result, Err(JobError::MalformedResponse("bad json".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let calls = &AtomicU32::new(0);
        let result: JobResult<()> = executor(3)
            .run(
                &CancellationToken::new(),
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::QuotaExceeded("quota".into()))
                },
                |_| {},
            )
            .await;

        assert_eq!(result, Err(JobError::QuotaExceeded("quota".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_calls_operation() {
        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: JobResult<()> = executor(3)
            .run(
                &cancel,
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                |_| {},
            )
            .await;

        assert_eq!(result, Err(JobError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_aborts() {
        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result: JobResult<()> = executor(3)
            .run(
                &cancel,
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::Overloaded("busy".into()))
                },
                |_| trigger.cancel(),
            )
            .await;

        assert_eq!(result, Err(JobError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_classifier_is_respected() {
        struct Never;
        impl RetryClassifier for Never {
            fn is_retryable(&self, _error: &JobError) -> bool {
                false
            }
        }

        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::with_classifier(
            RetryPolicy::new(5, Duration::from_millis(1)),
            Arc::new(Never),
        );
        let result: JobResult<()> = executor
            .run(
                &CancellationToken::new(),
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(JobError::Overloaded("busy".into()))
                },
                |_| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
