//! Local activity host
//!
//! Runs an [`Activity`] attempt by attempt the way a durable-execution engine
//! would: each attempt gets a fresh deadline and child cancellation token, heartbeat
//! details survive across attempts, and failed attempts are retried under a
//! [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Activity, ActivityContext, InMemoryProgressReporter, ProgressReporter};
use crate::error::BenchError;
use crate::reliability::RetryPolicy;

/// Per-activity execution limits
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Maximum duration of a single attempt
    pub start_to_close: Duration,

    /// Abandon an attempt that goes this long without a heartbeat
    pub heartbeat_timeout: Option<Duration>,

    /// Absolute deadline across all attempts; no attempt runs or is retried past it
    pub schedule_to_close: Option<Instant>,

    pub retry_policy: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(start_to_close: Duration) -> Self {
        Self {
            start_to_close,
            heartbeat_timeout: None,
            schedule_to_close: None,
            retry_policy: RetryPolicy::bench_default(),
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_schedule_to_close(mut self, deadline: Instant) -> Self {
        self.schedule_to_close = Some(deadline);
        self
    }

    /// Deadline of an attempt started at `started`, and whether it is the overall one
    fn attempt_deadline(&self, started: Instant) -> (Instant, bool) {
        let own = started + self.start_to_close;
        match self.schedule_to_close {
            Some(overall) if overall <= own => (overall, true),
            _ => (own, false),
        }
    }

    fn schedule_expired(&self) -> bool {
        self.schedule_to_close
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Executes activities with retries, timeouts and resumable progress
#[derive(Debug, Clone, Default)]
pub struct ActivityHost {
    cancel: CancellationToken,
}

impl ActivityHost {
    /// Host whose activities are cancelled when `cancel` fires
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `activity` to completion with fresh progress storage
    pub async fn execute<A: Activity>(
        &self,
        activity: &A,
        activity_id: impl Into<String>,
        input: A::Input,
        options: &ActivityOptions,
    ) -> Result<A::Output, BenchError> {
        let progress: Arc<dyn ProgressReporter> = Arc::new(InMemoryProgressReporter::new());
        self.execute_with_progress(activity, activity_id, input, options, progress)
            .await
    }

    /// Run `activity` to completion, resuming from whatever `progress` holds
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt once the policy stops retrying,
    /// [`BenchError::Cancelled`] if the host is cancelled between attempts, or
    /// [`BenchError::TimedOut`] once the schedule-to-close deadline has passed.
    pub async fn execute_with_progress<A: Activity>(
        &self,
        activity: &A,
        activity_id: impl Into<String>,
        input: A::Input,
        options: &ActivityOptions,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<A::Output, BenchError> {
        let activity_id = activity_id.into();
        let policy = &options.retry_policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(BenchError::Cancelled);
            }

            if options.schedule_expired() {
                return Err(schedule_timed_out(&activity_id, attempt));
            }

            let started = Instant::now();
            let (deadline, is_overall) = options.attempt_deadline(started);
            let ctx = ActivityContext::new(activity_id.clone(), attempt, max_attempts, deadline)
                .with_progress(Arc::clone(&progress))
                .with_cancellation(self.cancel.child_token());

            debug!(
                activity_type = A::TYPE,
                activity_id = %activity_id,
                attempt,
                "starting activity attempt"
            );

            let result = tokio::select! {
                result = activity.execute(&ctx, input.clone()) => result,
                _ = tokio::time::sleep_until(deadline) => Err(if is_overall {
                    schedule_timed_out(&activity_id, attempt)
                } else {
                    BenchError::AttemptTimedOut(format!(
                        "{activity_id} exceeded start-to-close timeout of {:?}",
                        options.start_to_close
                    ))
                }),
                _ = heartbeat_watchdog(progress.as_ref(), started, options.heartbeat_timeout) => Err(
                    BenchError::AttemptTimedOut(format!("{activity_id} missed heartbeat deadline")),
                ),
            };
            ctx.cancellation_token().cancel();

            let err = match result {
                Ok(output) => {
                    if attempt > 1 {
                        info!(
                            activity_type = A::TYPE,
                            activity_id = %activity_id,
                            attempt,
                            "activity succeeded after retry"
                        );
                    }
                    return Ok(output);
                }
                Err(err) => err,
            };

            if !policy.should_retry(&err) || !policy.has_attempts_remaining(attempt) {
                warn!(
                    activity_type = A::TYPE,
                    activity_id = %activity_id,
                    attempt,
                    error_type = err.error_type(),
                    error = %err,
                    "activity failed"
                );
                return Err(err);
            }

            let delay = policy.delay_for_attempt(attempt + 1);
            warn!(
                activity_type = A::TYPE,
                activity_id = %activity_id,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "activity attempt failed, retrying"
            );

            let resume_at = Instant::now() + delay;
            if options.schedule_to_close.is_some_and(|overall| resume_at >= overall) {
                return Err(schedule_timed_out(&activity_id, attempt));
            }
            tokio::select! {
                _ = tokio::time::sleep_until(resume_at) => {}
                _ = self.cancel.cancelled() => return Err(BenchError::Cancelled),
            }
            attempt += 1;
        }
    }
}

fn schedule_timed_out(activity_id: &str, attempt: u32) -> BenchError {
    BenchError::timed_out(format!(
        "{activity_id} reached its schedule-to-close deadline after {attempt} attempt(s)"
    ))
}

/// Resolves once the attempt started at `attempt_started` has gone `timeout`
/// without a heartbeat; never resolves without a timeout
async fn heartbeat_watchdog(
    progress: &dyn ProgressReporter,
    attempt_started: Instant,
    timeout: Option<Duration>,
) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };

    loop {
        let last = progress
            .last_heartbeat_at()
            .filter(|at| *at >= attempt_started)
            .unwrap_or(attempt_started);
        let expires = last + timeout;
        if Instant::now() >= expires {
            return;
        }
        tokio::time::sleep_until(expires).await;
    }
}
