//! Activity execution context

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BenchError;

/// Durable storage for heartbeat details
///
/// The hosting engine keeps the most recent details of an activity across
/// attempts so a retried attempt can resume. Delivery is at-least-once and a
/// recorded value may be lost; callers treat a missing value as "no progress".
pub trait ProgressReporter: Send + Sync + 'static {
    /// Record the latest heartbeat details
    fn record(&self, details: serde_json::Value);

    /// Details of the most recent heartbeat, if any survived
    fn last_details(&self) -> Option<serde_json::Value>;

    /// When the most recent heartbeat was recorded
    fn last_heartbeat_at(&self) -> Option<Instant>;
}

/// [`ProgressReporter`] kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryProgressReporter {
    last: Mutex<Option<(serde_json::Value, Instant)>>,
}

impl InMemoryProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter that already holds details, as if a previous attempt had heartbeated
    pub fn with_details(details: serde_json::Value) -> Self {
        Self {
            last: Mutex::new(Some((details, Instant::now()))),
        }
    }

    /// Drop the recorded details, simulating a lost heartbeat
    pub fn forget(&self) {
        *self.last.lock() = None;
    }
}

impl ProgressReporter for InMemoryProgressReporter {
    fn record(&self, details: serde_json::Value) {
        *self.last.lock() = Some((details, Instant::now()));
    }

    fn last_details(&self) -> Option<serde_json::Value> {
        self.last.lock().as_ref().map(|(d, _)| d.clone())
    }

    fn last_heartbeat_at(&self) -> Option<Instant> {
        self.last.lock().as_ref().map(|(_, at)| *at)
    }
}

/// Context provided to activities during execution
///
/// The context provides:
/// - Information about the current execution attempt
/// - The attempt deadline
/// - Heartbeats that double as resumable progress markers
/// - Cancellation detection
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &ActivityContext, input: Input) -> Result<(), BenchError> {
///     let resume_from = ctx.heartbeat_details::<i64>().map_or(0, |done| done + 1);
///     for i in resume_from..input.total {
///         if ctx.is_cancelled() {
///             return Err(BenchError::Cancelled);
///         }
///         do_work(i).await?;
///         ctx.heartbeat(&i)?;
///     }
///     Ok(())
/// }
/// ```
pub struct ActivityContext {
    /// Activity ID, stable across attempts
    pub activity_id: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    deadline: Instant,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl ActivityContext {
    /// Create a context with its own progress storage and cancellation token
    pub fn new(
        activity_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        deadline: Instant,
    ) -> Self {
        Self {
            activity_id: activity_id.into(),
            attempt,
            max_attempts,
            deadline,
            progress: Arc::new(InMemoryProgressReporter::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Share progress storage with earlier attempts of the same activity
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Tie the context to a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Absolute deadline of this attempt
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the attempt deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Record a heartbeat carrying progress details
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Cancelled`] if the activity has been cancelled and
    /// [`BenchError::Serialization`] if the details cannot be encoded.
    pub fn heartbeat<T: Serialize + ?Sized>(&self, details: &T) -> Result<(), BenchError> {
        if self.is_cancelled() {
            return Err(BenchError::Cancelled);
        }

        let details = serde_json::to_value(details)?;
        debug!(activity_id = %self.activity_id, attempt = self.attempt, %details, "heartbeat");
        self.progress.record(details);
        Ok(())
    }

    /// Details of the last heartbeat from this or an earlier attempt
    ///
    /// Details that cannot be decoded are treated as lost.
    pub fn heartbeat_details<T: DeserializeOwned>(&self) -> Option<T> {
        self.progress
            .last_details()
            .and_then(|details| serde_json::from_value(details).ok())
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Token that fires when this activity is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("activity_id", &self.activity_id)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(attempt: u32, max_attempts: u32) -> ActivityContext {
        ActivityContext::new(
            "driver-0-0",
            attempt,
            max_attempts,
            Instant::now() + Duration::from_secs(60),
        )
    }

    #[test]
    fn test_activity_context_creation() {
        let ctx = context(1, 3);

        assert_eq!(ctx.activity_id, "driver-0-0");
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_last_attempt());
        assert!(ctx.heartbeat_details::<i64>().is_none());
    }

    #[test]
    fn test_is_last_attempt() {
        assert!(context(3, 3).is_last_attempt());
        assert!(!context(2, 3).is_last_attempt());
    }

    #[tokio::test]
    async fn test_heartbeat_is_visible_to_next_attempt() {
        let progress: Arc<dyn ProgressReporter> = Arc::new(InMemoryProgressReporter::new());

        let first = context(1, 3).with_progress(progress.clone());
        first.heartbeat(&41i64).unwrap();

        let second = context(2, 3).with_progress(progress);
        assert_eq!(second.heartbeat_details::<i64>(), Some(41));
    }

    #[tokio::test]
    async fn test_heartbeat_when_cancelled() {
        let token = CancellationToken::new();
        let ctx = context(1, 3).with_cancellation(token.clone());

        token.cancel();

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.heartbeat(&1i64), Err(BenchError::Cancelled));
    }

    #[tokio::test]
    async fn test_undecodable_details_are_treated_as_lost() {
        let progress = Arc::new(InMemoryProgressReporter::with_details(
            serde_json::json!("not a number"),
        ));
        let ctx = context(2, 3).with_progress(progress);

        assert!(ctx.heartbeat_details::<i64>().is_none());
    }

    #[tokio::test]
    async fn test_forget_drops_details() {
        let progress = InMemoryProgressReporter::with_details(serde_json::json!(7));
        progress.forget();

        assert!(progress.last_details().is_none());
        assert!(progress.last_heartbeat_at().is_none());
    }
}
