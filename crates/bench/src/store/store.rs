//! Execution store collaborator traits

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An execution with the same ID was already started
    #[error("execution already exists: {0}")]
    AlreadyExists(String),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The page token was not issued by this store
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Everything needed to start one target execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Execution ID, also used as the idempotency key
    pub id: String,

    /// Type name of the workflow under test
    pub target_name: String,

    /// Queue the target executions are dispatched on
    pub task_queue: String,

    /// Overall execution timeout for the target
    pub execution_timeout: Duration,

    /// Timeout of a single target task
    pub task_timeout: Duration,

    /// Input for the target execution (already payload-expanded)
    pub parameters: serde_json::Value,
}

/// Summary of an execution that is still open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: String,
    pub target_name: String,
    pub start_time: DateTime<Utc>,
}

/// Timing of one closed target execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimingTriple {
    pub start_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

impl TimingTriple {
    pub fn new(
        start_time: DateTime<Utc>,
        execution_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
    ) -> Self {
        Self {
            start_time,
            execution_time,
            close_time,
        }
    }
}

/// `at + by`, clamped to the representable range
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - by`, clamped to the representable range
pub fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_sub_signed(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A closed execution together with its timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedExecution {
    pub id: String,
    pub timing: TimingTriple,
}

/// One page of closed executions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedPage {
    pub executions: Vec<ClosedExecution>,

    /// Token for the next page, `None` when this was the last one
    pub next_page_token: Option<String>,
}

/// Starts target executions
///
/// Implementations must treat [`StartRequest::id`] as an idempotency key: a
/// second start with the same ID must not replace the original execution.
#[async_trait]
pub trait ExecutionStarter: Send + Sync + 'static {
    async fn start(&self, request: StartRequest) -> Result<(), StoreError>;
}

/// Read access to the execution visibility store
///
/// Filtering by execution ID prefix is done by the caller.
#[async_trait]
pub trait ExecutionLister: Send + Sync + 'static {
    /// List open executions of `target_name` started at or after `since`
    async fn list_open(
        &self,
        target_name: &str,
        since: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Vec<ExecutionSummary>, StoreError>;

    /// List one page of closed executions of `target_name` started at or after `since`
    async fn list_closed(
        &self,
        target_name: &str,
        since: DateTime<Utc>,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<ClosedPage, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_shifts() {
        let now = Utc::now();
        assert_eq!(
            saturating_add(now, Duration::from_secs(5)),
            now + chrono::Duration::seconds(5)
        );
        assert_eq!(
            saturating_sub(now, Duration::from_secs(5)),
            now - chrono::Duration::seconds(5)
        );
        assert_eq!(saturating_add(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_sub(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
