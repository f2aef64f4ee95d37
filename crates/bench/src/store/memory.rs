//! In-memory execution store with a simulated target population

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::store::*;

/// Internal execution state
struct ExecutionState {
    target_name: String,
    task_queue: String,
    parameters: serde_json::Value,
    timing: TimingTriple,
}

impl ExecutionState {
    fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now < self.timing.close_time
    }
}

/// In-memory implementation of [`ExecutionStarter`] and [`ExecutionLister`]
///
/// Every started execution is simulated: it begins executing after
/// `execution_delay` and closes `run_duration` later. Whether an execution is
/// open is decided against the wall clock at listing time.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stampede_bench::store::InMemoryExecutionStore;
///
/// let store = InMemoryExecutionStore::new()
///     .with_execution_delay(Duration::from_millis(5))
///     .with_run_duration(Duration::from_millis(50));
/// assert_eq!(store.execution_count(), 0);
/// ```
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, ExecutionState>>,
    execution_delay: Duration,
    run_duration: Duration,
    pending_start_failures: AtomicUsize,
    start_calls: AtomicUsize,
}

impl InMemoryExecutionStore {
    /// Create a store whose executions close immediately
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            execution_delay: Duration::ZERO,
            run_duration: Duration::ZERO,
            pending_start_failures: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        }
    }

    /// Delay between start and the beginning of execution
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Time an execution stays running once it began
    pub fn with_run_duration(mut self, duration: Duration) -> Self {
        self.run_duration = duration;
        self
    }

    /// Make the next `count` start calls fail with [`StoreError::Unavailable`]
    pub fn fail_next_starts(&self, count: usize) {
        self.pending_start_failures.store(count, Ordering::SeqCst);
    }

    /// Record an execution with explicit timings
    pub fn insert_execution(&self, id: impl Into<String>, target_name: &str, timing: TimingTriple) {
        self.executions.write().insert(
            id.into(),
            ExecutionState {
                target_name: target_name.to_string(),
                task_queue: String::new(),
                parameters: serde_json::Value::Null,
                timing,
            },
        );
    }

    /// Number of distinct executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Number of start calls received, including failed and duplicate ones
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Whether an execution with this ID exists
    pub fn contains(&self, id: &str) -> bool {
        self.executions.read().contains_key(id)
    }

    /// Parameters an execution was started with
    pub fn parameters(&self, id: &str) -> Option<serde_json::Value> {
        self.executions.read().get(id).map(|e| e.parameters.clone())
    }

    /// Task queue an execution was started on
    pub fn task_queue(&self, id: &str) -> Option<String> {
        self.executions.read().get(id).map(|e| e.task_queue.clone())
    }

    /// Sorted IDs of all executions
    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn take_start_failure(&self) -> bool {
        self.pending_start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStarter for InMemoryExecutionStore {
    async fn start(&self, request: StartRequest) -> Result<(), StoreError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_start_failure() {
            return Err(StoreError::Unavailable(format!(
                "injected start failure for {}",
                request.id
            )));
        }

        let mut executions = self.executions.write();
        if executions.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(request.id));
        }

        let start_time = Utc::now();
        let execution_time = saturating_add(start_time, self.execution_delay);
        let close_time = saturating_add(execution_time, self.run_duration);
        executions.insert(
            request.id,
            ExecutionState {
                target_name: request.target_name,
                task_queue: request.task_queue,
                parameters: request.parameters,
                timing: TimingTriple::new(start_time, execution_time, close_time),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ExecutionLister for InMemoryExecutionStore {
    async fn list_open(
        &self,
        target_name: &str,
        since: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Vec<ExecutionSummary>, StoreError> {
        let now = Utc::now();
        let executions = self.executions.read();
        let mut open: Vec<ExecutionSummary> = executions
            .iter()
            .filter(|(_, e)| {
                e.target_name == target_name && e.timing.start_time >= since && e.is_open_at(now)
            })
            .map(|(id, e)| ExecutionSummary {
                id: id.clone(),
                target_name: e.target_name.clone(),
                start_time: e.timing.start_time,
            })
            .collect();
        open.sort_by(|a, b| (a.start_time, &a.id).cmp(&(b.start_time, &b.id)));
        open.truncate(page_size.max(1));
        Ok(open)
    }

    async fn list_closed(
        &self,
        target_name: &str,
        since: DateTime<Utc>,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<ClosedPage, StoreError> {
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::InvalidPageToken(token))?,
            None => 0,
        };

        let now = Utc::now();
        let executions = self.executions.read();
        let mut closed: Vec<ClosedExecution> = executions
            .iter()
            .filter(|(_, e)| {
                e.target_name == target_name && e.timing.start_time >= since && !e.is_open_at(now)
            })
            .map(|(id, e)| ClosedExecution {
                id: id.clone(),
                timing: e.timing,
            })
            .collect();
        closed.sort_by(|a, b| (a.timing.start_time, &a.id).cmp(&(b.timing.start_time, &b.id)));

        let page_size = page_size.max(1);
        let end = (offset + page_size).min(closed.len());
        let page: Vec<ClosedExecution> = closed
            .get(offset..end)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let next_page_token = (end < closed.len()).then(|| end.to_string());

        Ok(ClosedPage {
            executions: page,
            next_page_token,
        })
    }
}
