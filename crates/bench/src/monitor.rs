//! Completion monitor
//!
//! Polls the visibility store until every execution of a run has closed, then
//! collects their timings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::activity::{Activity, ActivityContext};
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::store::{saturating_sub, ExecutionLister, TimingTriple};

/// What the monitor waits for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRequest {
    pub target_name: String,

    /// Run base id; executions match on `{target_name}-{base_id}-`
    pub base_id: String,

    pub expected_count: u64,

    /// When the run started
    pub start_time: DateTime<Utc>,
}

impl MonitorRequest {
    pub fn id_prefix(&self) -> String {
        format!("{}-{}-", self.target_name, self.base_id)
    }
}

/// Polling settings
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,

    /// Monitor gives up this long before its attempt deadline
    pub safety_margin: Duration,

    /// Listing window opens this long before the run started
    pub scope_margin: Duration,

    pub page_size: usize,
}

impl From<&BenchConfig> for MonitorSettings {
    fn from(config: &BenchConfig) -> Self {
        Self {
            poll_interval: config.monitor_poll_interval,
            safety_margin: config.monitor_safety_margin,
            scope_margin: config.scope_margin,
            page_size: config.closed_page_size,
        }
    }
}

/// Heartbeat details of the monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorHeartbeat {
    pub polls: u64,

    /// Matching closed executions collected so far in the current poll
    pub collected: u64,

    pub elapsed_ms: u64,
    pub remaining_ms: u64,
}

/// Waits for a run's executions to drain and returns their timings
///
/// A poll with no open executions but fewer matching closed ones than expected
/// is logged and polled again rather than failed, since visibility stores lag.
/// An execution that never shows up keeps the monitor polling until its
/// deadline.
pub struct CompletionMonitor {
    lister: Arc<dyn ExecutionLister>,
    settings: MonitorSettings,
}

impl CompletionMonitor {
    pub fn new(lister: Arc<dyn ExecutionLister>, settings: MonitorSettings) -> Self {
        Self { lister, settings }
    }

    #[instrument(
        name = "monitor",
        skip_all,
        fields(target = %request.target_name, base_id = %request.base_id, expected = request.expected_count)
    )]
    async fn watch(
        &self,
        ctx: &ActivityContext,
        request: MonitorRequest,
    ) -> Result<Vec<TimingTriple>, BenchError> {
        let started = Instant::now();
        let deadline = ctx
            .deadline()
            .checked_sub(self.settings.safety_margin)
            .unwrap_or_else(Instant::now);
        let since = saturating_sub(request.start_time, self.settings.scope_margin);
        let prefix = request.id_prefix();
        let mut heartbeat = MonitorHeartbeat::default();

        loop {
            if ctx.is_cancelled() {
                return Err(BenchError::Cancelled);
            }

            heartbeat.polls += 1;
            let open = self
                .lister
                .list_open(&request.target_name, since, 1)
                .await
                .map_err(|e| BenchError::store("listing open executions", e))?;

            if let Some(still_open) = open.first() {
                info!(polls = heartbeat.polls, sample = %still_open.id, "executions still open");
            } else {
                let timings = self
                    .collect_closed(
                        ctx,
                        &request.target_name,
                        since,
                        &prefix,
                        &mut heartbeat,
                        started,
                        deadline,
                    )
                    .await?;
                let actual = timings.len() as u64;
                if actual >= request.expected_count {
                    info!(polls = heartbeat.polls, actual, "all executions closed");
                    return Ok(timings);
                }
                warn!(
                    expected = request.expected_count,
                    actual,
                    "no open executions but fewer closed than expected"
                );
            }

            heartbeat.collected = 0;
            record(ctx, &mut heartbeat, started, deadline)?;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = ctx.cancelled() => return Err(BenchError::Cancelled),
            }

            if Instant::now() >= deadline {
                return Err(BenchError::timed_out(format!(
                    "executions with prefix {prefix} did not complete before the monitor deadline"
                )));
            }
        }
    }

    /// Page through closed executions and keep the ones with `prefix`
    #[allow(clippy::too_many_arguments)]
    async fn collect_closed(
        &self,
        ctx: &ActivityContext,
        target_name: &str,
        since: DateTime<Utc>,
        prefix: &str,
        heartbeat: &mut MonitorHeartbeat,
        started: Instant,
        deadline: Instant,
    ) -> Result<Vec<TimingTriple>, BenchError> {
        let mut timings = Vec::new();
        let mut page_token = None;

        loop {
            let page = self
                .lister
                .list_closed(target_name, since, page_token, self.settings.page_size)
                .await
                .map_err(|e| BenchError::store("listing closed executions", e))?;

            timings.extend(
                page.executions
                    .iter()
                    .filter(|e| e.id.starts_with(prefix))
                    .map(|e| e.timing),
            );

            heartbeat.collected = timings.len() as u64;
            record(ctx, heartbeat, started, deadline)?;
            debug!(collected = timings.len(), "closed page fetched");

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(timings),
            }
        }
    }
}

fn record(
    ctx: &ActivityContext,
    heartbeat: &mut MonitorHeartbeat,
    started: Instant,
    deadline: Instant,
) -> Result<(), BenchError> {
    heartbeat.elapsed_ms = started.elapsed().as_millis() as u64;
    heartbeat.remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
    ctx.heartbeat(heartbeat)
}

#[async_trait]
impl Activity for CompletionMonitor {
    const TYPE: &'static str = "bench-monitor";
    type Input = MonitorRequest;
    type Output = Vec<TimingTriple>;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: MonitorRequest,
    ) -> Result<Vec<TimingTriple>, BenchError> {
        self.watch(ctx, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::InMemoryProgressReporter;
    use crate::store::{ClosedExecution, ClosedPage, ExecutionSummary, StoreError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Lister whose closed executions become visible after `visible_after` polls
    struct ScriptedLister {
        open_polls: usize,
        visible_after: usize,
        closed: Vec<ClosedExecution>,
        open_calls: AtomicUsize,
        closed_calls: AtomicUsize,
        open_error: Mutex<Option<StoreError>>,
    }

    impl ScriptedLister {
        fn new(closed: Vec<ClosedExecution>) -> Self {
            Self {
                open_polls: 0,
                visible_after: 1,
                closed,
                open_calls: AtomicUsize::new(0),
                closed_calls: AtomicUsize::new(0),
                open_error: Mutex::new(None),
            }
        }

        fn open_for(mut self, polls: usize) -> Self {
            self.open_polls = polls;
            self
        }

        fn visible_after(mut self, polls: usize) -> Self {
            self.visible_after = polls;
            self
        }
    }

    #[async_trait]
    impl ExecutionLister for ScriptedLister {
        async fn list_open(
            &self,
            target_name: &str,
            since: DateTime<Utc>,
            _page_size: usize,
        ) -> Result<Vec<ExecutionSummary>, StoreError> {
            if let Some(err) = self.open_error.lock().take() {
                return Err(err);
            }
            let poll = self.open_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if poll <= self.open_polls {
                return Ok(vec![ExecutionSummary {
                    id: format!("{target_name}-run-0-0-0"),
                    target_name: target_name.to_string(),
                    start_time: since,
                }]);
            }
            Ok(vec![])
        }

        async fn list_closed(
            &self,
            _target_name: &str,
            _since: DateTime<Utc>,
            page_token: Option<String>,
            page_size: usize,
        ) -> Result<ClosedPage, StoreError> {
            self.closed_calls.fetch_add(1, Ordering::SeqCst);
            if self.open_calls.load(Ordering::SeqCst) < self.visible_after {
                return Ok(ClosedPage::default());
            }

            let offset: usize = page_token.map_or(0, |t| t.parse().unwrap_or(0));
            let end = (offset + page_size).min(self.closed.len());
            Ok(ClosedPage {
                executions: self.closed[offset..end].to_vec(),
                next_page_token: (end < self.closed.len()).then(|| end.to_string()),
            })
        }
    }

    fn closed(ids: &[&str]) -> Vec<ClosedExecution> {
        let now = Utc::now();
        ids.iter()
            .map(|id| ClosedExecution {
                id: id.to_string(),
                timing: TimingTriple::new(now, now, now),
            })
            .collect()
    }

    fn settings(page_size: usize) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(3),
            safety_margin: Duration::from_secs(5),
            scope_margin: Duration::from_secs(10),
            page_size,
        }
    }

    fn request(expected_count: u64) -> MonitorRequest {
        MonitorRequest {
            target_name: "basic".into(),
            base_id: "run".into(),
            expected_count,
            start_time: Utc::now(),
        }
    }

    fn context(budget: Duration) -> ActivityContext {
        ActivityContext::new("monitor", 1, 10, Instant::now() + budget)
            .with_progress(Arc::new(InMemoryProgressReporter::new()))
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_returns_after_exactly_k_polls() {
        let lister = Arc::new(
            ScriptedLister::new(closed(&["basic-run-0-0-0", "basic-run-0-0-1", "basic-run-1-0-0"]))
                .visible_after(4),
        );
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));

        let timings = monitor
            .execute(&context(Duration::from_secs(600)), request(3))
            .await
            .unwrap();

        assert_eq!(timings.len(), 3);
        assert_eq!(lister.open_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_open_executions() {
        let lister = Arc::new(ScriptedLister::new(closed(&["basic-run-0-0-0"])).open_for(2));
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));

        monitor
            .execute(&context(Duration::from_secs(600)), request(1))
            .await
            .unwrap();

        assert_eq!(lister.open_calls.load(Ordering::SeqCst), 3);
        assert_eq!(lister.closed_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters_by_prefix_across_pages() {
        let lister = Arc::new(ScriptedLister::new(closed(&[
            "basic-run-0-0-0",
            "basic-other-0-0-0",
            "basic-run-0-0-1",
            "basic-runner-0-0-0",
            "basic-run-0-1-0",
        ])));
        let monitor = CompletionMonitor::new(lister.clone(), settings(2));
        let ctx = context(Duration::from_secs(600));

        let timings = monitor.execute(&ctx, request(3)).await.unwrap();

        assert_eq!(timings.len(), 3);
        assert_eq!(lister.closed_calls.load(Ordering::SeqCst), 3);
        let heartbeat = ctx.heartbeat_details::<MonitorHeartbeat>().unwrap();
        assert_eq!(heartbeat.collected, 3);
        assert_eq!(heartbeat.polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_executions_stay_open() {
        let lister = Arc::new(ScriptedLister::new(vec![]).open_for(usize::MAX));
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));
        let started = Instant::now();

        let err = monitor
            .execute(&context(Duration::from_secs(20)), request(1))
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), "TimedOut");
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(lister.open_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_under_count_keeps_polling_until_deadline() {
        let lister = Arc::new(ScriptedLister::new(closed(&["basic-run-0-0-0"])));
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));

        let err = monitor
            .execute(&context(Duration::from_secs(20)), request(2))
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), "TimedOut");
        assert!(lister.closed_calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lister_error_propagates() {
        let lister = Arc::new(ScriptedLister::new(vec![]));
        *lister.open_error.lock() = Some(StoreError::Unavailable("visibility down".into()));
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));

        let err = monitor
            .execute(&context(Duration::from_secs(600)), request(1))
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), "StoreFailed");
        assert!(err.to_string().contains("visibility down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let lister = Arc::new(ScriptedLister::new(vec![]).open_for(usize::MAX));
        let monitor = CompletionMonitor::new(lister.clone(), settings(1000));
        let token = CancellationToken::new();
        let ctx = context(Duration::from_secs(600)).with_cancellation(token.clone());

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            trigger.cancel();
        });

        let err = monitor.execute(&ctx, request(1)).await.unwrap_err();

        assert_eq!(err, BenchError::Cancelled);
        assert_eq!(lister.open_calls.load(Ordering::SeqCst), 2);
    }
}
