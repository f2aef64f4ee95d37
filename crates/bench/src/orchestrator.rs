//! Benchmark orchestrator
//!
//! Validates a [`RunSpec`], drives its steps shard by shard, waits for the
//! started executions to drain and keeps the collected timings for report
//! queries.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::activity::{ActivityHost, ActivityOptions};
use crate::config::BenchConfig;
use crate::driver::{BatchDriver, DriverSettings};
use crate::error::BenchError;
use crate::histogram::{build_histogram, HistogramBucket};
use crate::metrics::{collect_metrics, MetricValue, MetricsError, MetricsSource};
use crate::monitor::{CompletionMonitor, MonitorRequest, MonitorSettings};
use crate::report;
use crate::spec::RunSpec;
use crate::store::{ExecutionLister, ExecutionStarter, TimingTriple};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    /// No run has been started yet
    Idle,
    Validating,
    Driving,
    Monitoring,
    /// Terminal; report queries are answered
    Reporting,
    /// Terminal
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Driving => "driving",
            Self::Monitoring => "monitoring",
            Self::Reporting => "reporting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Immutable outcome of a finished run
///
/// Holds the raw timings only; every query rebuilds the histogram from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub target_name: String,
    pub start_time: DateTime<Utc>,
    pub interval_seconds: i64,
    pub csv_separator: String,
    pub timings: Vec<TimingTriple>,
}

impl RunResult {
    pub fn buckets(&self) -> Vec<HistogramBucket> {
        build_histogram(&self.timings, self.interval_seconds)
    }

    pub fn histogram_json(&self) -> Result<String, BenchError> {
        report::histogram_json(&self.buckets())
    }

    /// Histogram CSV with `separator`, or the run's own separator when `None` or empty
    pub fn histogram_csv(&self, separator: Option<&str>) -> String {
        let separator = separator
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.csv_separator);
        report::histogram_csv(&self.buckets(), self.interval_seconds, separator)
    }

    pub fn histogram_html(&self) -> Result<String, BenchError> {
        report::histogram_html(&self.target_name, &self.buckets(), self.interval_seconds)
    }

    /// Server metrics over the run's bucket window
    pub async fn metrics(
        &self,
        source: &dyn MetricsSource,
        config: &BenchConfig,
    ) -> Result<Vec<MetricValue>, BenchError> {
        let window = report::metrics_window(
            self.start_time,
            self.interval_seconds,
            self.buckets().len(),
        );
        Ok(collect_metrics(source, &config.metrics, &window).await?)
    }
}

/// Runs benchmarks against an execution store
///
/// One orchestrator runs one benchmark at a time; report queries answer for the
/// most recent run once it reaches [`RunPhase::Reporting`].
pub struct BenchOrchestrator {
    config: BenchConfig,
    starter: Arc<dyn ExecutionStarter>,
    lister: Arc<dyn ExecutionLister>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    host: ActivityHost,
    phase: RwLock<RunPhase>,
    result: RwLock<Option<Arc<RunResult>>>,
}

impl BenchOrchestrator {
    pub fn new(
        config: BenchConfig,
        starter: Arc<dyn ExecutionStarter>,
        lister: Arc<dyn ExecutionLister>,
    ) -> Self {
        Self {
            config,
            starter,
            lister,
            metrics_source: None,
            host: ActivityHost::new(CancellationToken::new()),
            phase: RwLock::new(RunPhase::Idle),
            result: RwLock::new(None),
        }
    }

    pub fn with_metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    /// Cancel runs through `cancel` instead of the orchestrator's own token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.host = ActivityHost::new(cancel);
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Token that cancels the current run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.host.cancellation_token().clone()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.read()
    }

    /// Run `spec` under a freshly generated run id
    pub async fn run(&self, spec: RunSpec) -> Result<Arc<RunResult>, BenchError> {
        let run_id = format!("bench-{}", Uuid::now_v7().simple());
        self.run_with_id(spec, run_id).await
    }

    /// Run `spec`, deriving execution ids from `run_id`
    ///
    /// # Errors
    ///
    /// - [`BenchError::InvalidSpec`] if the spec fails validation
    /// - the first failing driver's error once every shard of its step has finished
    /// - the monitor's error, including [`BenchError::TimedOut`]
    /// - [`BenchError::Cancelled`] if the run was cancelled
    #[instrument(skip_all, fields(run_id = %run_id, target = %spec.target.name))]
    pub async fn run_with_id(
        &self,
        spec: RunSpec,
        run_id: String,
    ) -> Result<Arc<RunResult>, BenchError> {
        *self.result.write() = None;
        self.set_phase(RunPhase::Validating);
        if let Err(err) = spec.validate() {
            return Err(self.fail(err));
        }

        let run_deadline = Instant::now() + self.config.run_timeout;
        let start_time = Utc::now();
        info!(
            steps = spec.steps.len(),
            expected = spec.total_count(),
            "benchmark run started"
        );

        self.set_phase(RunPhase::Driving);
        let driver = BatchDriver::new(
            Arc::clone(&self.starter),
            DriverSettings::from(&self.config),
        );
        for (step_index, step) in spec.steps.iter().enumerate() {
            let tasks = step.driver_tasks(&run_id, step_index, &spec.target);
            info!(
                step_index,
                count = step.count,
                rate = step.rate_per_second,
                shards = tasks.len(),
                "driving step"
            );

            let options = self.activity_options(run_deadline);
            let results = join_all(tasks.into_iter().map(|task| {
                let activity_id = format!("driver-{}", task.base_id);
                self.host.execute(&driver, activity_id, task, &options)
            }))
            .await;

            let mut failure = None;
            for (shard, result) in results.into_iter().enumerate() {
                if let Err(err) = result {
                    warn!(step_index, shard, error = %err, "driver failed");
                    failure.get_or_insert(err);
                }
            }
            if let Some(err) = failure {
                return Err(self.fail(err));
            }
        }

        self.set_phase(RunPhase::Monitoring);
        let monitor = CompletionMonitor::new(
            Arc::clone(&self.lister),
            MonitorSettings::from(&self.config),
        );
        let request = MonitorRequest {
            target_name: spec.target.name.clone(),
            base_id: run_id.clone(),
            expected_count: spec.total_count(),
            start_time,
        };
        let timings = match self
            .host
            .execute(
                &monitor,
                format!("monitor-{run_id}"),
                request,
                &self.activity_options(run_deadline),
            )
            .await
        {
            Ok(timings) => timings,
            Err(err) => return Err(self.fail(err)),
        };

        let result = Arc::new(RunResult {
            run_id,
            target_name: spec.target.name,
            start_time,
            interval_seconds: spec.report.interval_seconds(),
            csv_separator: spec.report.separator().to_string(),
            timings,
        });
        *self.result.write() = Some(Arc::clone(&result));
        self.set_phase(RunPhase::Reporting);
        info!(executions = result.timings.len(), "benchmark run completed");

        Ok(result)
    }

    /// Result of the last run, once it reached [`RunPhase::Reporting`]
    pub fn result(&self) -> Result<Arc<RunResult>, BenchError> {
        let phase = self.phase();
        if phase != RunPhase::Reporting {
            return Err(BenchError::NotReady(phase));
        }
        self.result
            .read()
            .clone()
            .ok_or(BenchError::NotReady(phase))
    }

    pub fn histogram(&self) -> Result<Vec<HistogramBucket>, BenchError> {
        Ok(self.result()?.buckets())
    }

    pub fn histogram_json(&self) -> Result<String, BenchError> {
        self.result()?.histogram_json()
    }

    pub fn histogram_csv(&self, separator: Option<&str>) -> Result<String, BenchError> {
        Ok(self.result()?.histogram_csv(separator))
    }

    pub fn histogram_html(&self) -> Result<String, BenchError> {
        self.result()?.histogram_html()
    }

    pub async fn metrics(&self) -> Result<Vec<MetricValue>, BenchError> {
        let result = self.result()?;
        let source = self
            .metrics_source
            .as_deref()
            .ok_or(MetricsError::NotConfigured)?;
        result.metrics(source, &self.config).await
    }

    pub async fn metrics_json(&self) -> Result<String, BenchError> {
        report::metrics_json(&self.metrics().await?)
    }

    pub async fn metrics_csv(&self, separator: Option<&str>) -> Result<String, BenchError> {
        let result = self.result()?;
        let values = self.metrics().await?;
        let separator = separator
            .filter(|s| !s.is_empty())
            .unwrap_or(&result.csv_separator);
        Ok(report::metrics_csv(
            &values,
            result.interval_seconds,
            separator,
        ))
    }

    fn activity_options(&self, run_deadline: Instant) -> ActivityOptions {
        ActivityOptions::new(run_deadline.saturating_duration_since(Instant::now()))
            .with_schedule_to_close(run_deadline)
            .with_heartbeat_timeout(self.config.heartbeat_timeout)
            .with_retry_policy(self.config.retry_policy.clone())
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.write() = phase;
    }

    fn fail(&self, err: BenchError) -> BenchError {
        warn!(phase = %self.phase(), error_type = err.error_type(), error = %err, "benchmark run failed");
        self.set_phase(RunPhase::Failed);
        err
    }
}
