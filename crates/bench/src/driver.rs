//! Rate-limited, resumable batch driver

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::activity::{Activity, ActivityContext};
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::payload::PayloadExpander;
use crate::rate_limiter::RateLimiter;
use crate::spec::DriverTask;
use crate::store::{ExecutionStarter, StartRequest, StoreError};

/// Heartbeat details of a driver: the last index whose start succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMarker {
    /// `-1` before the first start
    pub last_completed_index: i64,
}

impl ProgressMarker {
    pub fn completed(index: u64) -> Self {
        Self {
            last_completed_index: index as i64,
        }
    }

    /// First index still to be started
    pub fn next_index(&self) -> u64 {
        (self.last_completed_index + 1).max(0) as u64
    }
}

/// Start settings shared by every driver of a run
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub task_queue: String,
    pub execution_timeout: Duration,
    pub task_timeout: Duration,

    /// Driver gives up this long before its attempt deadline
    pub safety_margin: Duration,
}

impl From<&BenchConfig> for DriverSettings {
    fn from(config: &BenchConfig) -> Self {
        Self {
            task_queue: config.target_task_queue.clone(),
            execution_timeout: config.target_execution_timeout,
            task_timeout: config.target_task_timeout,
            safety_margin: config.driver_safety_margin,
        }
    }
}

/// What one driver attempt did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSummary {
    /// Executions this attempt started
    pub started: u64,

    /// Starts the store reported as duplicates
    pub already_existed: u64,
}

/// Starts one shard's executions in index order
///
/// Every successful start is followed by a heartbeat carrying a
/// [`ProgressMarker`], so a retried attempt resumes after the last index it saw
/// complete. If that heartbeat is lost the retry starts the same ids again and
/// the store reports them as already existing; starts are at-least-once.
pub struct BatchDriver {
    starter: Arc<dyn ExecutionStarter>,
    settings: DriverSettings,
}

impl BatchDriver {
    pub fn new(starter: Arc<dyn ExecutionStarter>, settings: DriverSettings) -> Self {
        Self { starter, settings }
    }

    #[instrument(
        name = "driver",
        skip_all,
        fields(target = %task.target.name, base_id = %task.base_id, attempt = ctx.attempt)
    )]
    async fn drive(
        &self,
        ctx: &ActivityContext,
        task: DriverTask,
    ) -> Result<DriverSummary, BenchError> {
        let deadline = ctx
            .deadline()
            .checked_sub(self.settings.safety_margin)
            .unwrap_or_else(Instant::now);

        let resume_from = match ctx.heartbeat_details::<ProgressMarker>() {
            Some(marker) => {
                info!(
                    last_completed_index = marker.last_completed_index,
                    "resuming from progress marker"
                );
                marker.next_index()
            }
            None => 0,
        };

        let expander = PayloadExpander::new()
            .map_err(|e| BenchError::InvalidSpec(format!("payload patterns: {e}")))?;
        let mut limiter = RateLimiter::new(task.rate_per_second);
        let cancel = ctx.cancellation_token();
        let mut summary = DriverSummary::default();

        debug!(
            batch_size = task.batch_size,
            rate = task.rate_per_second,
            resume_from,
            "driving batch"
        );

        for index in resume_from..task.batch_size {
            if Instant::now() >= deadline {
                let last_completed_index = index as i64 - 1;
                warn!(last_completed_index, "driver reached its deadline");
                return Err(BenchError::TimedOut {
                    message: format!(
                        "driver {} reached its deadline after index {last_completed_index}",
                        task.base_id
                    ),
                    last_completed_index: Some(last_completed_index),
                });
            }
            if ctx.is_cancelled() {
                return Err(BenchError::Cancelled);
            }

            limiter.wait(&cancel).await?;

            let id = task.execution_id(index);
            let request = StartRequest {
                id: id.clone(),
                target_name: task.target.name.clone(),
                task_queue: self.settings.task_queue.clone(),
                execution_timeout: self.settings.execution_timeout,
                task_timeout: self.settings.task_timeout,
                parameters: expander.expand(&task.target.parameters),
            };

            match self.starter.start(request).await {
                Ok(()) => summary.started += 1,
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(%id, "execution already started");
                    summary.already_existed += 1;
                }
                Err(source) => return Err(BenchError::Start { id, source }),
            }

            ctx.heartbeat(&ProgressMarker::completed(index))?;
        }

        info!(
            started = summary.started,
            already_existed = summary.already_existed,
            "driver finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl Activity for BatchDriver {
    const TYPE: &'static str = "bench-driver";
    type Input = DriverTask;
    type Output = DriverSummary;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: DriverTask,
    ) -> Result<DriverSummary, BenchError> {
        self.drive(ctx, input).await
    }
}
