//! Run specs: steps, target and report settings
//!
//! JSON shape:
//!
//! ```json
//! {
//!   "steps": [{"count": 1000, "concurrency": 5, "ratePerSecond": 50}],
//!   "workflow": {"name": "basic", "args": {"payload": "$RANDOM(64)"}},
//!   "report": {"intervalInSeconds": 60, "csvSeparator": ";"}
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BenchError;

/// Bucket width used when a spec leaves it unset or non-positive
pub const DEFAULT_INTERVAL_SECONDS: i64 = 60;

/// Separator used when a spec leaves it unset or empty
pub const DEFAULT_CSV_SEPARATOR: &str = ";";

/// Everything one benchmark run needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Load steps, driven strictly in order
    pub steps: Vec<Step>,

    /// Workflow under test
    #[serde(rename = "workflow")]
    pub target: TargetSpec,

    #[serde(default)]
    pub report: ReportSpec,
}

/// One load step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Total executions to start across all shards
    pub count: u64,

    /// Number of concurrent drivers; 0 derives it from the rate
    #[serde(default)]
    pub concurrency: u64,

    /// Maximum starts per second across all shards; 0 is unlimited
    #[serde(default)]
    pub rate_per_second: u64,
}

/// Target workflow and the parameters every execution receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,

    #[serde(rename = "args", default)]
    pub parameters: Value,
}

/// Histogram and CSV settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    #[serde(default = "default_interval")]
    pub interval_in_seconds: i64,

    #[serde(default = "default_separator")]
    pub csv_separator: String,
}

fn default_interval() -> i64 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_separator() -> String {
    DEFAULT_CSV_SEPARATOR.to_string()
}

impl Default for ReportSpec {
    fn default() -> Self {
        Self {
            interval_in_seconds: DEFAULT_INTERVAL_SECONDS,
            csv_separator: default_separator(),
        }
    }
}

impl ReportSpec {
    /// Bucket width in whole seconds, never below one
    pub fn interval_seconds(&self) -> i64 {
        if self.interval_in_seconds <= 0 {
            DEFAULT_INTERVAL_SECONDS
        } else {
            self.interval_in_seconds
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds() as u64)
    }

    pub fn separator(&self) -> &str {
        if self.csv_separator.is_empty() {
            DEFAULT_CSV_SEPARATOR
        } else {
            &self.csv_separator
        }
    }
}

/// One shard of a step, owned by a single driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverTask {
    /// Prefix for execution ids: `{run}-{step}-{shard}`
    pub base_id: String,

    /// Executions this shard starts
    pub batch_size: u64,

    /// Per-shard starts per second; 0 is unlimited
    pub rate_per_second: i64,

    pub target: TargetSpec,
}

impl DriverTask {
    /// Execution id for index `i` of this shard
    pub fn execution_id(&self, index: u64) -> String {
        format!("{}-{}-{}", self.target.name, self.base_id, index)
    }
}

impl RunSpec {
    /// Parse and validate a spec from JSON
    pub fn from_json(json: &str) -> Result<Self, BenchError> {
        let spec: Self = serde_json::from_str(json)
            .map_err(|e| BenchError::InvalidSpec(format!("malformed run spec: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Reject specs no run could satisfy
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidSpec`] when there are no steps, the target
    /// has no name, a step has a zero count, or an explicit concurrency does not
    /// divide its step's count.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.steps.is_empty() {
            return Err(BenchError::InvalidSpec(
                "run spec must have at least one step defined".into(),
            ));
        }

        if self.target.name.trim().is_empty() {
            return Err(BenchError::InvalidSpec("workflow name must not be empty".into()));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.count == 0 {
                return Err(BenchError::InvalidSpec(format!(
                    "step {index}: count must be positive"
                )));
            }
            if step.concurrency > 0 && step.count % step.concurrency != 0 {
                return Err(BenchError::InvalidSpec(format!(
                    "step {index}: count {} must be a multiple of concurrency {}",
                    step.count, step.concurrency
                )));
            }
        }

        Ok(())
    }

    /// Executions started across all steps
    pub fn total_count(&self) -> u64 {
        self.steps.iter().map(|s| s.count).sum()
    }
}

impl Step {
    /// Number of concurrent shards for this step
    ///
    /// An explicit concurrency wins. Otherwise one shard per 10 starts/second
    /// when the rate exceeds 10, never more shards than executions, else one.
    pub fn effective_concurrency(&self) -> u64 {
        if self.concurrency > 0 {
            self.concurrency
        } else if self.rate_per_second > 10 {
            (self.rate_per_second / 10).min(self.count).max(1)
        } else {
            1
        }
    }

    /// Rate each shard is limited to
    ///
    /// A positive step rate gives every shard at least one start per second so
    /// integer division never turns a limited step into an unlimited one.
    pub fn shard_rate(&self) -> i64 {
        if self.rate_per_second == 0 {
            return 0;
        }
        let per_shard = self.rate_per_second / self.effective_concurrency();
        per_shard.max(1) as i64
    }

    /// Split this step into driver tasks
    ///
    /// Shard `i` gets base id `{run_base_id}-{step_index}-{i}`. When a derived
    /// concurrency does not divide the count, the first shards take one extra
    /// execution each so the shards add up to `count`.
    pub fn driver_tasks(
        &self,
        run_base_id: &str,
        step_index: usize,
        target: &TargetSpec,
    ) -> Vec<DriverTask> {
        let concurrency = self.effective_concurrency();
        let base = self.count / concurrency;
        let remainder = self.count % concurrency;
        let rate = self.shard_rate();

        (0..concurrency)
            .map(|shard| DriverTask {
                base_id: format!("{run_base_id}-{step_index}-{shard}"),
                batch_size: base + u64::from(shard < remainder),
                rate_per_second: rate,
                target: target.clone(),
            })
            .collect()
    }
}
