//! # Stampede
//!
//! A load-generation and measurement harness for durable-execution platforms.
//!
//! ## Features
//!
//! - **Rate-limited drivers**: each shard starts its executions at a bounded rate
//! - **Resumable progress**: drivers heartbeat the last started index and resume after it
//! - **Completion monitor**: polls the visibility store until the run has drained
//! - **Histogram reports**: started/execution/closed rates and backlog per time bucket
//! - **Metrics correlation**: Prometheus latency and resource series for the same window
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BenchOrchestrator                         │
//! │  (validate spec, fan out drivers per step, join, monitor)   │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────────┐ ┌──────────────────────────────┐
//! │   BatchDriver (per shard)    │ │     CompletionMonitor        │
//! │  RateLimiter + starts +      │ │  list open / list closed     │
//! │  progress heartbeats         │ │  until expected count        │
//! └──────────────────────────────┘ └──────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │         ExecutionStarter / ExecutionLister                   │
//! │  (the platform under test, or InMemoryExecutionStore)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Drivers and the monitor run as activities inside an [`ActivityHost`], which
//! supplies attempt deadlines, cancellation, retries and heartbeat storage.
//!
//! ## Example
//!
//! ```ignore
//! use stampede_bench::prelude::*;
//!
//! let store = Arc::new(InMemoryExecutionStore::new());
//! let orchestrator = BenchOrchestrator::new(BenchConfig::from_env(), store.clone(), store);
//!
//! let spec = RunSpec::from_json(r#"{"steps":[{"count":100,"ratePerSecond":20}],"workflow":{"name":"basic"}}"#)?;
//! let result = orchestrator.run(spec).await?;
//! println!("{}", result.histogram_csv(None));
//! ```

pub mod activity;
pub mod config;
pub mod driver;
pub mod error;
pub mod histogram;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod payload;
pub mod rate_limiter;
pub mod reliability;
pub mod report;
pub mod spec;
pub mod store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        Activity, ActivityContext, ActivityHost, ActivityOptions, InMemoryProgressReporter,
        ProgressReporter,
    };
    pub use crate::config::{BenchConfig, MetricsConfig};
    pub use crate::error::{BenchError, BenchResult};
    pub use crate::metrics::{MetricValue, MetricsSource, PrometheusMetricsSource};
    pub use crate::orchestrator::{BenchOrchestrator, RunPhase, RunResult};
    pub use crate::reliability::RetryPolicy;
    pub use crate::spec::{ReportSpec, RunSpec, Step, TargetSpec};
    pub use crate::store::{
        ExecutionLister, ExecutionStarter, InMemoryExecutionStore, StoreError, TimingTriple,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityHost, ActivityOptions, ProgressReporter};
pub use config::{BenchConfig, MetricsConfig};
pub use driver::{BatchDriver, DriverSettings, DriverSummary, ProgressMarker};
pub use error::{BenchError, BenchResult};
pub use histogram::{build_histogram, HistogramBucket};
pub use metrics::{collect_metrics, MetricValue, MetricsError, MetricsSource, PrometheusMetricsSource};
pub use monitor::{CompletionMonitor, MonitorRequest, MonitorSettings};
pub use orchestrator::{BenchOrchestrator, RunPhase, RunResult};
pub use payload::PayloadExpander;
pub use rate_limiter::RateLimiter;
pub use reliability::RetryPolicy;
pub use spec::{DriverTask, ReportSpec, RunSpec, Step, TargetSpec};
pub use store::{
    ExecutionLister, ExecutionStarter, InMemoryExecutionStore, StartRequest, StoreError,
    TimingTriple,
};
