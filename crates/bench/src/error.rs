//! Error taxonomy for benchmark runs

use crate::metrics::MetricsError;
use crate::orchestrator::RunPhase;
use crate::store::StoreError;

/// Errors produced by the benchmark harness
///
/// Each variant carries a stable [`error_type`](BenchError::error_type) so the
/// activity host's retry policy can refuse to retry conditions that cannot
/// improve on another attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BenchError {
    /// The run spec is malformed or unsatisfiable
    #[error("invalid run spec: {0}")]
    InvalidSpec(String),

    /// A deadline passed before the work finished
    #[error("timed out: {message}")]
    TimedOut {
        message: String,
        /// Last index a driver completed, when the timeout happened while driving
        last_completed_index: Option<i64>,
    },

    /// The host gave up on one attempt (attempt deadline or missed heartbeats)
    #[error("activity attempt timed out: {0}")]
    AttemptTimedOut(String),

    /// The caller requested cancellation
    #[error("cancelled")]
    Cancelled,

    /// Starting a target execution failed
    #[error("failed to start execution {id}: {source}")]
    Start {
        id: String,
        #[source]
        source: StoreError,
    },

    /// Listing executions failed
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Querying external metrics failed
    #[error("metrics query failed: {0}")]
    Metrics(#[from] MetricsError),

    /// A value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A report was requested before the run reached the reporting phase
    #[error("run results are not available in phase {0}")]
    NotReady(RunPhase),
}

impl BenchError {
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut {
            message: message.into(),
            last_completed_index: None,
        }
    }

    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Stable error type name used by retry policies
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidSpec(_) => "InvalidSpec",
            Self::TimedOut { .. } => "TimedOut",
            Self::AttemptTimedOut(_) => "AttemptTimedOut",
            Self::Cancelled => "Cancelled",
            Self::Start { .. } => "StartFailed",
            Self::Store { .. } => "StoreFailed",
            Self::Metrics(_) => "MetricsFailed",
            Self::Serialization(_) => "Serialization",
            Self::NotReady(_) => "NotReady",
        }
    }

    /// Whether another attempt of the same work could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidSpec(_)
                | Self::TimedOut { .. }
                | Self::Cancelled
                | Self::Serialization(_)
                | Self::NotReady(_)
        )
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias used across the crate
pub type BenchResult<T> = Result<T, BenchError>;
