// Benchmark Configuration
//
// Run-wide settings passed to the orchestrator at construction, loaded from
// environment variables.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::reliability::RetryPolicy;

/// Settings shared by every run of an orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// Task queue target executions are started on
    pub target_task_queue: String,

    /// Execution timeout handed to each started target execution
    pub target_execution_timeout: Duration,

    /// Task timeout handed to each started target execution
    pub target_task_timeout: Duration,

    /// Overall budget of one run; driver and monitor deadlines derive from it
    pub run_timeout: Duration,

    /// Driver yields this long before its attempt deadline
    pub driver_safety_margin: Duration,

    /// Monitor yields this long before its attempt deadline
    pub monitor_safety_margin: Duration,

    /// Sleep between monitor polls
    pub monitor_poll_interval: Duration,

    /// Listing window starts this long before the run started
    pub scope_margin: Duration,

    /// Page size for closed-execution listing
    pub closed_page_size: usize,

    /// Attempts that go this long without a heartbeat are abandoned
    pub heartbeat_timeout: Duration,

    pub retry_policy: RetryPolicy,

    pub metrics: MetricsConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            target_task_queue: "stampede-target".to_string(),
            target_execution_timeout: Duration::from_secs(30 * 60),
            target_task_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(60 * 60),
            driver_safety_margin: Duration::from_secs(2),
            monitor_safety_margin: Duration::from_secs(5),
            monitor_poll_interval: Duration::from_secs(3),
            scope_margin: Duration::from_secs(10),
            closed_page_size: 1000,
            heartbeat_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::bench_default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `BENCH_TARGET_TASK_QUEUE`: task queue for target executions
    /// - `BENCH_TARGET_EXECUTION_TIMEOUT_SECS`, `BENCH_TARGET_TASK_TIMEOUT_SECS`
    /// - `BENCH_RUN_TIMEOUT_SECS`: overall run budget (default: 3600)
    /// - `BENCH_DRIVER_SAFETY_MARGIN_MS`, `BENCH_MONITOR_SAFETY_MARGIN_MS`
    /// - `BENCH_MONITOR_POLL_INTERVAL_MS`: monitor poll interval (default: 3000)
    /// - `BENCH_SCOPE_MARGIN_SECS`, `BENCH_CLOSED_PAGE_SIZE`
    /// - `BENCH_HEARTBEAT_TIMEOUT_SECS`, `BENCH_ACTIVITY_MAX_ATTEMPTS`
    /// - see [`MetricsConfig::from_env`] for the metrics settings
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_attempts = parse_or(
            &lookup,
            "BENCH_ACTIVITY_MAX_ATTEMPTS",
            defaults.retry_policy.max_attempts,
        );

        Self {
            target_task_queue: lookup("BENCH_TARGET_TASK_QUEUE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.target_task_queue),
            target_execution_timeout: secs_or(
                &lookup,
                "BENCH_TARGET_EXECUTION_TIMEOUT_SECS",
                defaults.target_execution_timeout,
            ),
            target_task_timeout: secs_or(
                &lookup,
                "BENCH_TARGET_TASK_TIMEOUT_SECS",
                defaults.target_task_timeout,
            ),
            run_timeout: secs_or(&lookup, "BENCH_RUN_TIMEOUT_SECS", defaults.run_timeout),
            driver_safety_margin: millis_or(
                &lookup,
                "BENCH_DRIVER_SAFETY_MARGIN_MS",
                defaults.driver_safety_margin,
            ),
            monitor_safety_margin: millis_or(
                &lookup,
                "BENCH_MONITOR_SAFETY_MARGIN_MS",
                defaults.monitor_safety_margin,
            ),
            monitor_poll_interval: millis_or(
                &lookup,
                "BENCH_MONITOR_POLL_INTERVAL_MS",
                defaults.monitor_poll_interval,
            ),
            scope_margin: secs_or(&lookup, "BENCH_SCOPE_MARGIN_SECS", defaults.scope_margin),
            closed_page_size: parse_or(&lookup, "BENCH_CLOSED_PAGE_SIZE", defaults.closed_page_size)
                .max(1),
            heartbeat_timeout: secs_or(
                &lookup,
                "BENCH_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            retry_policy: defaults.retry_policy.with_max_attempts(max_attempts),
            metrics: MetricsConfig::from_lookup(&lookup),
        }
    }
}

/// Prometheus settings for the external-metrics correlation report
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Prometheus server base URL
    pub endpoint: String,

    /// Container running the persistence store
    pub state_container: String,

    /// Container running the visibility store
    pub visibility_container: String,

    pub query_timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090".to_string(),
            state_container: "cassandra".to_string(),
            visibility_container: "cassandra".to_string(),
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl MetricsConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PROMETHEUS_SERVER_ENDPOINT` (default: http://localhost:9090)
    /// - `TEMPORAL_STATE_CONTAINER`, `TEMPORAL_VISIBILITY_CONTAINER` (default: cassandra)
    /// - `PROMETHEUS_QUERY_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            endpoint: non_empty("PROMETHEUS_SERVER_ENDPOINT").unwrap_or(defaults.endpoint),
            state_container: non_empty("TEMPORAL_STATE_CONTAINER")
                .unwrap_or(defaults.state_container),
            visibility_container: non_empty("TEMPORAL_VISIBILITY_CONTAINER")
                .unwrap_or(defaults.visibility_container),
            query_timeout: secs_or(&lookup, "PROMETHEUS_QUERY_TIMEOUT_SECS", defaults.query_timeout),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "ignoring unparseable setting");
            default
        }),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}
