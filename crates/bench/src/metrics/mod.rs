//! External metrics correlation
//!
//! Pulls server-side latency and resource series for the time window of a run
//! so they can be lined up against the histogram buckets.

mod prometheus;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MetricsConfig;

pub use prometheus::{parse_query_range, PrometheusMetricsSource};

/// Error type for metrics queries
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    /// The request could not be sent or timed out
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success HTTP status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The server rejected the query
    #[error("query {query:?} failed: {message}")]
    Query { query: String, message: String },

    /// The response body was not understood
    #[error("malformed response: {0}")]
    Decode(String),

    /// The query did not yield a range vector
    #[error("query {0:?} yielded no results")]
    NoResults(String),

    /// No metrics source was configured for the run
    #[error("no metrics source configured")]
    NotConfigured,
}

/// Time range and resolution of a range query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

/// Source of range-query samples
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    /// Run `query` over `window`, returning samples of every series in order
    async fn query_range(&self, query: &str, window: &MetricsWindow)
        -> Result<Vec<f64>, MetricsError>;
}

/// Server metrics for one histogram bucket
///
/// Latencies are p95 milliseconds, CPU is millicores, memory is bytes. A sample
/// that is missing or not a number is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub persistence: Option<i64>,
    pub visibility: Option<i64>,
    pub history_service: Option<i64>,
    pub persistence_cpu: Option<i64>,
    pub visibility_cpu: Option<i64>,
    pub history_cpu: Option<i64>,
    pub history_memory: Option<f64>,
}

fn p95(metric: &str) -> String {
    format!("histogram_quantile(0.95,sum(rate({metric}[5m])) by (le))")
}

fn container_cpu(container: &str) -> String {
    format!("sum(rate(container_cpu_usage_seconds_total{{container=\"{container}\"}}[2m]))")
}

const HISTORY_CONTAINER: &str = "temporal-history";

/// Query every correlated series and zip them per bucket
///
/// The persistence latency series drives the row count; it is queried twice and
/// the larger sample of each pair is kept.
///
/// # Errors
///
/// The first failing query aborts the collection.
pub async fn collect_metrics(
    source: &dyn MetricsSource,
    config: &MetricsConfig,
    window: &MetricsWindow,
) -> Result<Vec<MetricValue>, MetricsError> {
    let persistence_query = p95("persistence_latency_bucket{type='history'}");
    let updates = source.query_range(&persistence_query, window).await?;
    let appends = source.query_range(&persistence_query, window).await?;
    let visibility = source
        .query_range(
            &p95("visibility_persistence_latency_bucket{type='history'}"),
            window,
        )
        .await?;
    let services = source
        .query_range(&p95("service_latency_bucket{type='history'}"), window)
        .await?;
    let history_cpu = source
        .query_range(&container_cpu(HISTORY_CONTAINER), window)
        .await?;
    let history_memory = source
        .query_range(
            &format!(
                "max(container_memory_working_set_bytes{{container=\"{HISTORY_CONTAINER}\"}})"
            ),
            window,
        )
        .await?;
    let persistence_cpu = source
        .query_range(&container_cpu(&config.state_container), window)
        .await?;
    let visibility_cpu = source
        .query_range(&container_cpu(&config.visibility_container), window)
        .await?;

    debug!(rows = updates.len(), "collected metrics series");

    let at = |series: &[f64], i: usize| series.get(i).copied().and_then(scaled);
    Ok(updates
        .iter()
        .enumerate()
        .map(|(i, update)| {
            let storage = appends.get(i).map_or(*update, |a| update.max(*a));
            MetricValue {
                persistence: scaled(storage),
                visibility: at(&visibility, i),
                history_service: at(&services, i),
                persistence_cpu: at(&persistence_cpu, i),
                visibility_cpu: at(&visibility_cpu, i),
                history_cpu: at(&history_cpu, i),
                history_memory: history_memory.get(i).copied().filter(|m| m.is_finite()),
            }
        })
        .collect())
}

/// Seconds (or cores) to whole milli-units, dropping NaN and infinities
fn scaled(value: f64) -> Option<i64> {
    value.is_finite().then(|| (value * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Source answering from a fixed query -> samples table
    struct TableSource {
        series: HashMap<String, Vec<f64>>,
        queries: Mutex<Vec<String>>,
    }

    impl TableSource {
        fn new(series: &[(String, Vec<f64>)]) -> Self {
            Self {
                series: series.iter().cloned().collect(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MetricsSource for TableSource {
        async fn query_range(
            &self,
            query: &str,
            _window: &MetricsWindow,
        ) -> Result<Vec<f64>, MetricsError> {
            self.queries.lock().push(query.to_string());
            self.series
                .get(query)
                .cloned()
                .ok_or_else(|| MetricsError::NoResults(query.to_string()))
        }
    }

    fn window() -> MetricsWindow {
        let start = Utc::now();
        MetricsWindow {
            start,
            end: start + chrono::Duration::seconds(120),
            step: Duration::from_secs(60),
        }
    }

    fn full_table(config: &MetricsConfig) -> Vec<(String, Vec<f64>)> {
        vec![
            (p95("persistence_latency_bucket{type='history'}"), vec![0.015625, f64::NAN]),
            (p95("visibility_persistence_latency_bucket{type='history'}"), vec![0.5]),
            (p95("service_latency_bucket{type='history'}"), vec![0.03125, 0.02]),
            (container_cpu(HISTORY_CONTAINER), vec![1.25, 1.5]),
            (
                "max(container_memory_working_set_bytes{container=\"temporal-history\"})".into(),
                vec![104857600.0, f64::NAN],
            ),
            (container_cpu(&config.state_container), vec![0.25, 0.5]),
        ]
    }

    #[tokio::test]
    async fn test_collects_and_scales_series() {
        let config = MetricsConfig {
            visibility_container: "elasticsearch".into(),
            ..MetricsConfig::default()
        };
        let mut table = full_table(&config);
        table.push((container_cpu("elasticsearch"), vec![2.0, 2.5]));
        let source = TableSource::new(&table);

        let values = collect_metrics(&source, &config, &window()).await.unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values[0].persistence, Some(15));
        assert_eq!(values[0].visibility, Some(500));
        assert_eq!(values[0].history_service, Some(31));
        assert_eq!(values[0].history_cpu, Some(1250));
        assert_eq!(values[0].persistence_cpu, Some(250));
        assert_eq!(values[0].visibility_cpu, Some(2000));
        assert_eq!(values[0].history_memory, Some(104857600.0));

        assert_eq!(values[1].persistence, None);
        assert_eq!(values[1].visibility, None);
        assert_eq!(values[1].history_memory, None);
        assert_eq!(source.queries.lock().len(), 8);
    }

    #[tokio::test]
    async fn test_failed_query_aborts() {
        let config = MetricsConfig {
            visibility_container: "elasticsearch".into(),
            ..MetricsConfig::default()
        };
        let source = TableSource::new(&full_table(&config));

        let err = collect_metrics(&source, &config, &window()).await.unwrap_err();

        assert!(matches!(err, MetricsError::NoResults(q) if q.contains("elasticsearch")));
    }

    #[test]
    fn test_metric_value_field_names() {
        let value = MetricValue {
            history_service: Some(3),
            ..MetricValue::default()
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["historyService"], 3);
        assert!(json["historyMemory"].is_null());
        assert!(json.get("persistenceCpu").is_some());
    }

    #[test]
    fn test_query_text() {
        assert_eq!(
            p95("service_latency_bucket{type='history'}"),
            "histogram_quantile(0.95,sum(rate(service_latency_bucket{type='history'}[5m])) by (le))"
        );
        assert_eq!(
            container_cpu("cassandra"),
            "sum(rate(container_cpu_usage_seconds_total{container=\"cassandra\"}[2m]))"
        );
    }
}
