//! Report renderings
//!
//! Every function here is pure: the same buckets (or metric rows) always render
//! to the same text.

mod csv;
mod html;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::BenchError;
use crate::histogram::HistogramBucket;
use crate::metrics::{MetricValue, MetricsWindow};

pub use csv::{histogram_csv, metrics_csv};
pub use html::histogram_html;

/// Histogram as a JSON array of `{started, execution, closed, backlog}`
pub fn histogram_json(buckets: &[HistogramBucket]) -> Result<String, BenchError> {
    Ok(serde_json::to_string(buckets)?)
}

/// Metric rows as a JSON array
pub fn metrics_json(values: &[MetricValue]) -> Result<String, BenchError> {
    Ok(serde_json::to_string(values)?)
}

/// Window covering `bucket_count` buckets from `start`, one sample per bucket
pub fn metrics_window(
    start: DateTime<Utc>,
    interval_seconds: i64,
    bucket_count: usize,
) -> MetricsWindow {
    let interval = interval_seconds.max(1);
    MetricsWindow {
        start,
        end: start + chrono::Duration::seconds(interval * bucket_count as i64),
        step: Duration::from_secs(interval as u64),
    }
}
