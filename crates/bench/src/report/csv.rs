//! CSV renderings of histogram and metrics rows

use crate::histogram::HistogramBucket;
use crate::metrics::MetricValue;

const HISTOGRAM_HEADER: [&str; 8] = [
    "Time (seconds)",
    "Workflows Started",
    "Workflows Started Rate",
    "Workflows Executions",
    "Workflows Execution Rate",
    "Workflow Closed",
    "Workflow Closed Rate",
    "Backlog",
];

const METRICS_HEADER: [&str; 8] = [
    "Time (seconds)",
    "Persistence Latency (ms)",
    "Visibility Latency (ms)",
    "History Service Latency (ms)",
    "Persistence CPU (mcores)",
    "Visibility CPU (mcores)",
    "History Service CPU (mcores)",
    "History Service Memory Working Set (MB)",
];

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Histogram as CSV, one row per bucket
///
/// Row `i` is labelled with the end of its bucket, `(i + 1) * interval`. Rates
/// are per second with six decimals. Lines are joined with `\n` and there is no
/// trailing newline.
pub fn histogram_csv(buckets: &[HistogramBucket], interval_seconds: i64, separator: &str) -> String {
    let interval = interval_seconds.max(1);
    let rate = |count: u64| format!("{:.6}", count as f32 / interval as f32);

    let mut lines = Vec::with_capacity(buckets.len() + 1);
    lines.push(HISTOGRAM_HEADER.join(separator));
    for (i, bucket) in buckets.iter().enumerate() {
        lines.push(
            [
                ((i as i64 + 1) * interval).to_string(),
                bucket.started.to_string(),
                rate(bucket.started),
                bucket.execution_began.to_string(),
                rate(bucket.execution_began),
                bucket.closed.to_string(),
                rate(bucket.closed),
                bucket.backlog.to_string(),
            ]
            .join(separator),
        );
    }
    lines.join("\n")
}

/// Metrics rows as CSV; missing samples render as empty cells
pub fn metrics_csv(values: &[MetricValue], interval_seconds: i64, separator: &str) -> String {
    let interval = interval_seconds.max(1);
    let cell = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();

    let mut lines = Vec::with_capacity(values.len() + 1);
    lines.push(METRICS_HEADER.join(separator));
    for (i, value) in values.iter().enumerate() {
        lines.push(
            [
                ((i as i64 + 1) * interval).to_string(),
                cell(value.persistence),
                cell(value.visibility),
                cell(value.history_service),
                cell(value.persistence_cpu),
                cell(value.visibility_cpu),
                cell(value.history_cpu),
                value
                    .history_memory
                    .map(|bytes| ((bytes / BYTES_PER_MB) as i64).to_string())
                    .unwrap_or_default(),
            ]
            .join(separator),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_csv() {
        let buckets = [
            HistogramBucket {
                started: 10,
                execution_began: 5,
                closed: 0,
                backlog: 10,
            },
            HistogramBucket {
                started: 0,
                execution_began: 5,
                closed: 10,
                backlog: 0,
            },
        ];

        let csv = histogram_csv(&buckets, 4, ";");

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Time (seconds);Workflows Started;Workflows Started Rate;Workflows Executions;\
             Workflows Execution Rate;Workflow Closed;Workflow Closed Rate;Backlog"
        );
        assert_eq!(lines[1], "4;10;2.500000;5;1.250000;0;0.000000;10");
        assert_eq!(lines[2], "8;0;0.000000;5;1.250000;10;2.500000;0");
        assert!(!csv.ends_with('\n'));
    }

    #[test]
    fn test_histogram_csv_custom_separator() {
        let csv = histogram_csv(&[HistogramBucket::default()], 60, ",");
        assert_eq!(csv.lines().nth(1), Some("60,0,0.000000,0,0.000000,0,0.000000,0"));
    }

    #[test]
    fn test_empty_histogram_is_header_only() {
        assert_eq!(histogram_csv(&[], 60, ";").lines().count(), 1);
    }

    #[test]
    fn test_metrics_csv_renders_missing_as_empty() {
        let values = [
            MetricValue {
                persistence: Some(12),
                visibility: None,
                history_service: Some(40),
                persistence_cpu: Some(250),
                visibility_cpu: None,
                history_cpu: Some(1500),
                history_memory: Some(3.5 * BYTES_PER_MB),
            },
            MetricValue::default(),
        ];

        let csv = metrics_csv(&values, 30, ";");

        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].starts_with("Time (seconds);Persistence Latency (ms)"));
        assert_eq!(lines[1], "30;12;;40;250;;1500;3");
        assert_eq!(lines[2], "60;;;;;;;");
    }
}
