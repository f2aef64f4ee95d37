//! Fixed-width throughput and backlog histogram

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::TimingTriple;

/// Counters for one time bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Executions started in this bucket
    pub started: u64,

    /// Executions whose first task began in this bucket
    #[serde(rename = "execution")]
    pub execution_began: u64,

    /// Executions closed in this bucket
    pub closed: u64,

    /// Executions open across this bucket (started earlier or here, closed later)
    pub backlog: u64,
}

/// Bucket a set of timings into `interval_seconds`-wide buckets
///
/// Bucket 0 starts at the earliest start time; the last bucket holds the latest
/// close time. Timestamps are placed by whole elapsed seconds, truncated, and
/// clamped into range. An execution adds to `backlog` in every bucket from its
/// start bucket up to, not including, its close bucket.
///
/// The result depends only on the multiset of triples, never on their order.
/// Empty input yields no buckets; a non-positive interval is treated as one second.
pub fn build_histogram(triples: &[TimingTriple], interval_seconds: i64) -> Vec<HistogramBucket> {
    let (Some(window_start), Some(window_end)) = (
        triples.iter().map(|t| t.start_time).min(),
        triples.iter().map(|t| t.close_time).max(),
    ) else {
        return Vec::new();
    };

    let interval = interval_seconds.max(1);
    let span = (window_end - window_start).num_seconds().max(0);
    let count = (span / interval + 1) as usize;
    let index = |t: DateTime<Utc>| -> usize {
        let offset = (t - window_start).num_seconds() / interval;
        offset.clamp(0, count as i64 - 1) as usize
    };

    let mut buckets = vec![HistogramBucket::default(); count];
    for triple in triples {
        let si = index(triple.start_time);
        let ei = index(triple.execution_time);
        let ci = index(triple.close_time);

        buckets[si].started += 1;
        buckets[ei].execution_began += 1;
        buckets[ci].closed += 1;
        for bucket in buckets.iter_mut().take(ci).skip(si) {
            bucket.backlog += 1;
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn triple(start: i64, execution: i64, close: i64) -> TimingTriple {
        TimingTriple::new(at(start), at(execution), at(close))
    }

    #[test]
    fn test_empty_input_has_no_buckets() {
        assert!(build_histogram(&[], 60).is_empty());
    }

    #[test]
    fn test_single_execution_spanning_buckets() {
        let buckets = build_histogram(&[triple(0, 1, 12)], 5);

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].started, 1);
        assert_eq!(buckets[0].execution_began, 1);
        assert_eq!(buckets[0].backlog, 1);
        assert_eq!(buckets[1].backlog, 1);
        assert_eq!(buckets[2].closed, 1);
        assert_eq!(buckets[2].backlog, 0);
    }

    #[test]
    fn test_zero_duration_execution_has_no_backlog() {
        let buckets = build_histogram(&[triple(7, 7, 7)], 5);

        assert_eq!(
            buckets,
            vec![HistogramBucket {
                started: 1,
                execution_began: 1,
                closed: 1,
                backlog: 0,
            }]
        );
    }

    #[test]
    fn test_window_starts_at_earliest_start() {
        let buckets = build_histogram(&[triple(10, 11, 14), triple(20, 21, 31)], 10);

        // window [10, 31] -> floor(21 / 10) + 1 = 3 buckets
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].started, 1);
        assert_eq!(buckets[0].closed, 1);
        assert_eq!(buckets[1].started, 1);
        assert_eq!(buckets[1].backlog, 1);
        assert_eq!(buckets[2].closed, 1);
    }

    #[test]
    fn test_sub_second_offsets_truncate() {
        let start = at(0);
        let t = TimingTriple::new(
            start,
            start + Duration::milliseconds(4_999),
            start + Duration::milliseconds(5_000),
        );

        let buckets = build_histogram(&[t], 5);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].execution_began, 1);
        assert_eq!(buckets[1].closed, 1);
    }

    #[test]
    fn test_order_does_not_matter() {
        let triples = vec![
            triple(0, 1, 30),
            triple(3, 4, 9),
            triple(12, 20, 45),
            triple(44, 44, 46),
        ];
        let mut reversed = triples.clone();
        reversed.reverse();

        let first = build_histogram(&triples, 10);
        assert_eq!(first, build_histogram(&triples, 10));
        assert_eq!(first, build_histogram(&reversed, 10));
    }

    #[test]
    fn test_totals_match_input() {
        let triples: Vec<_> = (0..50).map(|i| triple(i, i + 1, i * 2 + 3)).collect();
        let buckets = build_histogram(&triples, 7);

        assert_eq!(buckets.iter().map(|b| b.started).sum::<u64>(), 50);
        assert_eq!(buckets.iter().map(|b| b.execution_began).sum::<u64>(), 50);
        assert_eq!(buckets.iter().map(|b| b.closed).sum::<u64>(), 50);
    }

    #[test]
    fn test_serializes_with_report_field_names() {
        let bucket = HistogramBucket {
            started: 1,
            execution_began: 2,
            closed: 3,
            backlog: 4,
        };
        assert_eq!(
            serde_json::to_value(bucket).unwrap(),
            serde_json::json!({"started": 1, "execution": 2, "closed": 3, "backlog": 4})
        );
    }
}
