//! Runloop activity counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters maintained by the runloop. Updates are relaxed atomics; readers
/// take a [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct ConsumerMetrics {
    polls: AtomicU64,
    records_polled: AtomicU64,
    pulls_fulfilled: AtomicU64,
    pulls_ended: AtomicU64,
    commits_started: AtomicU64,
    commits_succeeded: AtomicU64,
    commits_failed: AtomicU64,
    last_commit_ms: AtomicI64,
}

impl ConsumerMetrics {
    pub fn record_poll(&self, records: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.records_polled
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn inc_pulls_fulfilled(&self) {
        self.pulls_fulfilled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pulls_ended(&self) {
        self.pulls_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commits_started(&self) {
        self.commits_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_commit_succeeded(&self) {
        self.commits_succeeded.fetch_add(1, Ordering::Relaxed);
        self.last_commit_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn inc_commits_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, rebalances: u64) -> MetricsSnapshot {
        let last_commit_ms = self.last_commit_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            records_polled: self.records_polled.load(Ordering::Relaxed),
            pulls_fulfilled: self.pulls_fulfilled.load(Ordering::Relaxed),
            pulls_ended: self.pulls_ended.load(Ordering::Relaxed),
            commits_started: self.commits_started.load(Ordering::Relaxed),
            commits_succeeded: self.commits_succeeded.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            rebalances,
            last_commit_time: (last_commit_ms != 0)
                .then(|| DateTime::from_timestamp_millis(last_commit_ms))
                .flatten(),
        }
    }
}

/// Point-in-time view of consumer activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Polls that reached the client.
    pub polls: u64,
    /// Records returned across all polls.
    pub records_polled: u64,
    /// Downstream pulls resolved with records.
    pub pulls_fulfilled: u64,
    /// Downstream pulls resolved with end-of-stream.
    pub pulls_ended: u64,
    /// Commits submitted to the client.
    pub commits_started: u64,
    /// Commits acknowledged by the broker.
    pub commits_succeeded: u64,
    /// Commits rejected or failed.
    pub commits_failed: u64,
    /// Rebalance events observed.
    pub rebalances: u64,
    /// When the broker last acknowledged a commit.
    pub last_commit_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ConsumerMetrics::default();
        metrics.record_poll(3);
        metrics.record_poll(0);
        metrics.inc_pulls_fulfilled();
        metrics.inc_pulls_ended();
        metrics.inc_commits_started();
        metrics.mark_commit_succeeded();

        let snapshot = metrics.snapshot(2);
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.records_polled, 3);
        assert_eq!(snapshot.pulls_fulfilled, 1);
        assert_eq!(snapshot.pulls_ended, 1);
        assert_eq!(snapshot.commits_started, 1);
        assert_eq!(snapshot.commits_succeeded, 1);
        assert_eq!(snapshot.commits_failed, 0);
        assert_eq!(snapshot.rebalances, 2);
        assert!(snapshot.last_commit_time.is_some());
    }

    #[test]
    fn fresh_metrics_report_no_commit_time() {
        let metrics = ConsumerMetrics::default();
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.last_commit_time, None);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = ConsumerMetrics::default();
        let json = serde_json::to_string(&metrics.snapshot(0)).unwrap();
        assert!(json.contains("\"polls\":0"));
    }
}
