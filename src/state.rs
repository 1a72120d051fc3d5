//! The runloop's in-memory state.

use std::collections::{HashMap, HashSet};

use crate::client::{Record, TopicPartition};
use crate::commands::{CommitRequest, RecordRequest};

/// Pending work carried between commands.
///
/// Invariants held between command handlings:
/// - no partition has an empty entry in the record buffer;
/// - pending commits exist only while a rebalance is in flight;
/// - a partition with both buffered records and a pending pull is resolved by
///   the next poll.
#[derive(Default)]
pub(crate) struct RunloopState {
    pending_requests: Vec<RecordRequest>,
    pending_commits: Vec<CommitRequest>,
    buffered: HashMap<TopicPartition, Vec<Record>>,
}

impl RunloopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pull until the next poll can serve it.
    pub fn add_request(&mut self, request: RecordRequest) {
        self.pending_requests.push(request);
    }

    /// Queue a commit until the rebalance window closes.
    pub fn add_commit(&mut self, commit: CommitRequest) {
        self.pending_commits.push(commit);
    }

    /// Partitions with at least one pending pull.
    pub fn requested_partitions(&self) -> HashSet<TopicPartition> {
        self.pending_requests
            .iter()
            .map(|request| request.tp.clone())
            .collect()
    }

    /// Remove and return every pending pull, preserving enqueue order.
    pub fn take_requests(&mut self) -> Vec<RecordRequest> {
        std::mem::take(&mut self.pending_requests)
    }

    /// Put surviving pulls back, in the order they were taken.
    pub fn restore_requests(&mut self, requests: Vec<RecordRequest>) {
        debug_assert!(self.pending_requests.is_empty());
        self.pending_requests = requests;
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn has_pending_commits(&self) -> bool {
        !self.pending_commits.is_empty()
    }

    /// Remove and return every deferred commit, preserving enqueue order.
    pub fn take_commits(&mut self) -> Vec<CommitRequest> {
        std::mem::take(&mut self.pending_commits)
    }

    /// Append record batches to their partition buffers in arrival order.
    /// Empty batches are dropped rather than stored.
    pub fn buffer_records(
        &mut self,
        batches: impl IntoIterator<Item = (TopicPartition, Vec<Record>)>,
    ) {
        for (tp, batch) in batches {
            if batch.is_empty() {
                continue;
            }
            self.buffered.entry(tp).or_default().extend(batch);
        }
    }

    /// Remove and return the buffer for one partition, empty if none.
    pub fn take_buffered(&mut self, tp: &TopicPartition) -> Vec<Record> {
        self.buffered.remove(tp).unwrap_or_default()
    }

    /// Drop the buffer for one partition.
    pub fn remove_buffered(&mut self, tp: &TopicPartition) {
        self.buffered.remove(tp);
    }

    #[cfg(test)]
    pub fn buffered_partitions(&self) -> HashSet<TopicPartition> {
        self.buffered.keys().cloned().collect()
    }
}
