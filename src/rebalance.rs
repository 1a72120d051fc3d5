//! Consumer group rebalance tracking.
//!
//! Rebalance callbacks run on the thread inside `poll`, which already holds
//! the client gate; the tracker itself is shared with the runloop task, so its
//! state is atomic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::info;

use crate::client::TopicPartition;
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};

/// Tracks whether a consumer group rebalance is in flight.
///
/// The flag goes up on revocation and comes down on the following assignment.
/// While it is up the runloop defers commits (the broker rejects commits for
/// revoked partitions) and stops failing pulls for partitions missing from the
/// transient assignment.
#[derive(Debug)]
pub struct RebalanceTracker {
    rebalancing: AtomicBool,
    rebalance_count: AtomicU64,
    diagnostics: DiagnosticsSink,
}

impl RebalanceTracker {
    /// Create a tracker that reports through the given sink.
    pub fn new(diagnostics: DiagnosticsSink) -> Self {
        Self {
            rebalancing: AtomicBool::new(false),
            rebalance_count: AtomicU64::new(0),
            diagnostics,
        }
    }

    /// `true` while a revoke has been observed without a following assign.
    pub fn is_rebalancing(&self) -> bool {
        self.rebalancing.load(Ordering::SeqCst)
    }

    /// Total rebalance events observed.
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count.load(Ordering::Relaxed)
    }

    /// Revocation callback. Raises the rebalancing flag. The caller pauses
    /// the revoked partitions while it still holds client access.
    pub fn on_revoke(&self, partitions: &HashSet<TopicPartition>) {
        self.rebalancing.store(true, Ordering::SeqCst);
        self.rebalance_count.fetch_add(1, Ordering::Relaxed);
        info!(revoked = partitions.len(), "partitions being revoked");
        self.diagnostics.emit(DiagnosticEvent::PartitionsRevoked {
            partitions: partitions.clone(),
        });
    }

    /// Assignment callback. Clears the rebalancing flag.
    pub fn on_assign(&self, partitions: &HashSet<TopicPartition>) {
        self.rebalancing.store(false, Ordering::SeqCst);
        info!(assigned = partitions.len(), "partitions assigned");
        self.diagnostics.emit(DiagnosticEvent::PartitionsAssigned {
            partitions: partitions.clone(),
        });
    }
}
