//! Fire-and-forget diagnostic events.
//!
//! Every event is logged through `tracing`; an optional channel forwards the
//! raw events to tests or operators. Emission never blocks and never fails.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::debug;

use crate::client::TopicPartition;
use crate::error::ClientError;

/// Observable runloop activity.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// A downstream pull was enqueued for a partition.
    PullRequested {
        /// Partition the pull targets.
        tp: TopicPartition,
    },
    /// The group assigned partitions to this consumer.
    PartitionsAssigned {
        /// Assigned partitions.
        partitions: HashSet<TopicPartition>,
    },
    /// The group revoked partitions from this consumer.
    PartitionsRevoked {
        /// Revoked partitions.
        partitions: HashSet<TopicPartition>,
    },
    /// A poll completed.
    Polled {
        /// Partitions that had demand going into the poll.
        requested: HashSet<TopicPartition>,
        /// Partitions whose pulls were fulfilled by this poll.
        fulfilled: HashSet<TopicPartition>,
        /// Partitions whose pulls remain pending.
        pending: HashSet<TopicPartition>,
    },
    /// A commit was submitted to the client.
    CommitStarted {
        /// Commit marks by partition.
        offsets: HashMap<TopicPartition, i64>,
    },
    /// The broker acknowledged a commit.
    CommitSucceeded {
        /// Commit marks by partition.
        offsets: HashMap<TopicPartition, i64>,
    },
    /// The broker rejected a commit.
    CommitFailed {
        /// Commit marks by partition.
        offsets: HashMap<TopicPartition, i64>,
        /// Rejection cause.
        error: ClientError,
    },
}

/// Emitter for [`DiagnosticEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSink {
    tx: Option<mpsc::UnboundedSender<DiagnosticEvent>>,
}

impl DiagnosticsSink {
    /// A sink that only logs through `tracing`.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink paired with a receiver for the raw event feed.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit an event. Never blocks; a dropped receiver is ignored.
    pub fn emit(&self, event: DiagnosticEvent) {
        debug!(event = ?event, "diagnostic");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
