//! Commands multiplexed onto the runloop.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::client::TopicPartition;
use crate::error::{ClientError, CommitError, FetchError};
use crate::partition_stream::CommittableRecord;

/// Completion side of one downstream pull.
pub(crate) type PullReply = oneshot::Sender<Result<Vec<CommittableRecord>, FetchError>>;

/// One downstream pull for a single partition. Resolved exactly once.
pub(crate) struct RecordRequest {
    pub tp: TopicPartition,
    pub reply: PullReply,
}

impl RecordRequest {
    /// Resolve with a non-empty chunk of records.
    pub fn fulfill(self, chunk: Vec<CommittableRecord>) {
        let _ = self.reply.send(Ok(chunk));
    }

    /// Resolve with the end-of-stream signal.
    pub fn end(self) {
        let _ = self.reply.send(Err(FetchError::Ended));
    }

    /// Resolve with a client failure.
    pub fn fail(self, error: ClientError) {
        let _ = self.reply.send(Err(FetchError::Client(error)));
    }
}

/// One user-initiated commit spanning any number of partitions.
pub(crate) struct CommitRequest {
    /// Highest consumed offset per partition. The runloop commits the mark
    /// `offset + 1`.
    pub offsets: HashMap<TopicPartition, i64>,
    pub done: oneshot::Sender<Result<(), CommitError>>,
}

impl CommitRequest {
    /// Resolve with a failure.
    pub fn fail(self, error: CommitError) {
        let _ = self.done.send(Err(error));
    }
}

/// A command drawn from the merged request, commit, and poll sources.
pub(crate) enum Command {
    Poll,
    Request(RecordRequest),
    Commit(CommitRequest),
}
