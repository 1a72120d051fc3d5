//! Per-partition record streams and committable records.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::client::{Record, TopicPartition};
use crate::commands::{CommitRequest, RecordRequest};
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{ClientError, CommitError, FetchError};

/// A consumed record paired with a handle that commits its offset.
#[derive(Debug, Clone)]
pub struct CommittableRecord {
    record: Record,
    commits: Option<mpsc::UnboundedSender<CommitRequest>>,
}

impl CommittableRecord {
    pub(crate) fn new(record: Record, commits: Option<mpsc::UnboundedSender<CommitRequest>>) -> Self {
        Self { record, commits }
    }

    /// The underlying record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Partition the record was read from.
    pub fn tp(&self) -> &TopicPartition {
        &self.record.tp
    }

    /// Offset of the record within its partition.
    pub fn offset(&self) -> i64 {
        self.record.offset
    }

    /// Record key, if present.
    pub fn key(&self) -> Option<&[u8]> {
        self.record.key.as_deref()
    }

    /// Record value, if present.
    pub fn payload(&self) -> Option<&[u8]> {
        self.record.payload.as_deref()
    }

    /// Discard the commit handle and keep the record.
    pub fn into_record(self) -> Record {
        self.record
    }

    /// Acknowledge this record.
    ///
    /// Enqueues a single-entry commit for the record's offset and waits for
    /// the broker outcome. The committed mark is `offset + 1`.
    pub async fn commit(&self) -> Result<(), CommitError> {
        let commits = self.commits.as_ref().ok_or(CommitError::ShutDown)?;
        let (done, wait) = oneshot::channel();
        let offsets = HashMap::from([(self.record.tp.clone(), self.record.offset)]);
        commits
            .send(CommitRequest { offsets, done })
            .map_err(|_| CommitError::ShutDown)?;
        wait.await.map_err(|_| CommitError::ShutDown)?
    }
}

enum PullState {
    Idle,
    Waiting(oneshot::Receiver<Result<Vec<CommittableRecord>, FetchError>>),
    Done,
}

impl std::fmt::Debug for PullState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullState::Idle => f.write_str("Idle"),
            PullState::Waiting(_) => f.write_str("Waiting"),
            PullState::Done => f.write_str("Done"),
        }
    }
}

/// Demand-driven stream of record chunks for one assigned partition.
///
/// Each pull enqueues a request with the runloop and waits for it to be
/// served; no records are fetched without demand. The stream ends cleanly
/// when the partition is revoked or the consumer shuts down, and yields an
/// error if the runloop fails.
#[derive(Debug)]
pub struct PartitionStream {
    tp: TopicPartition,
    requests: mpsc::UnboundedSender<RecordRequest>,
    diagnostics: DiagnosticsSink,
    pull: PullState,
}

impl PartitionStream {
    pub(crate) fn new(
        tp: TopicPartition,
        requests: mpsc::UnboundedSender<RecordRequest>,
        diagnostics: DiagnosticsSink,
    ) -> Self {
        Self {
            tp,
            requests,
            diagnostics,
            pull: PullState::Idle,
        }
    }

    /// Partition this stream serves.
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.tp
    }
}

impl Stream for PartitionStream {
    type Item = Result<Vec<CommittableRecord>, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.pull {
                PullState::Done => return Poll::Ready(None),
                PullState::Idle => {
                    let (reply, wait) = oneshot::channel();
                    let request = RecordRequest {
                        tp: this.tp.clone(),
                        reply,
                    };
                    if this.requests.send(request).is_err() {
                        this.pull = PullState::Done;
                        return Poll::Ready(None);
                    }
                    this.diagnostics.emit(DiagnosticEvent::PullRequested {
                        tp: this.tp.clone(),
                    });
                    this.pull = PullState::Waiting(wait);
                }
                PullState::Waiting(wait) => match Pin::new(wait).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(Ok(chunk))) => {
                        this.pull = PullState::Idle;
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Ok(Err(FetchError::Client(error)))) => {
                        this.pull = PullState::Done;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Ready(Ok(Err(FetchError::Ended))) | Poll::Ready(Err(_)) => {
                        this.pull = PullState::Done;
                        return Poll::Ready(None);
                    }
                },
            }
        }
    }
}
