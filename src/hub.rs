//! Delivery of newly assigned partition streams to the user.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::client::TopicPartition;
use crate::error::ClientError;
use crate::partition_stream::PartitionStream;

enum HubEvent {
    Partition(TopicPartition, PartitionStream),
    End,
    Failed(ClientError),
}

/// Producer side of the partition hub. Held by the runloop and the shutdown
/// gate; all sends are fire-and-forget.
#[derive(Clone)]
pub(crate) struct PartitionHub {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl PartitionHub {
    pub fn new() -> (Self, PartitionAssignments) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { tx },
            PartitionAssignments {
                rx,
                terminated: false,
            },
        )
    }

    /// Offer a freshly assigned partition and its stream.
    pub fn offer(&self, tp: TopicPartition, stream: PartitionStream) {
        let _ = self.tx.send(HubEvent::Partition(tp, stream));
    }

    /// Signal a clean end of the hub.
    pub fn end(&self) {
        let _ = self.tx.send(HubEvent::End);
    }

    /// Signal a fatal runloop failure.
    pub fn fail(&self, error: ClientError) {
        let _ = self.tx.send(HubEvent::Failed(error));
    }
}

/// Stream of `(partition, record stream)` pairs, one per newly assigned
/// partition.
///
/// Ends cleanly on consumer shutdown; yields the cause and then ends if the
/// runloop fails. Once terminated the hub is closed and no further values can
/// be observed.
pub struct PartitionAssignments {
    rx: mpsc::UnboundedReceiver<HubEvent>,
    terminated: bool,
}

impl Stream for PartitionAssignments {
    type Item = Result<(TopicPartition, PartitionStream), ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(HubEvent::Partition(tp, stream))) => {
                Poll::Ready(Some(Ok((tp, stream))))
            }
            Poll::Ready(Some(HubEvent::End)) => {
                this.terminated = true;
                this.rx.close();
                Poll::Ready(None)
            }
            Poll::Ready(Some(HubEvent::Failed(error))) => {
                this.terminated = true;
                this.rx.close();
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}
