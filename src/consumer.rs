//! Public consumer surface.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::{ClientGate, ConsumerClient, TopicPartition};
use crate::commands::{CommitRequest, RecordRequest};
use crate::config::ConsumerConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{CommitError, ConsumerError, FetchError};
use crate::hub::{PartitionAssignments, PartitionHub};
use crate::metrics::{ConsumerMetrics, MetricsSnapshot};
use crate::partition_stream::CommittableRecord;
use crate::rdkafka_client::RdKafkaClient;
use crate::rebalance::RebalanceTracker;
use crate::runloop::Runloop;
use crate::shutdown::ShutdownGate;

/// Handle onto a running consumer.
///
/// The handle is the session: it owns the command channels the runloop serves.
/// Keep it alive while pulling or committing; dropping it (together with all
/// partition streams and committable records) lets the runloop wind down on
/// its own.
pub struct Consumer {
    requests_tx: mpsc::UnboundedSender<RecordRequest>,
    commits_tx: mpsc::UnboundedSender<CommitRequest>,
    shutdown: Arc<ShutdownGate>,
    tracker: Arc<RebalanceTracker>,
    metrics: Arc<ConsumerMetrics>,
    diagnostics: DiagnosticsSink,
    runloop: Option<JoinHandle<()>>,
}

impl Consumer {
    /// Start a runloop over a client produced by `make_client`.
    ///
    /// The factory receives the validated configuration, the rebalance
    /// tracker the client must drive from its rebalance callbacks, and the
    /// diagnostics sink. Tests plug mock clients in here;
    /// [`Consumer::connect`] is the production path.
    pub fn spawn_with<C, F>(
        config: ConsumerConfig,
        diagnostics: DiagnosticsSink,
        make_client: F,
    ) -> Result<(Self, PartitionAssignments), ConsumerError>
    where
        C: ConsumerClient,
        F: FnOnce(&ConsumerConfig, Arc<RebalanceTracker>, DiagnosticsSink) -> Result<C, ConsumerError>,
    {
        config.validate()?;
        let tracker = Arc::new(RebalanceTracker::new(diagnostics.clone()));
        let mut client = make_client(&config, Arc::clone(&tracker), diagnostics.clone())?;
        if !config.topics.is_empty() {
            client.subscribe(&config.topics)?;
        }

        let gate = ClientGate::new(client);
        let (hub, assignments) = PartitionHub::new();
        let shutdown = Arc::new(ShutdownGate::new(hub.clone()));
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(ConsumerMetrics::default());

        let runloop = Runloop {
            gate,
            config: Arc::new(config),
            tracker: Arc::clone(&tracker),
            diagnostics: diagnostics.clone(),
            metrics: Arc::clone(&metrics),
            hub,
            shutdown: Arc::clone(&shutdown),
            requests_weak: requests_tx.downgrade(),
            commits_weak: commits_tx.downgrade(),
            requests_rx,
            commits_rx,
        };
        let handle = tokio::spawn(runloop.run());

        Ok((
            Self {
                requests_tx,
                commits_tx,
                shutdown,
                tracker,
                metrics,
                diagnostics,
                runloop: Some(handle),
            },
            assignments,
        ))
    }

    /// Start a consumer over the rdkafka client.
    pub fn connect(
        config: ConsumerConfig,
        diagnostics: DiagnosticsSink,
    ) -> Result<(Self, PartitionAssignments), ConsumerError> {
        Self::spawn_with(config, diagnostics, |config, tracker, _diagnostics| {
            RdKafkaClient::from_config(config, tracker)
        })
    }

    /// Enqueue one pull for `tp` and wait for it to be served.
    ///
    /// Resolves with the records the partition produced, or
    /// [`FetchError::Ended`] when the partition is revoked or the consumer
    /// shuts down.
    pub async fn request(&self, tp: TopicPartition) -> Result<Vec<CommittableRecord>, FetchError> {
        let (reply, wait) = oneshot::channel();
        self.requests_tx
            .send(RecordRequest {
                tp: tp.clone(),
                reply,
            })
            .map_err(|_| FetchError::Ended)?;
        self.diagnostics.emit(DiagnosticEvent::PullRequested { tp });
        wait.await.map_err(|_| FetchError::Ended)?
    }

    /// Commit marks for the given consumed offsets, spanning any number of
    /// partitions. The committed mark per partition is `offset + 1`.
    pub async fn commit(&self, offsets: HashMap<TopicPartition, i64>) -> Result<(), CommitError> {
        let (done, wait) = oneshot::channel();
        self.commits_tx
            .send(CommitRequest { offsets, done })
            .map_err(|_| CommitError::ShutDown)?;
        wait.await.map_err(|_| CommitError::ShutDown)?
    }

    /// Request a graceful shutdown. Idempotent.
    ///
    /// The partition hub emits its end signal, waiting pulls are settled from
    /// the buffers or ended, and partition streams close on their next pull.
    pub fn graceful_shutdown(&self) {
        self.shutdown.shut_down();
    }

    /// `true` once shutdown has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_shut_down()
    }

    /// Point-in-time activity counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.tracker.rebalance_count())
    }

    /// `true` while a group rebalance is in flight.
    pub fn is_rebalancing(&self) -> bool {
        self.tracker.is_rebalancing()
    }

    /// Trigger shutdown and wait for the runloop to exit.
    ///
    /// The runloop keeps serving buffered records to live partition streams;
    /// it finishes once those streams and any outstanding committable records
    /// are dropped as well.
    pub async fn shutdown_and_join(mut self) {
        self.shutdown.shut_down();
        let handle = self.runloop.take();
        drop(self);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
