//! The runloop: a single-consumer, multi-producer coordinator over the
//! client.
//!
//! Three command sources are merged into one stream: a poll ticker, partition
//! data requests, and offset commits. The loop folds each command over
//! [`RunloopState`], holding every client call inside the gate. It is the sole
//! resolver of the promises threaded through commands, and the only consumer
//! of the client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{ClientGate, CommitCallback, ConsumerClient, PolledRecords, Record, TopicPartition};
use crate::commands::{Command, CommitRequest, RecordRequest};
use crate::config::{ConsumerConfig, OffsetRetrieval};
use crate::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use crate::error::{ClientError, CommitError};
use crate::hub::PartitionHub;
use crate::metrics::ConsumerMetrics;
use crate::partition_stream::{CommittableRecord, PartitionStream};
use crate::rebalance::RebalanceTracker;
use crate::shutdown::ShutdownGate;
use crate::state::RunloopState;

/// What a poll critical section produced.
enum PollOutcome {
    /// The subscription is not active yet; nothing to reconcile.
    Inactive,
    /// Shutdown was observed inside the critical section; the assignment is
    /// paused and any fetched records are discarded.
    Draining,
    /// A completed poll with its assignment deltas.
    Polled {
        records: PolledRecords,
        newly_assigned: HashSet<TopicPartition>,
        revoked: HashSet<TopicPartition>,
    },
}

pub(crate) struct Runloop<C: ConsumerClient> {
    pub(crate) gate: ClientGate<C>,
    pub(crate) config: Arc<ConsumerConfig>,
    pub(crate) tracker: Arc<RebalanceTracker>,
    pub(crate) diagnostics: DiagnosticsSink,
    pub(crate) metrics: Arc<ConsumerMetrics>,
    pub(crate) hub: PartitionHub,
    pub(crate) shutdown: Arc<ShutdownGate>,
    pub(crate) requests_weak: mpsc::WeakUnboundedSender<RecordRequest>,
    pub(crate) commits_weak: mpsc::WeakUnboundedSender<CommitRequest>,
    pub(crate) requests_rx: mpsc::UnboundedReceiver<RecordRequest>,
    pub(crate) commits_rx: mpsc::UnboundedReceiver<CommitRequest>,
}

impl<C: ConsumerClient> Runloop<C> {
    /// Consume commands until shutdown completes or the client fails.
    pub(crate) async fn run(mut self) {
        let mut state = RunloopState::new();
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests_open = true;
        let mut commits_open = true;

        loop {
            if !requests_open && !commits_open {
                // every producer handle is gone; nothing can arrive anymore
                self.shutdown.shut_down();
                self.finish(state).await;
                info!("runloop exited");
                return;
            }

            let command = tokio::select! {
                _ = ticker.tick() => Command::Poll,
                _ = self.shutdown.woken() => Command::Poll,
                request = self.requests_rx.recv(), if requests_open => match request {
                    Some(request) => Command::Request(request),
                    None => {
                        requests_open = false;
                        continue;
                    }
                },
                commit = self.commits_rx.recv(), if commits_open => match commit {
                    Some(commit) => Command::Commit(commit),
                    None => {
                        commits_open = false;
                        continue;
                    }
                },
            };

            let result = if self.shutdown.is_shut_down() {
                self.handle_shutdown(&mut state, command).await
            } else {
                match command {
                    Command::Poll => self.handle_poll(&mut state).await,
                    Command::Request(request) => {
                        self.handle_request(&mut state, request).await;
                        Ok(())
                    }
                    Command::Commit(commit) => {
                        self.handle_commit(&mut state, commit).await;
                        Ok(())
                    }
                }
            };

            if let Err(err) = result {
                error!(error = %err, "runloop terminated by client failure");
                self.fail_everything(state, err);
                return;
            }
        }
    }

    /// A pull arrived. Fail fast if the partition is known to be unassigned;
    /// otherwise queue it for the next poll.
    async fn handle_request(&self, state: &mut RunloopState, request: RecordRequest) {
        let assignment = self.gate.with_client(|client| client.assignment()).await;
        match assignment {
            Ok(assigned) => {
                if !self.tracker.is_rebalancing() && !assigned.contains(&request.tp) {
                    debug!(tp = %request.tp, "pull for unassigned partition");
                    self.metrics.inc_pulls_ended();
                    request.end();
                } else {
                    state.add_request(request);
                }
            }
            Err(err) => {
                // the next poll reconciles against the real assignment
                warn!(error = %err, "assignment lookup failed; queueing pull");
                state.add_request(request);
            }
        }
    }

    /// A commit arrived. The broker rejects commits for revoked partitions,
    /// so defer while a rebalance is in flight.
    async fn handle_commit(&self, state: &mut RunloopState, commit: CommitRequest) {
        if self.tracker.is_rebalancing() {
            debug!("rebalance in progress; deferring commit");
            state.add_commit(commit);
        } else {
            self.do_commit(vec![commit]).await;
        }
    }

    /// Aggregate a batch of commits into per-partition marks and submit them.
    ///
    /// The loop does not wait for the broker: the client invokes the
    /// registered callback during a later poll, which resolves every
    /// completion in the batch.
    async fn do_commit(&self, commits: Vec<CommitRequest>) {
        let offsets = aggregate_commit_marks(&commits);
        self.metrics.inc_commits_started();
        self.diagnostics.emit(DiagnosticEvent::CommitStarted {
            offsets: offsets.clone(),
        });

        let completions: Vec<_> = commits.into_iter().map(|commit| commit.done).collect();
        let diagnostics = self.diagnostics.clone();
        let metrics = Arc::clone(&self.metrics);
        let callback_offsets = offsets.clone();
        let callback: CommitCallback = Box::new(move |result| match result {
            Ok(()) => {
                metrics.mark_commit_succeeded();
                for done in completions {
                    let _ = done.send(Ok(()));
                }
                diagnostics.emit(DiagnosticEvent::CommitSucceeded {
                    offsets: callback_offsets,
                });
            }
            Err(err) => {
                metrics.inc_commits_failed();
                for done in completions {
                    let _ = done.send(Err(CommitError::Client(err.clone())));
                }
                diagnostics.emit(DiagnosticEvent::CommitFailed {
                    offsets: callback_offsets,
                    error: err,
                });
            }
        });

        self.gate
            .with_client(|client| client.commit_async(offsets, callback))
            .await;
    }

    /// One poll cycle: reconcile pause/resume against demand, fetch records,
    /// settle revocations, fulfill pulls, surface new partitions, and flush
    /// deferred commits once the rebalance window closes.
    async fn handle_poll(&self, state: &mut RunloopState) -> Result<(), ClientError> {
        let requested = state.requested_partitions();

        let outcome = self
            .gate
            .with_client(|client| -> Result<PollOutcome, ClientError> {
                let prev_assigned = client.assignment()?;

                // pause partitions with no demand, resume those with demand
                let resume: HashSet<_> =
                    prev_assigned.intersection(&requested).cloned().collect();
                if !resume.is_empty() {
                    client.resume(&resume)?;
                }
                let pause: HashSet<_> = prev_assigned.difference(&requested).cloned().collect();
                if !pause.is_empty() {
                    client.pause(&pause)?;
                }

                // a zero timeout keeps rebalance callbacks firing while idle
                let timeout = if requested.is_empty() {
                    Duration::ZERO
                } else {
                    self.config.poll_timeout()
                };
                let polled = client.poll(timeout)?;

                if self.shutdown.is_shut_down() {
                    if let Ok(assigned) = client.assignment() {
                        if !assigned.is_empty() {
                            let _ = client.pause(&assigned);
                        }
                    }
                    return Ok(PollOutcome::Draining);
                }

                let Some(records) = polled else {
                    return Ok(PollOutcome::Inactive);
                };

                let current = client.assignment()?;
                let newly_assigned: HashSet<_> =
                    current.difference(&prev_assigned).cloned().collect();
                let revoked: HashSet<_> = prev_assigned.difference(&current).cloned().collect();

                if let OffsetRetrieval::Manual(lookup) = &self.config.offset_retrieval {
                    if !newly_assigned.is_empty() {
                        for (tp, offset) in lookup(&newly_assigned)? {
                            client.seek(&tp, offset)?;
                        }
                    }
                }

                Ok(PollOutcome::Polled {
                    records,
                    newly_assigned,
                    revoked,
                })
            })
            .await?;

        let PollOutcome::Polled {
            mut records,
            newly_assigned,
            revoked,
        } = outcome
        else {
            return Ok(());
        };

        self.metrics.record_poll(records.record_count());

        // records nobody asked for go to the partition buffers
        let unrequested: Vec<(TopicPartition, Vec<Record>)> = records
            .partitions()
            .into_iter()
            .filter(|tp| !requested.contains(tp))
            .filter_map(|tp| records.take_partition(&tp).map(|batch| (tp, batch)))
            .collect();
        state.buffer_records(unrequested);

        // revoked partitions lose their buffers and their waiting pulls
        for tp in &revoked {
            state.remove_buffered(tp);
        }

        let mut fulfilled = HashSet::new();
        let mut still_pending = HashSet::new();
        let mut survivors = Vec::new();
        for request in state.take_requests() {
            if revoked.contains(&request.tp) {
                self.metrics.inc_pulls_ended();
                request.end();
                continue;
            }
            // buffered records precede freshly polled ones; the first pull
            // for a partition consumes both, later pulls stay pending
            let mut chunk = state.take_buffered(&request.tp);
            if let Some(fresh) = records.take_partition(&request.tp) {
                chunk.extend(fresh);
            }
            if chunk.is_empty() {
                still_pending.insert(request.tp.clone());
                survivors.push(request);
            } else {
                fulfilled.insert(request.tp.clone());
                self.metrics.inc_pulls_fulfilled();
                request.fulfill(self.wrap_records(chunk));
            }
        }
        state.restore_requests(survivors);

        self.diagnostics.emit(DiagnosticEvent::Polled {
            requested,
            fulfilled,
            pending: still_pending,
        });

        for tp in newly_assigned {
            self.offer_partition(tp);
        }

        if !self.tracker.is_rebalancing() && state.has_pending_commits() {
            let commits = state.take_commits();
            self.do_commit(commits).await;
        }

        Ok(())
    }

    /// Commands arriving after shutdown was requested.
    async fn handle_shutdown(
        &self,
        state: &mut RunloopState,
        command: Command,
    ) -> Result<(), ClientError> {
        match command {
            Command::Poll => {
                // settle waiting pulls from the buffers, end the rest
                for request in state.take_requests() {
                    self.settle_under_shutdown(state, request);
                }
                // best-effort poll so queued commit callbacks can still fire,
                // then halt all server-side delivery
                let polled = self
                    .gate
                    .with_client(|client| {
                        let polled = client.poll(Duration::ZERO);
                        if let Ok(assigned) = client.assignment() {
                            if !assigned.is_empty() {
                                let _ = client.pause(&assigned);
                            }
                        }
                        polled
                    })
                    .await;
                if let Err(err) = polled {
                    warn!(error = %err, "poll failed during shutdown");
                }
                if !self.tracker.is_rebalancing() && state.has_pending_commits() {
                    let commits = state.take_commits();
                    self.do_commit(commits).await;
                }
                Ok(())
            }
            Command::Request(request) => {
                self.settle_under_shutdown(state, request);
                Ok(())
            }
            Command::Commit(commit) => {
                self.handle_commit(state, commit).await;
                Ok(())
            }
        }
    }

    /// Serve a pull from the partition buffer if it has records, otherwise
    /// end its stream.
    fn settle_under_shutdown(&self, state: &mut RunloopState, request: RecordRequest) {
        let buffered = state.take_buffered(&request.tp);
        if buffered.is_empty() {
            self.metrics.inc_pulls_ended();
            request.end();
        } else {
            self.metrics.inc_pulls_fulfilled();
            let chunk = self.wrap_records(buffered);
            request.fulfill(chunk);
        }
    }

    /// Final teardown on a clean exit: end whatever is still waiting and
    /// attempt one last flush of deferred commits.
    async fn finish(&self, mut state: RunloopState) {
        for request in state.take_requests() {
            self.metrics.inc_pulls_ended();
            request.end();
        }
        if state.has_pending_commits() {
            let commits = state.take_commits();
            if self.tracker.is_rebalancing() {
                for commit in commits {
                    commit.fail(CommitError::ShutDown);
                }
            } else {
                self.do_commit(commits).await;
                // one last chance for the commit callbacks to fire
                let _ = self
                    .gate
                    .with_client(|client| client.poll(Duration::ZERO))
                    .await;
            }
        }
    }

    /// A client failure escaped the fold: resolve everything and tear down.
    fn fail_everything(&self, mut state: RunloopState, error: ClientError) {
        for request in state.take_requests() {
            request.fail(error.clone());
        }
        for commit in state.take_commits() {
            commit.fail(CommitError::Client(error.clone()));
        }
        self.hub.fail(error);
    }

    fn wrap_records(&self, records: Vec<Record>) -> Vec<CommittableRecord> {
        let commits = self.commits_weak.upgrade();
        records
            .into_iter()
            .map(|record| CommittableRecord::new(record, commits.clone()))
            .collect()
    }

    fn offer_partition(&self, tp: TopicPartition) {
        let Some(requests) = self.requests_weak.upgrade() else {
            return;
        };
        debug!(tp = %tp, "offering newly assigned partition stream");
        let stream = PartitionStream::new(tp.clone(), requests, self.diagnostics.clone());
        self.hub.offer(tp, stream);
    }
}

/// Fold commit batches into per-partition marks: the highest consumed offset
/// per partition, plus one.
pub(crate) fn aggregate_commit_marks(
    commits: &[CommitRequest],
) -> HashMap<TopicPartition, i64> {
    let mut marks = HashMap::new();
    for commit in commits {
        for (tp, offset) in &commit.offsets {
            let mark = offset + 1;
            marks
                .entry(tp.clone())
                .and_modify(|current: &mut i64| *current = (*current).max(mark))
                .or_insert(mark);
        }
    }
    marks
}
