//! Shared test fixtures: a scripted mock consumer client.
//!
//! Each poll pops one step from the script. A step can rebalance (driving the
//! tracker the way a real client drives it from inside `poll`), deliver
//! records, report an inactive subscription, or fail. Queued commit callbacks
//! fire at the start of the following poll, matching the wire behavior the
//! runloop relies on.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use kaflow::{
    ClientError, CommitCallback, Consumer, ConsumerClient, ConsumerConfig, DiagnosticEvent,
    DiagnosticsSink, PartitionAssignments, PolledRecords, RebalanceTracker, Record,
    TopicPartition,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

pub fn record(partition: i32, offset: i64) -> Record {
    Record::new(tp("events", partition), offset)
        .with_payload(format!("payload-{partition}-{offset}").into_bytes())
}

/// One scripted poll.
#[derive(Default)]
pub struct PollStep {
    /// Partitions revoked before records are returned.
    pub revoke: Vec<TopicPartition>,
    /// Partitions assigned before records are returned. `Some(vec![])` fires
    /// an empty assignment callback.
    pub assign: Option<Vec<TopicPartition>>,
    /// Records this poll delivers.
    pub records: Vec<Record>,
    /// Report the subscription as not yet active.
    pub inactive: bool,
    /// Fail the poll outright.
    pub fail: Option<ClientError>,
}

pub fn assign_step(partitions: &[i32]) -> PollStep {
    PollStep {
        assign: Some(partitions.iter().map(|p| tp("events", *p)).collect()),
        ..Default::default()
    }
}

pub fn revoke_step(partitions: &[i32]) -> PollStep {
    PollStep {
        revoke: partitions.iter().map(|p| tp("events", *p)).collect(),
        ..Default::default()
    }
}

pub fn records_step(records: Vec<Record>) -> PollStep {
    PollStep {
        records,
        ..Default::default()
    }
}

pub fn inactive_step() -> PollStep {
    PollStep {
        inactive: true,
        ..Default::default()
    }
}

pub fn fail_step(error: ClientError) -> PollStep {
    PollStep {
        fail: Some(error),
        ..Default::default()
    }
}

#[derive(Default)]
struct MockInner {
    script: VecDeque<PollStep>,
    assignment: HashSet<TopicPartition>,
    paused: HashSet<TopicPartition>,
    seeks: Vec<(TopicPartition, i64)>,
    commits: Vec<HashMap<TopicPartition, i64>>,
    commit_results: VecDeque<Result<(), ClientError>>,
    pending_callbacks: VecDeque<(CommitCallback, Result<(), ClientError>)>,
    subscribed: Vec<String>,
    polls: u64,
}

/// Scripted [`ConsumerClient`].
pub struct MockClient {
    inner: Arc<Mutex<MockInner>>,
    tracker: Arc<RebalanceTracker>,
}

/// Test-side view of the mock, shared with the client owned by the runloop.
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<MockInner>>,
}

impl MockClient {
    pub fn new(tracker: Arc<RebalanceTracker>) -> (Self, MockHandle) {
        let inner = Arc::new(Mutex::new(MockInner::default()));
        (
            Self {
                inner: Arc::clone(&inner),
                tracker,
            },
            MockHandle { inner },
        )
    }
}

impl MockHandle {
    pub fn push_step(&self, step: PollStep) {
        self.inner.lock().unwrap().script.push_back(step);
    }

    pub fn push_commit_result(&self, result: Result<(), ClientError>) {
        self.inner.lock().unwrap().commit_results.push_back(result);
    }

    pub fn paused(&self) -> HashSet<TopicPartition> {
        self.inner.lock().unwrap().paused.clone()
    }

    pub fn assignment(&self) -> HashSet<TopicPartition> {
        self.inner.lock().unwrap().assignment.clone()
    }

    pub fn commits(&self) -> Vec<HashMap<TopicPartition, i64>> {
        self.inner.lock().unwrap().commits.clone()
    }

    pub fn seeks(&self) -> Vec<(TopicPartition, i64)> {
        self.inner.lock().unwrap().seeks.clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.inner.lock().unwrap().subscribed.clone()
    }

    pub fn polls(&self) -> u64 {
        self.inner.lock().unwrap().polls
    }
}

impl ConsumerClient for MockClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        self.inner.lock().unwrap().subscribed = topics.to_vec();
        Ok(())
    }

    fn assignment(&mut self) -> Result<HashSet<TopicPartition>, ClientError> {
        Ok(self.inner.lock().unwrap().assignment.clone())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Option<PolledRecords>, ClientError> {
        // queued commit outcomes complete on the poll after submission
        let callbacks: Vec<_> = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending_callbacks.drain(..).collect()
        };
        for (callback, result) in callbacks {
            callback(result);
        }

        let step = { self.inner.lock().unwrap().script.pop_front() };
        let Some(step) = step else {
            self.inner.lock().unwrap().polls += 1;
            return Ok(Some(PolledRecords::default()));
        };

        if let Some(error) = step.fail {
            return Err(error);
        }

        if !step.revoke.is_empty() {
            let revoked: HashSet<TopicPartition> = step.revoke.iter().cloned().collect();
            {
                let mut inner = self.inner.lock().unwrap();
                for tp in &revoked {
                    inner.assignment.remove(tp);
                }
                inner.paused.extend(revoked.iter().cloned());
            }
            self.tracker.on_revoke(&revoked);
        }

        if let Some(assign) = step.assign {
            let assigned: HashSet<TopicPartition> = assign.into_iter().collect();
            self.inner
                .lock()
                .unwrap()
                .assignment
                .extend(assigned.iter().cloned());
            self.tracker.on_assign(&assigned);
        }

        self.inner.lock().unwrap().polls += 1;

        if step.inactive {
            return Ok(None);
        }
        Ok(Some(step.records.into_iter().collect()))
    }

    fn pause(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError> {
        self.inner
            .lock()
            .unwrap()
            .paused
            .extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        for tp in partitions {
            inner.paused.remove(tp);
        }
        Ok(())
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.inner.lock().unwrap().seeks.push((tp.clone(), offset));
        Ok(())
    }

    fn commit_async(&mut self, offsets: HashMap<TopicPartition, i64>, callback: CommitCallback) {
        let mut inner = self.inner.lock().unwrap();
        inner.commits.push(offsets);
        let result = inner.commit_results.pop_front().unwrap_or(Ok(()));
        inner.pending_callbacks.push_back((callback, result));
    }
}

pub fn test_config(poll_interval_ms: u64) -> ConsumerConfig {
    ConsumerConfig {
        topics: vec!["events".to_string()],
        poll_interval_ms,
        poll_timeout_ms: 10,
        ..Default::default()
    }
}

/// Start a consumer over a scripted mock. `initial_steps` are queued before
/// the first poll can run.
pub fn start(
    config: ConsumerConfig,
    initial_steps: Vec<PollStep>,
) -> (
    Consumer,
    PartitionAssignments,
    MockHandle,
    mpsc::UnboundedReceiver<DiagnosticEvent>,
) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (diagnostics, events) = DiagnosticsSink::channel();
    let mut slot = None;
    let (consumer, assignments) =
        Consumer::spawn_with(config, diagnostics, |_config, tracker, _diagnostics| {
            let (client, handle) = MockClient::new(tracker);
            for step in initial_steps {
                handle.push_step(step);
            }
            slot = Some(handle);
            Ok(client)
        })
        .expect("consumer starts");
    (consumer, assignments, slot.expect("mock handle"), events)
}

/// Wait until an event matching the predicate arrives.
pub async fn wait_for_event(
    events: &mut mpsc::UnboundedReceiver<DiagnosticEvent>,
    mut matches: impl FnMut(&DiagnosticEvent) -> bool,
) -> DiagnosticEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("diagnostics channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for diagnostic event")
}

/// Wait for `count` completed polls.
pub async fn wait_for_polls(events: &mut mpsc::UnboundedReceiver<DiagnosticEvent>, count: usize) {
    for _ in 0..count {
        wait_for_event(events, |event| {
            matches!(event, DiagnosticEvent::Polled { .. })
        })
        .await;
    }
}
