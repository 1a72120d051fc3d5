//! The seam between the runloop and the underlying consumer client.
//!
//! The client library is single-threaded: poll, commit, and assignment calls
//! must all come from one owning task. [`ConsumerClient`] captures the
//! operations the runloop needs, and [`ClientGate`] serializes every call
//! behind a mutex so no two critical sections overlap. Rebalance callbacks are
//! invoked by the client from inside `poll`, on the thread that already holds
//! the gate.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ClientError;

/// A topic name and partition index. Equality and hashing are by value.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Kafka topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic-partition identifier.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Stable string key, usable for storage or metric labels.
    pub fn to_key(&self) -> String {
        format!("{}:{}", self.topic, self.partition)
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// A raw consumed record: key/value bytes plus source partition and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition the record was read from.
    pub tp: TopicPartition,
    /// 0-based position within the partition.
    pub offset: i64,
    /// Record key, if present.
    pub key: Option<Vec<u8>>,
    /// Record value, if present.
    pub payload: Option<Vec<u8>>,
}

impl Record {
    /// Create a record with no key or payload.
    pub fn new(tp: TopicPartition, offset: i64) -> Self {
        Self {
            tp,
            offset,
            key: None,
            payload: None,
        }
    }

    /// Attach a key.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Records returned by one poll, grouped by partition.
///
/// Within a partition the broker's delivery order is preserved.
#[derive(Debug, Clone, Default)]
pub struct PolledRecords {
    by_partition: HashMap<TopicPartition, Vec<Record>>,
}

impl PolledRecords {
    /// Append a record to its partition's batch.
    pub fn push(&mut self, record: Record) {
        self.by_partition
            .entry(record.tp.clone())
            .or_default()
            .push(record);
    }

    /// Partitions that delivered at least one record.
    pub fn partitions(&self) -> HashSet<TopicPartition> {
        self.by_partition.keys().cloned().collect()
    }

    /// Remove and return the batch for one partition.
    pub fn take_partition(&mut self, tp: &TopicPartition) -> Option<Vec<Record>> {
        self.by_partition.remove(tp)
    }

    /// `true` if no partition delivered records.
    pub fn is_empty(&self) -> bool {
        self.by_partition.is_empty()
    }

    /// Total records across all partitions.
    pub fn record_count(&self) -> usize {
        self.by_partition.values().map(Vec::len).sum()
    }
}

impl FromIterator<Record> for PolledRecords {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut records = Self::default();
        for record in iter {
            records.push(record);
        }
        records
    }
}

/// Completion handed to [`ConsumerClient::commit_async`]. Invoked exactly once
/// with the broker outcome, during a later poll.
pub type CommitCallback = Box<dyn FnOnce(Result<(), ClientError>) + Send>;

/// Operations the runloop needs from the underlying consumer client.
///
/// Implementations are not required to be thread-safe; all calls arrive
/// through a [`ClientGate`]. `poll` must invoke rebalance callbacks
/// synchronously on the calling thread, and must deliver queued commit
/// callbacks before returning.
pub trait ConsumerClient: Send + 'static {
    /// Subscribe to the given topics (plain names or client-side patterns).
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError>;

    /// Partitions currently assigned to this consumer.
    fn assignment(&mut self) -> Result<HashSet<TopicPartition>, ClientError>;

    /// Fetch records, blocking up to `timeout`.
    ///
    /// Returns `Ok(None)` when the subscription is not yet active, which the
    /// runloop treats as "no records". A zero timeout returns immediately but
    /// still fires pending callbacks.
    fn poll(&mut self, timeout: Duration) -> Result<Option<PolledRecords>, ClientError>;

    /// Halt server-side delivery for the given partitions.
    fn pause(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError>;

    /// Resume server-side delivery for the given partitions.
    fn resume(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError>;

    /// Position a partition at `offset` for the next fetch.
    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError>;

    /// Commit the given marks asynchronously.
    ///
    /// `callback` must be invoked exactly once: with the broker outcome during
    /// a subsequent poll, or with the error immediately if submission itself
    /// fails.
    fn commit_async(&mut self, offsets: HashMap<TopicPartition, i64>, callback: CommitCallback);
}

/// Serializes access to a non-thread-safe consumer client.
///
/// Every client call in this crate happens inside [`ClientGate::with_client`].
/// The runloop is the only caller, so critical sections never nest.
pub struct ClientGate<C> {
    client: Arc<Mutex<C>>,
}

impl<C> Clone for ClientGate<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: ConsumerClient> ClientGate<C> {
    /// Wrap a client in a gate.
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }

    /// Run `f` with exclusive access to the client.
    pub async fn with_client<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut client = self.client.lock().await;
        f(&mut client)
    }
}
