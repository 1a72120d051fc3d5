//! rdkafka-backed implementation of [`ConsumerClient`].
//!
//! The binding uses [`BaseConsumer`], whose `poll` runs rebalance and commit
//! callbacks synchronously on the calling thread. librdkafka completes async
//! commits in submission order, so per-call completions are routed through a
//! FIFO of callbacks shared with the consumer context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use tracing::warn;

use crate::client::{CommitCallback, ConsumerClient, PolledRecords, Record, TopicPartition};
use crate::config::{ConsumerConfig, OffsetRetrieval};
use crate::error::{ClientError, ConsumerError};
use crate::rebalance::RebalanceTracker;

const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

type CallbackQueue = Arc<Mutex<VecDeque<CommitCallback>>>;

/// Consumer context driving the rebalance tracker and the commit FIFO.
struct RunloopContext {
    tracker: Arc<RebalanceTracker>,
    callbacks: CallbackQueue,
    // `ConsumerContext::pre_rebalance`/`post_rebalance` no longer receive the
    // consumer, so a weak handle back to it is stashed here after construction.
    consumer: Mutex<Option<Weak<BaseConsumer<RunloopContext>>>>,
}

impl RunloopContext {
    fn set_consumer(&self, consumer: Weak<BaseConsumer<RunloopContext>>) {
        if let Ok(mut slot) = self.consumer.lock() {
            *slot = Some(consumer);
        }
    }

    fn consumer(&self) -> Option<Arc<BaseConsumer<RunloopContext>>> {
        self.consumer.lock().ok()?.clone()?.upgrade()
    }
}

impl ClientContext for RunloopContext {}

impl ConsumerContext for RunloopContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                self.tracker.on_revoke(&tpl_to_set(tpl));
                // halt delivery before ownership changes; resumed duplicates
                // must not arrive ahead of the next assignment
                if let Some(consumer) = self.consumer() {
                    if let Err(err) = consumer.pause(tpl) {
                        warn!(error = %err, "failed to pause revoked partitions");
                    }
                }
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(err) => {
                warn!(error = %err, "rebalance error");
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            self.tracker.on_assign(&tpl_to_set(tpl));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        let callback = self
            .callbacks
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        match callback {
            Some(callback) => {
                callback(result.map_err(|err| ClientError::Commit(err.to_string())));
            }
            None => warn!("commit acknowledged with no registered completion"),
        }
    }
}

/// [`ConsumerClient`] over an rdkafka [`BaseConsumer`].
pub struct RdKafkaClient {
    consumer: Arc<BaseConsumer<RunloopContext>>,
    callbacks: CallbackQueue,
    max_poll_records: usize,
}

impl RdKafkaClient {
    /// Build a consumer from the configuration, wired to the given tracker.
    pub fn from_config(
        config: &ConsumerConfig,
        tracker: Arc<RebalanceTracker>,
    ) -> Result<Self, ConsumerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.as_str())
            .set("group.id", config.group_id.as_str())
            .set("client.id", config.client_id.as_str())
            .set("enable.auto.commit", "false");
        let reset = match &config.offset_retrieval {
            OffsetRetrieval::Auto(reset) => reset.as_str(),
            // manual seeks position every new partition; the policy only
            // covers partitions the hook omits
            OffsetRetrieval::Manual(_) => "earliest",
        };
        client_config.set("auto.offset.reset", reset);
        for (key, value) in &config.extra_config {
            client_config.set(key.as_str(), value.as_str());
        }

        let callbacks: CallbackQueue = Arc::new(Mutex::new(VecDeque::new()));
        let context = RunloopContext {
            tracker,
            callbacks: Arc::clone(&callbacks),
            consumer: Mutex::new(None),
        };
        let consumer: BaseConsumer<RunloopContext> = client_config
            .create_with_context(context)
            .map_err(|err| ConsumerError::InvalidConfig(err.to_string()))?;
        let consumer = Arc::new(consumer);
        consumer.context().set_consumer(Arc::downgrade(&consumer));

        Ok(Self {
            consumer,
            callbacks,
            max_poll_records: config.max_poll_records,
        })
    }
}

impl ConsumerClient for RdKafkaClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&refs)
            .map_err(|err| ClientError::Subscribe(err.to_string()))
    }

    fn assignment(&mut self) -> Result<HashSet<TopicPartition>, ClientError> {
        self.consumer
            .assignment()
            .map(|tpl| tpl_to_set(&tpl))
            .map_err(|err| ClientError::Assignment(err.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<PolledRecords>, ClientError> {
        let mut records = PolledRecords::default();
        let mut wait = timeout;
        while records.record_count() < self.max_poll_records {
            match self.consumer.poll(wait) {
                None => break,
                Some(Ok(message)) => {
                    let tp = TopicPartition::new(message.topic(), message.partition());
                    let record = Record {
                        tp,
                        offset: message.offset(),
                        key: message.key().map(|key| key.to_vec()),
                        payload: message.payload().map(|payload| payload.to_vec()),
                    };
                    records.push(record);
                    wait = Duration::ZERO;
                }
                // no active subscription yet; poll again later
                Some(Err(KafkaError::MessageConsumption(RDKafkaErrorCode::State))) => {
                    return Ok(None);
                }
                Some(Err(KafkaError::PartitionEOF(_))) => {
                    wait = Duration::ZERO;
                }
                Some(Err(err)) => return Err(ClientError::Poll(err.to_string())),
            }
        }
        Ok(Some(records))
    }

    fn pause(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError> {
        self.consumer
            .pause(&set_to_tpl(partitions))
            .map_err(|err| ClientError::Pause(err.to_string()))
    }

    fn resume(&mut self, partitions: &HashSet<TopicPartition>) -> Result<(), ClientError> {
        self.consumer
            .resume(&set_to_tpl(partitions))
            .map_err(|err| ClientError::Resume(err.to_string()))
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), ClientError> {
        self.consumer
            .seek(&tp.topic, tp.partition, Offset::Offset(offset), SEEK_TIMEOUT)
            .map_err(|err| ClientError::Seek {
                tp: tp.clone(),
                message: err.to_string(),
            })
    }

    fn commit_async(&mut self, offsets: HashMap<TopicPartition, i64>, callback: CommitCallback) {
        let mut tpl = TopicPartitionList::new();
        for (tp, mark) in &offsets {
            if let Err(err) = tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*mark))
            {
                callback(Err(ClientError::Commit(err.to_string())));
                return;
            }
        }

        match self.callbacks.lock() {
            Ok(mut queue) => queue.push_back(callback),
            Err(_) => {
                callback(Err(ClientError::Commit(
                    "commit callback queue poisoned".to_string(),
                )));
                return;
            }
        }

        if let Err(err) = self.consumer.commit(&tpl, CommitMode::Async) {
            // submission failed synchronously; the queued completion is
            // still ours to resolve
            let callback = self
                .callbacks
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_back());
            if let Some(callback) = callback {
                callback(Err(ClientError::Commit(err.to_string())));
            }
        }
    }
}

fn tpl_to_set(tpl: &TopicPartitionList) -> HashSet<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

fn set_to_tpl(partitions: &HashSet<TopicPartition>) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for tp in partitions {
        tpl.add_partition(&tp.topic, tp.partition);
    }
    tpl
}
