//! Consumer configuration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::TopicPartition;
use crate::error::{ClientError, ConsumerError};

/// Where a partition starts reading when no committed offset exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    /// Start from the earliest available offset.
    #[default]
    Earliest,
    /// Start from the end of the partition.
    Latest,
}

impl OffsetReset {
    /// Client property value for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// Hook resolving starting offsets for newly assigned partitions.
pub type ManualOffsetFn = Arc<
    dyn Fn(&HashSet<TopicPartition>) -> Result<HashMap<TopicPartition, i64>, ClientError>
        + Send
        + Sync,
>;

/// How newly assigned partitions find their starting offset.
#[derive(Clone)]
pub enum OffsetRetrieval {
    /// Defer to the client's configured reset policy; no seek is performed.
    Auto(OffsetReset),
    /// Resolve offsets through the hook and seek every newly assigned
    /// partition to the returned position.
    Manual(ManualOffsetFn),
}

impl Default for OffsetRetrieval {
    fn default() -> Self {
        Self::Auto(OffsetReset::default())
    }
}

impl fmt::Debug for OffsetRetrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto(reset) => f.debug_tuple("Auto").field(reset).finish(),
            Self::Manual(_) => f.write_str("Manual(..)"),
        }
    }
}

/// Configuration for a streaming consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list).
    pub brokers: String,
    /// Consumer group ID.
    pub group_id: String,
    /// Client ID reported to the brokers.
    pub client_id: String,
    /// Topics to subscribe to (names, or client-side `^regex` patterns).
    pub topics: Vec<String>,
    /// Interval between synthetic polls. Bounds rebalance-callback latency
    /// when no partition has demand.
    pub poll_interval_ms: u64,
    /// Maximum block time inside a poll when demand exists.
    pub poll_timeout_ms: u64,
    /// Cap on records fetched by a single poll.
    pub max_poll_records: usize,
    /// Starting-offset policy for newly assigned partitions.
    pub offset_retrieval: OffsetRetrieval,
    /// Additional client properties passed through verbatim.
    pub extra_config: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "kaflow-consumer".to_string(),
            client_id: "kaflow".to_string(),
            topics: vec![],
            poll_interval_ms: 250,
            poll_timeout_ms: 100,
            max_poll_records: 500,
            offset_retrieval: OffsetRetrieval::default(),
            extra_config: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    /// Interval between synthetic polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum block time inside a poll when demand exists.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.brokers.trim().is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "brokers must not be empty".to_string(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "group_id must not be empty".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConsumerError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConsumerError::InvalidConfig(
                "poll_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_poll_records == 0 {
            return Err(ConsumerError::InvalidConfig(
                "max_poll_records must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
