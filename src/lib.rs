//! Back-pressured, demand-driven per-partition streaming over a Kafka
//! consumer client.
//!
//! The underlying client is single-threaded: poll, commit, and assignment
//! calls must come from one owning task. This crate wraps such a client in a
//! single-consumer runloop that multiplexes three command sources (a poll
//! ticker, partition data requests, and offset commits) onto the client,
//! while downstream users see one independent, demand-driven record stream
//! per assigned topic-partition.
//!
//! # Features
//!
//! - One [`PartitionStream`] per assigned partition, delivered through a
//!   [`PartitionAssignments`] stream as the group assigns partitions
//! - Back-pressure at the broker: partitions without downstream demand are
//!   paused, partitions with demand are resumed, on every poll
//! - Records that arrive without demand are buffered per partition and serve
//!   the next pull, never dropped
//! - Commits aggregate to the highest mark per partition and are deferred
//!   while a group rebalance is in flight
//! - Revoked partitions end their streams cleanly before any further records
//!   are delivered
//! - Graceful shutdown settles every waiting pull and commit
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use kaflow::{Consumer, ConsumerConfig, DiagnosticsSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConsumerConfig {
//!     brokers: "localhost:9092".to_string(),
//!     group_id: "my-group".to_string(),
//!     topics: vec!["events".to_string()],
//!     ..Default::default()
//! };
//!
//! let (consumer, mut partitions) = Consumer::connect(config, DiagnosticsSink::disabled())?;
//!
//! while let Some(next) = partitions.next().await {
//!     let (tp, mut records) = next?;
//!     println!("assigned {tp}");
//!     tokio::spawn(async move {
//!         while let Some(Ok(chunk)) = records.next().await {
//!             for record in chunk {
//!                 let _ = record.commit().await;
//!             }
//!         }
//!     });
//! }
//!
//! consumer.graceful_shutdown();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod consumer;
pub mod diagnostics;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod partition_stream;
pub mod rdkafka_client;
pub mod rebalance;

mod commands;
mod runloop;
mod shutdown;
mod state;

pub use client::{
    ClientGate, CommitCallback, ConsumerClient, PolledRecords, Record, TopicPartition,
};
pub use config::{ConsumerConfig, ManualOffsetFn, OffsetReset, OffsetRetrieval};
pub use consumer::Consumer;
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink};
pub use error::{ClientError, CommitError, ConsumerError, FetchError};
pub use hub::PartitionAssignments;
pub use metrics::MetricsSnapshot;
pub use partition_stream::{CommittableRecord, PartitionStream};
pub use rdkafka_client::RdKafkaClient;
pub use rebalance::RebalanceTracker;
