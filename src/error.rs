//! Error types for the consumer adapter.
//!
//! Errors that can fan out to several waiters at once (one client failure may
//! resolve many pending pulls and commits) carry their detail as strings so
//! they stay cheaply cloneable.

use thiserror::Error;

use crate::client::TopicPartition;

/// Error from the underlying consumer client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Topic subscription was rejected.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The current assignment could not be read.
    #[error("assignment lookup failed: {0}")]
    Assignment(String),

    /// A poll returned an error.
    #[error("poll failed: {0}")]
    Poll(String),

    /// Pausing partitions failed.
    #[error("pause failed: {0}")]
    Pause(String),

    /// Resuming partitions failed.
    #[error("resume failed: {0}")]
    Resume(String),

    /// Seeking a partition to a starting offset failed.
    #[error("seek failed for {tp}: {message}")]
    Seek {
        /// Partition the seek targeted.
        tp: TopicPartition,
        /// Client error message.
        message: String,
    },

    /// An offset commit was rejected.
    #[error("offset commit failed: {0}")]
    Commit(String),

    /// A manual offset lookup hook failed.
    #[error("offset lookup failed: {0}")]
    OffsetLookup(String),
}

/// Outcome of a single partition pull that did not produce records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The partition was revoked or the consumer shut down. The stream ends
    /// cleanly; this is not a failure.
    #[error("partition is no longer served")]
    Ended,

    /// The client failed while serving the pull.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Outcome of an offset commit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    /// The consumer shut down before the commit could complete.
    #[error("consumer is shutting down")]
    ShutDown,

    /// The client rejected the commit.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Error building or starting a consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The client failed during startup.
    #[error(transparent)]
    Client(#[from] ClientError),
}
