//! The broker seam. The runtime consumes topics and publishes results through
//! these traits; wire protocol internals live behind them. One
//! [TopicConsumer] is opened per (task, source topic) pair and is moved into
//! that topic's reader loop; the [Producer] is shared by a task's main loop
//! for all of its result topics.

use std::time::Duration;

use bytes::Bytes;

use crate::Result;

/// The broker's retained-offset range for one partition: `min` is the oldest
/// offset still readable, `max` the log-end offset (one past the newest
/// record). A fully-caught-up consumer stores exactly `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBounds {
    pub min: u64,
    pub max: u64,
}

/// A raw record as returned by [TopicConsumer::fetch_next], before payload
/// decoding.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub partition: u32,
    pub key: String,
    pub payload: Bytes,
    pub offset: u64,
}

/// A positioned consumer over one topic's partitions.
#[trait_variant::make(TopicConsumer: Send)]
pub trait LocalTopicConsumer {
    /// Partitions of the topic this consumer reads.
    async fn partition_ids(&mut self) -> Result<Vec<u32>>;

    /// Retained-offset bounds for one partition.
    async fn offset_bounds(&mut self, partition: u32) -> Result<OffsetBounds>;

    /// Positions subsequent fetches of the partition at `offset`.
    async fn seek(&mut self, partition: u32, offset: u64) -> Result<()>;

    /// Blocks up to `timeout` for the next record in read order. `Ok(None)`
    /// means the timeout elapsed with nothing to read — not an error.
    async fn fetch_next(&mut self, timeout: Duration) -> Result<Option<FetchedRecord>>;
}

/// Publishes records, partitioned and ordered by key. Errors on transport
/// failure.
#[trait_variant::make(Producer: Send)]
pub trait LocalProducer {
    async fn send(&self, topic: &str, key: Bytes, value: Bytes) -> Result<()>;
}

/// Shared handle to the broker, read-only after construction. Tasks within
/// one container share a single client; each opens its own consumers.
#[trait_variant::make(BrokerClient: Send)]
pub trait LocalBrokerClient {
    type Consumer: TopicConsumer + 'static;
    type Producer: Producer + Send + Sync + 'static;

    /// Opens a consumer over `topic`.
    async fn consumer(&self, topic: &str) -> Result<Self::Consumer>;

    /// A producer for publishing task results.
    async fn producer(&self) -> Result<Self::Producer>;
}
