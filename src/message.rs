//! The envelope is the unit that moves from a reader loop to the task's main
//! loop through the bounded queue. It is immutable once constructed and has a
//! single owner at a time: the reader builds it from the raw broker record and
//! hands ownership over the channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::broker::FetchedRecord;
use crate::error::Error;

/// Identifies one partition of one topic. The key of every offset map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: u32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// A consumed record with its payload decoded, as handed to
/// [crate::task::TaskCode::process].
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Broker offset of the record within the partition.
    pub offset: u64,
    /// Record key. Drives partitioning/ordering of any derived records.
    pub key: String,
    /// Decoded structured payload.
    pub value: serde_json::Value,
}

impl Envelope {
    /// Builds an envelope from a raw broker record. The wire value is a UTF-8
    /// JSON document; anything else is a codec error handled by the reader
    /// loop, never a task failure.
    pub(crate) fn decode(topic: &str, record: FetchedRecord) -> Result<Self> {
        let value = serde_json::from_slice(&record.payload).map_err(|e| {
            Error::Codec(format!(
                "invalid payload at {}:{} offset {} - {e}",
                topic, record.partition, record.offset
            ))
        })?;
        Ok(Envelope {
            topic: topic.to_string(),
            partition: record.partition,
            offset: record.offset,
            key: record.key,
            value,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.topic, self.partition, self.offset)
    }
}

/// A derived record returned by `process`/`window`, routed to a declared
/// result topic keyed by `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl Record {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value,
        }
    }
}
