//! In-memory doubles shared by the unit tests: a broker with fault injection,
//! an offset store that counts saves, and a pair of trivial tasks. All clocks
//! in here are tokio's, so everything runs under a paused test clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::Result;
use crate::broker::{
    BrokerClient, FetchedRecord, OffsetBounds, Producer, TopicConsumer,
};
use crate::config::TaskConfig;
use crate::error::Error;
use crate::message::{Envelope, PartitionKey, Record};
use crate::offsets::{OffsetStore, OffsetTracker};
use crate::task::{TaskCode, TaskMeta, TaskState};

/// One partition's log. Offsets run `base..base + records.len()`; `base` is
/// the oldest retained offset.
struct PartitionLog {
    base: u64,
    records: Vec<(String, Bytes)>,
}

#[derive(Default)]
struct BrokerInner {
    topics: HashMap<String, HashMap<u32, PartitionLog>>,
    published: Vec<(String, String, serde_json::Value)>,
    fail_sends: u32,
    fail_fetches: u32,
    fetch_instants: Vec<Instant>,
}

/// An in-memory broker. Clones share the same logs, so a test can keep a
/// handle while the runtime owns another.
#[derive(Clone, Default)]
pub(crate) struct InMemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl InMemoryBroker {
    /// Creates a partition whose oldest retained offset is `base`, as if
    /// earlier records had been truncated away.
    pub(crate) fn create_partition(&self, topic: &str, partition: u32, base: u64) {
        self.inner
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(
                partition,
                PartitionLog {
                    base,
                    records: Vec::new(),
                },
            );
    }

    pub(crate) fn push(&self, topic: &str, partition: u32, key: &str, value: serde_json::Value) {
        self.push_raw(topic, partition, key, serde_json::to_vec(&value).unwrap());
    }

    pub(crate) fn push_raw(&self, topic: &str, partition: u32, key: &str, payload: Vec<u8>) {
        self.inner
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_insert_with(|| PartitionLog {
                base: 0,
                records: Vec::new(),
            })
            .records
            .push((key.to_string(), Bytes::from(payload)));
    }

    /// The next `n` producer sends fail.
    pub(crate) fn fail_sends(&self, n: u32) {
        self.inner.lock().fail_sends = n;
    }

    /// The next `n` fetches fail.
    pub(crate) fn fail_fetches(&self, n: u32) {
        self.inner.lock().fail_fetches = n;
    }

    /// Everything successfully published, in publish order.
    pub(crate) fn published(&self) -> Vec<(String, String, serde_json::Value)> {
        self.inner.lock().published.clone()
    }

    /// When each fetch attempt (successful or not) started.
    pub(crate) fn fetch_instants(&self) -> Vec<Instant> {
        self.inner.lock().fetch_instants.clone()
    }

    pub(crate) fn consumer_for(&self, topic: &str) -> InMemoryConsumer {
        InMemoryConsumer {
            topic: topic.to_string(),
            inner: Arc::clone(&self.inner),
            positions: HashMap::new(),
        }
    }
}

impl BrokerClient for InMemoryBroker {
    type Consumer = InMemoryConsumer;
    type Producer = InMemoryProducer;

    async fn consumer(&self, topic: &str) -> Result<Self::Consumer> {
        Ok(self.consumer_for(topic))
    }

    async fn producer(&self) -> Result<Self::Producer> {
        Ok(InMemoryProducer {
            inner: Arc::clone(&self.inner),
        })
    }
}

pub(crate) struct InMemoryConsumer {
    topic: String,
    inner: Arc<Mutex<BrokerInner>>,
    positions: HashMap<u32, u64>,
}

impl TopicConsumer for InMemoryConsumer {
    async fn partition_ids(&mut self) -> Result<Vec<u32>> {
        let inner = self.inner.lock();
        let mut ids: Vec<u32> = inner
            .topics
            .get(&self.topic)
            .map(|partitions| partitions.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn offset_bounds(&mut self, partition: u32) -> Result<OffsetBounds> {
        let inner = self.inner.lock();
        let log = inner
            .topics
            .get(&self.topic)
            .and_then(|partitions| partitions.get(&partition))
            .ok_or_else(|| Error::Broker(format!("unknown partition {}:{partition}", self.topic)))?;
        Ok(OffsetBounds {
            min: log.base,
            max: log.base + log.records.len() as u64,
        })
    }

    async fn seek(&mut self, partition: u32, offset: u64) -> Result<()> {
        self.positions.insert(partition, offset);
        Ok(())
    }

    async fn fetch_next(&mut self, timeout: Duration) -> Result<Option<FetchedRecord>> {
        {
            let mut inner = self.inner.lock();
            inner.fetch_instants.push(Instant::now());
            if inner.fail_fetches > 0 {
                inner.fail_fetches -= 1;
                return Err(Error::Broker("injected fetch failure".to_string()));
            }
            if let Some(partitions) = inner.topics.get(&self.topic) {
                let mut ids: Vec<u32> = partitions.keys().copied().collect();
                ids.sort_unstable();
                for partition in ids {
                    let log = &partitions[&partition];
                    let pos = self.positions.get(&partition).copied().unwrap_or(log.base);
                    let index = pos.saturating_sub(log.base) as usize;
                    if index < log.records.len() {
                        let (key, payload) = log.records[index].clone();
                        self.positions.insert(partition, pos + 1);
                        return Ok(Some(FetchedRecord {
                            partition,
                            key,
                            payload,
                            offset: pos,
                        }));
                    }
                }
            }
        }
        // a real consumer blocks until the timeout when caught up
        tokio::time::sleep(timeout).await;
        Ok(None)
    }
}

pub(crate) struct InMemoryProducer {
    inner: Arc<Mutex<BrokerInner>>,
}

impl Producer for InMemoryProducer {
    async fn send(&self, topic: &str, key: Bytes, value: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(Error::Publish("injected publish failure".to_string()));
        }
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| Error::Publish(format!("non-utf8 key: {e}")))?;
        let value = serde_json::from_slice(&value)
            .map_err(|e| Error::Publish(format!("non-json value: {e}")))?;
        inner.published.push((topic.to_string(), key, value));
        Ok(())
    }
}

#[derive(Default)]
struct StoreInner {
    map: HashMap<(String, u32), u64>,
    saves: usize,
}

/// Offset store double. Clones share the map; `saves` counts how many times
/// the runtime persisted.
#[derive(Clone, Default)]
pub(crate) struct MemoryOffsetStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryOffsetStore {
    pub(crate) fn put(&self, topic: &str, partition: u32, offset: u64) {
        self.inner
            .lock()
            .map
            .insert((topic.to_string(), partition), offset);
    }

    pub(crate) fn get(&self, topic: &str, partition: u32) -> Option<u64> {
        self.inner
            .lock()
            .map
            .get(&(topic.to_string(), partition))
            .copied()
    }

    pub(crate) fn saves(&self) -> usize {
        self.inner.lock().saves
    }
}

impl OffsetStore for MemoryOffsetStore {
    async fn load(&mut self, tracker: &mut OffsetTracker) -> Result<()> {
        let inner = self.inner.lock();
        tracker.load_committed(
            inner
                .map
                .iter()
                .map(|((topic, partition), offset)| (PartitionKey::new(topic, *partition), *offset)),
        );
        Ok(())
    }

    async fn save(&self, tracker: &OffsetTracker) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.map = tracker
            .entries()
            .map(|(key, offset)| ((key.topic.clone(), key.partition), offset))
            .collect();
        inner.saves += 1;
        Ok(())
    }
}

/// Counter state whose commit can be rigged to fail.
#[derive(Default)]
pub(crate) struct CountingState {
    count: u64,
    modified: bool,
    fail_commit: bool,
}

impl CountingState {
    pub(crate) fn failing_commit() -> Self {
        CountingState {
            fail_commit: true,
            ..CountingState::default()
        }
    }

    fn increment(&mut self) {
        self.count += 1;
        self.modified = true;
    }
}

impl TaskState for CountingState {
    fn is_modified(&self) -> bool {
        self.modified
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fail_commit {
            return Err(Error::State("injected state commit failure".to_string()));
        }
        self.modified = false;
        Ok(())
    }
}

/// Map task: consumes "in", doubles each numeric value onto "out" under the
/// same key. Optionally also emits to a topic it never declared.
#[derive(Default)]
pub(crate) struct DoublingTask {
    extra_topic: Option<String>,
    seen: Arc<Mutex<Vec<(u32, u64)>>>,
}

impl DoublingTask {
    pub(crate) fn also_emitting_to(topic: &str) -> Self {
        DoublingTask {
            extra_topic: Some(topic.to_string()),
            ..DoublingTask::default()
        }
    }

    /// (partition, offset) of every envelope handed to `process`, in order.
    pub(crate) fn seen_offsets(&self) -> Arc<Mutex<Vec<(u32, u64)>>> {
        Arc::clone(&self.seen)
    }
}

impl TaskCode for DoublingTask {
    type State = CountingState;

    fn meta(&self) -> TaskMeta {
        TaskMeta::new("doubling", vec!["in".to_string()])
            .with_result_topics(["out".to_string()])
    }

    async fn init(&mut self, _config: &TaskConfig) -> Result<()> {
        Ok(())
    }

    async fn process(
        &mut self,
        envelope: &Envelope,
        state: &mut CountingState,
    ) -> Result<Vec<Record>> {
        self.seen.lock().push((envelope.partition, envelope.offset));
        state.increment();
        let doubled = envelope.value.as_u64().unwrap_or(0) * 2;
        let mut results = Vec::new();
        if let Some(topic) = &self.extra_topic {
            results.push(Record::new(topic.clone(), envelope.key.clone(), json!(0)));
        }
        results.push(Record::new("out", envelope.key.clone(), json!(doubled)));
        Ok(results)
    }

    async fn window(&mut self, _state: &mut CountingState) -> Result<Vec<Record>> {
        Ok(Vec::new())
    }
}

/// Windowed task: counts envelopes from "in" and emits the running count to
/// "out" once per window period.
pub(crate) struct WindowCountTask {
    period: Duration,
}

impl WindowCountTask {
    pub(crate) fn new(period: Duration) -> Self {
        WindowCountTask { period }
    }
}

impl TaskCode for WindowCountTask {
    type State = CountingState;

    fn meta(&self) -> TaskMeta {
        TaskMeta::new("window_count", vec!["in".to_string()])
            .with_result_topics(["out".to_string()])
            .with_window_interval(self.period)
    }

    async fn init(&mut self, _config: &TaskConfig) -> Result<()> {
        Ok(())
    }

    async fn process(
        &mut self,
        _envelope: &Envelope,
        state: &mut CountingState,
    ) -> Result<Vec<Record>> {
        state.increment();
        Ok(Vec::new())
    }

    async fn window(&mut self, state: &mut CountingState) -> Result<Vec<Record>> {
        Ok(vec![Record::new("out", "count", json!(state.count))])
    }
}
