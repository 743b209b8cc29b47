//! The per-task engine. One [TaskRuntime] owns a task's offset tracker and
//! state handle, spawns one reader loop per source topic, and drives the
//! single main loop that is the only writer of both.
//!
//! ```text
//! (broker) --fetch--> [reader loop]--+
//! (broker) --fetch--> [reader loop]--+--[bounded queue]--> (main loop) --+--> producer
//!                                                                       +--> state store
//!                                                                       +--> offset store
//! ```
//!
//! The reader loops and the main loop share nothing but the bounded queue;
//! the tracker and user state are touched exclusively by the main loop, so no
//! locks guard them. A full queue blocks the readers, throttling consumption
//! to the main loop's pace.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Result;
use crate::broker::{BrokerClient, OffsetBounds, Producer, TopicConsumer};
use crate::config::TaskConfig;
use crate::error::Error;
use crate::message::{Envelope, Record};
use crate::offsets::{OffsetStore, OffsetTracker};
use crate::task::{TaskCode, TaskMeta, TaskState};
use crate::timing::{ExponentialSleep, IntervalTracker};

/// How long the main loop waits on the queue before interleaving window and
/// commit checks.
const QUEUE_POP_TIMEOUT: Duration = Duration::from_millis(500);
/// Reader-loop blocking fetch timeout. Bounded only so a cancelled reader
/// notices; not a retry knob.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: f64 = 2.0;
/// Brief broker blips stay quiet; only a backoff that has grown past this
/// threshold is logged, to avoid log storms.
const BACKOFF_LOG_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Initializing,
    Running,
    Failed,
    Stopped,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Initializing => write!(f, "initializing"),
            TaskPhase::Running => write!(f, "running"),
            TaskPhase::Failed => write!(f, "failed"),
            TaskPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runs one task: startup reconciliation, reader loops, the main loop, and
/// periodic commits. Constructed by the container, one per configured task.
pub struct TaskRuntime<C, O>
where
    C: TaskCode,
    O: OffsetStore,
{
    meta: TaskMeta,
    config: TaskConfig,
    code: C,
    state: C::State,
    tracker: OffsetTracker,
    offset_store: O,
    commit_gate: IntervalTracker,
    window_gate: Option<IntervalTracker>,
    phase: TaskPhase,
}

impl<C, O> TaskRuntime<C, O>
where
    C: TaskCode,
    O: OffsetStore,
{
    /// Validates the task's metadata and picks the tracker variant: windowed
    /// when an effective window period exists (the config override wins over
    /// the declared one), simple otherwise.
    pub fn new(code: C, state: C::State, offset_store: O, config: TaskConfig) -> Result<Self> {
        let meta = code.meta();
        meta.validate()?;

        let window_interval = config.window_interval.or(meta.window_interval);
        if window_interval == Some(Duration::ZERO) {
            return Err(Error::Config(format!(
                "task {} configured with a zero window interval",
                meta.name
            )));
        }

        let tracker = match window_interval {
            Some(_) => OffsetTracker::windowed(),
            None => OffsetTracker::simple(),
        };

        Ok(Self {
            commit_gate: IntervalTracker::new(config.commit_interval),
            window_gate: window_interval.map(IntervalTracker::new),
            meta,
            config,
            code,
            state,
            tracker,
            offset_store,
            phase: TaskPhase::Initializing,
        })
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Runs the task to completion: `Ok` only on orderly shutdown via the
    /// cancellation token, `Err` when the task failed. Reader-loop fetch
    /// errors are absorbed by backoff and never surface here.
    pub async fn run<B>(mut self, broker: B, cancel: CancellationToken) -> Result<()>
    where
        B: BrokerClient,
    {
        let name = self.meta.name.clone();
        match self.drive(broker, cancel).await {
            Ok(()) => {
                self.phase = TaskPhase::Stopped;
                info!(task = %name, phase = %self.phase, "task stopped");
                Ok(())
            }
            Err(e) => {
                self.phase = TaskPhase::Failed;
                error!(task = %name, phase = %self.phase, err = %e, "task failed");
                Err(e)
            }
        }
    }

    async fn drive<B>(&mut self, broker: B, cancel: CancellationToken) -> Result<()>
    where
        B: BrokerClient,
    {
        info!(task = %self.meta.name, phase = %self.phase, "initializing task");
        self.code.init(&self.config).await?;
        self.offset_store.load(&mut self.tracker).await?;

        let producer = broker.producer().await?;

        // Open one consumer per source topic, reconcile every partition's
        // stored offset against the broker's retained range, and seed the
        // consumer's position from the tracker.
        let mut consumers = Vec::with_capacity(self.meta.source_topics.len());
        let topics = self.meta.source_topics.clone();
        for topic in &topics {
            let mut consumer = broker.consumer(topic).await?;
            for partition in consumer.partition_ids().await? {
                let bounds = consumer.offset_bounds(partition).await?;
                self.reconcile_partition(topic, partition, bounds)?;
                consumer
                    .seek(partition, self.tracker.get(topic, partition))
                    .await?;
            }
            consumers.push((topic.clone(), consumer));
        }

        let (queue_tx, mut queue_rx) = mpsc::channel(self.config.queue_capacity);
        for (topic, consumer) in consumers {
            tokio::spawn(reader_loop(
                self.meta.name.clone(),
                topic,
                consumer,
                queue_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(queue_tx);

        self.phase = TaskPhase::Running;
        info!(task = %self.meta.name, phase = %self.phase, topics = ?topics, "task running");

        loop {
            match timeout(QUEUE_POP_TIMEOUT, queue_rx.recv()).await {
                Ok(Some(envelope)) => {
                    let results = self.code.process(&envelope, &mut self.state).await?;
                    self.route(&producer, results).await?;
                    self.tracker
                        .set(&envelope.topic, envelope.partition, envelope.offset + 1);
                }
                // every reader loop has exited (shutdown) and the queue is drained
                Ok(None) => break,
                Err(_) => self.tick_window(&producer).await?,
            }
            self.maybe_commit().await?;
        }

        // final commit pass so an orderly stop persists everything applied
        self.commit().await?;
        Ok(())
    }

    /// Reconciles one partition's stored offset against the broker's retained
    /// range. Stored past the log end means the offset store and state store
    /// have diverged: fatal, abort startup rather than guess. Stored behind
    /// the oldest retained offset means the log was truncated under us:
    /// recoverable, clamp to the minimum and warn.
    fn reconcile_partition(
        &mut self,
        topic: &str,
        partition: u32,
        bounds: OffsetBounds,
    ) -> Result<()> {
        let stored = self.tracker.get(topic, partition);
        if stored > bounds.max {
            return Err(Error::OffsetDivergence {
                topic: topic.to_string(),
                partition,
                stored,
                max: bounds.max,
            });
        }
        if stored < bounds.min {
            if self.tracker.is_tracked(topic, partition) {
                warn!(
                    task = %self.meta.name,
                    topic,
                    partition,
                    stored,
                    min = bounds.min,
                    "stored offset fell behind the broker's oldest retained offset, clamping"
                );
            }
            self.tracker.force_set(topic, partition, bounds.min);
        }
        Ok(())
    }

    /// Runs the window hook when the gate is due: emit the aggregate, then —
    /// only once it is out the door — fold pending offsets into the committed
    /// map and restart the gate.
    async fn tick_window<P>(&mut self, producer: &P) -> Result<()>
    where
        P: Producer,
    {
        if !self.window_gate.as_ref().is_some_and(|gate| gate.is_due()) {
            return Ok(());
        }
        let results = self.code.window(&mut self.state).await?;
        self.route(producer, results).await?;
        self.tracker.window();
        if let Some(gate) = self.window_gate.as_mut() {
            gate.reset();
        }
        Ok(())
    }

    async fn maybe_commit(&mut self) -> Result<()> {
        if !self.commit_gate.is_due() {
            return Ok(());
        }
        self.commit().await?;
        self.commit_gate.reset();
        Ok(())
    }

    /// State is always committed before offsets are persisted: a crash
    /// between the two re-processes at most one already-applied batch, never
    /// loses one. Neither store is touched when its side is unmodified.
    async fn commit(&mut self) -> Result<()> {
        if self.state.is_modified() {
            self.state.commit().await.inspect_err(
                |e| error!(task = %self.meta.name, err = %e, "state commit failed"),
            )?;
        }
        if self.tracker.is_modified() {
            self.offset_store.save(&self.tracker).await.inspect_err(
                |e| error!(task = %self.meta.name, err = %e, "offset persistence failed"),
            )?;
            self.tracker.commit();
        }
        Ok(())
    }

    /// Hands each result to the producer, keyed ordering per record key. A
    /// result routed to an undeclared topic, or missing its key, is logged
    /// and dropped; a transport failure is logged and propagated, failing
    /// the task.
    async fn route<P>(&self, producer: &P, results: Vec<Record>) -> Result<()>
    where
        P: Producer,
    {
        for record in results {
            if !self.meta.result_topics.contains(&record.topic) {
                error!(
                    task = %self.meta.name,
                    topic = %record.topic,
                    "dropping result routed to undeclared topic"
                );
                continue;
            }
            if record.key.is_empty() {
                error!(
                    task = %self.meta.name,
                    topic = %record.topic,
                    "dropping result with missing key"
                );
                continue;
            }
            let payload =
                serde_json::to_vec(&record.value).map_err(|e| Error::Codec(e.to_string()))?;
            producer
                .send(
                    &record.topic,
                    Bytes::from(record.key.into_bytes()),
                    Bytes::from(payload),
                )
                .await
                .inspect_err(|e| {
                    error!(
                        task = %self.meta.name,
                        topic = %record.topic,
                        err = %e,
                        "failed to publish result"
                    );
                })?;
        }
        Ok(())
    }
}

/// One reader loop per (task, source topic): fetches the next record in read
/// order, decodes it, and pushes the envelope into the shared bounded queue.
/// Fetch and decode failures are retried forever with exponential backoff —
/// this loop never terminates the task on its own.
async fn reader_loop<C>(
    task: String,
    topic: String,
    mut consumer: C,
    queue: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) where
    C: TopicConsumer + 'static,
{
    let mut backoff = ExponentialSleep::new(BACKOFF_INITIAL, BACKOFF_MAX, BACKOFF_FACTOR);
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = consumer.fetch_next(FETCH_TIMEOUT) => fetched,
        };
        let decoded = fetched.and_then(|record| match record {
            Some(record) => Envelope::decode(&topic, record).map(Some),
            None => Ok(None),
        });
        match decoded {
            Ok(Some(envelope)) => {
                backoff.reset();
                // blocks while the queue is full; that is the backpressure
                if queue.send(envelope).await.is_err() {
                    break;
                }
            }
            // fetch timeout with nothing to read is a successful call
            Ok(None) => backoff.reset(),
            Err(e) => {
                if backoff.current() >= BACKOFF_LOG_THRESHOLD {
                    warn!(task = %task, topic = %topic, err = %e, "fetch failing, backing off");
                }
                backoff.sleep().await;
            }
        }
    }
    info!(task = %task, topic = %topic, "reader loop exited");
}
