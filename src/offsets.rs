//! Per-partition consumption progress. The tracker maps [PartitionKey] to the
//! next offset to read and carries a dirty flag so the commit timer knows
//! whether anything needs persisting. Two modes exist:
//!
//! - simple: `set` writes straight into the committed map, for tasks whose
//!   output is published per message (committing the offset right after the
//!   message was handled is safe);
//! - windowed: `set` buffers into a pending map and only [OffsetTracker::window]
//!   folds pending into committed, so offsets never run ahead of the window
//!   aggregate that covers them. Committing a not-yet-folded offset would drop
//!   the messages of a half-accumulated window on restart.
//!
//! The tracker is owned and mutated exclusively by the task's main loop;
//! persistence goes through the [OffsetStore] collaborator.

use std::collections::HashMap;

use crate::Result;
use crate::message::PartitionKey;

#[derive(Debug)]
pub struct OffsetTracker {
    committed: HashMap<PartitionKey, u64>,
    /// Present only in windowed mode.
    pending: Option<HashMap<PartitionKey, u64>>,
    modified: bool,
}

impl OffsetTracker {
    /// A tracker whose `set` takes effect immediately.
    pub fn simple() -> Self {
        Self {
            committed: HashMap::new(),
            pending: None,
            modified: false,
        }
    }

    /// A tracker whose `set` is buffered until the next [OffsetTracker::window].
    pub fn windowed() -> Self {
        Self {
            committed: HashMap::new(),
            pending: Some(HashMap::new()),
            modified: false,
        }
    }

    pub fn is_windowed(&self) -> bool {
        self.pending.is_some()
    }

    /// The next offset to read for the partition, 0 if unseen. Pending values
    /// are never visible here.
    pub fn get(&self, topic: &str, partition: u32) -> u64 {
        self.committed
            .get(&PartitionKey::new(topic, partition))
            .copied()
            .unwrap_or(0)
    }

    /// Whether a committed entry exists for the partition. Distinguishes "we
    /// had stored progress" from the unseen default at startup reconciliation.
    pub fn is_tracked(&self, topic: &str, partition: u32) -> bool {
        self.committed
            .contains_key(&PartitionKey::new(topic, partition))
    }

    /// Records progress and marks the tracker dirty. Offsets only move
    /// forward; a lower value than what is already recorded is ignored.
    pub fn set(&mut self, topic: &str, partition: u32, offset: u64) {
        self.modified = true;
        let key = PartitionKey::new(topic, partition);
        let target = match &mut self.pending {
            Some(pending) => pending,
            None => &mut self.committed,
        };
        let entry = target.entry(key).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
    }

    /// Unconditionally overwrites the committed value, bypassing the pending
    /// buffer and the monotonicity rule. Used once at startup to clamp a
    /// stored offset that fell behind the broker's oldest retained offset.
    pub fn force_set(&mut self, topic: &str, partition: u32, offset: u64) {
        self.modified = true;
        self.committed
            .insert(PartitionKey::new(topic, partition), offset);
    }

    /// Folds the pending map into the committed map. This is the only way
    /// committed offsets advance in windowed mode; called once per window
    /// tick, after the window output has been handed to the producer. No-op
    /// in simple mode.
    pub fn window(&mut self) {
        if let Some(pending) = &mut self.pending {
            self.committed.extend(pending.drain());
        }
    }

    /// Clears the dirty flag. Performs no I/O itself; the caller persists via
    /// [OffsetStore::save] immediately before.
    pub fn commit(&mut self) {
        self.modified = false;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Committed entries, as persisted by [OffsetStore::save].
    pub fn entries(&self) -> impl Iterator<Item = (&PartitionKey, u64)> {
        self.committed.iter().map(|(k, v)| (k, *v))
    }

    /// Bulk-populates the committed map from durable storage. Loading is not
    /// progress, so the dirty flag is left untouched.
    pub fn load_committed(&mut self, entries: impl IntoIterator<Item = (PartitionKey, u64)>) {
        self.committed.extend(entries);
    }
}

/// Durable storage behind the tracker. `load` populates a tracker at startup,
/// `save` persists its committed map; both are invoked only by the task's
/// main loop.
#[trait_variant::make(OffsetStore: Send)]
pub trait LocalOffsetStore {
    async fn load(&mut self, tracker: &mut OffsetTracker) -> Result<()>;
    async fn save(&self, tracker: &OffsetTracker) -> Result<()>;
}
