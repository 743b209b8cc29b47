//! A per-process stream-processing task runtime. Each configured task consumes
//! records from one or more partitioned topic logs, feeds them to user-supplied
//! [task::TaskCode], periodically invokes windowed aggregation, publishes
//! derived records to result topics, and durably tracks consumption progress
//! (offsets) and user state so that a restart resumes without reprocessing
//! committed work.
//!
//! The processing loop per task:
//! - one reader loop per source topic pulls records from the broker and pushes
//!   decoded envelopes into a bounded queue (backpressure),
//! - the single main loop drains the queue, invokes `process` per envelope and
//!   `window` per window tick, routes results to the broker producer, and
//!   commits state and offsets on a timer. State is always committed before
//!   offsets are persisted, so a crash between the two re-processes at most
//!   one already-applied batch (at-least-once), never loses it.

mod error;

pub use crate::error::{Error, Result};

pub mod broker;
pub mod config;
pub mod container;
pub mod message;
pub mod offsets;
pub mod runtime;
pub mod task;
pub mod timing;

#[cfg(test)]
pub(crate) mod test_utils;
