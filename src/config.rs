//! Runtime settings consumed (not owned) by the task runtime. Parsing a
//! configuration file into [TaskConfig] is the launcher's job; the runtime
//! only reads the resolved values and forwards the opaque `options` map to
//! [crate::task::TaskCode::init] untouched.

use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_COMMIT_INTERVAL_SECS: u64 = 5;
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// How often the main loop persists modified state and offsets.
    pub commit_interval: Duration,
    /// Overrides the window period declared by the task code, when present.
    pub window_interval: Option<Duration>,
    /// Capacity of the bounded envelope queue between the reader loops and
    /// the main loop. A full queue blocks the readers (backpressure).
    pub queue_capacity: usize,
    /// Arbitrary keys forwarded verbatim to `TaskCode::init`.
    pub options: HashMap<String, String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            commit_interval: Duration::from_secs(DEFAULT_COMMIT_INTERVAL_SECS),
            window_interval: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            options: HashMap::new(),
        }
    }
}
