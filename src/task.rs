//! The seam between the runtime and user-supplied processing logic. A task
//! implementation declares its metadata up front through an explicit
//! [TaskMeta] (validated at registration, never probed field-by-field at
//! runtime) and implements the [TaskCode] hooks the main loop invokes.

use std::collections::HashSet;
use std::time::Duration;

use crate::Result;
use crate::config::TaskConfig;
use crate::error::Error;
use crate::message::{Envelope, Record};

/// Static metadata a task declares about itself.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    /// Task name, used in logs and error messages.
    pub name: String,
    /// Topics the task consumes. Required, non-empty; one reader loop is
    /// spawned per entry.
    pub source_topics: Vec<String>,
    /// Topics the task is permitted to publish to. May be empty — a task
    /// with no result topics is a valid sink-only task.
    pub result_topics: HashSet<String>,
    /// Presence makes the task windowed. The runtime config may override the
    /// period; it cannot be zero.
    pub window_interval: Option<Duration>,
}

impl TaskMeta {
    pub fn new(name: impl Into<String>, source_topics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            source_topics,
            result_topics: HashSet::new(),
            window_interval: None,
        }
    }

    pub fn with_result_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.result_topics = topics.into_iter().collect();
        self
    }

    pub fn with_window_interval(mut self, period: Duration) -> Self {
        self.window_interval = Some(period);
        self
    }

    /// Checked once at registration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("task name must not be empty".to_string()));
        }
        if self.source_topics.is_empty() {
            return Err(Error::Config(format!(
                "task {} declares no source topics",
                self.name
            )));
        }
        if self.window_interval == Some(Duration::ZERO) {
            return Err(Error::Config(format!(
                "task {} declares a zero window interval",
                self.name
            )));
        }
        Ok(())
    }
}

/// Opaque user state owned by the task's single main loop and mutated only
/// inside `process`/`window`. Persistence failures are fatal for the task.
#[trait_variant::make(TaskState: Send)]
pub trait LocalTaskState {
    /// Whether there is anything to persist since the last commit.
    fn is_modified(&self) -> bool;
    /// Persists the state and clears the modified flag.
    async fn commit(&mut self) -> Result<()>;
}

/// User-supplied processing logic. `process` runs once per consumed envelope;
/// `window` runs once per elapsed window period on windowed tasks. Both
/// return the records to publish — an empty `Vec` means "no output this
/// call", not an error.
#[trait_variant::make(TaskCode: Send)]
pub trait LocalTaskCode {
    type State: TaskState;

    fn meta(&self) -> TaskMeta;

    /// Invoked once, before the main loop starts. The config carries the
    /// runtime's opaque options verbatim.
    async fn init(&mut self, config: &TaskConfig) -> Result<()>;

    async fn process(
        &mut self,
        envelope: &Envelope,
        state: &mut Self::State,
    ) -> Result<Vec<Record>>;

    async fn window(&mut self, state: &mut Self::State) -> Result<Vec<Record>>;
}
