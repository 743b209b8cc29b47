//! Hosts several independent task runtimes in one process. The container owns
//! nothing the tasks share except the shutdown token: each task brings its own
//! broker handle, offset store, and state, and a failing task neither cancels
//! nor restarts its neighbours.

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::broker::BrokerClient;
use crate::error::Error;
use crate::offsets::OffsetStore;
use crate::runtime::TaskRuntime;
use crate::task::TaskCode;

/// A set of registered tasks, run concurrently until each stops or fails.
pub struct TaskContainer {
    tasks: Vec<(String, BoxFuture<'static, Result<()>>)>,
    cancel: CancellationToken,
}

impl TaskContainer {
    pub fn new() -> Self {
        TaskContainer {
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token shared by every registered task; cancelling it asks all of them
    /// to stop after a final commit pass.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Registers a task. Names must be unique within the container; the
    /// runtime has already validated the task's own metadata.
    pub fn add_task<C, O, B>(&mut self, runtime: TaskRuntime<C, O>, broker: B) -> Result<()>
    where
        C: TaskCode + Sync + 'static,
        C::State: Sync + 'static,
        O: OffsetStore + Sync + 'static,
        B: BrokerClient + 'static,
    {
        let name = runtime.name().to_string();
        if self.tasks.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::Container(format!(
                "a task named {name} is already registered"
            )));
        }
        let cancel = self.cancel.clone();
        self.tasks.push((name, Box::pin(runtime.run(broker, cancel))));
        Ok(())
    }

    /// Spawns every task and waits for all of them. Task failures are
    /// isolated while running; once everything has finished, the first
    /// failure (in registration order) is returned.
    pub async fn run(self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(Error::Container("no tasks registered".to_string()));
        }

        info!(tasks = self.tasks.len(), "container starting");
        let mut handles = Vec::with_capacity(self.tasks.len());
        for (name, task) in self.tasks {
            handles.push((name, tokio::spawn(task)));
        }

        let mut first_failure = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
                Err(e) => {
                    error!(task = %name, err = %e, "task panicked");
                    if first_failure.is_none() {
                        first_failure = Some(Error::Container(format!(
                            "task {name} panicked: {e}"
                        )));
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => {
                info!("container stopped");
                Ok(())
            }
        }
    }
}

impl Default for TaskContainer {
    fn default() -> Self {
        Self::new()
    }
}
