//! Bookkeeping for in-flight streaming calls.
//!
//! Each connection owns a [`TaskTable`] mapping client-chosen task ids to
//! suspended generators. Continuations of the same task are serialized
//! through a per-task mutex — a generator's execution state is not safe for
//! concurrent resumption — while different tasks advance independently.
//!
//! Task state machine: `Active` on creation, looping on YIELD, then
//! `Closed` on RETURN, exhaustion, a propagated THROW, or forced closure at
//! disconnect. `Closed` is terminal; the entry is removed from the table.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    envelope::{Envelope, TaskId},
    error::{ChannelError, WireError},
    generator::Generator,
};

/// A continuation event applied to a suspended task.
#[derive(Debug)]
pub enum Continuation {
    /// YIELD: advance the generator with an input value.
    Resume(Value),
    /// RETURN: force-close the stream early.
    Close,
    /// THROW: inject a reconstructed error into the generator.
    Inject(WireError),
}

struct Task {
    generator: Mutex<Box<dyn Generator>>,
}

/// Per-connection table of in-flight streaming calls.
#[derive(Default)]
pub struct TaskTable {
    tasks: DashMap<TaskId, Arc<Task>>,
}

impl TaskTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator under `task_id`. A stale entry with the same id
    /// is closed before being replaced, like every other teardown path.
    pub async fn insert(&self, task_id: TaskId, generator: Box<dyn Generator>) {
        let task = Arc::new(Task {
            generator: Mutex::new(generator),
        });
        if let Some(previous) = self.tasks.insert(task_id, task) {
            previous.generator.lock().await.close().await;
            debug!(task_id, "stale task closed and replaced");
        }
        debug!(task_id, "task registered");
    }

    /// Whether a task is registered under `task_id`.
    #[must_use]
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    /// Number of in-flight tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the table has no in-flight tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply a continuation to the task registered under `task_id` and
    /// produce the reply envelope.
    ///
    /// An unknown id yields a THROW-shaped reply (`ReferenceError`) and the
    /// continuation is discarded — the originating call site is not
    /// recoverable at this point. Exhaustion is indistinguishable from an
    /// explicit close for the peer: both settle as `{done: true}`.
    pub async fn continue_task(&self, task_id: TaskId, continuation: Continuation) -> Envelope {
        let Some(task) = self.tasks.get(&task_id).map(|t| Arc::clone(t.value())) else {
            let error = ChannelError::UnknownTask { task_id };
            return Envelope::throw(task_id, &error.to_wire());
        };
        let mut generator = task.generator.lock().await;
        match continuation {
            Continuation::Resume(input) => {
                let step = generator.resume(input).await;
                self.settle(task_id, step)
            }
            Continuation::Inject(error) => {
                let step = generator.throw(error).await;
                self.settle(task_id, step)
            }
            Continuation::Close => {
                generator.close().await;
                self.remove(task_id);
                Envelope::done(task_id)
            }
        }
    }

    /// Force-close every task in the table. Used when the owning connection
    /// disconnects so suspended generators never leak.
    pub async fn close_all(&self) {
        let ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for task_id in ids {
            if let Some((_, task)) = self.tasks.remove(&task_id) {
                task.generator.lock().await.close().await;
                debug!(task_id, "task force-closed");
            }
        }
    }

    fn settle(&self, task_id: TaskId, step: Result<Option<Value>, WireError>) -> Envelope {
        match step {
            Ok(Some(value)) => Envelope::step(task_id, value),
            Ok(None) => {
                self.remove(task_id);
                Envelope::done(task_id)
            }
            Err(error) => {
                self.remove(task_id);
                Envelope::throw(task_id, &error)
            }
        }
    }

    fn remove(&self, task_id: TaskId) {
        if self.tasks.remove(&task_id).is_some() {
            debug!(task_id, "task closed");
        }
    }
}
