use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

use crate::client::Client;
use crate::protocol::{TaskId, TaskResult};
use crate::Result;

/// Handle to one submitted task.
///
/// The first successful [`Future::wait`] (or [`Future::result`]) asks the engine
/// for the terminal outcome and keeps it; later calls decode the kept outcome
/// without another request. Errors talking to the engine are not kept, so a wait
/// that failed on the connection can be retried.
pub struct Future<O> {
    task_id: TaskId,
    client: Client,
    resolved: OnceCell<TaskResult>,
    _output: PhantomData<fn() -> O>,
}

impl<O> Future<O>
where
    O: DeserializeOwned,
{
    /// Attach to a task that was already submitted through `client`.
    pub fn new(task_id: TaskId, client: Client) -> Self {
        Self {
            task_id,
            client,
            resolved: OnceCell::new(),
            _output: PhantomData,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Block until the task has a terminal outcome and return the raw envelope.
    pub fn result(&self) -> Result<&TaskResult> {
        self.resolved
            .get_or_try_init(|| self.client.await_task(&self.task_id))
    }

    /// Block until the task finishes and return its output.
    ///
    /// A failed task is returned as [`crate::Error::Task`] when its kind is registered
    /// with the client's registry, and as [`crate::Error::RemoteTask`] otherwise.
    pub fn wait(&self) -> Result<O> {
        match self.result()? {
            TaskResult::Success { result } => Ok(O::deserialize(result)?),
            TaskResult::Failure {
                class,
                message,
                backtrace,
            } => {
                tracing::debug!("Task {} failed with {}: {}", self.task_id, class, message);
                Err(self.client.registry().reconstruct(class, message, backtrace))
            }
        }
    }
}

impl<O> Debug for Future<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("task_id", &self.task_id)
            .field("resolved", &self.resolved.get())
            .finish()
    }
}
