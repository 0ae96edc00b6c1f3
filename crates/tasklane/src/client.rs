use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::connection::Connection;
use crate::dispatch::Registry;
use crate::protocol::{NewTask, Request, StoreState, TaskId, TaskResult};
use crate::{Error, Result};

/// Handle through which tasks are submitted and awaited.
///
/// Wraps the [`Connection`] to the engine and the [`Registry`] used to rebuild
/// remote failures as local error types. Cloning is cheap; every clone talks over
/// the same connection.
#[derive(Clone)]
pub struct Client {
    connection: Arc<dyn Connection>,
    registry: Arc<Registry>,
}

impl Client {
    pub fn new<C>(connection: C) -> Self
    where
        C: Connection + 'static,
    {
        Self::from_shared(Arc::new(connection))
    }

    pub fn from_shared(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            registry: Arc::new(Registry::new()),
        }
    }

    /// Use `registry` to resolve failure kinds when awaiting.
    pub fn with_registry(self, registry: Arc<Registry>) -> Self {
        Self { registry, ..self }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Send a raw message and return the raw response.
    pub fn send_message(&self, message: &str) -> Result<String> {
        self.connection.request(message)
    }

    fn send<T>(&self, request: &Request) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send_message(&request.encode()?)?;
        serde_json::from_str(&response)
            .map_err(|e| Error::Protocol(format!("undecodable response: {e}")))
    }

    /// Submit a task. Blocks only until the engine acknowledges the submission.
    pub fn new_task(&self, definition: &str, args: String, kwargs: String) -> Result<TaskId> {
        let span = tracing::span!(tracing::Level::TRACE, "new-task", definition);
        let _enter = span.enter();

        let request = Request::NewTask(NewTask::new(definition, args, kwargs));
        let task_id: TaskId = self.send(&request)?;

        tracing::trace!("Submitted task {} as {}", definition, task_id);
        Ok(task_id)
    }

    /// Block until the engine reports the terminal outcome of `task_id`.
    pub fn await_task(&self, task_id: &TaskId) -> Result<TaskResult> {
        let span = tracing::span!(tracing::Level::TRACE, "await-task", %task_id);
        let _enter = span.enter();

        let result: TaskResult = self.send(&Request::AwaitTask {
            task_id: task_id.clone(),
        })?;

        tracing::trace!("Task {} resolved, success: {}", task_id, result.is_success());
        Ok(result)
    }

    pub fn store_state(&self) -> Result<StoreState> {
        self.send(&Request::GetStoreState)
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
