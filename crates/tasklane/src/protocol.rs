//! Messages exchanged with the engine.
//!
//! Every message is JSON text. Task arguments are encoded twice: the `args` and
//! `kwargs` fields of a [`NewTask`] hold JSON text themselves, so the outer
//! envelope never depends on the shape of a particular task's arguments.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

use crate::{utils, Error, Result};

/// Queue every submission goes to.
pub const DEFAULT_QUEUE: &str = "default";

/// A request sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Submit a task. Answered with the [`TaskId`] the engine assigned.
    NewTask(NewTask),

    /// Wait for a task to finish. Answered with its terminal [`TaskResult`].
    AwaitTask { task_id: TaskId },

    /// Inspect the engine's task table. Answered with a [`StoreState`].
    GetStoreState,
}

impl Request {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a request, treating anything unrecognised as a protocol error.
    pub fn decode(message: &str) -> Result<Self> {
        serde_json::from_str(message).map_err(|e| Error::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub queue: String,
    pub definition: String,
    /// JSON array, serialized.
    pub args: String,
    /// JSON object, serialized.
    pub kwargs: String,
}

impl NewTask {
    pub fn new<D: Into<String>>(definition: D, args: String, kwargs: String) -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_owned(),
            definition: definition.into(),
            args,
            kwargs,
        }
    }
}

/// Identifier the engine hands out for an accepted task. Opaque to this crate.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Terminal outcome of a task, in the envelope shared by the engine and the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    Success {
        result: Value,
    },
    #[serde(alias = "error")]
    Failure {
        /// Fully-qualified name of the error type on the executing side.
        class: String,
        message: String,
        #[serde(default)]
        backtrace: Vec<String>,
    },
}

impl TaskResult {
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    pub fn failure<C, M>(class: C, message: M, backtrace: Vec<String>) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Self::Failure {
            class: class.into(),
            message: message.into(),
            backtrace,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Success { result } => json!({ "type": "success", "result": result }),
            Self::Failure {
                class,
                message,
                backtrace,
            } => json!({
                "type": "failure",
                "class": class,
                "message": message,
                "backtrace": backtrace,
            }),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(message: &str) -> Result<Self> {
        serde_json::from_str(message).map_err(|e| Error::Protocol(e.to_string()))
    }
}

impl From<&Error> for TaskResult {
    fn from(error: &Error) -> Self {
        let backtrace = match error {
            Error::RemoteTask { trace, .. } => trace.clone(),
            other => utils::error_trace(other),
        };
        Self::failure(error.kind(), error.message(), backtrace)
    }
}

/// Snapshot of the engine's task table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    pub tasks: Vec<StoredTask>,
}

impl StoreState {
    pub fn count(&self, status: StoredTaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: TaskId,
    pub status: StoredTaskStatus,
    pub definition: String,
    pub args: String,
    pub kwargs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredTaskStatus {
    Enqueued,
    Processing,
    Completed,
    Retrying,
    Failed,
}

impl StoredTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
