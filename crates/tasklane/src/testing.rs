//! Connections used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::protocol::{Request, StoreState, StoredTask, StoredTaskStatus, TaskId, TaskResult};
use crate::{Error, Result};

/// Route log output through the test harness. `RUST_LOG` selects what is shown.
pub(crate) fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

type Script = Box<dyn Fn(usize) -> Result<String> + Send + Sync>;

/// Answers each request with `script(n)`, `n` counting requests from zero, and
/// records every message it was sent.
pub(crate) struct ScriptedConnection {
    script: Script,
    calls: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl ScriptedConnection {
    pub(crate) fn new<F>(script: F) -> Self
    where
        F: Fn(usize) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Connection for ScriptedConnection {
    fn request(&self, message: &str) -> Result<String> {
        self.messages.lock().unwrap().push(message.to_owned());
        (self.script)(self.calls.fetch_add(1, Ordering::SeqCst))
    }
}

/// Runs every submitted task synchronously through a [`Dispatcher`].
pub(crate) struct InlineEngine {
    dispatcher: Dispatcher,
    tasks: Mutex<HashMap<TaskId, (StoredTask, TaskResult)>>,
    next_id: AtomicUsize,
}

impl InlineEngine {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl Connection for InlineEngine {
    fn request(&self, message: &str) -> Result<String> {
        match Request::decode(message)? {
            Request::NewTask(task) => {
                let id = TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
                let result = self
                    .dispatcher
                    .execute(&task.definition, &task.args, &task.kwargs);
                let status = if result.is_success() {
                    StoredTaskStatus::Completed
                } else {
                    StoredTaskStatus::Failed
                };
                let stored = StoredTask {
                    id: id.clone(),
                    status,
                    definition: task.definition,
                    args: task.args,
                    kwargs: task.kwargs,
                };
                self.tasks.lock().unwrap().insert(id.clone(), (stored, result));
                Ok(serde_json::to_string(&id)?)
            }
            Request::AwaitTask { task_id } => match self.tasks.lock().unwrap().get(&task_id) {
                Some((_, result)) => Ok(result.encode()),
                None => Err(Error::Protocol(format!("unknown task {task_id}"))),
            },
            Request::GetStoreState => {
                let tasks = self.tasks.lock().unwrap();
                let mut state = StoreState {
                    tasks: tasks.values().map(|(task, _)| task.clone()).collect(),
                };
                state.tasks.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(serde_json::to_string(&state)?)
            }
        }
    }
}
