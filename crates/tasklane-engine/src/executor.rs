use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use tasklane::error::PANIC_KIND;
use tasklane::protocol::{NewTask, Request, StoreState, StoredTask, StoredTaskStatus, TaskId, TaskResult};
use tasklane::Dispatcher;

use crate::entry::{QueueEntry, Response};
use crate::error::EngineError;

/// Event loop command
pub(crate) enum Command {
    /// A request from a connection.
    Append(QueueEntry),
    /// A task got an execution slot.
    Started(TaskId),
    /// A task finished.
    Complete { task_id: TaskId, result: TaskResult },
    Stop,
}

/// Event loop running on its own thread and tokio runtime.
pub(crate) struct DedicatedExecutor {
    pub(crate) tx: UnboundedSender<Command>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl DedicatedExecutor {
    /// Start the loop. Returns once it accepts commands.
    pub(crate) fn new(dispatcher: Dispatcher, thread_count: usize) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .max_blocking_threads(thread_count)
            .thread_name(format!("tasklane-engine-{}", Uuid::new_v4()))
            .build()?;

        let (tx, rx) = unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let events = tx.clone();
        let dispatcher = Arc::new(dispatcher);

        let join_handle = std::thread::Builder::new()
            .name("tasklane-engine".into())
            .spawn(move || {
                runtime.block_on(async move {
                    ready_tx.send(()).ok();
                    event_loop(rx, events, dispatcher, thread_count).await
                })
            })?;

        ready_rx.blocking_recv().map_err(|_| EngineError::Stopped)?;
        Ok(Self {
            tx,
            join_handle: Some(join_handle),
        })
    }

    /// Stop the loop and wait for its thread, including tasks still executing.
    pub(crate) fn join(mut self) -> Result<(), EngineError> {
        self.tx.send(Command::Stop).ok();
        let Some(join_handle) = self.join_handle.take() else {
            return Ok(());
        };

        match join_handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("Engine loop failed: {:#}", e);
                Err(EngineError::Stopped)
            }
            Err(_) => Err(EngineError::Stopped),
        }
    }
}

impl Drop for DedicatedExecutor {
    fn drop(&mut self) {
        // The loop holds a sender of its own, so it only ends on Stop.
        self.tx.send(Command::Stop).ok();
    }
}

struct TaskRecord {
    task: StoredTask,
    result: Option<TaskResult>,
    waiters: Vec<QueueEntry>,
}

/// Task table owned by the event loop, in submission order.
#[derive(Default)]
struct TaskStore {
    order: Vec<TaskId>,
    records: HashMap<TaskId, TaskRecord>,
}

impl TaskStore {
    fn insert(&mut self, task_id: TaskId, task: NewTask) {
        let record = TaskRecord {
            task: StoredTask {
                id: task_id.clone(),
                status: StoredTaskStatus::Enqueued,
                definition: task.definition,
                args: task.args,
                kwargs: task.kwargs,
            },
            result: None,
            waiters: Vec::new(),
        };
        self.order.push(task_id.clone());
        self.records.insert(task_id, record);
    }

    fn start(&mut self, task_id: &TaskId) {
        if let Some(record) = self.records.get_mut(task_id) {
            record.task.status = StoredTaskStatus::Processing;
        }
    }

    /// Record the outcome and hand back everyone waiting for it.
    fn complete(&mut self, task_id: &TaskId, result: TaskResult) -> Vec<QueueEntry> {
        let Some(record) = self.records.get_mut(task_id) else {
            tracing::warn!("Completion for unknown task {}", task_id);
            return Vec::new();
        };

        record.task.status = if result.is_success() {
            StoredTaskStatus::Completed
        } else {
            StoredTaskStatus::Failed
        };
        record.result = Some(result);
        std::mem::take(&mut record.waiters)
    }

    /// Answer an await right away if the task is terminal, otherwise park it.
    fn wait(&mut self, task_id: &TaskId, entry: QueueEntry) {
        match self.records.get_mut(task_id) {
            Some(TaskRecord {
                result: Some(result),
                ..
            }) => entry.respond(Ok(result.encode())),
            Some(record) => record.waiters.push(entry),
            None => entry.respond(Err(tasklane::Error::Protocol(format!("Unknown task {task_id}")))),
        }
    }

    fn snapshot(&self) -> StoreState {
        StoreState {
            tasks: self
                .order
                .iter()
                .filter_map(|id| self.records.get(id))
                .map(|record| record.task.clone())
                .collect(),
        }
    }
}

async fn event_loop(
    mut receiver: UnboundedReceiver<Command>,
    events: UnboundedSender<Command>,
    dispatcher: Arc<Dispatcher>,
    thread_count: usize,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(thread_count));
    let mut store = TaskStore::default();

    'main: while let Some(cmd) = receiver.recv().await {
        use Command::*;

        match cmd {
            Append(entry) => {
                tracing::trace!(
                    "Processing request {}, added {}ms ago",
                    entry.id,
                    entry.queue_time.elapsed().as_millis()
                );
                let request = entry.request.clone();

                match request {
                    Request::NewTask(task) => {
                        let task_id = TaskId::new(Uuid::new_v4().to_string());
                        spawn_task(&task_id, &task, &dispatcher, &permits, &events);
                        store.insert(task_id.clone(), task);
                        entry.respond(encode(&task_id));
                    }
                    Request::AwaitTask { task_id } => store.wait(&task_id, entry),
                    Request::GetStoreState => entry.respond(encode(&store.snapshot())),
                }
            }
            Started(task_id) => store.start(&task_id),
            Complete { task_id, result } => {
                let encoded = result.encode();
                for waiter in store.complete(&task_id, result) {
                    waiter.respond(Ok(encoded.clone()));
                }
            }
            Stop => {
                tracing::info!("Stopping engine loop");
                break 'main;
            }
        }
    }
    Ok(())
}

/// Execute a task once an execution slot is free, reporting back as events.
fn spawn_task(
    task_id: &TaskId,
    task: &NewTask,
    dispatcher: &Arc<Dispatcher>,
    permits: &Arc<Semaphore>,
    events: &UnboundedSender<Command>,
) {
    let task_id = task_id.clone();
    let NewTask {
        definition,
        args,
        kwargs,
        ..
    } = task.clone();
    let dispatcher = dispatcher.clone();
    let permits = permits.clone();
    let events = events.clone();

    tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };
        events.send(Command::Started(task_id.clone())).ok();

        let execution =
            tokio::task::spawn_blocking(move || dispatcher.execute(&definition, &args, &kwargs));
        let result = match execution.await {
            Ok(result) => result,
            Err(e) => TaskResult::failure(PANIC_KIND, e.to_string(), Vec::new()),
        };
        events.send(Command::Complete { task_id, result }).ok();
    });
}

fn encode<T: serde::Serialize>(value: &T) -> Response {
    Ok(serde_json::to_string(value)?)
}
