use crossbeam::channel::{self, Receiver};
use serde_json::Value;
use std::marker::PhantomData;

use crate::client::Client;
use crate::future::Future;
use crate::pool::WorkerPool;
use crate::task::{self, Task};
use crate::{Error, Result};

type Slot = Receiver<Result<Future<Value>>>;

/// Submissions shared by a pipe and every typed view of it.
struct Submissions<'a> {
    client: &'a Client,
    pool: &'a WorkerPool,
    slots: Vec<Slot>,
}

impl<'a> Submissions<'a> {
    fn submit<T: Task>(&mut self, args: T::Args, kwargs: T::Kwargs) {
        let (tx, rx) = channel::bounded(1);
        self.slots.push(rx);

        let (args, kwargs) = match task::encode_arguments::<T>(&args, &kwargs) {
            Ok(encoded) => encoded,
            Err(e) => {
                tx.send(Err(e)).ok();
                return;
            }
        };

        let client = self.client.clone();
        self.pool.execute(move || {
            let submitted = client
                .new_task(T::definition(), args, kwargs)
                .map(|task_id| Future::new(task_id, client.clone()));
            tx.send(submitted).ok();
        });
    }
}

/// Collects concurrent task submissions.
///
/// Each [`TaskPipe::call`] hands the submission round trip to a [`WorkerPool`] and
/// returns immediately. [`TaskPipe::join`] then waits for every task, in the order
/// the calls were made, whatever order they finish in.
///
/// Calls go to `T` unless made through [`TaskPipe::task`], which submits another
/// task type into the same ordered list. A pipe that mixes output types is joined
/// with [`TaskPipe::join_values`].
pub struct TaskPipe<'a, T: Task> {
    submissions: Submissions<'a>,
    _task: PhantomData<fn() -> T>,
}

impl<'a, T: Task> TaskPipe<'a, T> {
    pub fn new(client: &'a Client, pool: &'a WorkerPool) -> Self {
        Self {
            submissions: Submissions {
                client,
                pool,
                slots: Vec::new(),
            },
            _task: PhantomData,
        }
    }

    /// Queue one invocation of `T`.
    pub fn call(&mut self, args: T::Args, kwargs: T::Kwargs) {
        self.submissions.submit::<T>(args, kwargs);
    }

    /// Submit `U` into this pipe. Its results keep their place in call order.
    pub fn task<U: Task>(&mut self) -> TaskCalls<'_, 'a, U> {
        TaskCalls {
            submissions: &mut self.submissions,
            _task: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.submissions.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.slots.is_empty()
    }

    /// Wait for every queued task and return their outputs in call order.
    ///
    /// Stops at the first submission or task failure, returning that error. Every
    /// output is decoded as `T::Output`.
    pub fn join(self) -> Result<Vec<T::Output>> {
        self.join_values()?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .collect()
    }

    /// Like [`TaskPipe::join`], returning each output as undecoded JSON.
    pub fn join_values(self) -> Result<Vec<Value>> {
        let slots = self.submissions.slots;
        let span = tracing::span!(
            tracing::Level::DEBUG,
            "pipe-join",
            definition = T::definition(),
            calls = slots.len()
        );
        let _enter = span.enter();

        let mut outputs = Vec::with_capacity(slots.len());
        for slot in slots {
            let future = slot
                .recv()
                .map_err(|_| Error::WorkerPool("submission was dropped before completing"))??;
            outputs.push(future.wait()?);
        }

        tracing::debug!("Joined {} tasks", outputs.len());
        Ok(outputs)
    }
}

/// Submits `U` into a [`TaskPipe`], keeping the pipe's call order.
pub struct TaskCalls<'p, 'a, U: Task> {
    submissions: &'p mut Submissions<'a>,
    _task: PhantomData<fn() -> U>,
}

impl<'p, 'a, U: Task> TaskCalls<'p, 'a, U> {
    /// Queue one invocation of `U`.
    pub fn call(&mut self, args: U::Args, kwargs: U::Kwargs) -> &mut Self {
        self.submissions.submit::<U>(args, kwargs);
        self
    }
}
