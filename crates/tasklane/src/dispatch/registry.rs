//! Definition-to-task lookup.
//!
//! Tasks are resolved by name at dispatch time, so every task the engine may
//! invoke has to be registered up front. The same registry also knows which
//! failure kinds can be rebuilt as local error types when a future is awaited.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::protocol::TaskResult;
use crate::task::Task;
use crate::{utils, Error};

/// Type-erased runner: decodes the JSON arguments, calls a fresh task instance and
/// normalises its outcome.
pub(crate) type TaskRunner = Box<dyn Fn(&str, &str) -> TaskResult + Send + Sync>;

type ErrorBuilder = Box<dyn Fn(String) -> Box<dyn std::error::Error + Send + Sync> + Send + Sync>;

/// An error type that can be rebuilt from the message of a remote failure.
pub trait RemoteError: std::error::Error + Send + Sync + Sized + 'static {
    /// Failure kind this type is reported under. Matches what the dispatcher
    /// writes when a task returns this error.
    fn kind() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn from_message(message: String) -> Self;
}

#[derive(Default)]
pub struct Registry {
    tasks: HashMap<String, TaskRunner>,
    errors: HashMap<String, ErrorBuilder>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under [`Task::definition`], building instances with `Default`.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Task,
    {
        self.register_with::<T, _>(T::default)
    }

    /// Register `T`, building a fresh instance with `factory` for every call.
    pub fn register_with<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Task,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let definition = T::definition();
        let runner: TaskRunner = Box::new(move |args: &str, kwargs: &str| run_task(&factory, args, kwargs));

        if self.tasks.insert(definition.to_owned(), runner).is_some() {
            tracing::warn!("Task {} registered twice, keeping the latest", definition);
        }
        tracing::info!("Registered task: {}", definition);
        self
    }

    /// Allow failures of kind [`RemoteError::kind`] to be rebuilt as `E` when awaited.
    pub fn register_error<E>(&mut self) -> &mut Self
    where
        E: RemoteError,
    {
        let builder: ErrorBuilder = Box::new(|message: String| {
            Box::new(E::from_message(message)) as Box<dyn std::error::Error + Send + Sync>
        });
        self.errors.insert(E::kind().to_owned(), builder);
        tracing::debug!("Registered error kind: {}", E::kind());
        self
    }

    pub fn contains(&self, definition: &str) -> bool {
        self.tasks.contains_key(definition)
    }

    /// Registered definitions, sorted.
    pub fn definitions(&self) -> Vec<&str> {
        let mut definitions: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        definitions.sort_unstable();
        definitions
    }

    pub fn resolves_error(&self, kind: &str) -> bool {
        self.errors.contains_key(kind)
    }

    pub(crate) fn runner(&self, definition: &str) -> Option<&TaskRunner> {
        self.tasks.get(definition)
    }

    /// Turn the fields of a failure envelope back into an [`Error`].
    ///
    /// Kinds from the tasklane taxonomy come back as their own variants, registered
    /// kinds as [`Error::Task`] with the rebuilt error attached, anything else as
    /// [`Error::RemoteTask`] carrying all three fields verbatim.
    pub fn reconstruct(&self, kind: &str, message: &str, trace: &[String]) -> Error {
        if let Some(error) = Error::from_taxonomy(kind, message) {
            return error;
        }

        match self.errors.get(kind) {
            Some(build) => Error::Task {
                kind: kind.to_owned(),
                message: message.to_owned(),
                error: build(message.to_owned()),
            },
            None => Error::RemoteTask {
                kind: kind.to_owned(),
                message: message.to_owned(),
                trace: trace.to_vec(),
            },
        }
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut errors: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        errors.sort_unstable();

        f.debug_struct("Registry")
            .field("tasks", &self.definitions())
            .field("errors", &errors)
            .finish()
    }
}

fn run_task<T, F>(factory: &F, args: &str, kwargs: &str) -> TaskResult
where
    T: Task,
    F: Fn() -> T,
{
    let decoded = serde_json::from_str::<T::Args>(args).and_then(|args| {
        let kwargs = serde_json::from_str::<T::Kwargs>(kwargs)?;
        Ok((args, kwargs))
    });
    let (args, kwargs) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => return TaskResult::from(&Error::from(e)),
    };

    let mut task = factory();
    match task.call(args, kwargs) {
        Ok(output) => match serde_json::to_value(output) {
            Ok(value) => TaskResult::success(value),
            Err(e) => TaskResult::from(&Error::from(e)),
        },
        Err(e) => TaskResult::failure(
            std::any::type_name::<T::Error>(),
            e.to_string(),
            utils::error_trace(&e),
        ),
    }
}
