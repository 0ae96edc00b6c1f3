use serde::de::{Deserialize, DeserializeOwned, Deserializer, Error as DeError, IgnoredAny};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::client::Client;
use crate::future::Future;
use crate::pipe::TaskPipe;
use crate::pool::WorkerPool;
use crate::{Error, Result};

/// A unit of work that can be submitted to the engine and dispatched back here.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tasklane::Task;
///
/// #[derive(Default)]
/// struct SayHello;
///
/// #[derive(Serialize, Deserialize)]
/// struct Message {
///     message: String,
/// }
///
/// impl Task for SayHello {
///     type Args = (String,);
///     type Kwargs = Message;
///     type Output = String;
///     type Error = std::convert::Infallible;
///
///     fn call(&mut self, (name,): (String,), kwargs: Message) -> Result<String, Self::Error> {
///         Ok(format!("Hello, {name}! {}", kwargs.message))
///     }
/// }
/// ```
pub trait Task: Default + Send + 'static {
    /// Positional arguments. Must encode to a JSON array, a tuple usually does.
    type Args: Serialize + DeserializeOwned + Send + 'static;

    /// Named arguments. Must encode to a JSON object; field names are the argument names.
    type Kwargs: Serialize + DeserializeOwned + Send + 'static;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Its type name is the failure kind reported when `call` fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name the task is registered and submitted under.
    fn definition() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn call(
        &mut self,
        args: Self::Args,
        kwargs: Self::Kwargs,
    ) -> std::result::Result<Self::Output, Self::Error>;
}

/// Submission side of every [`Task`].
pub trait TaskExt: Task {
    /// Submit one invocation and return a handle to its eventual outcome.
    fn submit(client: &Client, args: Self::Args, kwargs: Self::Kwargs) -> Result<Future<Self::Output>> {
        let (args, kwargs) = encode_arguments::<Self>(&args, &kwargs)?;
        let task_id = client.new_task(Self::definition(), args, kwargs)?;
        Ok(Future::new(task_id, client.clone()))
    }

    /// Submit a batch of invocations concurrently and collect their outputs in
    /// the order they were added to the pipe.
    fn pipe<F>(client: &Client, build: F) -> Result<Vec<Self::Output>>
    where
        F: FnOnce(&mut TaskPipe<'_, Self>),
    {
        Self::pipe_on(client, WorkerPool::global(), build)
    }

    /// Like [`TaskExt::pipe`], submitting on `pool` instead of the global pool.
    fn pipe_on<F>(client: &Client, pool: &WorkerPool, build: F) -> Result<Vec<Self::Output>>
    where
        F: FnOnce(&mut TaskPipe<'_, Self>),
    {
        let mut pipe = TaskPipe::new(client, pool);
        build(&mut pipe);
        pipe.join()
    }

    /// Like [`TaskExt::pipe`], returning undecoded outputs. Use it when the pipe
    /// also submits other task types through [`TaskPipe::task`].
    fn pipe_values<F>(client: &Client, build: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut TaskPipe<'_, Self>),
    {
        Self::pipe_values_on(client, WorkerPool::global(), build)
    }

    fn pipe_values_on<F>(client: &Client, pool: &WorkerPool, build: F) -> Result<Vec<Value>>
    where
        F: FnOnce(&mut TaskPipe<'_, Self>),
    {
        let mut pipe = TaskPipe::new(client, pool);
        build(&mut pipe);
        pipe.join_values()
    }
}

impl<T> TaskExt for T where T: Task {}

/// Encode arguments into the JSON text carried by a submission.
pub(crate) fn encode_arguments<T>(args: &T::Args, kwargs: &T::Kwargs) -> Result<(String, String)>
where
    T: Task,
{
    let args = serde_json::to_value(args)?;
    if !args.is_array() {
        return Err(Error::Validation(format!(
            "positional arguments of {} must encode to a JSON array",
            T::definition()
        )));
    }

    let kwargs = serde_json::to_value(kwargs)?;
    if !kwargs.is_object() {
        return Err(Error::Validation(format!(
            "keyword arguments of {} must encode to a JSON object",
            T::definition()
        )));
    }

    Ok((args.to_string(), kwargs.to_string()))
}

/// Positional arguments of a task that takes none. Encodes as `[]`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoArgs;

/// Keyword arguments of a task that takes none. Encodes as `{}`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoKwargs;

impl Serialize for NoArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_seq(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for NoArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let extra = Vec::<IgnoredAny>::deserialize(deserializer)?;
        if extra.is_empty() {
            Ok(NoArgs)
        } else {
            Err(D::Error::invalid_length(extra.len(), &"no positional arguments"))
        }
    }
}

impl Serialize for NoKwargs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for NoKwargs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let extra = HashMap::<String, IgnoredAny>::deserialize(deserializer)?;
        if extra.is_empty() {
            Ok(NoKwargs)
        } else {
            Err(D::Error::invalid_length(extra.len(), &"no keyword arguments"))
        }
    }
}

/// Untyped positional arguments.
pub type RawArgs = Vec<Value>;

/// Untyped keyword arguments.
pub type RawKwargs = serde_json::Map<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskId;
    use crate::testing::ScriptedConnection;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Arc;

    #[derive(Default)]
    struct SayHello;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Message {
        message: String,
    }

    impl Task for SayHello {
        type Args = (String,);
        type Kwargs = Message;
        type Output = String;
        type Error = Infallible;

        fn call(&mut self, (name,): (String,), kwargs: Message) -> std::result::Result<String, Infallible> {
            Ok(format!("Hello, {}! {}", name, kwargs.message))
        }
    }

    #[derive(Default)]
    struct Nullary;

    impl Task for Nullary {
        type Args = NoArgs;
        type Kwargs = NoKwargs;
        type Output = i64;
        type Error = Infallible;

        fn definition() -> &'static str {
            "Nullary"
        }

        fn call(&mut self, _: NoArgs, _: NoKwargs) -> std::result::Result<i64, Infallible> {
            Ok(6)
        }
    }

    #[derive(Default)]
    struct BadArgs;

    impl Task for BadArgs {
        type Args = String;
        type Kwargs = NoKwargs;
        type Output = ();
        type Error = Infallible;

        fn call(&mut self, _: String, _: NoKwargs) -> std::result::Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn test_definition_defaults_to_type_name() {
        assert!(SayHello::definition().ends_with("task::tests::SayHello"));
        assert_eq!(Nullary::definition(), "Nullary");
    }

    #[test]
    fn test_submit_sends_new_task() -> Result<()> {
        let connection = Arc::new(ScriptedConnection::new(|_| Ok("\"task_id\"".into())));
        let client = Client::from_shared(connection.clone());

        let future = SayHello::submit(
            &client,
            ("John".into(),),
            Message {
                message: "How are you?".into(),
            },
        )?;
        assert_eq!(future.task_id(), &TaskId::new("task_id"));

        let sent: Value = serde_json::from_str(&connection.messages()[0])?;
        assert_eq!(sent["definition"], SayHello::definition());
        assert_eq!(sent["args"], "[\"John\"]");
        assert_eq!(sent["kwargs"], "{\"message\":\"How are you?\"}");
        Ok(())
    }

    #[test]
    fn test_submit_without_arguments_encodes_empty_collections() -> Result<()> {
        let connection = Arc::new(ScriptedConnection::new(|_| Ok("\"task_id\"".into())));
        let client = Client::from_shared(connection.clone());

        Nullary::submit(&client, NoArgs, NoKwargs)?;

        let sent: Value = serde_json::from_str(&connection.messages()[0])?;
        assert_eq!(sent["args"], "[]");
        assert_eq!(sent["kwargs"], "{}");
        Ok(())
    }

    #[test]
    fn test_non_array_arguments_are_rejected_before_sending() {
        let connection = Arc::new(ScriptedConnection::new(|_| Ok("\"task_id\"".into())));
        let client = Client::from_shared(connection.clone());

        let err = BadArgs::submit(&client, "oops".into(), NoKwargs).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(connection.messages().is_empty());
    }

    #[test]
    fn test_empty_argument_types() -> Result<()> {
        assert_eq!(serde_json::to_string(&NoArgs)?, "[]");
        assert_eq!(serde_json::to_string(&NoKwargs)?, "{}");

        assert_eq!(NoArgs::deserialize(json!([]))?, NoArgs);
        assert_eq!(NoKwargs::deserialize(json!({}))?, NoKwargs);

        assert!(NoArgs::deserialize(json!([1])).is_err());
        assert!(NoKwargs::deserialize(json!({"c": 3})).is_err());
        Ok(())
    }
}
