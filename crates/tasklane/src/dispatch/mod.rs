//! Executes engine-invoked tasks and normalises their outcome.
//!
//! Whatever the task does, the dispatcher answers with a [`TaskResult`]: missing
//! context fields, unknown definitions, task errors and panics all become
//! `Failure` envelopes.

mod registry;

pub use registry::{Registry, RemoteError};

use serde_json::Value;
use std::sync::Arc;

use crate::error::PANIC_KIND;
use crate::protocol::TaskResult;
use crate::{utils, Error, Result};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run the task registered under `definition` with JSON-encoded arguments.
    pub fn execute(&self, definition: &str, args: &str, kwargs: &str) -> TaskResult {
        let span = tracing::span!(tracing::Level::DEBUG, "dispatch", definition);
        let _enter = span.enter();

        let Some(runner) = self.registry.runner(definition) else {
            tracing::warn!("No task registered as {}", definition);
            return TaskResult::from(&Error::UnresolvedDefinition(definition.to_owned()));
        };

        match utils::catch_panic(|| runner(args, kwargs)) {
            Ok(result) => {
                tracing::trace!("Task {} finished, success: {}", definition, result.is_success());
                result
            }
            Err((message, trace)) => {
                tracing::error!("Task {} panicked: {}", definition, message);
                TaskResult::failure(PANIC_KIND, message, trace)
            }
        }
    }

    /// Validate a dispatch context and execute it.
    ///
    /// The context must hold `definition`, `args` and `kwargs` as strings, the latter
    /// two being JSON text.
    pub fn dispatch(&self, context: &Value) -> TaskResult {
        match validate(context) {
            Ok((definition, args, kwargs)) => self.execute(definition, args, kwargs),
            Err(e) => {
                tracing::debug!("Rejected dispatch context: {}", e);
                TaskResult::from(&e)
            }
        }
    }

    /// Text-in, text-out form of [`Dispatcher::dispatch`].
    pub fn dispatch_json(&self, context: &str) -> String {
        let result = match serde_json::from_str::<Value>(context) {
            Ok(context) => self.dispatch(&context),
            Err(e) => TaskResult::from(&Error::Validation(format!("Malformed task context: {e}"))),
        };
        result.encode()
    }
}

fn validate(context: &Value) -> Result<(&str, &str, &str)> {
    Ok((
        required_str(context, "definition")?,
        required_str(context, "args")?,
        required_str(context, "kwargs")?,
    ))
}

fn required_str<'a>(context: &'a Value, key: &str) -> Result<&'a str> {
    match context.get(key) {
        None | Some(Value::Null) => Err(Error::Validation(format!("Missing task {key}"))),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(Error::Validation(format!("Task {key} must be a string"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UNRESOLVED_DEFINITION_KIND, VALIDATION_KIND};
    use crate::task::{NoArgs, NoKwargs, Task};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::convert::Infallible;
    use std::fmt::{Display, Formatter};

    #[derive(Default)]
    struct TestTask;

    impl Task for TestTask {
        type Args = NoArgs;
        type Kwargs = NoKwargs;
        type Output = i64;
        type Error = Infallible;

        fn definition() -> &'static str {
            "TestTask"
        }

        fn call(&mut self, _: NoArgs, _: NoKwargs) -> std::result::Result<i64, Infallible> {
            Ok(6)
        }
    }

    #[derive(Default)]
    struct Sum;

    #[derive(Serialize, Deserialize)]
    struct SumKwargs {
        c: i64,
    }

    impl Task for Sum {
        type Args = (i64, i64);
        type Kwargs = SumKwargs;
        type Output = i64;
        type Error = Infallible;

        fn definition() -> &'static str {
            "Sum"
        }

        fn call(&mut self, (a, b): (i64, i64), kwargs: SumKwargs) -> std::result::Result<i64, Infallible> {
            Ok(a + b + kwargs.c)
        }
    }

    #[derive(Debug)]
    struct TaskError(String);

    impl Display for TaskError {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for TaskError {}

    #[derive(Default)]
    struct Failing;

    impl Task for Failing {
        type Args = NoArgs;
        type Kwargs = NoKwargs;
        type Output = ();
        type Error = TaskError;

        fn definition() -> &'static str {
            "Failing"
        }

        fn call(&mut self, _: NoArgs, _: NoKwargs) -> std::result::Result<(), TaskError> {
            Err(TaskError("error message".into()))
        }
    }

    #[derive(Default)]
    struct Panicking;

    impl Task for Panicking {
        type Args = NoArgs;
        type Kwargs = NoKwargs;
        type Output = ();
        type Error = Infallible;

        fn definition() -> &'static str {
            "Panicking"
        }

        fn call(&mut self, _: NoArgs, _: NoKwargs) -> std::result::Result<(), Infallible> {
            panic!("task blew up")
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = Registry::new();
        registry
            .register::<TestTask>()
            .register::<Sum>()
            .register::<Failing>()
            .register::<Panicking>();
        Dispatcher::new(Arc::new(registry))
    }

    fn failure_class(result: &TaskResult) -> &str {
        match result {
            TaskResult::Failure { class, .. } => class,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_calls_registered_task() -> Result<()> {
        let context = json!({ "definition": "TestTask", "args": "[]", "kwargs": "{}" }).to_string();
        let result: Value = serde_json::from_str(&dispatcher().dispatch_json(&context))?;

        assert_eq!(result, json!({ "type": "success", "result": 6 }));
        Ok(())
    }

    #[test]
    fn test_passes_positional_and_named_arguments() {
        let result = dispatcher().execute("Sum", "[1,2]", r#"{"c":3}"#);
        assert_eq!(result, TaskResult::success(json!(6)));
    }

    #[test]
    fn test_task_error_becomes_failure() {
        let result = dispatcher().execute("Failing", "[]", "{}");
        assert_eq!(
            result,
            TaskResult::failure(std::any::type_name::<TaskError>(), "error message", vec![])
        );
    }

    #[test]
    fn test_panic_becomes_failure() {
        match dispatcher().execute("Panicking", "[]", "{}") {
            TaskResult::Failure {
                class,
                message,
                backtrace,
            } => {
                assert_eq!(class, PANIC_KIND);
                assert_eq!(message, "task blew up");
                assert!(!backtrace.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_definition_becomes_failure() {
        let result = dispatcher().execute("NoSuchTask", "[]", "{}");
        assert_eq!(failure_class(&result), UNRESOLVED_DEFINITION_KIND);
    }

    #[test]
    fn test_missing_fields_become_validation_failures() {
        let dispatcher = dispatcher();

        let result = dispatcher.dispatch(&json!({ "definition": "TestTask", "kwargs": "{}" }));
        assert_eq!(
            result,
            TaskResult::failure(VALIDATION_KIND, "Missing task args", vec![])
        );

        let result = dispatcher.dispatch(&json!({ "definition": null, "args": "[]", "kwargs": "{}" }));
        assert_eq!(
            result,
            TaskResult::failure(VALIDATION_KIND, "Missing task definition", vec![])
        );

        let result = dispatcher.dispatch(&json!({ "definition": "TestTask", "args": [], "kwargs": "{}" }));
        assert_eq!(
            result,
            TaskResult::failure(VALIDATION_KIND, "Task args must be a string", vec![])
        );

        let result = dispatcher.dispatch(&json!({ "definition": "TestTask", "args": "[]" }));
        assert_eq!(
            result,
            TaskResult::failure(VALIDATION_KIND, "Missing task kwargs", vec![])
        );
    }

    #[test]
    fn test_malformed_arguments_become_failure() {
        let result = dispatcher().execute("Sum", "[1,", "{}");
        assert_eq!(failure_class(&result), std::any::type_name::<serde_json::Error>());
    }

    #[test]
    fn test_malformed_context_becomes_failure() -> Result<()> {
        let result = TaskResult::decode(&dispatcher().dispatch_json("{not json"))?;
        assert_eq!(failure_class(&result), VALIDATION_KIND);
        Ok(())
    }
}
