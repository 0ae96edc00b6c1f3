use serde_json::{Map, Value};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::oneshot;

use tasklane::protocol::Request;
use tasklane::{Config, Connection, Dispatcher, Registry};

use crate::entry::QueueEntry;
use crate::error::EngineError;
use crate::executor::{Command, DedicatedExecutor};

/// Executor threads used when the configuration does not set `thread_count`.
pub const DEFAULT_THREAD_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Tasks executing at the same time.
    pub thread_count: usize,
    /// Log once the engine accepts requests.
    pub ready_signal: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_THREAD_COUNT,
            ready_signal: false,
        }
    }
}

impl EngineOptions {
    pub fn with_thread_count(self, thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
            ..self
        }
    }

    /// Read options from a sparse configuration map, defaulting what is absent.
    pub fn from_canonical_form(map: &Map<String, Value>) -> Result<Self, EngineError> {
        let mut options = Self::default();

        match map.get("thread_count") {
            None | Some(Value::Null) => {}
            Some(value) => {
                options.thread_count = value
                    .as_u64()
                    .filter(|n| *n > 0)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| EngineError::InvalidOption {
                        name: "thread_count",
                        value: value.to_string(),
                    })?;
            }
        }

        match map.get("ready_signal") {
            None | Some(Value::Null) => {}
            Some(Value::Bool(ready_signal)) => options.ready_signal = *ready_signal,
            Some(value) => {
                return Err(EngineError::InvalidOption {
                    name: "ready_signal",
                    value: value.to_string(),
                })
            }
        }

        Ok(options)
    }
}

/// In-process engine speaking the tasklane protocol.
///
/// Submitted tasks run through a [`Dispatcher`] on up to `thread_count` blocking
/// threads of a runtime owned by the engine. Requests block the calling thread until
/// answered, so they must not be made from inside an async runtime.
pub struct LocalEngine {
    executor: DedicatedExecutor,
    options: EngineOptions,
}

impl LocalEngine {
    pub fn start(dispatcher: Dispatcher, options: EngineOptions) -> Result<Self, EngineError> {
        let definitions = dispatcher.registry().definitions().len();
        let executor = DedicatedExecutor::new(dispatcher, options.thread_count)?;

        if options.ready_signal {
            tracing::info!(
                "Engine ready with {} threads and {} task definitions",
                options.thread_count,
                definitions
            );
        }
        Ok(Self { executor, options })
    }

    pub fn from_config(config: &Config, registry: Arc<Registry>) -> Result<Self, EngineError> {
        let options = EngineOptions::from_canonical_form(&config.to_canonical_form())?;
        Self::start(Dispatcher::new(registry), options)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Stop accepting requests and wait for tasks still executing.
    pub fn shutdown(self) -> Result<(), EngineError> {
        self.executor.join()
    }
}

impl Connection for LocalEngine {
    fn request(&self, message: &str) -> tasklane::Result<String> {
        let request = Request::decode(message)?;

        let (tx, rx) = oneshot::channel();
        self.executor
            .tx
            .send(Command::Append(QueueEntry::new(request, tx)))
            .map_err(|_| EngineError::Stopped)?;

        match rx.blocking_recv() {
            Ok(response) => response,
            Err(_) => Err(EngineError::Stopped.into()),
        }
    }
}

impl Debug for LocalEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_thread_count() -> Result<(), EngineError> {
        let options = EngineOptions::from_canonical_form(&Config::new().to_canonical_form())?;
        assert_eq!(options, EngineOptions::default());
        assert_eq!(options.thread_count, 2);
        Ok(())
    }

    #[test]
    fn test_options_read_configuration() -> Result<(), EngineError> {
        let config = Config::new()
            .with_host("localhost")
            .with_thread_count(8)
            .with_ready_signal(true);
        let options = EngineOptions::from_canonical_form(&config.to_canonical_form())?;

        assert_eq!(options.thread_count, 8);
        assert!(options.ready_signal);
        Ok(())
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        let config = Config::new().with_thread_count(0);
        let result = EngineOptions::from_canonical_form(&config.to_canonical_form());
        assert!(matches!(
            result,
            Err(EngineError::InvalidOption {
                name: "thread_count",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_message_type_is_rejected() -> Result<(), EngineError> {
        let engine = LocalEngine::start(Dispatcher::new(Arc::new(Registry::new())), EngineOptions::default())?;

        let message = r#"{"type":"old_task","queue":"default","definition":"Test","args":"[]","kwargs":"{}"}"#;
        match engine.request(message) {
            Err(tasklane::Error::Protocol(m)) => assert!(m.contains("old_task")),
            other => panic!("expected protocol error, got {other:?}"),
        }
        engine.shutdown()
    }
}
