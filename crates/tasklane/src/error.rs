use thiserror::Error;

/// Failure kind reported for a missing or malformed dispatch context.
pub const VALIDATION_KIND: &str = "tasklane::ValidationError";

/// Failure kind reported when no task is registered under a definition.
pub const UNRESOLVED_DEFINITION_KIND: &str = "tasklane::UnresolvedDefinition";

/// Failure kind reported when task code panics instead of returning an error.
pub const PANIC_KIND: &str = "tasklane::Panic";

pub const CONFIGURATION_KIND: &str = "tasklane::ConfigurationError";
pub const PROTOCOL_KIND: &str = "tasklane::ProtocolError";
pub const WORKER_POOL_KIND: &str = "tasklane::WorkerPoolError";

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not configured")]
    Configuration(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unresolved task definition: {0}")]
    UnresolvedDefinition(String),

    /// A remote failure whose kind resolved to a locally registered error type.
    /// `error` holds the reconstructed error and can be downcast to it. It is not
    /// reported as a source since it carries the same message.
    #[error("{message}")]
    Task {
        kind: String,
        message: String,
        error: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A remote failure whose kind is not known on this side.
    #[error("{kind}: {message}")]
    RemoteTask {
        kind: String,
        message: String,
        trace: Vec<String>,
    },

    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(&'static str),
}

impl Error {
    /// The kind under which this error travels inside a failure envelope.
    pub fn kind(&self) -> &str {
        match self {
            Error::Configuration(_) => CONFIGURATION_KIND,
            Error::Protocol(_) => PROTOCOL_KIND,
            Error::Validation(_) => VALIDATION_KIND,
            Error::UnresolvedDefinition(_) => UNRESOLVED_DEFINITION_KIND,
            Error::Task { kind, .. } | Error::RemoteTask { kind, .. } => kind,
            Error::Serde(_) => std::any::type_name::<serde_json::Error>(),
            Error::WorkerPool(_) => WORKER_POOL_KIND,
        }
    }

    /// The message carried in a failure envelope, without the display prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Protocol(m) | Error::Validation(m) | Error::UnresolvedDefinition(m) => {
                m.clone()
            }
            Error::Configuration(name) => format!("{name} not configured"),
            Error::Task { message, .. } | Error::RemoteTask { message, .. } => message.clone(),
            Error::Serde(e) => e.to_string(),
            Error::WorkerPool(m) => (*m).to_owned(),
        }
    }

    /// Rebuild one of the crate's own errors from a failure envelope.
    ///
    /// Returns `None` for kinds outside the tasklane taxonomy.
    pub(crate) fn from_taxonomy(kind: &str, message: &str) -> Option<Self> {
        match kind {
            VALIDATION_KIND => Some(Error::Validation(message.to_owned())),
            UNRESOLVED_DEFINITION_KIND => Some(Error::UnresolvedDefinition(message.to_owned())),
            PROTOCOL_KIND => Some(Error::Protocol(message.to_owned())),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
