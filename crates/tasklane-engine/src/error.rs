use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start engine: {0}")]
    Startup(#[from] std::io::Error),

    #[error("Engine stopped")]
    Stopped,

    #[error("Invalid engine option {name}: {value}")]
    InvalidOption { name: &'static str, value: String },

    #[error(transparent)]
    Tasklane(#[from] tasklane::Error),
}

impl From<EngineError> for tasklane::Error {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Tasklane(e) => e,
            other => tasklane::Error::Protocol(other.to_string()),
        }
    }
}
