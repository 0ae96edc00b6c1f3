//! In-process engine for tasklane.
//!
//! [`LocalEngine`] implements [`tasklane::Connection`] by executing submitted tasks
//! through a [`tasklane::Dispatcher`] on a dedicated runtime, keeping their status
//! and results in memory.

pub mod engine;
mod entry;
pub mod error;
mod executor;

pub use engine::{EngineOptions, LocalEngine, DEFAULT_THREAD_COUNT};
pub use error::EngineError;
