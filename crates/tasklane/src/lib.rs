#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod pipe;
pub mod pool;
pub mod protocol;
pub mod task;

mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use config::{Config, ConfigStore};
pub use connection::Connection;
pub use dispatch::{Dispatcher, Registry, RemoteError};
pub use error::{Error, Result};
pub use future::Future;
pub use pipe::{TaskCalls, TaskPipe};
pub use pool::{PoolLimits, WorkerPool};
pub use protocol::{StoreState, StoredTask, StoredTaskStatus, TaskId, TaskResult};
pub use task::{NoArgs, NoKwargs, RawArgs, RawKwargs, Task, TaskExt};

static CONFIG: ConfigStore = ConfigStore::new("tasklane");

/// Replace the process-wide configuration.
pub fn configure<F>(update: F) -> Config
where
    F: FnOnce(&mut Config),
{
    CONFIG.configure(update)
}

/// The process-wide configuration, or [`Error::Configuration`] if none was set.
pub fn config() -> Result<Config> {
    CONFIG.config()
}

pub fn reset_config() {
    CONFIG.reset()
}
