use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{PoisonError, RwLock};

use crate::{Error, Result};

/// Connection target and local execution parameters.
///
/// Every field is optional. Unset fields are left out of the canonical form so the
/// connection or engine consuming it can apply its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Host of the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port of the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Number of threads the engine should execute tasks on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<usize>,

    /// Whether the engine should signal its parent process once it accepts requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_signal: Option<bool>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host<H: Into<String>>(self, host: H) -> Self {
        Self {
            host: Some(host.into()),
            ..self
        }
    }

    pub fn with_port(self, port: u16) -> Self {
        Self {
            port: Some(port),
            ..self
        }
    }

    pub fn with_thread_count(self, thread_count: usize) -> Self {
        Self {
            thread_count: Some(thread_count),
            ..self
        }
    }

    pub fn with_ready_signal(self, ready_signal: bool) -> Self {
        Self {
            ready_signal: Some(ready_signal),
            ..self
        }
    }

    /// Sparse map holding only the fields that were set.
    pub fn to_canonical_form(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(host) = &self.host {
            map.insert("host".into(), Value::from(host.as_str()));
        }
        if let Some(port) = self.port {
            map.insert("port".into(), Value::from(port));
        }
        if let Some(thread_count) = self.thread_count {
            map.insert("thread_count".into(), Value::from(thread_count));
        }
        if let Some(ready_signal) = self.ready_signal {
            map.insert("ready_signal".into(), Value::from(ready_signal));
        }
        map
    }

    pub fn from_canonical_form(map: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// Holds at most one [`Config`], set through [`ConfigStore::configure`].
///
/// Reading before anything was configured is a usage error and yields
/// [`Error::Configuration`].
#[derive(Debug)]
pub struct ConfigStore {
    name: &'static str,
    slot: RwLock<Option<Config>>,
}

impl ConfigStore {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(None),
        }
    }

    /// Replace any stored configuration with a fresh one, updated by `update`.
    pub fn configure<F>(&self, update: F) -> Config
    where
        F: FnOnce(&mut Config),
    {
        let mut config = Config::new();
        update(&mut config);

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(config.clone());
        tracing::debug!("{} configured: {:?}", self.name, config);
        config
    }

    pub fn config(&self) -> Result<Config> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Configuration(self.name))
    }

    pub fn is_configured(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn reset(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        tracing::debug!("{} configuration reset", self.name);
    }
}
