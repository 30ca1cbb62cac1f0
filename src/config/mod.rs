use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};

use crate::error::{OrchestraError, Result};

/// Prefix for environment variables read by [`ConfigService::from_env`].
pub const ENV_PREFIX: &str = "HOSTWEAVE_";

/// Key/value configuration store
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `HOSTWEAVE_*` variable from the process environment.
    ///
    /// Keys are stored without the prefix and lowercased, so
    /// `HOSTWEAVE_EXECUTION_MODE` becomes `execution_mode`.
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let service = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.as_ref().strip_prefix(ENV_PREFIX) {
                service.set(&stripped.to_ascii_lowercase(), value.as_ref());
            }
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                OrchestraError::Configuration(format!("invalid value for {key}: {raw} ({e})"))
            }),
        }
    }

    pub fn get_duration_ms(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.get_parsed::<u64>(key)?.map(Duration::from_millis))
    }
}

/// Whether the application is running resources or only describing them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Run,
    /// Manifest generation only; hooks and process starts are skipped.
    Publish,
}

/// Typed settings for one orchestration run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub execution_mode: ExecutionMode,
    pub event_channel_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Run,
            event_channel_capacity: 256,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let defaults = Self::default();
        let capacity = config
            .get_parsed::<usize>("event_channel_capacity")?
            .unwrap_or(defaults.event_channel_capacity);
        if capacity == 0 {
            return Err(OrchestraError::Configuration(
                "event_channel_capacity must be greater than zero".into(),
            ));
        }

        Ok(Self {
            execution_mode: config
                .get_parsed::<ExecutionMode>("execution_mode")?
                .unwrap_or(defaults.execution_mode),
            event_channel_capacity: capacity,
            shutdown_timeout: config
                .get_duration_ms("shutdown_timeout_ms")?
                .unwrap_or(defaults.shutdown_timeout),
        })
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn is_publish_mode(&self) -> bool {
        self.execution_mode == ExecutionMode::Publish
    }
}
