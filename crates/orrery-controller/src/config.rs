//! Configuration for orrery-controller.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControllerError, ControllerResult};

/// Top-level configuration for the controller.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControllerConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Work queue and retry configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Local cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Change notification configuration.
    #[serde(default)]
    pub events: EventsConfig,
}

impl ControllerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `controller.toml` in the current directory (if present)
    /// 3. Environment variables with `ORRERY_` prefix
    pub fn load() -> ControllerResult<Self> {
        Figment::new()
            .merge(Toml::file("controller.toml"))
            .merge(Env::prefixed("ORRERY_").split("__"))
            .extract()
            .map_err(|e| ControllerError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControllerResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ORRERY_").split("__"))
            .extract()
            .map_err(|e| ControllerError::Config(e.to_string()))
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers syncing workloads in parallel.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

const fn default_worker_count() -> usize {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

/// Work queue and retry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Delay before the first retry, doubled on every further failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Failed syncs tolerated before a key is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_base_delay_ms() -> u64 {
    5
}

const fn default_max_delay_secs() -> u64 {
    1000
}

const fn default_max_retries() -> u32 {
    15
}

impl QueueConfig {
    /// Delay before the first retry.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound on the retry delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Local cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How long to wait for the initial cache sync before giving up.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

const fn default_sync_timeout_secs() -> u64 {
    30
}

impl CacheConfig {
    /// Initial sync timeout.
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: default_sync_timeout_secs(),
        }
    }
}

/// Change notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Capacity of each change notification channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_channel_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}
