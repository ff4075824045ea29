use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pulse_breaker::BreakerConfig;
use pulse_core::{env_parse, ConfigError};
use pulse_scheduler::SchedulerConfig;

use crate::error::GovernorConfigError;

/// Synthetic traffic shape for the soak binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoakConfig {
    /// Writes submitted to the breaker per second.
    #[serde(default = "default_writes_per_sec")]
    pub writes_per_sec: u32,
    /// Location/sensor samples handed to the scheduler per second.
    #[serde(default = "default_analyses_per_sec")]
    pub analyses_per_sec: u32,
    /// Simulated store latency per write.
    #[serde(default = "default_write_latency_ms")]
    pub write_latency_ms: u64,
    /// Every Nth store write fails. 0 means the store never fails.
    #[serde(default = "default_fail_every")]
    pub fail_every: u64,
}

fn default_writes_per_sec() -> u32 { 4 }
fn default_analyses_per_sec() -> u32 { 2 }
fn default_write_latency_ms() -> u64 { 40 }
fn default_fail_every() -> u64 { 7 }

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            writes_per_sec: default_writes_per_sec(),
            analyses_per_sec: default_analyses_per_sec(),
            write_latency_ms: default_write_latency_ms(),
            fail_every: default_fail_every(),
        }
    }
}

impl SoakConfig {
    pub fn write_latency(&self) -> Duration {
        Duration::from_millis(self.write_latency_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writes_per_sec == 0 {
            return Err(ConfigError::Zero { field: "soak.writes_per_sec" });
        }
        if self.analyses_per_sec == 0 {
            return Err(ConfigError::Zero { field: "soak.analyses_per_sec" });
        }
        if self.writes_per_sec > 1_000 || self.analyses_per_sec > 1_000 {
            return Err(ConfigError::OutOfRange {
                field: "soak",
                reason: "rates above 1000/s are not supported".into(),
            });
        }
        Ok(())
    }

    /// `PULSE_SOAK_<FIELD>` overrides `soak.<field>`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("PULSE_SOAK_WRITES_PER_SEC") {
            self.writes_per_sec = v;
        }
        if let Some(v) = env_parse("PULSE_SOAK_ANALYSES_PER_SEC") {
            self.analyses_per_sec = v;
        }
        if let Some(v) = env_parse("PULSE_SOAK_WRITE_LATENCY_MS") {
            self.write_latency_ms = v;
        }
        if let Some(v) = env_parse("PULSE_SOAK_FAIL_EVERY") {
            self.fail_every = v;
        }
    }
}

/// Top-level config file. Every section is optional.
///
/// ```toml
/// [breaker]
/// failure_threshold = 5
/// max_concurrent_writes = 8
///
/// [scheduler]
/// batch_size = 10
///
/// [soak]
/// writes_per_sec = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub soak: SoakConfig,
}

impl GovernorConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, GovernorConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GovernorConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with env overrides applied, for running without a file.
    pub fn from_env() -> Result<Self, GovernorConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.breaker.apply_env_overrides();
        self.scheduler.apply_env_overrides();
        self.soak.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate()?;
        self.scheduler.validate()?;
        self.soak.validate()
    }
}
