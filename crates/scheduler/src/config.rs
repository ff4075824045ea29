use std::time::Duration;

use serde::{Deserialize, Serialize};

use pulse_core::{env_parse, ConfigError};

/// Scheduler configuration, typically parsed from the `[scheduler]` TOML section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Base batch size before load adaptation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Tick period in milliseconds.
    #[serde(default = "default_processing_interval_ms")]
    pub processing_interval_ms: u64,
    /// Failed attempts after which a task is dropped.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// Every Nth cycle fills the batch with high-priority tasks first.
    #[serde(default = "default_high_priority_threshold")]
    pub high_priority_threshold: u64,
    /// Load above which the batch is halved.
    #[serde(default = "default_high_load")]
    pub high_load: f64,
    /// Load below which the batch grows by half.
    #[serde(default = "default_low_load")]
    pub low_load: f64,
    /// Per-task handler timeout. 0 disables the timeout.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Recent task outcomes kept for debugging.
    #[serde(default = "default_recent_outcomes")]
    pub recent_outcomes: usize,
}

fn default_batch_size() -> usize { 10 }
fn default_processing_interval_ms() -> u64 { 5_000 }
fn default_max_retry_count() -> u32 { 3 }
fn default_high_priority_threshold() -> u64 { 3 }
fn default_high_load() -> f64 { 0.8 }
fn default_low_load() -> f64 { 0.3 }
fn default_task_timeout_ms() -> u64 { 30_000 }
fn default_recent_outcomes() -> usize { 50 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            processing_interval_ms: default_processing_interval_ms(),
            max_retry_count: default_max_retry_count(),
            high_priority_threshold: default_high_priority_threshold(),
            high_load: default_high_load(),
            low_load: default_low_load(),
            task_timeout_ms: default_task_timeout_ms(),
            recent_outcomes: default_recent_outcomes(),
        }
    }
}

impl SchedulerConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_ms > 0).then(|| Duration::from_millis(self.task_timeout_ms))
    }

    /// Batch size for the next tick given the last measured load.
    pub fn adaptive_batch_size(&self, system_load: f64) -> usize {
        let base = self.batch_size;
        if system_load > self.high_load {
            (base / 2).max(1)
        } else if system_load < self.low_load {
            (base as f64 * 1.5).floor() as usize
        } else {
            base
        }
    }

    /// Whether `cycle` (1-based) is a priority-boost cycle.
    pub fn is_priority_cycle(&self, cycle: u64) -> bool {
        self.high_priority_threshold > 0 && cycle % self.high_priority_threshold == 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero: [(&'static str, u64); 5] = [
            ("scheduler.batch_size", self.batch_size as u64),
            ("scheduler.processing_interval_ms", self.processing_interval_ms),
            ("scheduler.max_retry_count", u64::from(self.max_retry_count)),
            ("scheduler.high_priority_threshold", self.high_priority_threshold),
            ("scheduler.recent_outcomes", self.recent_outcomes as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        for (field, value) in [("scheduler.high_load", self.high_load), ("scheduler.low_load", self.low_load)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: format!("expected a load between 0 and 1, got {value}"),
                });
            }
        }
        if self.low_load >= self.high_load {
            return Err(ConfigError::OutOfRange {
                field: "scheduler.low_load",
                reason: format!("must be below high_load ({})", self.high_load),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `PULSE_SCHEDULER_<FIELD>` overrides `scheduler.<field>`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("PULSE_SCHEDULER_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_PROCESSING_INTERVAL_MS") {
            self.processing_interval_ms = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_MAX_RETRY_COUNT") {
            self.max_retry_count = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_HIGH_PRIORITY_THRESHOLD") {
            self.high_priority_threshold = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_TASK_TIMEOUT_MS") {
            self.task_timeout_ms = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_HIGH_LOAD") {
            self.high_load = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_LOW_LOAD") {
            self.low_load = v;
        }
        if let Some(v) = env_parse("PULSE_SCHEDULER_RECENT_OUTCOMES") {
            self.recent_outcomes = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.processing_interval(), Duration::from_secs(5));
        assert_eq!(config.max_retry_count, 3);
        assert_eq!(config.high_priority_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn batch_size_adapts_to_load() {
        let config = SchedulerConfig::default();
        assert_eq!(config.adaptive_batch_size(0.9), 5);
        assert_eq!(config.adaptive_batch_size(0.8), 10);
        assert_eq!(config.adaptive_batch_size(0.5), 10);
        assert_eq!(config.adaptive_batch_size(0.3), 10);
        assert_eq!(config.adaptive_batch_size(0.1), 15);
    }

    #[test]
    fn halved_batch_never_reaches_zero() {
        let config = SchedulerConfig {
            batch_size: 1,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.adaptive_batch_size(1.0), 1);
    }

    #[test]
    fn every_third_cycle_is_priority_cycle() {
        let config = SchedulerConfig::default();
        let boosted: Vec<u64> = (1..=9).filter(|c| config.is_priority_cycle(*c)).collect();
        assert_eq!(boosted, vec![3, 6, 9]);
    }

    #[test]
    fn validate_rejects_inverted_load_band() {
        let config = SchedulerConfig {
            low_load: 0.9,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "scheduler.low_load", .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let config = SchedulerConfig {
            high_priority_threshold: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { field: "scheduler.high_priority_threshold" })
        );
    }

    #[test]
    fn env_overrides_apply() {
        let overrides = [
            ("PULSE_SCHEDULER_BATCH_SIZE", "4"),
            ("PULSE_SCHEDULER_HIGH_LOAD", "0.9"),
            ("PULSE_SCHEDULER_LOW_LOAD", "0.2"),
            ("PULSE_SCHEDULER_RECENT_OUTCOMES", "12"),
        ];
        for (key, value) in overrides {
            std::env::set_var(key, value);
        }
        let mut config = SchedulerConfig::default();
        config.apply_env_overrides();
        for (key, _) in overrides {
            std::env::remove_var(key);
        }

        assert_eq!(config.batch_size, 4);
        assert_eq!(config.high_load, 0.9);
        assert_eq!(config.low_load, 0.2);
        assert_eq!(config.recent_outcomes, 12);
        assert!(config.validate().is_ok());
    }
}
