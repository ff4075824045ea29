use std::time::Duration;

use serde::{Deserialize, Serialize};

use pulse_core::{env_parse, ConfigError, Priority};

/// Scheduling weight and retry budget for one priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    pub weight: u32,
    pub max_retries: u32,
}

/// Per-class policies. Defaults: high {3, 3}, medium {2, 2}, low {1, 1}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicies {
    #[serde(default = "default_high_policy")]
    pub high: PriorityPolicy,
    #[serde(default = "default_medium_policy")]
    pub medium: PriorityPolicy,
    #[serde(default = "default_low_policy")]
    pub low: PriorityPolicy,
}

fn default_high_policy() -> PriorityPolicy { PriorityPolicy { weight: 3, max_retries: 3 } }
fn default_medium_policy() -> PriorityPolicy { PriorityPolicy { weight: 2, max_retries: 2 } }
fn default_low_policy() -> PriorityPolicy { PriorityPolicy { weight: 1, max_retries: 1 } }

impl Default for PriorityPolicies {
    fn default() -> Self {
        Self {
            high: default_high_policy(),
            medium: default_medium_policy(),
            low: default_low_policy(),
        }
    }
}

impl PriorityPolicies {
    pub fn get(&self, priority: Priority) -> PriorityPolicy {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

/// Breaker configuration, typically parsed from the `[breaker]` TOML section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays OPEN before probing (HALF_OPEN).
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Trailing window used to compute the write rate.
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Completions per second above which the breaker reports throttling.
    #[serde(default = "default_write_rate_limit")]
    pub write_rate_limit: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on operations launched by a single tick.
    #[serde(default = "default_max_launch_per_tick")]
    pub max_launch_per_tick: usize,
    /// Trial successes needed to close from HALF_OPEN.
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
    /// Linear backoff step: a retry waits `retry_count * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_window_purge_interval_ms")]
    pub window_purge_interval_ms: u64,
    /// Size of the rolling response-time sample window.
    #[serde(default = "default_response_time_samples")]
    pub response_time_samples: usize,
    /// Per-attempt timeout. 0 disables.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default)]
    pub priorities: PriorityPolicies,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout_ms() -> u64 { 60_000 }
fn default_monitoring_window_ms() -> u64 { 300_000 }
fn default_max_concurrent_writes() -> usize { 8 }
fn default_max_queue_size() -> usize { 100 }
fn default_write_rate_limit() -> f64 { 2.0 }
fn default_tick_interval_ms() -> u64 { 500 }
fn default_max_launch_per_tick() -> usize { 3 }
fn default_half_open_success_threshold() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 1_000 }
fn default_window_purge_interval_ms() -> u64 { 30_000 }
fn default_response_time_samples() -> usize { 100 }
fn default_operation_timeout_ms() -> u64 { 30_000 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            max_concurrent_writes: default_max_concurrent_writes(),
            max_queue_size: default_max_queue_size(),
            write_rate_limit: default_write_rate_limit(),
            tick_interval_ms: default_tick_interval_ms(),
            max_launch_per_tick: default_max_launch_per_tick(),
            half_open_success_threshold: default_half_open_success_threshold(),
            retry_backoff_ms: default_retry_backoff_ms(),
            window_purge_interval_ms: default_window_purge_interval_ms(),
            response_time_samples: default_response_time_samples(),
            operation_timeout_ms: default_operation_timeout_ms(),
            priorities: PriorityPolicies::default(),
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn window_purge_interval(&self) -> Duration {
        Duration::from_millis(self.window_purge_interval_ms)
    }

    /// Delay before the `retry_count`-th retry becomes eligible.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(retry_count)))
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }

    pub fn policy(&self, priority: Priority) -> PriorityPolicy {
        self.priorities.get(priority)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero: [(&'static str, u64); 7] = [
            ("breaker.failure_threshold", u64::from(self.failure_threshold)),
            ("breaker.max_concurrent_writes", self.max_concurrent_writes as u64),
            ("breaker.max_queue_size", self.max_queue_size as u64),
            ("breaker.tick_interval_ms", self.tick_interval_ms),
            ("breaker.max_launch_per_tick", self.max_launch_per_tick as u64),
            ("breaker.half_open_success_threshold", u64::from(self.half_open_success_threshold)),
            ("breaker.response_time_samples", self.response_time_samples as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if !self.write_rate_limit.is_finite() || self.write_rate_limit <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "breaker.write_rate_limit",
                reason: format!("expected a positive rate, got {}", self.write_rate_limit),
            });
        }
        if self.monitoring_window_ms < 1_000 {
            return Err(ConfigError::OutOfRange {
                field: "breaker.monitoring_window_ms",
                reason: "window must be at least one second".into(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `PULSE_BREAKER_<FIELD>` overrides `breaker.<field>`, e.g.
    /// `PULSE_BREAKER_FAILURE_THRESHOLD=3`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("PULSE_BREAKER_FAILURE_THRESHOLD") {
            self.failure_threshold = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_RESET_TIMEOUT_MS") {
            self.reset_timeout_ms = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_MONITORING_WINDOW_MS") {
            self.monitoring_window_ms = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_MAX_CONCURRENT_WRITES") {
            self.max_concurrent_writes = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_MAX_QUEUE_SIZE") {
            self.max_queue_size = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_WRITE_RATE_LIMIT") {
            self.write_rate_limit = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("PULSE_BREAKER_OPERATION_TIMEOUT_MS") {
            self.operation_timeout_ms = v;
        }
    }
}
