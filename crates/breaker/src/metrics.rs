use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use pulse_core::Priority;

use crate::config::BreakerConfig;
use crate::operation::WriteMetadata;
use crate::state::CircuitState;

/// Read-only breaker metrics. Derived on every read; mutating a snapshot
/// has no effect on the breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Consecutive failures (decays during HALF_OPEN probation).
    pub failure_count: u32,
    pub success_count: u64,
    /// Attempts that finished, successfully or not.
    pub total_operations: u64,
    /// Mean over the rolling response-time window, in milliseconds.
    pub average_response_time_ms: f64,
    /// Completions per second over the monitoring window.
    pub write_rate: f64,
    pub queue_size: usize,
    pub active_writes: usize,
    /// Queued operations per priority; every class is always present.
    pub priority_distribution: BTreeMap<Priority, usize>,
    pub last_state_change: DateTime<Utc>,
    /// Approximate share of lifetime spent outside OPEN.
    pub uptime_percentage: f64,
    /// Execution failures keyed by `component:operation_type`.
    pub errors_by_type: BTreeMap<String, u64>,
}

/// Compact health view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub queue_size: usize,
    pub active_writes: usize,
    pub throttling: bool,
    pub healthy: bool,
}

/// One queued write, as seen from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub id: Uuid,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub submitted_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
    pub age_ms: i64,
    pub metadata: WriteMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerDebugInfo {
    pub metrics: CircuitMetrics,
    pub config: BreakerConfig,
    pub destroyed: bool,
    pub opened_at: Option<DateTime<Utc>>,
    /// Queue contents in current queue order.
    pub queue: Vec<OperationSummary>,
}
