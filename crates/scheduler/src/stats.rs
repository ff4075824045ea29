use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pulse_core::Priority;

use crate::config::SchedulerConfig;
use crate::handlers::TaskOutput;
use crate::types::{ProcessingTask, TaskId, TaskType};

/// Scheduler counters. Returned as a copy; mutating it has no effect.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProcessingStats {
    /// Tasks ever accepted by `add_task`.
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Tasks dropped after exhausting their retries.
    pub failed_tasks: u64,
    /// Mean handler time per attempt, in milliseconds.
    pub average_processing_time_ms: f64,
    pub queue_size: usize,
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Synthetic 0..1 load estimate driving the batch size.
    pub system_load: f64,
}

impl ProcessingStats {
    /// Fold one attempt's duration into the running mean.
    ///
    /// `attempts` is the number of attempts timed so far, including this one.
    pub(crate) fn record_processing_time(&mut self, took: Duration, attempts: u64) {
        let sample = took.as_secs_f64() * 1000.0;
        self.average_processing_time_ms = if attempts <= 1 {
            sample
        } else {
            // Incremental mean: new_avg = prev_avg + (sample - prev_avg) / count
            self.average_processing_time_ms + (sample - self.average_processing_time_ms) / attempts as f64
        };
    }
}

/// Blend of handler latency and queue pressure, clamped to 0..1.
///
/// `batch_duration / since_last_tick` is weighted 0.7 and
/// `queue_len / (batch_size * 3)` 0.3.
pub fn system_load(batch_duration: Duration, since_last_tick: Duration, queue_len: usize, batch_size: usize) -> f64 {
    let busy = if since_last_tick.is_zero() {
        if batch_duration.is_zero() { 0.0 } else { 1.0 }
    } else {
        batch_duration.as_secs_f64() / since_last_tick.as_secs_f64()
    };
    let capacity = (batch_size.max(1) * 3) as f64;
    let pressure = queue_len as f64 / capacity;
    (0.7 * busy + 0.3 * pressure).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    /// Every priority class is always present.
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_type: BTreeMap<TaskType, usize>,
    /// A batch is executing right now.
    pub processing: bool,
    /// Ticks that ran a batch so far.
    pub cycle: u64,
    pub oldest_task_age_ms: Option<i64>,
}

impl QueueStatus {
    pub(crate) fn from_queue<'a>(
        tasks: impl Iterator<Item = &'a ProcessingTask>,
        processing: bool,
        cycle: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut by_priority: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
        let mut by_type = BTreeMap::new();
        let mut total = 0;
        let mut oldest: Option<DateTime<Utc>> = None;
        for task in tasks {
            total += 1;
            *by_priority.entry(task.priority).or_default() += 1;
            *by_type.entry(task.task_type).or_default() += 1;
            oldest = Some(oldest.map_or(task.enqueued_at, |o| o.min(task.enqueued_at)));
        }
        Self {
            total,
            by_priority,
            by_type,
            processing,
            cycle,
            oldest_task_age_ms: oldest.map(|at| now.signed_duration_since(at).num_milliseconds()),
        }
    }
}

/// One finished attempt, kept in the recent-outcomes log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    /// 1-based attempt number.
    pub attempt: u32,
    pub succeeded: bool,
    /// The task left the queue for good after failing.
    pub dropped: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Broadcast to subscribers for every task that succeeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub priority: Priority,
    pub output: TaskOutput,
    pub finished_at: DateTime<Utc>,
}

/// Summary of one executed tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub cycle: u64,
    pub batch_size: usize,
    pub priority_cycle: bool,
    /// Selected task ids, in selection order.
    pub selected: Vec<TaskId>,
    pub completed: usize,
    /// Failed but left in the queue for a later tick.
    pub retried: usize,
    /// Failed and dropped.
    pub failed: usize,
    pub duration_ms: u64,
    /// Load measured at the end of this tick.
    pub system_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerDebugInfo {
    pub config: SchedulerConfig,
    pub stats: ProcessingStats,
    pub queue_status: QueueStatus,
    /// Batch size the next tick would use.
    pub current_batch_size: usize,
    pub running: bool,
    /// Queue contents in queue order.
    pub queue: Vec<ProcessingTask>,
    /// Oldest first.
    pub recent_outcomes: Vec<TaskOutcome>,
}
