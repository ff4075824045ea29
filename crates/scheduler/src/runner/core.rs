use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pulse_core::{Priority, RingBuffer, SharedClock, SystemClock};

use crate::collaborators::Collaborators;
use crate::config::SchedulerConfig;
use crate::error::TaskError;
use crate::stats::{BatchReport, CompletedTask, ProcessingStats, QueueStatus, SchedulerDebugInfo, TaskOutcome};
use crate::types::{AnalysisPayload, LocationSample, ProcessingTask, SensorSample, TaskId, TaskType};

/// Capacity of the completed-task broadcast channel.
const RESULT_CHANNEL_CAPACITY: usize = 256;

pub(super) struct SchedulerState {
    pub queue: VecDeque<ProcessingTask>,
    pub stats: ProcessingStats,
    /// Ticks that ran a batch.
    pub cycle: u64,
    /// Attempts folded into the average processing time.
    pub timed_attempts: u64,
    /// End of the previous batch, or construction time.
    pub last_tick_at: DateTime<Utc>,
    pub recent: RingBuffer<TaskOutcome>,
}

struct Ticker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

pub(super) struct Inner {
    pub config: SchedulerConfig,
    pub clock: SharedClock,
    pub collaborators: Collaborators,
    /// Set while a batch executes; ticks never overlap.
    pub processing: AtomicBool,
    pub results: broadcast::Sender<CompletedTask>,
    state: Mutex<SchedulerState>,
    ticker: Mutex<Option<Ticker>>,
}

impl Inner {
    pub fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The background analysis scheduler.
///
/// Cheap to clone; clones share one queue. Ticks run every
/// `processing_interval_ms` once [`start`](Self::start) is called, or on
/// demand through [`tick`](Self::tick).
#[derive(Clone)]
pub struct TaskScheduler {
    pub(super) inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Self {
        Self::with_clock(config, collaborators, SystemClock::shared())
    }

    pub fn with_clock(config: SchedulerConfig, collaborators: Collaborators, clock: SharedClock) -> Self {
        let now = clock.now();
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let state = SchedulerState {
            queue: VecDeque::new(),
            stats: ProcessingStats::default(),
            cycle: 0,
            timed_attempts: 0,
            last_tick_at: now,
            recent: RingBuffer::new(config.recent_outcomes),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                collaborators,
                processing: AtomicBool::new(false),
                results,
                state: Mutex::new(state),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a task. High priority goes to the head of the queue, everything
    /// else to the tail.
    pub fn add_task(&self, task_type: TaskType, data: serde_json::Value, priority: Priority) -> TaskId {
        let task = ProcessingTask::new(task_type, data, priority, self.inner.clock.now());
        let id = task.id;
        let mut st = self.inner.lock();
        if priority == Priority::High {
            st.queue.push_front(task);
        } else {
            st.queue.push_back(task);
        }
        st.stats.total_tasks += 1;
        st.stats.queue_size = st.queue.len();
        debug!(id = %id, task_type = %task_type, priority = %priority, queued = st.queue.len(), "task queued");
        id
    }

    /// Queue location work; with a sensor sample this becomes a single
    /// `combined_analysis` task.
    pub fn process_location_update(
        &self,
        location: LocationSample,
        sensor: Option<SensorSample>,
    ) -> Result<TaskId, TaskError> {
        self.add_analysis(AnalysisPayload {
            location: Some(location),
            sensor,
        })
    }

    /// Queue vibe work; with a location this becomes a single
    /// `combined_analysis` task.
    pub fn process_vibe_analysis(
        &self,
        sensor: SensorSample,
        location: Option<LocationSample>,
    ) -> Result<TaskId, TaskError> {
        self.add_analysis(AnalysisPayload {
            location,
            sensor: Some(sensor),
        })
    }

    fn add_analysis(&self, payload: AnalysisPayload) -> Result<TaskId, TaskError> {
        let task_type = payload
            .task_type()
            .ok_or(TaskError::MissingPayload("location or sensor"))?;
        let data = serde_json::to_value(&payload)?;
        Ok(self.add_task(task_type, data, Priority::Medium))
    }

    /// Receive every successful task's output.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletedTask> {
        self.inner.results.subscribe()
    }

    /// Spawn the periodic ticker on the current tokio runtime. Idempotent.
    ///
    /// The first batch runs one interval after starting.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker();
        if ticker.as_ref().is_some_and(|t| !t.stop.is_cancelled()) {
            return;
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.processing_interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                if let Some(report) = inner.tick().await {
                    debug!(
                        cycle = report.cycle,
                        completed = report.completed,
                        retried = report.retried,
                        failed = report.failed,
                        "scheduler tick finished"
                    );
                }
            }
            debug!("scheduler ticker stopped");
        });
        *ticker = Some(Ticker { stop, handle });
        info!(interval = ?period, batch_size = self.inner.config.batch_size, "task scheduler started");
    }

    /// Halt future ticks. Queued tasks stay queued; a batch already running
    /// is allowed to finish.
    pub fn stop(&self) {
        if let Some(ticker) = self.inner.ticker().take() {
            ticker.stop.cancel();
            let queued = self.inner.lock().queue.len();
            info!(queued, "task scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .ticker()
            .as_ref()
            .is_some_and(|t| !t.stop.is_cancelled() && !t.handle.is_finished())
    }

    /// Run one tick now. `None` if the queue was empty or a batch is
    /// already executing.
    pub async fn tick(&self) -> Option<BatchReport> {
        self.inner.tick().await
    }

    pub fn queue_status(&self) -> QueueStatus {
        let now = self.inner.clock.now();
        let processing = self.inner.processing.load(Ordering::Acquire);
        let st = self.inner.lock();
        QueueStatus::from_queue(st.queue.iter(), processing, st.cycle, now)
    }

    pub fn stats(&self) -> ProcessingStats {
        let st = self.inner.lock();
        let mut stats = st.stats.clone();
        stats.queue_size = st.queue.len();
        stats
    }

    pub fn debug_info(&self) -> SchedulerDebugInfo {
        let queue_status = self.queue_status();
        let stats = self.stats();
        let running = self.is_running();
        let st = self.inner.lock();
        SchedulerDebugInfo {
            config: self.inner.config.clone(),
            current_batch_size: self.inner.config.adaptive_batch_size(st.stats.system_load),
            stats,
            queue_status,
            running,
            queue: st.queue.iter().cloned().collect(),
            recent_outcomes: st.recent.iter().cloned().collect(),
        }
    }

    /// Drop every queued task. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let mut st = self.inner.lock();
        let dropped = st.queue.len();
        st.queue.clear();
        st.stats.queue_size = 0;
        info!(dropped, "task queue cleared");
        dropped
    }
}
