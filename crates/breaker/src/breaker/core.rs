use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::clock::elapsed_between;
use pulse_core::{Priority, RingBuffer, SharedClock, SlidingWindow, SystemClock};

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::metrics::{BreakerDebugInfo, BreakerStatus, CircuitMetrics, OperationSummary};
use crate::operation::WriteOperation;
use crate::state::{CircuitState, CircuitTracker, Thresholds, Transition};

/// A write to reject once the state lock is released.
pub(super) type Rejection = (WriteOperation, BreakerError);

pub(super) fn settle(rejections: Vec<Rejection>) {
    for (op, err) in rejections {
        op.reject(err);
    }
}

/// Mutable breaker state. Only touched under `Inner::state`.
pub(super) struct BreakerState {
    pub circuit: CircuitTracker,
    pub queue: VecDeque<WriteOperation>,
    pub active_writes: usize,
    pub total_operations: u64,
    pub response_times: RingBuffer<Duration>,
    /// Completion timestamps (success or failure) for the write rate.
    pub completions: SlidingWindow,
    pub errors_by_type: BTreeMap<String, u64>,
    pub last_window_purge: DateTime<Utc>,
    pub next_seq: u64,
    pub destroyed: bool,
}

impl BreakerState {
    fn new(config: &BreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            circuit: CircuitTracker::new(now),
            queue: VecDeque::with_capacity(config.max_queue_size),
            active_writes: 0,
            total_operations: 0,
            response_times: RingBuffer::new(config.response_time_samples),
            completions: SlidingWindow::new(config.monitoring_window()),
            errors_by_type: BTreeMap::new(),
            last_window_purge: now,
            next_seq: 0,
            destroyed: false,
        }
    }

    pub fn write_rate(&self, now: DateTime<Utc>) -> f64 {
        self.completions.rate_per_sec(now)
    }

    pub fn is_throttling(&self, config: &BreakerConfig, now: DateTime<Utc>) -> bool {
        self.active_writes >= config.max_concurrent_writes
            || self.write_rate(now) > config.write_rate_limit
            || self.queue.len() >= config.max_queue_size
    }

    pub fn purge_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        elapsed_between(self.last_window_purge, now) >= interval
    }

    /// Remove the first low-priority record in queue order.
    pub fn evict_oldest_low(&mut self) -> Option<WriteOperation> {
        let idx = self.queue.iter().position(|op| op.priority == Priority::Low)?;
        self.queue.remove(idx)
    }

    /// Remove and return every queued record matching `pred`, keeping order.
    pub fn drain_where(&mut self, mut pred: impl FnMut(&WriteOperation) -> bool) -> Vec<WriteOperation> {
        let mut kept = VecDeque::with_capacity(self.queue.len());
        let mut drained = Vec::new();
        for op in self.queue.drain(..) {
            if pred(&op) {
                drained.push(op);
            } else {
                kept.push_back(op);
            }
        }
        self.queue = kept;
        drained
    }

    fn priority_distribution(&self) -> BTreeMap<Priority, usize> {
        let mut dist: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
        for op in &self.queue {
            *dist.entry(op.priority).or_default() += 1;
        }
        dist
    }
}

pub(super) struct Inner {
    pub config: BreakerConfig,
    pub clock: SharedClock,
    pub shutdown: CancellationToken,
    state: Mutex<BreakerState>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            failure_threshold: self.config.failure_threshold,
            half_open_successes: self.config.half_open_success_threshold,
            reset_timeout: self.config.reset_timeout(),
        }
    }

    /// Log a state change and, on entering OPEN, pull every queued
    /// non-high-priority write out for rejection.
    pub fn on_transition(&self, st: &mut BreakerState, t: Transition) -> Vec<Rejection> {
        info!(
            from = %t.from,
            to = %t.to,
            failures = st.circuit.failure_count(),
            queued = st.queue.len(),
            "circuit state changed"
        );
        if t.to != CircuitState::Open {
            return Vec::new();
        }
        self.purge_non_high(st)
    }

    pub fn purge_non_high(&self, st: &mut BreakerState) -> Vec<Rejection> {
        let purged = st.drain_where(|op| op.priority != Priority::High);
        if !purged.is_empty() {
            warn!(purged = purged.len(), "circuit open, shedding queued non-critical writes");
        }
        purged.into_iter().map(|op| (op, BreakerError::CircuitOpen)).collect()
    }
}

/// Admission control, retry, and circuit breaking for asynchronous writes.
///
/// Cheap to clone; all clones share one queue. Construct one per backend at
/// startup, call [`start`](Self::start) to run the ticker, and
/// [`destroy`](Self::destroy) at shutdown.
#[derive(Clone)]
pub struct WriteCircuitBreaker {
    pub(super) inner: Arc<Inner>,
}

impl WriteCircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: BreakerConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        let state = BreakerState::new(&config, now);
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                shutdown: CancellationToken::new(),
                state: Mutex::new(state),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Spawn the periodic ticker on the current tokio runtime. Idempotent.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.tick_interval();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.tick();
                    }
                }
            }
            debug!("breaker ticker stopped");
        }));
        info!(interval = ?period, "write circuit breaker started");
    }

    pub fn is_running(&self) -> bool {
        let ticker = self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        ticker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run one tick now. Returns how many writes were launched.
    ///
    /// [`start`](Self::start) is the usual driver; this is for callers that
    /// pace ticks themselves.
    ///
    /// # Panics
    ///
    /// Launched writes are spawned onto the current tokio runtime, so this
    /// panics when called outside one.
    pub fn tick(&self) -> usize {
        self.inner.tick()
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().circuit.state()
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let now = self.inner.clock.now();
        let st = self.inner.lock();
        CircuitMetrics {
            state: st.circuit.state(),
            failure_count: st.circuit.failure_count(),
            success_count: st.circuit.success_count(),
            total_operations: st.total_operations,
            average_response_time_ms: st.response_times.mean().as_secs_f64() * 1000.0,
            write_rate: st.write_rate(now),
            queue_size: st.queue.len(),
            active_writes: st.active_writes,
            priority_distribution: st.priority_distribution(),
            last_state_change: st.circuit.last_state_change(),
            uptime_percentage: st.circuit.uptime_percentage(now),
            errors_by_type: st.errors_by_type.clone(),
        }
    }

    pub fn status(&self) -> BreakerStatus {
        let now = self.inner.clock.now();
        let st = self.inner.lock();
        let throttling = st.is_throttling(&self.inner.config, now);
        let state = st.circuit.state();
        BreakerStatus {
            state,
            queue_size: st.queue.len(),
            active_writes: st.active_writes,
            throttling,
            healthy: state == CircuitState::Closed && !throttling && !st.destroyed,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status().healthy
    }

    pub fn debug_info(&self) -> BreakerDebugInfo {
        let metrics = self.metrics();
        let now = self.inner.clock.now();
        let st = self.inner.lock();
        let queue = st
            .queue
            .iter()
            .map(|op| OperationSummary {
                id: op.id,
                priority: op.priority,
                retry_count: op.retry_count,
                max_retries: op.max_retries,
                submitted_at: op.submitted_at,
                ready_at: op.ready_at,
                age_ms: now.signed_duration_since(op.submitted_at).num_milliseconds(),
                metadata: op.metadata.clone(),
            })
            .collect();
        BreakerDebugInfo {
            metrics,
            config: self.inner.config.clone(),
            destroyed: st.destroyed,
            opened_at: st.circuit.opened_at(),
            queue,
        }
    }

    /// Open the circuit now, shedding queued non-critical writes.
    pub fn force_open(&self) {
        self.force(CircuitState::Open);
    }

    pub fn force_close(&self) {
        self.force(CircuitState::Closed);
    }

    fn force(&self, to: CircuitState) {
        let now = self.inner.clock.now();
        let rejected = {
            let mut st = self.inner.lock();
            match st.circuit.force(to, now) {
                Some(t) => {
                    info!(from = %t.from, to = %t.to, "circuit state forced");
                    if to == CircuitState::Open {
                        self.inner.purge_non_high(&mut st)
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            }
        };
        settle(rejected);
    }

    /// Return to CLOSED and clear all counters and sample windows.
    /// Queued writes are kept.
    pub fn reset(&self) {
        let now = self.inner.clock.now();
        let mut st = self.inner.lock();
        st.circuit = CircuitTracker::new(now);
        st.total_operations = 0;
        st.response_times.clear();
        st.completions.clear();
        st.errors_by_type.clear();
        st.last_window_purge = now;
        info!(queued = st.queue.len(), "circuit breaker reset");
    }

    /// Stop the ticker, interrupt running writes, and reject everything
    /// queued with [`BreakerError::Destroyed`].
    pub fn destroy(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<WriteOperation> = {
            let mut st = self.inner.lock();
            st.destroyed = true;
            st.queue.drain(..).collect()
        };
        let pending = drained.len();
        for op in drained {
            op.reject(BreakerError::Destroyed);
        }
        if let Some(handle) = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!(rejected = pending, "write circuit breaker destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }
}
