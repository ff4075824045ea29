use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use pulse_core::clock::elapsed_between;

use super::core::{settle, BreakerState, Inner, Rejection};
use crate::error::BreakerError;
use crate::operation::{Payload, WriteOperation};
use crate::state::CircuitState;

/// How a single attempt ended.
enum Outcome {
    Succeeded(Payload),
    Failed(BreakerError),
    /// Destroyed or cancelled mid-flight. Not counted as a failure.
    Interrupted(BreakerError),
}

impl Inner {
    /// One scheduling pass: purge stale samples, evaluate time-driven
    /// transitions, drop cancelled writes, then launch up to the free slot
    /// count of ready writes in priority order.
    pub(super) fn tick(self: &Arc<Self>) -> usize {
        let now = self.clock.now();
        let mut rejected: Vec<Rejection> = Vec::new();

        let launches = {
            let mut st = self.lock();
            if st.destroyed {
                return 0;
            }

            if st.purge_due(self.config.window_purge_interval(), now) {
                let purged = st.completions.purge(now);
                st.last_window_purge = now;
                if purged > 0 {
                    debug!(purged, "purged stale write-rate samples");
                }
            }

            if let Some(t) = st.circuit.evaluate(now, self.thresholds()) {
                rejected.extend(self.on_transition(&mut st, t));
            }

            for op in st.drain_where(|op| op.cancel.is_cancelled()) {
                debug!(id = %op.id, "queued write cancelled");
                rejected.push((op, BreakerError::Cancelled));
            }

            if st.queue.is_empty() {
                Vec::new()
            } else if st.circuit.state() == CircuitState::Open {
                rejected.extend(self.purge_non_high(&mut st));
                Vec::new()
            } else {
                self.select_batch(&mut st, now)
            }
        };

        settle(rejected);

        let launched = launches.len();
        for op in launches {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.execute(op).await });
        }
        launched
    }

    /// Sort the queue and pull out the writes to launch this tick.
    /// Reserves their slots in `active_writes` before returning.
    fn select_batch(&self, st: &mut BreakerState, now: DateTime<Utc>) -> Vec<WriteOperation> {
        let policies = &self.config.priorities;
        st.queue.make_contiguous().sort_by(|a, b| {
            policies
                .get(b.priority)
                .weight
                .cmp(&policies.get(a.priority).weight)
                .then(a.ready_at.cmp(&b.ready_at))
                .then(a.seq.cmp(&b.seq))
        });

        let slots = self.config.max_concurrent_writes.saturating_sub(st.active_writes);
        let want = slots.min(self.config.max_launch_per_tick);
        let mut picked = Vec::with_capacity(want);
        let mut idx = 0;
        while picked.len() < want && idx < st.queue.len() {
            if st.queue[idx].is_ready(now) {
                if let Some(op) = st.queue.remove(idx) {
                    picked.push(op);
                }
            } else {
                idx += 1;
            }
        }
        st.active_writes += picked.len();
        picked
    }

    async fn execute(self: Arc<Self>, op: WriteOperation) {
        let started = self.clock.now();
        debug!(
            id = %op.id,
            priority = %op.priority,
            attempt = op.retry_count + 1,
            component = %op.metadata.component,
            "launching write"
        );

        // Building the future runs caller code too.
        let attempt = match std::panic::catch_unwind(AssertUnwindSafe(|| (op.attempt)())) {
            Ok(attempt) => attempt,
            Err(panic) => {
                let err = BreakerError::Panicked(panic_message(panic.as_ref()));
                self.complete(op, Outcome::Failed(err), started);
                return;
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Outcome::Interrupted(BreakerError::Destroyed),
            _ = op.cancel.cancelled() => Outcome::Interrupted(BreakerError::Cancelled),
            result = with_timeout(attempt, self.config.operation_timeout()) => match result {
                Ok(payload) => Outcome::Succeeded(payload),
                Err(err) => Outcome::Failed(err),
            },
        };

        self.complete(op, outcome, started);
    }

    fn complete(&self, mut op: WriteOperation, outcome: Outcome, started: DateTime<Utc>) {
        let now = self.clock.now();
        let mut rejected: Vec<Rejection> = Vec::new();
        let mut resolved = None;

        {
            let mut st = self.lock();
            st.active_writes = st.active_writes.saturating_sub(1);

            match outcome {
                Outcome::Succeeded(payload) => {
                    let took = elapsed_between(started, now);
                    st.total_operations += 1;
                    st.response_times.push(took);
                    st.completions.record(now);
                    if let Some(t) = st.circuit.record_success(now, self.thresholds()) {
                        rejected.extend(self.on_transition(&mut st, t));
                    }
                    debug!(id = %op.id, took_ms = took.as_millis() as u64, "write succeeded");
                    resolved = Some((op, payload));
                }
                Outcome::Failed(err) => {
                    st.total_operations += 1;
                    st.completions.record(now);
                    *st.errors_by_type.entry(op.metadata.error_key()).or_default() += 1;
                    let transition = st.circuit.record_failure(now, self.thresholds());

                    if st.destroyed {
                        rejected.push((op, BreakerError::Destroyed));
                    } else if op.retry_count < op.max_retries {
                        op.retry_count += 1;
                        let backoff = self.config.backoff_for(op.retry_count);
                        op.ready_at = now + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
                        warn!(
                            id = %op.id,
                            retry = op.retry_count,
                            max_retries = op.max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "write failed, retrying"
                        );
                        rejected.extend(self.requeue(&mut st, op, err));
                    } else {
                        warn!(
                            id = %op.id,
                            component = %op.metadata.component,
                            operation = %op.metadata.operation_type,
                            attempts = op.retry_count + 1,
                            error = %err,
                            "write failed permanently"
                        );
                        rejected.push((op, err));
                    }

                    if let Some(t) = transition {
                        rejected.extend(self.on_transition(&mut st, t));
                    }
                }
                Outcome::Interrupted(err) => {
                    debug!(id = %op.id, reason = %err, "write interrupted");
                    rejected.push((op, err));
                }
            }
        }

        if let Some((op, payload)) = resolved {
            op.resolve(payload);
        }
        settle(rejected);
    }

    /// Put a retry back in the queue under the same capacity rule as new
    /// writes. If no low-priority write can be evicted, the retry is dropped
    /// and its caller gets the error from its last attempt.
    fn requeue(&self, st: &mut BreakerState, op: WriteOperation, err: BreakerError) -> Vec<Rejection> {
        let capacity = self.config.max_queue_size;
        if st.queue.len() < capacity {
            st.queue.push_back(op);
            return Vec::new();
        }
        match st.evict_oldest_low() {
            Some(victim) => {
                warn!(id = %victim.id, "queue full on retry, evicted low-priority write");
                st.queue.push_back(op);
                vec![(victim, BreakerError::QueueFull { capacity })]
            }
            None => vec![(op, err)],
        }
    }
}

/// Run one attempt, bounded by `limit` when set. A panic inside the
/// attempt becomes [`BreakerError::Panicked`].
async fn with_timeout(
    attempt: BoxFuture<'static, Result<Payload, anyhow::Error>>,
    limit: Option<Duration>,
) -> Result<Payload, BreakerError> {
    let guarded = AssertUnwindSafe(attempt).catch_unwind();
    let caught = match limit {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(caught) => caught,
            Err(_) => return Err(BreakerError::TimedOut(limit)),
        },
        None => guarded.await,
    };
    match caught {
        Ok(result) => result.map_err(BreakerError::Execution),
        Err(panic) => Err(BreakerError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
