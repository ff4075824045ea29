use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use pulse_core::clock::elapsed_between;

use super::core::Inner;
use super::scheduling::select_batch;
use crate::collaborators::Collaborators;
use crate::error::TaskError;
use crate::handlers::{dispatch, TaskOutput};
use crate::stats::{system_load, BatchReport, CompletedTask, TaskOutcome};
use crate::types::ProcessingTask;

/// Clears the processing flag when a tick ends, however it ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One settled task: its index in the batch, the result, and handler time.
type Settled = (usize, Result<TaskOutput, TaskError>, Duration);

impl Inner {
    pub(super) async fn tick(&self) -> Option<BatchReport> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous batch still running, skipping tick");
            return None;
        }
        let _guard = ProcessingGuard(&self.processing);

        let started = self.clock.now();
        let (cycle, batch_size, priority_cycle, batch) = {
            let mut st = self.lock();
            if st.queue.is_empty() {
                return None;
            }
            st.cycle += 1;
            let cycle = st.cycle;
            let batch_size = self.config.adaptive_batch_size(st.stats.system_load);
            let priority_cycle = self.config.is_priority_cycle(cycle);
            let batch = select_batch(&st.queue, batch_size, priority_cycle);
            (cycle, batch_size, priority_cycle, batch)
        };
        debug!(
            cycle,
            batch_size,
            priority_cycle,
            selected = batch.len(),
            "processing batch"
        );

        let settled = self.run_batch(&batch).await;
        let finished = self.clock.now();
        Some(self.record_batch(cycle, batch_size, priority_cycle, &batch, settled, started, finished))
    }

    /// Execute every task in the batch concurrently and wait for all of
    /// them. A failing or panicking task never affects its siblings.
    async fn run_batch(&self, batch: &[ProcessingTask]) -> Vec<Settled> {
        let mut set = JoinSet::new();
        for (idx, task) in batch.iter().cloned().enumerate() {
            let collaborators = self.collaborators.clone();
            let clock = self.clock.clone();
            let timeout = self.config.task_timeout();
            set.spawn(async move {
                let started = clock.now();
                let result = run_task(&collaborators, &task, timeout).await;
                (idx, result, elapsed_between(started, clock.now()))
            });
        }

        let mut settled = Vec::with_capacity(batch.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => settled.push(done),
                Err(err) => error!(error = %err, "task join failed"),
            }
        }
        settled
    }

    #[allow(clippy::too_many_arguments)]
    fn record_batch(
        &self,
        cycle: u64,
        batch_size: usize,
        priority_cycle: bool,
        batch: &[ProcessingTask],
        settled: Vec<Settled>,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> BatchReport {
        let max_retries = self.config.max_retry_count;
        let (mut completed, mut retried, mut failed) = (0, 0, 0);
        let mut outputs = Vec::new();

        let report = {
            let mut st = self.lock();
            for (idx, result, took) in settled {
                let Some(task) = batch.get(idx) else { continue };
                st.timed_attempts += 1;
                let attempts = st.timed_attempts;
                st.stats.record_processing_time(took, attempts);
                let position = st.queue.iter().position(|t| t.id == task.id);

                let outcome = match result {
                    Ok(output) => {
                        if let Some(pos) = position {
                            st.queue.remove(pos);
                        }
                        st.stats.completed_tasks += 1;
                        completed += 1;
                        outputs.push(CompletedTask {
                            task_id: task.id,
                            priority: task.priority,
                            output,
                            finished_at: finished,
                        });
                        task_outcome(task, took, finished, None, false)
                    }
                    Err(err) => {
                        // A task cleared from the queue mid-batch is not retried.
                        let mut dropped = position.is_none();
                        if let Some(pos) = position {
                            let retry_count = {
                                let queued = &mut st.queue[pos];
                                queued.retry_count += 1;
                                queued.retry_count
                            };
                            if retry_count >= max_retries {
                                st.queue.remove(pos);
                                st.stats.failed_tasks += 1;
                                failed += 1;
                                dropped = true;
                                warn!(
                                    id = %task.id,
                                    task_type = %task.task_type,
                                    attempts = retry_count,
                                    error = %err,
                                    "task failed permanently"
                                );
                            } else {
                                retried += 1;
                                debug!(id = %task.id, retry = retry_count, error = %err, "task failed, will retry");
                            }
                        }
                        task_outcome(task, took, finished, Some(err.to_string()), dropped)
                    }
                };
                st.recent.push(outcome);
            }

            let batch_duration = elapsed_between(started, finished);
            let since_last = elapsed_between(st.last_tick_at, finished);
            let load = system_load(batch_duration, since_last, st.queue.len(), self.config.batch_size);
            st.stats.system_load = load;
            st.stats.queue_size = st.queue.len();
            st.stats.last_processed_at = Some(finished);
            st.last_tick_at = finished;

            BatchReport {
                cycle,
                batch_size,
                priority_cycle,
                selected: batch.iter().map(|t| t.id).collect(),
                completed,
                retried,
                failed,
                duration_ms: batch_duration.as_millis() as u64,
                system_load: load,
            }
        };

        for done in outputs {
            // No subscribers is fine.
            let _ = self.results.send(done);
        }
        report
    }
}

fn task_outcome(
    task: &ProcessingTask,
    took: Duration,
    finished: DateTime<Utc>,
    error: Option<String>,
    dropped: bool,
) -> TaskOutcome {
    TaskOutcome {
        task_id: task.id,
        task_type: task.task_type,
        priority: task.priority,
        attempt: task.retry_count + 1,
        succeeded: error.is_none(),
        dropped,
        error,
        duration_ms: took.as_millis() as u64,
        finished_at: finished,
    }
}

/// Run one task's handler under the timeout, turning a panic into an error.
async fn run_task(
    collaborators: &Collaborators,
    task: &ProcessingTask,
    timeout: Option<Duration>,
) -> Result<TaskOutput, TaskError> {
    let handler = AssertUnwindSafe(dispatch(collaborators, task)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handler).await {
            Ok(caught) => caught,
            Err(_) => return Err(TaskError::TimedOut(limit)),
        },
        None => handler.await,
    };
    caught.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic.as_ref()))))
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
