//! Synthetic traffic for exercising a [`Governor`] end to end.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_breaker::{BreakerError, Priority, WriteMetadata};
use pulse_scheduler::{LocationSample, SensorSample, TaskType};

use crate::config::SoakConfig;
use crate::governor::Governor;
use crate::simulated::SimulatedStore;

/// Origin of the simulated walk.
const START: (f64, f64) = (52.5200, 13.4050);
const STEP_DEG: f64 = 0.0004;
const WALK_LEN: u64 = 40;

/// Tally of a finished soak run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SoakSummary {
    /// Every write handed to the breaker.
    pub writes_attempted: u64,
    /// Rejected at admission or evicted from a full queue.
    pub writes_shed: u64,
    pub writes_succeeded: u64,
    /// Retries exhausted, timed out, or shed by the circuit opening.
    pub writes_failed: u64,
    /// Still pending when the breaker was destroyed.
    pub writes_abandoned: u64,
    pub analyses_queued: u64,
    pub analyses_rejected: u64,
}

enum WriteOutcome {
    Succeeded,
    Shed,
    Failed,
    Abandoned,
}

impl WriteOutcome {
    fn from_error(err: &BreakerError) -> Self {
        match err {
            BreakerError::Destroyed => WriteOutcome::Abandoned,
            e if e.is_admission() => WriteOutcome::Shed,
            _ => WriteOutcome::Failed,
        }
    }
}

impl SoakSummary {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Succeeded => self.writes_succeeded += 1,
            WriteOutcome::Shed => self.writes_shed += 1,
            WriteOutcome::Failed => self.writes_failed += 1,
            WriteOutcome::Abandoned => self.writes_abandoned += 1,
        }
    }
}

/// Drives writes and analysis samples through a governor at the rates in
/// [`SoakConfig`], logging a metrics line every report interval.
pub struct SoakRunner {
    governor: Governor,
    config: SoakConfig,
    store: Arc<SimulatedStore>,
}

impl SoakRunner {
    pub fn new(governor: Governor) -> Self {
        let config = governor.config().soak.clone();
        let store = Arc::new(SimulatedStore::new(config.write_latency(), config.fail_every));
        Self {
            governor,
            config,
            store,
        }
    }

    pub fn store(&self) -> &SimulatedStore {
        &self.store
    }

    /// Run until `duration` elapses or `shutdown` fires, then shut the
    /// governor down and wait for every outstanding write to settle.
    pub async fn run(&self, duration: Duration, report_every: Duration, shutdown: CancellationToken) -> SoakSummary {
        let mut summary = SoakSummary::default();
        let mut inflight: JoinSet<WriteOutcome> = JoinSet::new();

        let mut writes = tokio::time::interval(Duration::from_secs(1) / self.config.writes_per_sec);
        let mut analyses = tokio::time::interval(Duration::from_secs(1) / self.config.analyses_per_sec);
        let mut reports = tokio::time::interval(report_every);
        for ticker in [&mut writes, &mut analyses, &mut reports] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        self.governor.start();
        info!(?duration, writes_per_sec = self.config.writes_per_sec, "soak started");

        let (mut write_seq, mut sample_seq) = (0u64, 0u64);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("soak interrupted");
                    break;
                }
                _ = &mut deadline => break,
                _ = writes.tick() => {
                    self.submit_write(write_seq, &mut inflight, &mut summary);
                    write_seq += 1;
                    while let Some(joined) = inflight.try_join_next() {
                        if let Ok(outcome) = joined {
                            summary.record(outcome);
                        }
                    }
                }
                _ = analyses.tick() => {
                    self.submit_analysis(sample_seq, &mut summary);
                    sample_seq += 1;
                }
                _ = reports.tick() => self.report(),
            }
        }

        self.governor.shutdown();
        while let Some(joined) = inflight.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => warn!(error = %e, "write watcher failed"),
            }
        }
        self.report();
        info!(?summary, "soak finished");
        summary
    }

    fn submit_write(&self, seq: u64, inflight: &mut JoinSet<WriteOutcome>, summary: &mut SoakSummary) {
        let (priority, kind) = match seq % 10 {
            0 => (Priority::High, "upsert_presence"),
            1..=3 => (Priority::Low, "append_activity"),
            _ => (Priority::Medium, "update_profile"),
        };
        let store = self.store.clone();
        let op = move || {
            let store = store.clone();
            async move { store.write(seq).await }
        };

        summary.writes_attempted += 1;
        match self
            .governor
            .breaker()
            .try_submit(op, priority, WriteMetadata::new("soak", kind))
        {
            Ok(pending) => {
                inflight.spawn(async move {
                    match pending.await {
                        Ok(_) => WriteOutcome::Succeeded,
                        Err(e) => WriteOutcome::from_error(&e),
                    }
                });
            }
            Err(e) => summary.record(WriteOutcome::from_error(&e)),
        }
    }

    fn submit_analysis(&self, seq: u64, summary: &mut SoakSummary) {
        let scheduler = self.governor.scheduler();
        let location = self.location(seq);
        let sensor = self.sensor(seq);

        let queued = match seq % 4 {
            0 => scheduler.process_location_update(location, Some(sensor)),
            1 => scheduler.process_location_update(location, None),
            2 => scheduler.process_vibe_analysis(sensor, None),
            _ => Ok(scheduler.add_task(
                TaskType::ProximityEvent,
                serde_json::json!({ "beacon": format!("b-{}", seq % 7) }),
                Priority::High,
            )),
        };
        match queued {
            Ok(id) => {
                summary.analyses_queued += 1;
                debug!(id = %id, seq, "analysis sample queued");
            }
            Err(e) => {
                summary.analyses_rejected += 1;
                warn!(error = %e, seq, "analysis sample rejected");
            }
        }
    }

    /// Walk away from home and back.
    fn location(&self, seq: u64) -> LocationSample {
        let step = seq % WALK_LEN;
        let offset = step.min(WALK_LEN - step) as f64 * STEP_DEG;
        LocationSample {
            latitude: START.0 + offset,
            longitude: START.1 + offset / 2.0,
            accuracy_m: Some(10.0),
            speed_mps: Some(1.4),
            recorded_at: self.governor.clock().now(),
        }
    }

    fn sensor(&self, seq: u64) -> SensorSample {
        let phase = (seq % 20) as f64 / 20.0;
        SensorSample {
            noise_db: Some(40.0 + 45.0 * phase),
            motion: Some(phase),
            recorded_at: Some(self.governor.clock().now()),
            ..SensorSample::default()
        }
    }

    fn report(&self) {
        let snapshot = self.governor.snapshot();
        info!(
            state = %snapshot.breaker.state,
            queued_writes = snapshot.breaker.queue_size,
            active_writes = snapshot.breaker.active_writes,
            write_rate = snapshot.breaker.write_rate,
            avg_write_ms = snapshot.breaker.average_response_time_ms,
            queued_tasks = snapshot.queue.total,
            completed_tasks = snapshot.scheduler.completed_tasks,
            failed_tasks = snapshot.scheduler.failed_tasks,
            system_load = snapshot.scheduler.system_load,
            "governor metrics"
        );
    }
}
