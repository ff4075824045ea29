use serde::Serialize;
use tracing::info;

use pulse_breaker::{BreakerStatus, CircuitMetrics, WriteCircuitBreaker};
use pulse_core::SharedClock;
use pulse_scheduler::{Collaborators, ProcessingStats, QueueStatus, TaskScheduler};

use crate::config::GovernorConfig;

/// Point-in-time view of both components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorSnapshot {
    pub breaker: CircuitMetrics,
    pub breaker_status: BreakerStatus,
    pub scheduler: ProcessingStats,
    pub queue: QueueStatus,
}

/// Owns one write breaker and one analysis scheduler sharing a clock.
#[derive(Clone)]
pub struct Governor {
    config: GovernorConfig,
    clock: SharedClock,
    breaker: WriteCircuitBreaker,
    scheduler: TaskScheduler,
}

impl Governor {
    pub fn new(config: GovernorConfig, clock: SharedClock, collaborators: Collaborators) -> Self {
        let breaker = WriteCircuitBreaker::with_clock(config.breaker.clone(), clock.clone());
        let scheduler = TaskScheduler::with_clock(config.scheduler.clone(), collaborators, clock.clone());
        Self {
            config,
            clock,
            breaker,
            scheduler,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn breaker(&self) -> &WriteCircuitBreaker {
        &self.breaker
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Start both tickers on the current runtime.
    pub fn start(&self) {
        self.breaker.start();
        self.scheduler.start();
        info!("governor started");
    }

    /// Stop scheduling analysis and tear the breaker down. Pending writes
    /// reject with `Destroyed`; queued analysis tasks are left in place.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.breaker.destroy();
        info!("governor shut down");
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            breaker: self.breaker.metrics(),
            breaker_status: self.breaker.status(),
            scheduler: self.scheduler.stats(),
            queue: self.scheduler.queue_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pulse_breaker::CircuitState;
    use pulse_core::ManualClock;

    use super::*;
    use crate::simulated::SimulatedEngines;

    fn governor() -> Governor {
        let engines = Arc::new(SimulatedEngines::default());
        Governor::new(
            GovernorConfig::default(),
            Arc::new(ManualClock::fixed()),
            Collaborators::new(engines.clone(), engines.clone(), engines),
        )
    }

    #[tokio::test]
    async fn start_and_shutdown_drive_both_components() {
        let governor = governor();
        governor.start();
        assert!(governor.breaker().is_running());
        assert!(governor.scheduler().is_running());

        governor.shutdown();
        assert!(governor.breaker().is_destroyed());
        assert!(!governor.scheduler().is_running());
    }

    #[tokio::test]
    async fn fresh_snapshot_is_idle_and_healthy() {
        let snapshot = governor().snapshot();
        assert_eq!(snapshot.breaker.state, CircuitState::Closed);
        assert!(snapshot.breaker_status.healthy);
        assert_eq!(snapshot.scheduler.total_tasks, 0);
        assert_eq!(snapshot.queue.total, 0);
    }
}
