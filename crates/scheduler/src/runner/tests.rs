use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use pulse_core::{ManualClock, Priority};

use super::TaskScheduler;
use crate::collaborators::{Collaborators, ProximityService, ProximityUpdate};
use crate::config::SchedulerConfig;
use crate::handlers::tests::{location, StubEngines};
use crate::handlers::TaskOutput;
use crate::types::{LocationSample, SensorSample, TaskType};

/// Proximity double whose behaviour is driven by the event payload.
struct ScriptedProximity {
    clock: Arc<ManualClock>,
    gate: Arc<Notify>,
}

#[async_trait]
impl ProximityService for ScriptedProximity {
    async fn update_location(&self, _location: &LocationSample) -> anyhow::Result<ProximityUpdate> {
        Ok(ProximityUpdate::default())
    }

    async fn handle_event(&self, event: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        if event["panic"].as_bool() == Some(true) {
            panic!("beacon decoder crashed");
        }
        if event["fail"].as_bool() == Some(true) {
            anyhow::bail!("beacon rejected");
        }
        if let Some(ms) = event["advance_ms"].as_u64() {
            self.clock.advance(Duration::from_millis(ms));
        }
        if let Some(ms) = event["sleep_ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if event["gate"].as_bool() == Some(true) {
            self.gate.notified().await;
        }
        Ok(json!({ "seen": event["beacon"] }))
    }
}

struct Harness {
    scheduler: TaskScheduler,
    clock: Arc<ManualClock>,
    gate: Arc<Notify>,
}

fn harness(config: SchedulerConfig) -> Harness {
    let clock = Arc::new(ManualClock::fixed());
    let gate = Arc::new(Notify::new());
    let engines = Arc::new(StubEngines::default());
    let proximity = Arc::new(ScriptedProximity {
        clock: clock.clone(),
        gate: gate.clone(),
    });
    let collaborators = Collaborators::new(engines.clone(), engines, proximity);
    let scheduler = TaskScheduler::with_clock(config, collaborators, clock.clone());
    Harness { scheduler, clock, gate }
}

fn beacon(n: usize) -> serde_json::Value {
    json!({ "beacon": format!("b-{n}") })
}

#[tokio::test]
async fn add_task_updates_queue_status() {
    let h = harness(SchedulerConfig::default());
    let before = h.scheduler.queue_status();
    h.scheduler.add_task(TaskType::VenueDetection, json!({}), Priority::Low);
    let after = h.scheduler.queue_status();
    assert_eq!(after.total, before.total + 1);
    assert_eq!(after.by_priority[&Priority::Low], 1);
    assert_eq!(after.by_type[&TaskType::VenueDetection], 1);
    assert_eq!(h.scheduler.stats().total_tasks, 1);
}

#[tokio::test]
async fn high_priority_goes_to_queue_head() {
    let h = harness(SchedulerConfig::default());
    h.scheduler.add_task(TaskType::ProximityEvent, beacon(1), Priority::Medium);
    h.scheduler.add_task(TaskType::ProximityEvent, beacon(2), Priority::Low);
    let urgent = h.scheduler.add_task(TaskType::ProximityEvent, beacon(3), Priority::High);
    let queue = h.scheduler.debug_info().queue;
    assert_eq!(queue[0].id, urgent);
    assert_eq!(queue[2].priority, Priority::Low);
}

#[tokio::test]
async fn location_with_sensor_queues_one_combined_task() {
    let h = harness(SchedulerConfig::default());
    h.scheduler
        .process_location_update(location(), Some(SensorSample::default()))
        .unwrap();

    let status = h.scheduler.queue_status();
    assert_eq!(status.total, 1);
    assert_eq!(status.by_type.get(&TaskType::CombinedAnalysis), Some(&1));
    assert_eq!(status.by_type.get(&TaskType::LocationUpdate), None);
    assert_eq!(status.by_type.get(&TaskType::VibeAnalysis), None);

    h.scheduler.process_vibe_analysis(SensorSample::default(), None).unwrap();
    h.scheduler.process_location_update(location(), None).unwrap();
    let status = h.scheduler.queue_status();
    assert_eq!(status.by_type.get(&TaskType::VibeAnalysis), Some(&1));
    assert_eq!(status.by_type.get(&TaskType::LocationUpdate), Some(&1));
}

#[tokio::test]
async fn queue_drains_within_bounded_ticks() {
    let h = harness(SchedulerConfig::default());
    let priorities = [Priority::High, Priority::Medium, Priority::Low];
    for n in 0..25 {
        h.scheduler.add_task(TaskType::ProximityEvent, beacon(n), priorities[n % 3]);
    }

    let mut last = h.scheduler.queue_status().total;
    let mut ticks = 0;
    while h.scheduler.queue_status().total > 0 {
        let report = h.scheduler.tick().await.unwrap();
        ticks += 1;
        assert_eq!(report.failed, 0);
        let now = h.scheduler.queue_status().total;
        assert!(now < last, "queue grew or stalled: {last} -> {now}");
        last = now;
        assert!(ticks <= 5, "queue not drained after {ticks} ticks");
    }

    let stats = h.scheduler.stats();
    assert_eq!(stats.completed_tasks, 25);
    assert_eq!(stats.failed_tasks, 0);
    assert_eq!(stats.queue_size, 0);
}

#[tokio::test]
async fn empty_queue_skips_tick() {
    let h = harness(SchedulerConfig::default());
    assert!(h.scheduler.tick().await.is_none());
    assert_eq!(h.scheduler.queue_status().cycle, 0);
}

#[tokio::test]
async fn failing_task_dropped_after_three_attempts() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .scheduler
        .add_task(TaskType::ProximityEvent, json!({ "fail": true }), Priority::Medium);

    for attempt in 1..=2u32 {
        let report = h.scheduler.tick().await.unwrap();
        assert_eq!(report.retried, 1);
        let queue = h.scheduler.debug_info().queue;
        assert_eq!(queue[0].id, id);
        assert_eq!(queue[0].retry_count, attempt);
    }

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.failed, 1);
    let stats = h.scheduler.stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.queue_size, 0);

    let recent = h.scheduler.debug_info().recent_outcomes;
    assert_eq!(recent.len(), 3);
    assert!(recent[2].dropped);
    assert_eq!(recent[2].attempt, 3);
    assert_eq!(recent[2].error.as_deref(), Some("beacon rejected"));
}

#[tokio::test]
async fn one_failure_never_blocks_siblings() {
    let h = harness(SchedulerConfig::default());
    h.scheduler.add_task(TaskType::ProximityEvent, json!({ "panic": true }), Priority::Medium);
    h.scheduler.add_task(TaskType::ProximityEvent, json!({ "fail": true }), Priority::Medium);
    let ok = h.scheduler.add_task(TaskType::ProximityEvent, beacon(1), Priority::Medium);

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.selected.len(), 3);
    assert_eq!(report.completed, 1);
    assert_eq!(report.retried, 2);

    let info = h.scheduler.debug_info();
    assert!(info.queue.iter().all(|t| t.id != ok));
    let panicked = info
        .recent_outcomes
        .iter()
        .find(|o| o.error.as_deref().is_some_and(|e| e.contains("panicked")))
        .unwrap();
    assert!(panicked.error.as_deref().unwrap().contains("beacon decoder crashed"));
}

#[tokio::test(start_paused = true)]
async fn slow_handler_times_out() {
    let config = SchedulerConfig {
        task_timeout_ms: 100,
        ..SchedulerConfig::default()
    };
    let h = harness(config);
    h.scheduler
        .add_task(TaskType::ProximityEvent, json!({ "sleep_ms": 60_000 }), Priority::Medium);

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.retried, 1);
    let recent = h.scheduler.debug_info().recent_outcomes;
    assert!(recent[0].error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn ticks_never_overlap() {
    let h = harness(SchedulerConfig::default());
    h.scheduler.add_task(TaskType::ProximityEvent, json!({ "gate": true }), Priority::Medium);

    let scheduler = h.scheduler.clone();
    let first = tokio::spawn(async move { scheduler.tick().await });
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    assert!(h.scheduler.queue_status().processing);
    assert!(h.scheduler.tick().await.is_none());

    h.gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.completed, 1);
    assert!(!h.scheduler.queue_status().processing);
}

#[tokio::test]
async fn heavy_batch_halves_next_batch_size() {
    let h = harness(SchedulerConfig::default());
    for _ in 0..40 {
        h.scheduler
            .add_task(TaskType::ProximityEvent, json!({ "advance_ms": 2_000 }), Priority::Medium);
    }

    // Idle start: load 0, so the batch grows to 15.
    let first = h.scheduler.tick().await.unwrap();
    assert_eq!(first.batch_size, 15);
    assert!(first.system_load > 0.8, "load {}", first.system_load);

    let second = h.scheduler.tick().await.unwrap();
    assert_eq!(second.batch_size, 5);
    assert_eq!(h.scheduler.debug_info().current_batch_size, 5);
}

#[tokio::test]
async fn third_cycle_boosts_high_priority() {
    let config = SchedulerConfig {
        batch_size: 2,
        ..SchedulerConfig::default()
    };
    let h = harness(config);
    for n in 0..8 {
        h.scheduler.add_task(TaskType::ProximityEvent, beacon(n), Priority::Low);
    }

    // Batch of 3 (idle load) per tick; cycles 1 and 2 take the queue head.
    assert!(!h.scheduler.tick().await.unwrap().priority_cycle);
    assert!(!h.scheduler.tick().await.unwrap().priority_cycle);

    let low_head = h.scheduler.debug_info().queue[0].id;
    let urgent = h.scheduler.add_task(TaskType::ProximityEvent, beacon(99), Priority::High);
    let third = h.scheduler.tick().await.unwrap();
    assert!(third.priority_cycle);
    assert_eq!(third.selected[0], urgent);
    assert_eq!(third.selected[1], low_head);
}

#[tokio::test]
async fn subscribers_receive_outputs() {
    let h = harness(SchedulerConfig::default());
    let mut rx = h.scheduler.subscribe();
    let id = h.scheduler.add_task(TaskType::ProximityEvent, beacon(7), Priority::Medium);
    h.scheduler.tick().await.unwrap();

    let done = rx.recv().await.unwrap();
    assert_eq!(done.task_id, id);
    assert_eq!(done.output, TaskOutput::ProximityEvent { response: json!({ "seen": "b-7" }) });
}

#[tokio::test(start_paused = true)]
async fn stop_halts_ticks_without_draining() {
    let config = SchedulerConfig {
        processing_interval_ms: 1_000,
        ..SchedulerConfig::default()
    };
    let h = harness(config);
    h.scheduler.add_task(TaskType::ProximityEvent, beacon(1), Priority::Medium);
    h.scheduler.start();
    assert!(h.scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.scheduler.stats().completed_tasks, 1);

    h.scheduler.stop();
    assert!(!h.scheduler.is_running());
    h.scheduler.add_task(TaskType::ProximityEvent, beacon(2), Priority::Medium);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.scheduler.queue_status().total, 1);
    assert_eq!(h.scheduler.stats().completed_tasks, 1);
}

#[tokio::test]
async fn clear_queue_reports_dropped() {
    let h = harness(SchedulerConfig::default());
    for n in 0..4 {
        h.scheduler.add_task(TaskType::ProximityEvent, beacon(n), Priority::Low);
    }
    assert_eq!(h.scheduler.clear_queue(), 4);
    assert_eq!(h.scheduler.queue_status().total, 0);
    assert!(h.scheduler.tick().await.is_none());
}

#[tokio::test]
async fn snapshots_are_idempotent() {
    let h = harness(SchedulerConfig::default());
    h.scheduler.add_task(TaskType::ProximityEvent, beacon(1), Priority::High);
    h.clock.advance(Duration::from_secs(3));
    assert_eq!(h.scheduler.debug_info(), h.scheduler.debug_info());
    assert_eq!(h.scheduler.queue_status().oldest_task_age_ms, Some(3_000));
}
