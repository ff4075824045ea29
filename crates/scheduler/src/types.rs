use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulse_core::Priority;

pub type TaskId = Uuid;

/// Kind of background analysis a task requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    LocationUpdate,
    VibeAnalysis,
    ProximityEvent,
    VenueDetection,
    /// Location and sensor data analysed together in one pass.
    CombinedAnalysis,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::LocationUpdate,
        TaskType::VibeAnalysis,
        TaskType::ProximityEvent,
        TaskType::VenueDetection,
        TaskType::CombinedAnalysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::LocationUpdate => "location_update",
            TaskType::VibeAnalysis => "vibe_analysis",
            TaskType::ProximityEvent => "proximity_event",
            TaskType::VenueDetection => "venue_detection",
            TaskType::CombinedAnalysis => "combined_analysis",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// A queued unit of analysis work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Raw payload handed to the handler; decoded per task type.
    pub data: serde_json::Value,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl ProcessingTask {
    pub fn new(task_type: TaskType, data: serde_json::Value, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            data,
            priority,
            enqueued_at: now,
            retry_count: 0,
        }
    }
}

/// A device position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Ambient sensor readings used for vibe inference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    #[serde(default)]
    pub noise_db: Option<f64>,
    #[serde(default)]
    pub light_lux: Option<f64>,
    /// Accelerometer magnitude, normalised to 0..1.
    #[serde(default)]
    pub motion: Option<f64>,
    #[serde(default)]
    pub heart_rate_bpm: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Task data for the location, vibe, venue, and combined task types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorSample>,
}

impl AnalysisPayload {
    /// The task type this payload should be queued as.
    ///
    /// Both halves present always means one combined pass, never two
    /// independent ones.
    pub fn task_type(&self) -> Option<TaskType> {
        match (&self.location, &self.sensor) {
            (Some(_), Some(_)) => Some(TaskType::CombinedAnalysis),
            (Some(_), None) => Some(TaskType::LocationUpdate),
            (None, Some(_)) => Some(TaskType::VibeAnalysis),
            (None, None) => None,
        }
    }
}
