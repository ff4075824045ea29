//! Per-type task handlers.
//!
//! Handlers only decode the payload and dispatch to the collaborators;
//! `combined_analysis` additionally synthesises [`CombinedInsights`].

use serde::{Deserialize, Serialize};

use crate::collaborators::{Collaborators, LocationAnalysis, VenueMatch, VibeReading};
use crate::error::TaskError;
use crate::insights::CombinedInsights;
use crate::types::{AnalysisPayload, LocationSample, ProcessingTask, SensorSample, TaskType};

/// Result of a `combined_analysis` task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedAnalysis {
    pub vibe: VibeReading,
    pub location: LocationAnalysis,
    pub insights: CombinedInsights,
}

/// What a successful task produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOutput {
    LocationUpdate(LocationAnalysis),
    VibeAnalysis(VibeReading),
    ProximityEvent { response: serde_json::Value },
    VenueDetection { venue: Option<VenueMatch> },
    CombinedAnalysis(CombinedAnalysis),
}

impl TaskOutput {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskOutput::LocationUpdate(_) => TaskType::LocationUpdate,
            TaskOutput::VibeAnalysis(_) => TaskType::VibeAnalysis,
            TaskOutput::ProximityEvent { .. } => TaskType::ProximityEvent,
            TaskOutput::VenueDetection { .. } => TaskType::VenueDetection,
            TaskOutput::CombinedAnalysis(_) => TaskType::CombinedAnalysis,
        }
    }
}

/// Run the handler for `task`.
pub async fn dispatch(collaborators: &Collaborators, task: &ProcessingTask) -> Result<TaskOutput, TaskError> {
    match task.task_type {
        TaskType::LocationUpdate => {
            let location = require_location(decode(&task.data)?)?;
            Ok(TaskOutput::LocationUpdate(analyze_location(collaborators, &location).await?))
        }
        TaskType::VibeAnalysis => {
            let sensor = require_sensor(decode(&task.data)?)?;
            Ok(TaskOutput::VibeAnalysis(collaborators.vibe.infer(&sensor).await?))
        }
        TaskType::CombinedAnalysis => {
            let payload = decode(&task.data)?;
            let sensor = payload.sensor.ok_or(TaskError::MissingPayload("sensor"))?;
            let location = payload.location.ok_or(TaskError::MissingPayload("location"))?;
            Ok(TaskOutput::CombinedAnalysis(
                analyze_combined(collaborators, &sensor, &location).await?,
            ))
        }
        TaskType::ProximityEvent => {
            let response = collaborators.proximity.handle_event(&task.data).await?;
            Ok(TaskOutput::ProximityEvent { response })
        }
        TaskType::VenueDetection => {
            let location = require_location(decode(&task.data)?)?;
            let venue = collaborators.geofence.detect_venue(&location).await?;
            Ok(TaskOutput::VenueDetection { venue })
        }
    }
}

/// Geofence check, venue detection, and proximity update for one fix.
async fn analyze_location(
    collaborators: &Collaborators,
    location: &LocationSample,
) -> Result<LocationAnalysis, TaskError> {
    let (geofences, venue, proximity) = tokio::try_join!(
        collaborators.geofence.check_geofences(location),
        collaborators.geofence.detect_venue(location),
        collaborators.proximity.update_location(location),
    )?;
    Ok(LocationAnalysis {
        geofences,
        venue,
        proximity,
    })
}

async fn analyze_combined(
    collaborators: &Collaborators,
    sensor: &SensorSample,
    location: &LocationSample,
) -> Result<CombinedAnalysis, TaskError> {
    let vibe = collaborators.vibe.infer_at(sensor, location).await?;
    let location = analyze_location(collaborators, location).await?;
    let insights = CombinedInsights::synthesize(&vibe, &location);
    Ok(CombinedAnalysis {
        vibe,
        location,
        insights,
    })
}

fn decode(data: &serde_json::Value) -> Result<AnalysisPayload, TaskError> {
    Ok(AnalysisPayload::deserialize(data)?)
}

fn require_location(payload: AnalysisPayload) -> Result<LocationSample, TaskError> {
    payload.location.ok_or(TaskError::MissingPayload("location"))
}

fn require_sensor(payload: AnalysisPayload) -> Result<SensorSample, TaskError> {
    payload.sensor.ok_or(TaskError::MissingPayload("sensor"))
}
