//! Seams to the analysis engines the scheduler drives.
//!
//! The scheduler only decides when and in what order work runs; the real
//! inference, geofencing, and social-graph logic live behind these traits.
//! Errors are passed through to the task outcome unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{LocationSample, SensorSample};

/// Inferred ambience at the device's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeReading {
    /// Label such as `"chill"`, `"social"`, `"energetic"`.
    pub vibe: String,
    /// 0..1
    pub confidence: f64,
    /// 0..1
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceHit {
    pub zone_id: String,
    pub name: String,
    /// Private zones (home, work) suppress location sharing.
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueMatch {
    pub venue_id: String,
    pub name: String,
    pub confidence: f64,
    /// Vibe the venue usually has, when known.
    #[serde(default)]
    pub expected_vibe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProximityUpdate {
    /// Friends currently within discovery range.
    pub nearby_friends: Vec<String>,
}

/// Result of a `location_update` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationAnalysis {
    pub geofences: Vec<GeofenceHit>,
    pub venue: Option<VenueMatch>,
    pub proximity: ProximityUpdate,
}

impl LocationAnalysis {
    pub fn in_private_zone(&self) -> bool {
        self.geofences.iter().any(|g| g.private)
    }
}

#[async_trait]
pub trait VibeEngine: Send + Sync {
    /// Sensor-only inference.
    async fn infer(&self, sensor: &SensorSample) -> anyhow::Result<VibeReading>;

    /// Inference that also weighs where the device is.
    async fn infer_at(&self, sensor: &SensorSample, location: &LocationSample) -> anyhow::Result<VibeReading>;
}

#[async_trait]
pub trait GeofenceService: Send + Sync {
    async fn check_geofences(&self, location: &LocationSample) -> anyhow::Result<Vec<GeofenceHit>>;

    async fn detect_venue(&self, location: &LocationSample) -> anyhow::Result<Option<VenueMatch>>;
}

#[async_trait]
pub trait ProximityService: Send + Sync {
    async fn update_location(&self, location: &LocationSample) -> anyhow::Result<ProximityUpdate>;

    /// Pass-through for raw proximity events (beacon sightings, friend pings).
    async fn handle_event(&self, event: &serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// The engines a scheduler dispatches to.
#[derive(Clone)]
pub struct Collaborators {
    pub vibe: Arc<dyn VibeEngine>,
    pub geofence: Arc<dyn GeofenceService>,
    pub proximity: Arc<dyn ProximityService>,
}

impl Collaborators {
    pub fn new(
        vibe: Arc<dyn VibeEngine>,
        geofence: Arc<dyn GeofenceService>,
        proximity: Arc<dyn ProximityService>,
    ) -> Self {
        Self {
            vibe,
            geofence,
            proximity,
        }
    }
}
