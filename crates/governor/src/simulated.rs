//! In-process stand-ins for the store and the analysis engines, used by the
//! soak binary and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use pulse_scheduler::{
    GeofenceHit, GeofenceService, LocationSample, ProximityService, ProximityUpdate, SensorSample, VenueMatch,
    VibeEngine, VibeReading,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store rejected write #{0}")]
    Rejected(u64),
}

/// A backing store with fixed latency that fails every `fail_every`th write.
#[derive(Debug)]
pub struct SimulatedStore {
    latency: Duration,
    fail_every: u64,
    writes: AtomicU64,
}

impl SimulatedStore {
    pub fn new(latency: Duration, fail_every: u64) -> Self {
        Self {
            latency,
            fail_every,
            writes: AtomicU64::new(0),
        }
    }

    pub async fn write(&self, key: u64) -> Result<u64, StoreError> {
        tokio::time::sleep(self.latency).await;
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(StoreError::Rejected(n));
        }
        Ok(key)
    }

    /// Attempts that reached the store.
    pub fn attempts(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Home zone used by the simulated geofence.
const HOME: (f64, f64) = (52.5200, 13.4050);
const ZONE_RADIUS_DEG: f64 = 0.0005;

/// Deterministic engines: vibe follows noise and motion, a single private
/// "home" zone, and one venue per ~100m grid cell.
#[derive(Debug, Default)]
pub struct SimulatedEngines {
    events: AtomicU64,
}

impl SimulatedEngines {
    fn read(sensor: &SensorSample) -> VibeReading {
        let noise = (sensor.noise_db.unwrap_or(45.0) / 100.0).clamp(0.0, 1.0);
        let motion = sensor.motion.unwrap_or(0.2).clamp(0.0, 1.0);
        let energy = 0.6 * noise + 0.4 * motion;
        let vibe = match energy {
            e if e >= 0.7 => "energetic",
            e if e >= 0.4 => "social",
            _ => "chill",
        };
        VibeReading {
            vibe: vibe.into(),
            confidence: if sensor.noise_db.is_some() { 0.8 } else { 0.5 },
            energy,
        }
    }

    fn at_home(location: &LocationSample) -> bool {
        (location.latitude - HOME.0).abs() < ZONE_RADIUS_DEG && (location.longitude - HOME.1).abs() < ZONE_RADIUS_DEG
    }

    fn cell(location: &LocationSample) -> (i64, i64) {
        ((location.latitude * 1_000.0).round() as i64, (location.longitude * 1_000.0).round() as i64)
    }
}

#[async_trait]
impl VibeEngine for SimulatedEngines {
    async fn infer(&self, sensor: &SensorSample) -> anyhow::Result<VibeReading> {
        Ok(Self::read(sensor))
    }

    async fn infer_at(&self, sensor: &SensorSample, location: &LocationSample) -> anyhow::Result<VibeReading> {
        let mut reading = Self::read(sensor);
        if Self::at_home(location) {
            reading.vibe = "chill".into();
            reading.energy = reading.energy.min(0.3);
        }
        reading.confidence = (reading.confidence + 0.1).min(1.0);
        Ok(reading)
    }
}

#[async_trait]
impl GeofenceService for SimulatedEngines {
    async fn check_geofences(&self, location: &LocationSample) -> anyhow::Result<Vec<GeofenceHit>> {
        if !Self::at_home(location) {
            return Ok(Vec::new());
        }
        Ok(vec![GeofenceHit {
            zone_id: "home".into(),
            name: "Home".into(),
            private: true,
        }])
    }

    async fn detect_venue(&self, location: &LocationSample) -> anyhow::Result<Option<VenueMatch>> {
        if Self::at_home(location) {
            return Ok(None);
        }
        let (lat, lon) = Self::cell(location);
        let expected = if (lat + lon) % 2 == 0 { "social" } else { "chill" };
        Ok(Some(VenueMatch {
            venue_id: format!("venue-{lat}-{lon}"),
            name: format!("Venue {lat}/{lon}"),
            confidence: 0.7,
            expected_vibe: Some(expected.into()),
        }))
    }
}

#[async_trait]
impl ProximityService for SimulatedEngines {
    async fn update_location(&self, location: &LocationSample) -> anyhow::Result<ProximityUpdate> {
        let (lat, _) = Self::cell(location);
        let nearby_friends = match lat.rem_euclid(3) {
            0 => Vec::new(),
            1 => vec!["sam".into()],
            _ => vec!["sam".into(), "kit".into()],
        };
        Ok(ProximityUpdate { nearby_friends })
    }

    async fn handle_event(&self, event: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let seq = self.events.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(json!({ "ack": seq, "event": event }))
    }
}
