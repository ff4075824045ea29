//! Background analysis scheduler.
//!
//! [`TaskScheduler`] batches location, sensor ("vibe"), proximity, and venue
//! analysis work behind a periodic tick. Batch size adapts to a synthetic
//! system-load estimate, every few cycles favour high-priority work, and
//! each task is retried a bounded number of times before it is dropped.
//! The actual analysis is delegated to the [`Collaborators`] passed in at
//! construction.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod handlers;
pub mod insights;
pub mod runner;
pub mod stats;
pub mod types;

pub use collaborators::{
    Collaborators, GeofenceHit, GeofenceService, LocationAnalysis, ProximityService, ProximityUpdate,
    VenueMatch, VibeEngine, VibeReading,
};
pub use config::SchedulerConfig;
pub use error::TaskError;
pub use handlers::{CombinedAnalysis, TaskOutput};
pub use insights::{CombinedInsights, PrivacyAdjustment, Recommendation, SocialOpportunity, VibeAlignment};
pub use runner::TaskScheduler;
pub use stats::{BatchReport, CompletedTask, ProcessingStats, QueueStatus, SchedulerDebugInfo, TaskOutcome};
pub use types::{AnalysisPayload, LocationSample, ProcessingTask, SensorSample, TaskId, TaskType};

pub use pulse_core::Priority;
