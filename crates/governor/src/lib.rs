//! Process wiring for the write breaker and the analysis scheduler.
//!
//! [`GovernorConfig`] loads both components' settings from one TOML file,
//! [`Governor`] owns one instance of each, and the [`soak`] module drives
//! synthetic traffic through them for the `pulse-governor` binary.

pub mod config;
pub mod error;
pub mod governor;
pub mod simulated;
pub mod soak;

pub use config::{GovernorConfig, SoakConfig};
pub use error::GovernorConfigError;
pub use governor::{Governor, GovernorSnapshot};
pub use simulated::{SimulatedEngines, SimulatedStore, StoreError};
pub use soak::{SoakRunner, SoakSummary};
