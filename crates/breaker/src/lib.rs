//! Write-path circuit breaker.
//!
//! [`WriteCircuitBreaker`] admits, queues, retries, and sheds asynchronous
//! write operations so a burst of client writes cannot overwhelm the shared
//! backend. Admission runs synchronously at submission; a periodic tick
//! drains the queue by priority under a concurrency cap while a
//! CLOSED / OPEN / HALF_OPEN state machine halts traffic to a failing store.

pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod operation;
pub mod state;

pub use breaker::WriteCircuitBreaker;
pub use config::{BreakerConfig, PriorityPolicies, PriorityPolicy};
pub use error::BreakerError;
pub use metrics::{BreakerDebugInfo, BreakerStatus, CircuitMetrics, OperationSummary};
pub use operation::{PendingWrite, WriteMetadata};
pub use state::CircuitState;

pub use pulse_core::Priority;
