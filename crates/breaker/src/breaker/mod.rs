//! Circuit breaker runtime -- queue, ticker, and execution.
//!
//! Split into focused submodules:
//! - `core`: shared state, constructor, lifecycle, manual overrides, and snapshots
//! - `admission`: synchronous admission control and enqueueing
//! - `execution`: per-tick selection, concurrent launch, retry, and completion

mod admission;
mod core;
mod execution;

pub use self::core::WriteCircuitBreaker;
