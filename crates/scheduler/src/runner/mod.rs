//! Task scheduler runner -- queue, ticker, and batch execution.
//!
//! Split into focused submodules:
//! - `core`: TaskScheduler struct, constructor, task intake, lifecycle, and snapshots
//! - `scheduling`: batch selection with the periodic priority boost
//! - `execution`: one tick: all-settled batch fan-out, retry bookkeeping, load feedback

mod core;
mod execution;
mod scheduling;
#[cfg(test)]
mod tests;

pub use self::core::TaskScheduler;
