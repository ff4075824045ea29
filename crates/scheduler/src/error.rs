//! Task execution errors.

use std::time::Duration;

use thiserror::Error;

/// Why a single task attempt failed. Every variant counts against the
/// task's retry budget.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task payload could not be decoded: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("task payload is missing `{0}`")]
    MissingPayload(&'static str),

    /// A collaborator failed; its error is kept unchanged.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error("task handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("task handler panicked: {0}")]
    Panicked(String),
}
