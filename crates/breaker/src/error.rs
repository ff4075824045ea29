//! Breaker error types.

use std::time::Duration;

use thiserror::Error;

/// Terminal outcome of a rejected or failed write.
///
/// Admission errors (`CircuitOpen`, `Overloaded`, `QueueFull`) are returned
/// synchronously and never retried internally. `Execution`, `TimedOut`, and
/// `Panicked` are surfaced after the priority's retry budget is spent.
#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit is open, rejecting non-critical write")]
    CircuitOpen,

    #[error("write path overloaded (active={active}, rate={rate:.2}/s, queued={queued})")]
    Overloaded { active: usize, rate: f64, queued: usize },

    #[error("write queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Execution(anyhow::Error),

    #[error("write attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("write attempt panicked: {0}")]
    Panicked(String),

    #[error("write cancelled")]
    Cancelled,

    #[error("circuit breaker destroyed")]
    Destroyed,
}

impl BreakerError {
    /// True for rejections decided at submission time.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            BreakerError::CircuitOpen | BreakerError::Overloaded { .. } | BreakerError::QueueFull { .. }
        )
    }

    /// True for attempt failures that count against the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BreakerError::Execution(_) | BreakerError::TimedOut(_) | BreakerError::Panicked(_)
        )
    }

    /// The operation's own error, if this is an execution failure.
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        match self {
            BreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("row conflict on {0}")]
    struct RowConflict(String);

    #[test]
    fn classification() {
        assert!(BreakerError::CircuitOpen.is_admission());
        assert!(BreakerError::QueueFull { capacity: 1 }.is_admission());
        assert!(!BreakerError::Destroyed.is_admission());
        assert!(BreakerError::TimedOut(Duration::from_secs(1)).is_retryable());
        assert!(BreakerError::Panicked("boom".into()).is_retryable());
        assert!(!BreakerError::Panicked("boom".into()).is_admission());
        assert!(!BreakerError::Cancelled.is_retryable());
    }

    #[test]
    fn execution_error_is_surfaced_verbatim() {
        let err = BreakerError::Execution(RowConflict("venues/42".into()).into());
        assert_eq!(err.to_string(), "row conflict on venues/42");
        let original = err.source_error().and_then(|e| e.downcast_ref::<RowConflict>());
        assert_eq!(original.map(|c| c.0.as_str()), Some("venues/42"));
    }
}
