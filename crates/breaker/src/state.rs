//! Circuit state machine.
//!
//! Automatic edges:
//!
//! ```text
//! CLOSED ──failures ≥ threshold──▶ OPEN ──reset timeout──▶ HALF_OPEN
//!   ▲                               ▲                          │
//!   └────── ≥ N trial successes ────┼──────────────────────────┤
//!                                   └──── any trial failure ───┘
//! ```
//!
//! Manual overrides (`force`) may jump between any two states.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::clock::elapsed_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing fast; only high-priority writes are queued.
    Open,
    /// Probing whether the backend recovered.
    HalfOpen,
}

impl CircuitState {
    /// Whether the automatic state machine may move from `self` to `to`.
    pub fn can_transition_to(self, to: CircuitState) -> bool {
        matches!(
            (self, to),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// A state change that just happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Thresholds the tracker needs from the breaker config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Thresholds {
    pub failure_threshold: u32,
    pub half_open_successes: u32,
    pub reset_timeout: Duration,
}

/// Owns the circuit state and the counters that drive it.
#[derive(Debug, Clone)]
pub(crate) struct CircuitTracker {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    trial_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    created_at: DateTime<Utc>,
    /// Time spent OPEN in already-closed intervals.
    open_time: Duration,
}

impl CircuitTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            trial_successes: 0,
            opened_at: None,
            last_state_change: now,
            created_at: now,
            open_time: Duration::ZERO,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Record a successful attempt.
    ///
    /// CLOSED resets the consecutive-failure count; HALF_OPEN decays it and
    /// closes once enough trial successes accumulate.
    pub fn record_success(&mut self, now: DateTime<Utc>, t: Thresholds) -> Option<Transition> {
        self.success_count += 1;
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.failure_count = self.failure_count.saturating_sub(1);
                self.trial_successes += 1;
                if self.trial_successes >= t.half_open_successes {
                    self.enter(CircuitState::Closed, now)
                } else {
                    None
                }
            }
            // Late completion of an attempt launched before the circuit opened.
            CircuitState::Open => None,
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, now: DateTime<Utc>, t: Thresholds) -> Option<Transition> {
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            CircuitState::Closed if self.failure_count >= t.failure_threshold => {
                self.enter(CircuitState::Open, now)
            }
            CircuitState::HalfOpen => self.enter(CircuitState::Open, now),
            _ => None,
        }
    }

    /// Time-driven edges, evaluated every tick.
    pub fn evaluate(&mut self, now: DateTime<Utc>, t: Thresholds) -> Option<Transition> {
        match self.state {
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(self.last_state_change);
                if elapsed_between(opened_at, now) >= t.reset_timeout {
                    self.enter(CircuitState::HalfOpen, now)
                } else {
                    None
                }
            }
            CircuitState::Closed if self.failure_count >= t.failure_threshold => {
                self.enter(CircuitState::Open, now)
            }
            _ => None,
        }
    }

    /// Manual override. Returns `None` if already in `to`.
    pub fn force(&mut self, to: CircuitState, now: DateTime<Utc>) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        Some(self.apply(to, now))
    }

    fn enter(&mut self, to: CircuitState, now: DateTime<Utc>) -> Option<Transition> {
        if !self.state.can_transition_to(to) {
            return None;
        }
        Some(self.apply(to, now))
    }

    fn apply(&mut self, to: CircuitState, now: DateTime<Utc>) -> Transition {
        let from = self.state;
        if from == CircuitState::Open {
            if let Some(opened_at) = self.opened_at.take() {
                self.open_time += elapsed_between(opened_at, now);
            }
        }
        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {}
        }
        self.trial_successes = 0;
        self.state = to;
        self.last_state_change = now;
        Transition { from, to }
    }

    /// Share of lifetime spent outside OPEN, in percent.
    ///
    /// Approximate health indicator only; not an SLA figure.
    pub fn uptime_percentage(&self, now: DateTime<Utc>) -> f64 {
        let lifetime = elapsed_between(self.created_at, now);
        if lifetime.is_zero() {
            return 100.0;
        }
        let mut open = self.open_time;
        if let Some(opened_at) = self.opened_at {
            open += elapsed_between(opened_at, now);
        }
        let ratio = open.as_secs_f64() / lifetime.as_secs_f64();
        ((1.0 - ratio) * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Clock, ManualClock};

    fn thresholds() -> Thresholds {
        Thresholds {
            failure_threshold: 5,
            half_open_successes: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn only_defined_edges_are_automatic() {
        use CircuitState::*;
        assert!(Closed.can_transition_to(Open));
        assert!(Open.can_transition_to(HalfOpen));
        assert!(HalfOpen.can_transition_to(Closed));
        assert!(HalfOpen.can_transition_to(Open));
        assert!(!Closed.can_transition_to(HalfOpen));
        assert!(!Open.can_transition_to(Closed));
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        for _ in 0..4 {
            assert_eq!(tracker.record_failure(clock.now(), thresholds()), None);
        }
        let t = tracker.record_failure(clock.now(), thresholds());
        assert_eq!(t, Some(Transition { from: CircuitState::Closed, to: CircuitState::Open }));
        assert_eq!(tracker.opened_at(), Some(clock.now()));
    }

    #[test]
    fn success_in_closed_resets_consecutive_failures() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        for _ in 0..4 {
            tracker.record_failure(clock.now(), thresholds());
        }
        tracker.record_success(clock.now(), thresholds());
        assert_eq!(tracker.failure_count(), 0);
        assert_eq!(tracker.record_failure(clock.now(), thresholds()), None);
        assert_eq!(tracker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        tracker.force(CircuitState::Open, clock.now());

        clock.advance(Duration::from_secs(59));
        assert_eq!(tracker.evaluate(clock.now(), thresholds()), None);

        clock.advance(Duration::from_secs(1));
        let t = tracker.evaluate(clock.now(), thresholds());
        assert_eq!(t.map(|t| t.to), Some(CircuitState::HalfOpen));
    }

    #[test]
    fn half_open_closes_after_trial_successes() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        tracker.force(CircuitState::HalfOpen, clock.now());

        assert_eq!(tracker.record_success(clock.now(), thresholds()), None);
        assert_eq!(tracker.record_success(clock.now(), thresholds()), None);
        let t = tracker.record_success(clock.now(), thresholds());
        assert_eq!(t.map(|t| t.to), Some(CircuitState::Closed));
        assert_eq!(tracker.failure_count(), 0);
    }

    #[test]
    fn any_failure_in_half_open_reopens() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        tracker.force(CircuitState::HalfOpen, clock.now());
        tracker.record_success(clock.now(), thresholds());
        tracker.record_success(clock.now(), thresholds());

        let t = tracker.record_failure(clock.now(), thresholds());
        assert_eq!(t.map(|t| t.to), Some(CircuitState::Open));

        // Trial successes do not carry over into the next probation.
        clock.advance(Duration::from_secs(60));
        tracker.evaluate(clock.now(), thresholds());
        assert_eq!(tracker.state(), CircuitState::HalfOpen);
        assert_eq!(tracker.record_success(clock.now(), thresholds()), None);
    }

    #[test]
    fn uptime_tracks_open_intervals() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        clock.advance(Duration::from_secs(30));
        tracker.force(CircuitState::Open, clock.now());
        clock.advance(Duration::from_secs(10));
        assert!((tracker.uptime_percentage(clock.now()) - 75.0).abs() < 1e-9);

        tracker.force(CircuitState::Closed, clock.now());
        clock.advance(Duration::from_secs(40));
        assert!((tracker.uptime_percentage(clock.now()) - 87.5).abs() < 1e-9);
    }

    #[test]
    fn force_to_same_state_is_noop() {
        let clock = ManualClock::fixed();
        let mut tracker = CircuitTracker::new(clock.now());
        assert_eq!(tracker.force(CircuitState::Closed, clock.now()), None);
    }
}
