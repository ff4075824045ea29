//! Bounded sample windows used for governor metrics.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A fixed-size ring buffer backed by `VecDeque`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity (at least one slot).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Iterate over items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl RingBuffer<Duration> {
    /// Mean of the stored durations, zero when empty.
    pub fn mean(&self) -> Duration {
        if self.buf.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.buf.iter().sum();
        total / self.buf.len() as u32
    }
}

/// Timestamps of events inside a trailing time window.
///
/// Samples are appended in clock order; `purge` drops everything older than
/// the window so memory stays bounded between reads.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<DateTime<Utc>>,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.samples.push_back(at);
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Drop samples that fell out of the window. Returns how many were dropped.
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.samples.len();
        self.samples.retain(|at| *at > cutoff);
        before - self.samples.len()
    }

    /// Samples inside the window as of `now`, without mutating.
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        self.samples.iter().filter(|at| **at > cutoff).count()
    }

    /// Events per second averaged over the whole window.
    pub fn rate_per_sec(&self, now: DateTime<Utc>) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.count(now) as f64 / secs
    }

    /// Raw number of retained samples, including any not yet purged.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    #[test]
    fn ring_buffer_respects_capacity() {
        let mut ring = RingBuffer::new(3);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.push(4);
        assert_eq!(ring.len(), 3);

        let items: Vec<_> = ring.iter().cloned().collect();
        assert_eq!(items, vec![2, 3, 4]);
    }

    #[test]
    fn ring_buffer_zero_capacity_keeps_one() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.iter().next(), Some(&"b"));
    }

    #[test]
    fn duration_mean() {
        let mut ring = RingBuffer::new(100);
        assert_eq!(ring.mean(), Duration::ZERO);
        ring.push(Duration::from_millis(100));
        ring.push(Duration::from_millis(200));
        assert_eq!(ring.mean(), Duration::from_millis(150));
    }

    #[test]
    fn sliding_window_rate_and_purge() {
        let clock = ManualClock::fixed();
        let mut window = SlidingWindow::new(Duration::from_secs(10));

        for _ in 0..5 {
            window.record(clock.now());
        }
        assert_eq!(window.count(clock.now()), 5);
        assert!((window.rate_per_sec(clock.now()) - 0.5).abs() < f64::EPSILON);

        clock.advance(Duration::from_secs(6));
        window.record(clock.now());
        assert_eq!(window.count(clock.now()), 6);

        clock.advance(Duration::from_secs(5));
        // The first five samples are now 11s old.
        assert_eq!(window.count(clock.now()), 1);
        assert_eq!(window.len(), 6);
        assert_eq!(window.purge(clock.now()), 5);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn sliding_window_zero_width_has_no_rate() {
        let clock = ManualClock::fixed();
        let mut window = SlidingWindow::new(Duration::ZERO);
        window.record(clock.now());
        assert_eq!(window.rate_per_sec(clock.now()), 0.0);
    }
}
