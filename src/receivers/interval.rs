//! Exponential back-off for polling that keeps coming back empty.

use std::time::Duration;

/// Growth factor applied per empty poll
pub const BACKOFF_FACTOR: f64 = 1.75;

/// Interval bounded by `[min, max]` that grows as `min * 1.75^runs`.
///
/// Once the maximum is reached further calls to
/// [`calculate_new_interval`](Self::calculate_new_interval) change nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRequest {
    min_interval: Duration,
    max_interval: Duration,
    current_interval: Duration,
    runs: u32,
}

impl IntervalRequest {
    /// A `max` below `min` is raised to `min`
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval: max_interval.max(min_interval),
            current_interval: min_interval,
            runs: 0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn is_at_max(&self) -> bool {
        self.current_interval >= self.max_interval
    }

    /// Grow the interval after an empty poll and return it
    pub fn calculate_new_interval(&mut self) -> Duration {
        if self.is_at_max() {
            return self.current_interval;
        }

        self.runs = self.runs.saturating_add(1);
        let exponent = i32::try_from(self.runs).unwrap_or(i32::MAX);
        let seconds = self.min_interval.as_secs_f64() * BACKOFF_FACTOR.powi(exponent);

        self.current_interval = if seconds.is_finite() && seconds < self.max_interval.as_secs_f64() {
            Duration::from_secs_f64(seconds)
        } else {
            self.max_interval
        };
        self.current_interval
    }

    /// Back to the minimum after a poll that produced work
    pub fn reset_interval(&mut self) {
        self.current_interval = self.min_interval;
        self.runs = 0;
    }
}
