use std::time::Duration;

use quanta::{Clock, Instant};

use crate::{distribution::SampledDistribution, pool::SamplePool};

use super::{Reservoir, Sample, DEFAULT_RESERVOIR_SIZE};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// A distribution of durations, recorded in milliseconds.
///
/// Timers behave like a [`Reservoir`] fed with durations converted to fractional milliseconds.
pub struct Timer {
    reservoir: Reservoir,
    clock: Clock,
}

impl Timer {
    /// Creates a new `Timer` retaining up to [`DEFAULT_RESERVOIR_SIZE`] durations.
    pub fn new() -> Self {
        Self::from_parts(DEFAULT_RESERVOIR_SIZE, SamplePool::new(), Clock::new())
    }

    /// Creates a new `Timer` retaining up to `capacity` durations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_parts(capacity, SamplePool::new(), Clock::new())
    }

    /// Creates a new `Timer` measuring time with the given clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self::from_parts(DEFAULT_RESERVOIR_SIZE, SamplePool::new(), clock)
    }

    /// Creates a new `Timer` from its parts.
    ///
    /// A capacity of zero falls back to [`DEFAULT_RESERVOIR_SIZE`].
    pub fn from_parts(capacity: usize, pool: SamplePool, clock: Clock) -> Self {
        Self { reservoir: Reservoir::with_pool(capacity, pool), clock }
    }

    /// Records a duration.
    pub fn update(&self, duration: Duration) {
        self.reservoir.update(duration.as_nanos() as f64 / NANOS_PER_MILLI);
    }

    /// Gets the current time, as a start point for [`since`](Timer::since).
    pub fn start(&self) -> Instant {
        self.clock.now()
    }

    /// Records the time elapsed since `start`, and returns it.
    pub fn since(&self, start: Instant) -> Duration {
        let elapsed = self.clock.now().duration_since(start);
        self.update(elapsed);
        elapsed
    }

    /// Takes the distribution of the durations recorded since the previous snapshot, in
    /// milliseconds.
    pub fn snapshot(&self) -> SampledDistribution {
        self.reservoir.snapshot()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sample for Timer {
    /// Records a duration given in milliseconds. Negative or non-finite values are ignored.
    fn update(&self, value: f64) {
        if value.is_finite() && value >= 0.0 {
            self.reservoir.update(value);
        }
    }

    fn snapshot(&self) -> SampledDistribution {
        Timer::snapshot(self)
    }
}
