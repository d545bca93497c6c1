use std::{sync::atomic::Ordering::AcqRel, time::Duration};

#[cfg(target_pointer_width = "32")]
use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
use std::sync::atomic::AtomicU64;

use quanta::{Clock, Instant};

use super::{Counter, Discrete};

const DEFAULT_UNIT: Duration = Duration::from_secs(1);

/// A throughput measurement.
///
/// Updates accumulate observed amounts. Taking a snapshot divides the amount accumulated since
/// the previous snapshot (or since creation) by the time elapsed over the same period, expressed
/// in the rate's unit, then resets both the amount and the baseline time.
///
/// When no time has elapsed since the previous snapshot, the snapshot is zero and the accumulated
/// amount carries over to the next one.
pub struct Rate {
    clock: Clock,
    origin: Instant,
    // Nanoseconds since `origin` at the previous snapshot.
    last: AtomicU64,
    unit_nanos: f64,
    count: Counter,
}

impl Rate {
    /// Creates a new `Rate` reported per second.
    pub fn new() -> Self {
        Self::from_clock(Clock::new(), DEFAULT_UNIT)
    }

    /// Creates a new `Rate` reported per `unit`.
    ///
    /// A zero unit falls back to one second.
    pub fn with_unit(unit: Duration) -> Self {
        Self::from_clock(Clock::new(), unit)
    }

    /// Creates a new `Rate` reported per second, measuring time with the given clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self::from_clock(clock, DEFAULT_UNIT)
    }

    /// Creates a new `Rate` reported per `unit`, measuring time with the given clock.
    pub fn from_clock(clock: Clock, unit: Duration) -> Self {
        let unit = if unit.is_zero() { DEFAULT_UNIT } else { unit };
        let origin = clock.now();

        Self {
            clock,
            origin,
            last: AtomicU64::new(0),
            unit_nanos: unit.as_nanos() as f64,
            count: Counter::new(),
        }
    }

    /// Records `value` as observed now.
    pub fn update(&self, value: f64) {
        self.count.update(value);
    }

    /// Gets the rate since the previous snapshot and resets the accumulated amount.
    pub fn snapshot(&self) -> f64 {
        let now = self.elapsed_nanos();
        let previous = self.last.swap(now, AcqRel);
        let elapsed = now.saturating_sub(previous);
        if elapsed == 0 {
            return 0.0;
        }

        self.count.snapshot() / (elapsed as f64 / self.unit_nanos)
    }

    fn elapsed_nanos(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.origin);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::new()
    }
}

impl Discrete for Rate {
    fn update(&self, value: f64) {
        Rate::update(self, value);
    }

    fn snapshot(&self) -> f64 {
        Rate::snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use approx::assert_relative_eq;
    use quanta::Clock;

    use super::Rate;

    #[test]
    fn per_second() {
        let (clock, mock) = Clock::mock();
        let rate = Rate::with_clock(clock);
        assert_eq!(rate.snapshot(), 0.0);

        rate.update(100.0);
        mock.increment(Duration::from_millis(10));
        assert_relative_eq!(rate.snapshot(), 10_000.0, max_relative = 1e-9);

        rate.update(100.0);
        mock.increment(Duration::from_millis(1));
        assert_relative_eq!(rate.snapshot(), 100_000.0, max_relative = 1e-9);

        // Nothing was observed since the last snapshot.
        mock.increment(Duration::from_secs(1));
        assert_eq!(rate.snapshot(), 0.0);
    }

    #[test]
    fn custom_unit() {
        let (clock, mock) = Clock::mock();
        let rate = Rate::from_clock(clock, Duration::from_secs(60));

        rate.update(30.0);
        mock.increment(Duration::from_secs(30));
        assert_relative_eq!(rate.snapshot(), 60.0, max_relative = 1e-9);
    }

    #[test]
    fn no_elapsed_time_carries_over() {
        let (clock, mock) = Clock::mock();
        let rate = Rate::with_clock(clock);

        rate.update(5.0);
        assert_eq!(rate.snapshot(), 0.0);

        mock.increment(Duration::from_secs(1));
        assert_relative_eq!(rate.snapshot(), 5.0, max_relative = 1e-9);
    }

    #[test]
    fn update_concurrently() {
        let rate = Arc::new(Rate::new());
        let handles = (0..2)
            .map(|_| {
                let rate = Arc::clone(&rate);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        rate.update(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("updater panicked");
        }

        thread::sleep(Duration::from_millis(1));
        assert!(rate.snapshot() > 0.0);
    }
}
