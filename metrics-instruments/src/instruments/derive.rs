use quanta::Clock;

use crate::atomics::AtomicF64;

use super::{Discrete, Rate};

/// The rate of change of a value.
///
/// Updates replace the tracked value. Taking a snapshot returns how fast the value changed, per
/// second, since the previous snapshot. The value given at construction serves as the baseline
/// for the first snapshot.
///
/// This is useful for values that are only available as running totals, such as byte counters
/// read from the operating system.
pub struct Derive {
    value: AtomicF64,
    rate: Rate,
}

impl Derive {
    /// Creates a new `Derive` with the given baseline value.
    pub fn new(initial: f64) -> Self {
        Self::with_clock(initial, Clock::new())
    }

    /// Creates a new `Derive` with the given baseline value, measuring time with the given clock.
    pub fn with_clock(initial: f64, clock: Clock) -> Self {
        Self { value: AtomicF64::new(initial), rate: Rate::with_clock(clock) }
    }

    /// Replaces the tracked value with `value`.
    pub fn update(&self, value: f64) {
        let previous = self.value.swap(value);
        self.rate.update(value - previous);
    }

    /// Gets the per-second change since the previous snapshot, and makes the current value the
    /// new baseline.
    pub fn snapshot(&self) -> f64 {
        self.rate.snapshot()
    }
}

impl Default for Derive {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Discrete for Derive {
    fn update(&self, value: f64) {
        Derive::update(self, value);
    }

    fn snapshot(&self) -> f64 {
        Derive::snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use approx::assert_relative_eq;
    use quanta::Clock;

    use super::Derive;

    #[test]
    fn rate_of_change() {
        let (clock, mock) = Clock::mock();
        let derive = Derive::with_clock(10.0, clock);

        derive.update(7.0);
        mock.increment(Duration::from_millis(10));
        derive.update(12.0);
        assert_relative_eq!(derive.snapshot(), 200.0, max_relative = 1e-9);

        // The baseline moved to 12.
        derive.update(15.0);
        mock.increment(Duration::from_secs(2));
        assert_relative_eq!(derive.snapshot(), 1.5, max_relative = 1e-9);

        mock.increment(Duration::from_secs(1));
        assert_eq!(derive.snapshot(), 0.0);
    }

    #[test]
    fn update_concurrently() {
        let derive = Arc::new(Derive::new(10.0));
        let handles = (0..2)
            .map(|_| {
                let derive = Arc::clone(&derive);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        derive.update(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("updater panicked");
        }

        thread::sleep(Duration::from_millis(1));
        assert!(derive.snapshot() < 0.0);
    }
}
