use crate::atomics::AtomicF64;

use super::Discrete;

/// A point-in-time value.
///
/// The last update wins, and snapshots do not reset the value.
pub struct Gauge {
    value: AtomicF64,
}

impl Gauge {
    /// Creates a new `Gauge` set to zero.
    pub fn new() -> Self {
        Self { value: AtomicF64::new(0.0) }
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: f64) {
        self.value.store(value);
    }

    /// Gets the current value.
    pub fn snapshot(&self) -> f64 {
        self.value.load()
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Discrete for Gauge {
    fn update(&self, value: f64) {
        Gauge::update(self, value);
    }

    fn snapshot(&self) -> f64 {
        Gauge::snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::Gauge;

    #[test]
    fn last_write_wins() {
        let gauge = Gauge::new();
        assert_eq!(gauge.snapshot(), 0.0);

        gauge.update(7.0);
        gauge.update(12.0);
        assert_eq!(gauge.snapshot(), 12.0);
        assert_eq!(gauge.snapshot(), 12.0);

        gauge.update(-3.5);
        assert_eq!(gauge.snapshot(), -3.5);
    }

    #[test]
    fn update_concurrently() {
        let gauge = Arc::new(Gauge::new());
        let handles = (0..2)
            .map(|_| {
                let gauge = Arc::clone(&gauge);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        gauge.update(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("updater panicked");
        }

        assert_eq!(gauge.snapshot(), 1.0);
    }
}
