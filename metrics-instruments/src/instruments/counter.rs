use crate::atomics::AtomicF64;

use super::Discrete;

/// An accumulator that resets on every snapshot.
///
/// Updates add to the running total. Taking a snapshot returns the total accumulated since the
/// previous snapshot and resets it to zero, so each flush reports the activity of one interval.
pub struct Counter {
    value: AtomicF64,
}

impl Counter {
    /// Creates a new `Counter` starting at zero.
    pub fn new() -> Self {
        Self { value: AtomicF64::new(0.0) }
    }

    /// Adds `value` to the counter.
    pub fn update(&self, value: f64) {
        self.value.fetch_add(value);
    }

    /// Returns the accumulated total and resets it to zero.
    pub fn snapshot(&self) -> f64 {
        self.value.swap(0.0)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Discrete for Counter {
    fn update(&self, value: f64) {
        Counter::update(self, value);
    }

    fn snapshot(&self) -> f64 {
        Counter::snapshot(self)
    }
}
