//! Lock-free floating-point cells.
//!
//! The standard library has no atomic `f64`, so values are stored as their bit pattern in an
//! `AtomicU64` and read-modify-write operations go through a compare-and-swap loop.
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

#[cfg(target_pointer_width = "32")]
use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
use std::sync::atomic::AtomicU64;

pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Release);
    }

    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.0.swap(value.to_bits(), AcqRel))
    }

    /// Adds `value` to the cell, returning the previous value.
    pub fn fetch_add(&self, value: f64) -> f64 {
        // The closure never returns `None`, so the update always lands eventually.
        let result = self.0.fetch_update(AcqRel, Relaxed, |current| {
            Some((f64::from_bits(current) + value).to_bits())
        });

        match result {
            Ok(previous) | Err(previous) => f64::from_bits(previous),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::AtomicF64;

    #[test]
    fn basic() {
        let cell = AtomicF64::new(1.5);
        assert_eq!(cell.load(), 1.5);

        assert_eq!(cell.fetch_add(2.0), 1.5);
        assert_eq!(cell.load(), 3.5);

        assert_eq!(cell.swap(-1.0), 3.5);
        cell.store(42.0);
        assert_eq!(cell.load(), 42.0);
    }

    #[test]
    fn fetch_add_is_not_lossy() {
        let cell = Arc::new(AtomicF64::new(0.0));
        let handles = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        cell.fetch_add(1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().expect("updater panicked");
        }

        assert_eq!(cell.load(), 40_000.0);
    }
}
