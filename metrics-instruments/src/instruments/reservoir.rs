use std::{cell::UnsafeCell, fmt, mem};

use lockfree_object_pool::LinearOwnedReusable;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::{distribution::SampledDistribution, pool::SamplePool};

use super::Sample;

/// Default number of values retained by a [`Reservoir`] or [`Timer`][super::Timer].
pub const DEFAULT_RESERVOIR_SIZE: usize = 1024;

thread_local! {
    static FAST_RNG: UnsafeCell<Xoshiro256StarStar> = {
        UnsafeCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()))
    };
}

fn fastrand(upper: u64) -> u64 {
    FAST_RNG.with(|rng| {
        // SAFETY: The pointer comes from a thread-local value, and the mutable reference never
        // outlives the closure executing on this thread.
        let rng = unsafe { &mut *rng.get() };
        rng.random_range(0..upper)
    })
}

struct State {
    values: LinearOwnedReusable<Vec<f64>>,
    seen: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl State {
    fn new(values: LinearOwnedReusable<Vec<f64>>) -> Self {
        Self { values, seen: 0, sum: 0.0, min: f64::NAN, max: f64::NAN }
    }

    fn push(&mut self, capacity: usize, value: f64) {
        self.seen += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if self.values.len() < capacity {
            self.values.push(value);
        } else {
            // Keep the n-th observation with probability capacity/n, in a uniformly chosen slot.
            let idx = fastrand(self.seen);
            if let Ok(idx) = usize::try_from(idx) {
                if idx < capacity {
                    self.values[idx] = value;
                }
            }
        }
    }
}

/// A uniform sample of observations.
///
/// [Reservoir sampling][rs] keeps a statistically representative sample of a stream of unknown
/// length in fixed space. The first `capacity` observations are all kept; after that, the `n`-th
/// observation replaces a uniformly chosen slot with probability `capacity / n` ([Vitter's
/// "Algorithm R"][vitter_paper]).
///
/// Taking a snapshot swaps the sample buffer for an empty one from the pool and computes the
/// distribution outside of the lock, so producers are only ever blocked for the swap itself.
///
/// NaN observations are ignored.
///
/// [rs]: https://en.wikipedia.org/wiki/Reservoir_sampling
/// [vitter_paper]: https://www.cs.umd.edu/~samir/498/vitter.pdf
pub struct Reservoir {
    capacity: usize,
    pool: SamplePool,
    state: Mutex<State>,
}

impl Reservoir {
    /// Creates a new `Reservoir` retaining up to [`DEFAULT_RESERVOIR_SIZE`] values.
    pub fn new() -> Self {
        Self::with_pool(DEFAULT_RESERVOIR_SIZE, SamplePool::new())
    }

    /// Creates a new `Reservoir` retaining up to `capacity` values.
    ///
    /// A capacity of zero falls back to [`DEFAULT_RESERVOIR_SIZE`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_pool(capacity, SamplePool::new())
    }

    /// Creates a new `Reservoir` retaining up to `capacity` values, drawing its sample buffers
    /// from `pool`.
    ///
    /// A capacity of zero falls back to [`DEFAULT_RESERVOIR_SIZE`].
    pub fn with_pool(capacity: usize, pool: SamplePool) -> Self {
        let capacity = if capacity == 0 { DEFAULT_RESERVOIR_SIZE } else { capacity };
        let state = Mutex::new(State::new(pool.pull()));
        Self { capacity, pool, state }
    }

    /// Gets the maximum number of values retained per interval.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records an observation.
    pub fn update(&self, value: f64) {
        if value.is_nan() {
            return;
        }

        self.state.lock().push(self.capacity, value);
    }

    /// Takes the distribution of the observations recorded since the previous snapshot, and
    /// starts a new, empty sample.
    pub fn snapshot(&self) -> SampledDistribution {
        let fresh = State::new(self.pool.pull());
        let previous = mem::replace(&mut *self.state.lock(), fresh);

        SampledDistribution::new(
            previous.values,
            previous.seen,
            previous.sum,
            previous.min,
            previous.max,
        )
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservoir").field("capacity", &self.capacity).finish_non_exhaustive()
    }
}

impl Sample for Reservoir {
    fn update(&self, value: f64) {
        Reservoir::update(self, value);
    }

    fn snapshot(&self) -> SampledDistribution {
        Reservoir::snapshot(self)
    }
}
