//! Distributions of observations.
use std::fmt;

use lockfree_object_pool::LinearOwnedReusable;
use sketches_ddsketch::{Config, DDSketch};

use crate::pool::SamplePool;

/// A read-only summary of a batch of observations.
///
/// Accessors on an empty distribution, or statistics that are undefined for the number of
/// observations available (such as the variance of a single observation), return NaN. Wrap a
/// distribution in [`Normalized`] to map those to zero.
pub trait Distribution {
    /// Number of observations.
    fn count(&self) -> u64;

    /// Smallest observed value.
    fn min(&self) -> f64;

    /// Largest observed value.
    fn max(&self) -> f64;

    /// Sum of all observed values.
    fn sum(&self) -> f64;

    /// Arithmetic mean of all observed values.
    fn mean(&self) -> f64;

    /// Estimated value at quantile `q`, where `q` is between 0.0 and 1.0 inclusive.
    fn quantile(&self, q: f64) -> f64;

    /// Sample variance of the observed values.
    fn variance(&self) -> f64;
}

impl<D> Distribution for &D
where
    D: Distribution + ?Sized,
{
    fn count(&self) -> u64 {
        (**self).count()
    }

    fn min(&self) -> f64 {
        (**self).min()
    }

    fn max(&self) -> f64 {
        (**self).max()
    }

    fn sum(&self) -> f64 {
        (**self).sum()
    }

    fn mean(&self) -> f64 {
        (**self).mean()
    }

    fn quantile(&self, q: f64) -> f64 {
        (**self).quantile(q)
    }

    fn variance(&self) -> f64 {
        (**self).variance()
    }
}

/// A distribution that never yields NaN or infinite values.
///
/// Every accessor that would return NaN or ±Infinity on the wrapped distribution returns zero
/// instead. [`Distribution::count`] passes through unchanged. Registries wrap every distribution
/// in this before handing it to reporters.
#[derive(Clone, Copy, Debug)]
pub struct Normalized<D>(D);

impl<D> Normalized<D> {
    /// Wraps the given distribution.
    pub fn new(inner: D) -> Self {
        Self(inner)
    }

    /// Consumes this wrapper, returning the wrapped distribution.
    pub fn into_inner(self) -> D {
        self.0
    }
}

fn normalize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl<D: Distribution> Distribution for Normalized<D> {
    fn count(&self) -> u64 {
        self.0.count()
    }

    fn min(&self) -> f64 {
        normalize(self.0.min())
    }

    fn max(&self) -> f64 {
        normalize(self.0.max())
    }

    fn sum(&self) -> f64 {
        normalize(self.0.sum())
    }

    fn mean(&self) -> f64 {
        normalize(self.0.mean())
    }

    fn quantile(&self, q: f64) -> f64 {
        normalize(self.0.quantile(q))
    }

    fn variance(&self) -> f64 {
        normalize(self.0.variance())
    }
}

const SKETCH_RELATIVE_ERROR: f64 = 0.001;
const SKETCH_MAX_BINS: u32 = 32_768;
const SKETCH_MIN_VALUE: f64 = 1.0e-9;

/// A quantile sketch over values of either sign.
///
/// `DDSketch` only tracks magnitudes, so negative and positive values live in separate sketches.
/// Values within [`SKETCH_MIN_VALUE`] of zero are counted as zeroes.
struct Sketch {
    negative: DDSketch,
    positive: DDSketch,
    zeroes: usize,
}

impl Sketch {
    fn new() -> Self {
        let config = Config::new(SKETCH_RELATIVE_ERROR, SKETCH_MAX_BINS, SKETCH_MIN_VALUE);
        let negative = DDSketch::new(config.clone());
        Self { negative, positive: DDSketch::new(config), zeroes: 0 }
    }

    fn add(&mut self, value: f64) {
        let magnitude = value.abs();
        if magnitude <= SKETCH_MIN_VALUE {
            self.zeroes += 1;
        } else if value > 0.0 {
            self.positive.add(magnitude);
        } else {
            self.negative.add(magnitude);
        }
    }

    fn len(&self) -> usize {
        self.negative.count() + self.zeroes + self.positive.count()
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        let len = self.len();
        if len == 0 {
            return None;
        }

        let negatives = self.negative.count();
        let rank = (q * (len - 1) as f64) as usize;
        if rank < negatives {
            // Ascending values are descending magnitudes on the negative side.
            let nq = relative_rank(negatives - 1 - rank, negatives);
            self.negative.quantile(nq).ok().flatten().map(|v| -v)
        } else if rank < negatives + self.zeroes {
            Some(0.0)
        } else {
            let pq = relative_rank(rank - negatives - self.zeroes, self.positive.count());
            self.positive.quantile(pq).ok().flatten()
        }
    }
}

fn relative_rank(rank: usize, len: usize) -> f64 {
    if len <= 1 {
        0.0
    } else {
        rank as f64 / (len - 1) as f64
    }
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let len = values.len() as f64;
    let mean = values.iter().sum::<f64>() / len;
    let squares = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
    squares / (len - 1.0)
}

/// A distribution computed from a sample of observations.
///
/// Count, sum, minimum and maximum are exact for the whole batch of observations, even when only
/// a subset of them was retained. Variance is computed from the retained sample.
///
/// Quantiles are estimated by a [DDSketch][ddsketch] built from the retained sample, with a
/// relative error of 0.1%. The 0th and 100th percentiles are the exact minimum and maximum, and
/// every estimate is bounded by them. Non-finite values are left out of the sketch.
///
/// The retained values live in a pooled buffer. Call [`release`](SampledDistribution::release)
/// (or drop the distribution) once done with it to return the buffer to its pool.
///
/// [ddsketch]: https://arxiv.org/abs/1908.10693
pub struct SampledDistribution {
    values: LinearOwnedReusable<Vec<f64>>,
    sketch: Sketch,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    variance: f64,
}

impl SampledDistribution {
    /// Creates a distribution from a retained sample and exact batch statistics.
    pub(crate) fn new(
        values: LinearOwnedReusable<Vec<f64>>,
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    ) -> Self {
        let mut sketch = Sketch::new();
        for value in values.iter().copied().filter(|v| v.is_finite()) {
            sketch.add(value);
        }

        let variance = sample_variance(&values);
        Self { values, sketch, count, sum, min, max, variance }
    }

    /// Creates a distribution over all of the given values, using a buffer from `pool`.
    ///
    /// NaN values are ignored.
    pub fn from_values<I>(pool: &SamplePool, values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut buffer = pool.pull();
        buffer.extend(values.into_iter().filter(|v| !v.is_nan()));

        let sum = buffer.iter().sum();
        let min = buffer.iter().copied().fold(f64::NAN, f64::min);
        let max = buffer.iter().copied().fold(f64::NAN, f64::max);
        let count = buffer.len() as u64;

        Self::new(buffer, count, sum, min, max)
    }

    /// Number of values retained in the sample.
    ///
    /// This is at most [`count`](Distribution::count), and lower when observations were dropped
    /// by sampling.
    pub fn sample_len(&self) -> usize {
        self.values.len()
    }

    /// Returns the sample buffer to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Distribution for SampledDistribution {
    fn count(&self) -> u64 {
        self.count
    }

    fn min(&self) -> f64 {
        self.min
    }

    fn max(&self) -> f64 {
        self.max
    }

    fn sum(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum
        }
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 || q.is_nan() {
            return f64::NAN;
        }

        let q = q.clamp(0.0, 1.0);
        if q == 0.0 {
            return self.min;
        }
        if q == 1.0 {
            return self.max;
        }

        match self.sketch.quantile(q) {
            Some(estimate) => estimate.max(self.min).min(self.max),
            None => f64::NAN,
        }
    }

    fn variance(&self) -> f64 {
        self.variance
    }
}

impl fmt::Debug for SampledDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampledDistribution")
            .field("count", &self.count)
            .field("sample_len", &self.values.len())
            .field("sum", &self.sum)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{Distribution, Normalized, SampledDistribution};
    use crate::pool::SamplePool;

    #[test]
    fn empty() {
        let dist = SampledDistribution::from_values(&SamplePool::new(), Vec::new());
        assert_eq!(dist.count(), 0);
        assert_eq!(dist.sum(), 0.0);
        assert!(dist.min().is_nan());
        assert!(dist.max().is_nan());
        assert!(dist.mean().is_nan());
        assert!(dist.quantile(0.5).is_nan());
        assert!(dist.variance().is_nan());
    }

    #[test]
    fn statistics() {
        let pool = SamplePool::new();
        let dist = SampledDistribution::from_values(&pool, (0..100).map(f64::from));

        assert_eq!(dist.count(), 100);
        assert_eq!(dist.min(), 0.0);
        assert_eq!(dist.max(), 99.0);
        assert_eq!(dist.sum(), 4950.0);
        assert_relative_eq!(dist.mean(), 49.5);
        assert_relative_eq!(dist.quantile(0.5), 49.0, epsilon = 1.5);
        assert_relative_eq!(dist.quantile(0.75), 74.0, epsilon = 1.5);
        assert_relative_eq!(dist.quantile(0.0), 0.0);
        assert_relative_eq!(dist.quantile(1.0), 99.0);
        assert_relative_eq!(dist.variance(), 841.666_666_666_666_7, max_relative = 1e-12);
    }

    #[test]
    fn unsorted_input() {
        let pool = SamplePool::new();
        let dist = SampledDistribution::from_values(&pool, [23.0, 1.0, -10.0, f64::NAN]);

        assert_eq!(dist.count(), 3);
        assert_eq!(dist.min(), -10.0);
        assert_eq!(dist.max(), 23.0);
        assert_relative_eq!(dist.mean(), 4.67, epsilon = 0.01);
        assert_relative_eq!(dist.quantile(0.5), 1.0, max_relative = 0.01);
    }

    #[test]
    fn quantiles_across_zero() {
        let pool = SamplePool::new();
        let dist = SampledDistribution::from_values(&pool, (-1000..=1000).map(f64::from));

        assert_eq!(dist.quantile(0.0), -1000.0);
        assert_relative_eq!(dist.quantile(0.25), -500.0, epsilon = 1.5);
        assert_eq!(dist.quantile(0.5), 0.0);
        assert_relative_eq!(dist.quantile(0.9), 800.0, epsilon = 1.5);
        assert_eq!(dist.quantile(1.0), 1000.0);
    }

    #[test]
    fn quantiles_have_bounded_relative_error() {
        let pool = SamplePool::new();
        let values = (1..=10_000).map(|i| f64::from(i) * 1.5);
        let dist = SampledDistribution::from_values(&pool, values);

        for q in [0.1, 0.5, 0.9, 0.99] {
            let exact = (q * 9_999.0_f64).floor() * 1.5 + 1.5;
            assert_relative_eq!(dist.quantile(q), exact, max_relative = 0.005);
        }
    }

    #[test]
    fn quantiles_stay_within_observed_range() {
        let pool = SamplePool::new();
        let dist = SampledDistribution::from_values(&pool, [7.25, 7.25, 7.25]);
        assert_eq!(dist.quantile(0.5), 7.25);
        assert_eq!(dist.quantile(0.99), 7.25);

        let dist = SampledDistribution::from_values(&pool, [1.0, f64::INFINITY]);
        assert_eq!(dist.max(), f64::INFINITY);
        assert_relative_eq!(dist.quantile(0.5), 1.0, max_relative = 0.01);
    }

    #[test]
    fn single_observation() {
        let pool = SamplePool::new();
        let dist = SampledDistribution::from_values(&pool, [4.0]);

        assert_eq!(dist.quantile(0.99), 4.0);
        assert!(dist.variance().is_nan());
        assert_eq!(Normalized::new(&dist).variance(), 0.0);
    }

    #[test]
    fn normalized() {
        let dist = SampledDistribution::from_values(&SamplePool::new(), Vec::new());
        let normalized = Normalized::new(&dist);

        assert_eq!(normalized.count(), 0);
        assert_eq!(normalized.min(), 0.0);
        assert_eq!(normalized.max(), 0.0);
        assert_eq!(normalized.sum(), 0.0);
        assert_eq!(normalized.mean(), 0.0);
        assert_eq!(normalized.quantile(0.95), 0.0);
        assert_eq!(normalized.variance(), 0.0);
    }

    #[test]
    fn normalized_passes_finite_values_through() {
        let dist = SampledDistribution::from_values(&SamplePool::new(), [1.0, 3.0]);
        let normalized = Normalized::new(&dist);

        assert_eq!(normalized.count(), 2);
        assert_eq!(normalized.mean(), 2.0);
        assert_eq!(normalized.variance(), 2.0);
        assert_eq!(normalized.quantile(1.0), 3.0);
    }
}
