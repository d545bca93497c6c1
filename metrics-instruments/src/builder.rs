use std::time::Duration;

use quanta::Clock;
use thiserror::Error;

use crate::{
    instruments::DEFAULT_RESERVOIR_SIZE,
    pool::Pools,
    registry::{Inner, Registry},
};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_ERROR_CAPACITY: usize = 10;

/// Errors that could occur while building a registry.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to spawn the background flush thread.
    #[error("failed to spawn background thread for registry flushing")]
    Backend,
}

/// Builder for a [`Registry`].
pub struct RegistryBuilder {
    flush_interval: Duration,
    prefix: String,
    tags: Vec<String>,
    error_capacity: usize,
    reservoir_size: usize,
    pools: Pools,
    clock: Clock,
}

impl RegistryBuilder {
    /// Set the flush interval.
    ///
    /// Intervals below one second are replaced by the default.
    ///
    /// Defaults to 60 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval =
            if interval < MIN_FLUSH_INTERVAL { DEFAULT_FLUSH_INTERVAL } else { interval };
        self
    }

    /// Set the prefix prepended to every metric name when flushing.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = prefix.into();
        self
    }

    /// Set the tags appended to every metric's own tags when flushing.
    ///
    /// Defaults to no tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the capacity of the channel that receives errors from scheduled flushes.
    ///
    /// Errors are dropped while the channel is full. A capacity of zero is treated as one.
    ///
    /// Defaults to 10.
    #[must_use]
    pub fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of reservoirs and timers created by the registry.
    ///
    /// A capacity of zero falls back to the default.
    ///
    /// Defaults to 1024.
    #[must_use]
    pub fn with_reservoir_size(mut self, size: usize) -> Self {
        self.reservoir_size = if size == 0 { DEFAULT_RESERVOIR_SIZE } else { size };
        self
    }

    /// Set the object pools used by the registry and the instruments it creates.
    ///
    /// Defaults to a fresh set of pools.
    #[must_use]
    pub fn with_pools(mut self, pools: Pools) -> Self {
        self.pools = pools;
        self
    }

    /// Set the clock used by time-based instruments created by the registry.
    ///
    /// Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn into_parts(self) -> (Inner, Duration, usize) {
        let inner = Inner::new(self.prefix, self.tags, self.pools, self.clock, self.reservoir_size);
        (inner, self.flush_interval, self.error_capacity)
    }

    /// Builds the registry and starts flushing it in the background.
    ///
    /// # Errors
    ///
    /// If the background flush thread cannot be spawned, an error is returned.
    pub fn build(self) -> Result<Registry, BuildError> {
        let (inner, flush_interval, error_capacity) = self.into_parts();
        Registry::started(inner, flush_interval, error_capacity)
    }

    /// Builds the registry without starting it.
    ///
    /// The registry is only flushed by explicit calls to [`Registry::flush`]. The flush interval
    /// and error capacity are ignored.
    pub fn build_unstarted(self) -> Registry {
        let (inner, _, _) = self.into_parts();
        Registry::unstarted(inner)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        RegistryBuilder {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            prefix: String::new(),
            tags: Vec::new(),
            error_capacity: DEFAULT_ERROR_CAPACITY,
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            pools: Pools::new(),
            clock: Clock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use approx::assert_relative_eq;
    use quanta::Clock;

    use super::{RegistryBuilder, DEFAULT_ERROR_CAPACITY, DEFAULT_FLUSH_INTERVAL};
    use crate::{instruments::DEFAULT_RESERVOIR_SIZE, Call, DebuggingReporter};

    #[test]
    fn flush_interval_is_clamped() {
        let builder = RegistryBuilder::default().with_flush_interval(Duration::from_millis(999));
        assert_eq!(builder.flush_interval, DEFAULT_FLUSH_INTERVAL);

        let builder = RegistryBuilder::default().with_flush_interval(Duration::from_secs(1));
        assert_eq!(builder.flush_interval, Duration::from_secs(1));

        let builder = RegistryBuilder::default().with_flush_interval(Duration::ZERO);
        assert_eq!(builder.flush_interval, DEFAULT_FLUSH_INTERVAL);
    }

    #[test]
    fn capacities_fall_back() {
        let builder = RegistryBuilder::default();
        assert_eq!(builder.error_capacity, DEFAULT_ERROR_CAPACITY);
        assert_eq!(builder.reservoir_size, DEFAULT_RESERVOIR_SIZE);

        let builder = RegistryBuilder::default().with_error_capacity(0).with_reservoir_size(0);
        assert_eq!(builder.error_capacity, 1);
        assert_eq!(builder.reservoir_size, DEFAULT_RESERVOIR_SIZE);
    }

    #[test]
    fn instruments_use_configured_parts() {
        let (clock, mock) = Clock::mock();
        let registry = RegistryBuilder::default()
            .with_prefix("svc.")
            .with_tags(["region:eu"])
            .with_reservoir_size(8)
            .with_clock(clock)
            .build_unstarted();
        let reporter = Arc::new(DebuggingReporter::new());
        registry.subscribe(Arc::clone(&reporter));

        assert_eq!(registry.reservoir("sizes", &[]).capacity(), 8);

        let timer = registry.timer("latency", &[]);
        let start = timer.start();

        let rate = registry.rate("events", &[]);
        rate.update(10.0);
        mock.increment(Duration::from_secs(2));
        timer.since(start);

        registry.flush().expect("flush should succeed");

        let metrics = reporter.metrics();
        assert_eq!(metrics.len(), 3);
        for call in &metrics {
            match call {
                Call::Discrete { name, tags, value } => {
                    assert_eq!(name, "svc.events");
                    assert_eq!(tags, &["region:eu"]);
                    assert_relative_eq!(*value, 5.0, max_relative = 1e-9);
                }
                Call::Sample { name, summary, .. } if name == "svc.latency" => {
                    assert_eq!(summary.count, 1);
                    assert_relative_eq!(summary.mean, 2000.0);
                }
                Call::Sample { name, summary, .. } => {
                    assert_eq!(name, "svc.sizes");
                    assert_eq!(summary.count, 0);
                }
                other => panic!("unexpected call {other:?}"),
            }
        }
    }
}
