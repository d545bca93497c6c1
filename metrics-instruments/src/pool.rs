//! Object pools for reusable buffers.
//!
//! Flushing churns through short-lived buffers: one instrument map per interval, one sample
//! buffer per sampling instrument per interval, and one permutation buffer per identity encoding.
//! These pools let those buffers be recycled instead of reallocated. Pools are explicit values
//! rather than process-wide statics, so each registry (or test) can own its own.
//!
//! Buffers are handed out as RAII guards: dropping a guard clears the buffer and returns it to
//! its pool.
use std::{fmt, sync::Arc};

use lockfree_object_pool::{LinearObjectPool, LinearOwnedReusable};

use crate::{identity::IdentityEncoder, registry::InstrumentMap};

/// A pool of sample buffers used by sampling instruments and their distributions.
#[derive(Clone)]
pub struct SamplePool(Arc<LinearObjectPool<Vec<f64>>>);

impl SamplePool {
    /// Creates a new, empty `SamplePool`.
    pub fn new() -> Self {
        Self(Arc::new(LinearObjectPool::new(Vec::new, Vec::clear)))
    }

    pub(crate) fn pull(&self) -> LinearOwnedReusable<Vec<f64>> {
        self.0.pull_owned()
    }
}

impl Default for SamplePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SamplePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplePool").finish_non_exhaustive()
    }
}

/// The set of pools used by a [`Registry`][crate::Registry].
#[derive(Clone)]
pub struct Pools {
    samples: SamplePool,
    identities: IdentityEncoder,
    maps: Arc<LinearObjectPool<InstrumentMap>>,
}

impl Pools {
    /// Creates a new set of empty pools.
    pub fn new() -> Self {
        Self {
            samples: SamplePool::new(),
            identities: IdentityEncoder::new(),
            maps: Arc::new(LinearObjectPool::new(InstrumentMap::default, InstrumentMap::clear)),
        }
    }

    /// Gets the pool of sample buffers.
    pub fn samples(&self) -> &SamplePool {
        &self.samples
    }

    /// Gets the identity encoder and its scratch pool.
    pub fn identities(&self) -> &IdentityEncoder {
        &self.identities
    }

    pub(crate) fn pull_map(&self) -> LinearOwnedReusable<InstrumentMap> {
        self.maps.pull_owned()
    }
}

impl Default for Pools {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pools").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Pools, SamplePool};
    use crate::{instruments::Counter, MetricId};

    #[test]
    fn sample_buffers_come_back_cleared() {
        let pool = SamplePool::new();
        {
            let mut buffer = pool.pull();
            buffer.extend([1.0, 2.0, 3.0]);
        }

        let buffer = pool.pull();
        assert!(buffer.is_empty());
    }

    #[test]
    fn maps_come_back_cleared() {
        let pools = Pools::new();
        {
            let mut map = pools.pull_map();
            map.insert(MetricId::new("counter", &[]), Counter::new().into());
            assert_eq!(map.len(), 1);
        }

        assert!(pools.pull_map().is_empty());
    }
}
