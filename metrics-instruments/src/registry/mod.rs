//! Instrument registry and flush lifecycle.
use std::{mem, sync::Arc, time::Duration};

use crossbeam_channel::{bounded, Receiver};
use indexmap::{map::Entry, IndexMap};
use lockfree_object_pool::LinearOwnedReusable;
use parking_lot::{Mutex, RwLock};
use quanta::Clock;
use tracing::{debug, error, warn};

use crate::{
    builder::{BuildError, RegistryBuilder},
    distribution::Normalized,
    identity::MetricId,
    instruments::{
        Counter, Derive, Gauge, Instrument, InstrumentKind, Rate, Reservoir, Snapshot, Timer,
    },
    pool::Pools,
    reporter::{Reporter, ReporterError},
};

mod scheduler;
use self::scheduler::Scheduler;

pub(crate) type InstrumentMap = IndexMap<MetricId, Instrument>;

/// Errors that could occur while flushing a registry.
///
/// Each variant names the reporter stage that failed. See [`Registry::flush`] for what happens to
/// the rest of the cycle when a stage fails.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// A reporter failed to prepare for the flush cycle.
    #[error("reporter failed to prepare for flush")]
    Prep(#[source] ReporterError),

    /// A reporter failed to receive a metric.
    #[error("reporter failed to receive metric `{name}`")]
    Deliver {
        /// Prefixed name of the metric being delivered.
        name: String,

        /// Error reported by the reporter.
        #[source]
        source: ReporterError,
    },

    /// A reporter failed to complete the flush cycle.
    #[error("reporter failed to complete flush")]
    Flush(#[source] ReporterError),

    /// The background flush thread exited without reporting the result of its final flush.
    #[error("background flush thread exited unexpectedly")]
    Scheduler,
}

struct State {
    instruments: LinearOwnedReusable<InstrumentMap>,
    reporters: Vec<Arc<dyn Reporter>>,
    tags: Vec<String>,
}

pub(crate) struct Inner {
    state: RwLock<State>,
    prefix: String,
    pools: Pools,
    clock: Clock,
    reservoir_size: usize,
    // Serializes flush cycles, so stages of two cycles never interleave.
    flush_lock: Mutex<()>,
}

impl Inner {
    pub(crate) fn new(
        prefix: String,
        tags: Vec<String>,
        pools: Pools,
        clock: Clock,
        reservoir_size: usize,
    ) -> Self {
        let state = State { instruments: pools.pull_map(), reporters: Vec::new(), tags };

        Self {
            state: RwLock::new(state),
            prefix,
            pools,
            clock,
            reservoir_size,
            flush_lock: Mutex::new(()),
        }
    }

    fn encode(&self, name: &str, tags: &[&str]) -> MetricId {
        self.pools.identities().encode(name, tags)
    }

    pub(crate) fn flush(&self) -> Result<(), FlushError> {
        let _cycle = self.flush_lock.lock();

        let (reporters, tags) = {
            let state = self.state.read();
            (state.reporters.clone(), state.tags.clone())
        };

        let mut result = prep(&reporters);

        let detached = {
            let fresh = self.pools.pull_map();
            mem::replace(&mut self.state.write().instruments, fresh)
        };

        if result.is_ok() {
            result = self.deliver(&detached, &reporters, &tags);
        }

        // Dropping the detached map returns it to the pool, along with any snapshots not taken.
        let instruments = detached.len();
        drop(detached);

        for reporter in &reporters {
            if let Err(e) = reporter.flush() {
                if result.is_ok() {
                    result = Err(FlushError::Flush(e));
                }
            }
        }

        debug!(instruments, reporters = reporters.len(), ok = result.is_ok(), "Flushed registry.");
        result
    }

    fn deliver(
        &self,
        instruments: &InstrumentMap,
        reporters: &[Arc<dyn Reporter>],
        default_tags: &[String],
    ) -> Result<(), FlushError> {
        let mut name = String::new();
        let mut tags = Vec::new();

        for (id, instrument) in instruments {
            let (base, own) = id.split();

            name.clear();
            name.push_str(&self.prefix);
            name.push_str(base);

            tags.clear();
            tags.extend(own);
            tags.extend(default_tags.iter().map(String::as_str));

            let failed = |source| FlushError::Deliver { name: name.clone(), source };

            match instrument.snapshot() {
                Snapshot::Discrete(value) => {
                    for reporter in reporters {
                        reporter.discrete(&name, &tags, value).map_err(failed)?;
                    }
                }
                Snapshot::Sample(dist) => {
                    let normalized = Normalized::new(&dist);
                    for reporter in reporters {
                        reporter.sample(&name, &tags, &normalized).map_err(failed)?;
                    }
                    dist.release();
                }
            }
        }

        Ok(())
    }
}

fn prep(reporters: &[Arc<dyn Reporter>]) -> Result<(), FlushError> {
    for reporter in reporters {
        reporter.prep().map_err(FlushError::Prep)?;
    }
    Ok(())
}

/// A registry of instruments, periodically flushed to subscribed reporters.
///
/// Instruments are keyed by their [`MetricId`]: a name plus an unordered set of tags. Updating an
/// instrument never touches the registry's lock; only registration, lookup and the start of each
/// flush do.
///
/// ## Flushing
///
/// A flush detaches the whole instrument map and installs a fresh, empty one in its place. Every
/// detached instrument is snapshotted exactly once and delivered to every reporter, then dropped:
/// instruments must be fetched again to be reported in the next cycle. Instruments registered
/// while a flush is in progress land in the fresh map, and are reported by the next cycle.
///
/// Reporters go through three stages per cycle, each in subscription order:
///
/// 1. `prep`: the first error ends the stage and skips delivery
/// 2. delivery: the first error ends delivery for all remaining instruments and reporters
/// 3. `flush`: always called on every reporter
///
/// The first error of the cycle is returned. The detached map is never restored.
///
/// ## Lifecycle
///
/// A registry created with [`Registry::new`] (or [`RegistryBuilder::build`]) flushes itself on a
/// background thread at a fixed interval. Errors from those flushes are sent to a bounded channel,
/// see [`Registry::errors`]. [`Registry::close`] stops the thread after one final flush, whose
/// result it returns. Dropping a running registry closes it.
///
/// A registry created with [`Registry::new_unstarted`] never flushes on its own.
pub struct Registry {
    inner: Arc<Inner>,
    errors: Receiver<FlushError>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Registry {
    /// Creates a new `Registry` and starts flushing it every `flush_interval`.
    ///
    /// Intervals below one second are replaced by the default of 60 seconds. `prefix` is
    /// prepended to every metric name, and `tags` are appended to every metric's own tags, when
    /// flushing.
    ///
    /// # Errors
    ///
    /// If the background flush thread cannot be spawned, an error is returned.
    pub fn new(
        flush_interval: Duration,
        prefix: &str,
        tags: &[&str],
    ) -> Result<Self, BuildError> {
        RegistryBuilder::default()
            .with_flush_interval(flush_interval)
            .with_prefix(prefix)
            .with_tags(tags.iter().copied())
            .build()
    }

    /// Creates a new `Registry` that is only flushed by explicit calls to
    /// [`flush`](Registry::flush).
    pub fn new_unstarted(prefix: &str, tags: &[&str]) -> Self {
        RegistryBuilder::default()
            .with_prefix(prefix)
            .with_tags(tags.iter().copied())
            .build_unstarted()
    }

    /// Creates a [`RegistryBuilder`] with default configuration.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn unstarted(inner: Inner) -> Self {
        // The sender is dropped right away: nothing ever reports errors for a manual flush.
        let (_, errors) = bounded(0);
        Self { inner: Arc::new(inner), errors, scheduler: Mutex::new(None) }
    }

    pub(crate) fn started(
        inner: Inner,
        flush_interval: Duration,
        error_capacity: usize,
    ) -> Result<Self, BuildError> {
        let inner = Arc::new(inner);
        let (errors_tx, errors) = bounded(error_capacity);
        let scheduler =
            Scheduler::spawn(Arc::clone(&inner), flush_interval, errors_tx, errors.clone())?;

        Ok(Self { inner, errors, scheduler: Mutex::new(Some(scheduler)) })
    }

    /// Subscribes a reporter to every subsequent flush.
    pub fn subscribe<R>(&self, reporter: R)
    where
        R: Reporter + 'static,
    {
        self.inner.state.write().reporters.push(Arc::new(reporter));
    }

    /// Gets the instrument registered under the given name and tags, if any.
    pub fn get(&self, name: &str, tags: &[&str]) -> Option<Instrument> {
        let id = self.inner.encode(name, tags);
        self.inner.state.read().instruments.get(&id).cloned()
    }

    /// Registers an instrument under the given name and tags, replacing any existing one.
    pub fn register<I>(&self, name: &str, tags: &[&str], instrument: I)
    where
        I: Into<Instrument>,
    {
        let id = self.inner.encode(name, tags);
        self.inner.state.write().instruments.insert(id, instrument.into());
    }

    /// Gets the instrument registered under the given name and tags, or registers the one
    /// created by `factory`.
    ///
    /// `factory` is called at most once, and only if no instrument was registered by the time
    /// the write lock was acquired. Concurrent callers racing on the same identity all get the
    /// same instrument.
    pub fn fetch<F>(&self, name: &str, tags: &[&str], factory: F) -> Instrument
    where
        F: FnOnce() -> Instrument,
    {
        let id = self.inner.encode(name, tags);
        if let Some(existing) = self.inner.state.read().instruments.get(&id) {
            return existing.clone();
        }

        self.inner.state.write().instruments.entry(id).or_insert_with(factory).clone()
    }

    fn fetch_kind<T, F>(&self, name: &str, tags: &[&str], factory: F) -> Arc<T>
    where
        T: InstrumentKind,
        F: FnOnce(&Inner) -> T,
    {
        let id = self.inner.encode(name, tags);
        if let Some(existing) = self.inner.state.read().instruments.get(&id) {
            if let Some(inner) = T::from_instrument(existing) {
                return inner;
            }
        }

        let mut state = self.inner.state.write();
        match state.instruments.entry(id) {
            Entry::Occupied(mut entry) => {
                if let Some(inner) = T::from_instrument(entry.get()) {
                    return inner;
                }

                warn!(
                    metric = %entry.key(),
                    existing = entry.get().kind(),
                    requested = T::KIND,
                    "Replacing instrument of a different kind."
                );
                let created = Arc::new(factory(&*self.inner));
                entry.insert(T::into_instrument(Arc::clone(&created)));
                created
            }
            Entry::Vacant(entry) => {
                let created = Arc::new(factory(&*self.inner));
                entry.insert(T::into_instrument(Arc::clone(&created)));
                created
            }
        }
    }

    /// Gets or registers a [`Counter`].
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn counter(&self, name: &str, tags: &[&str]) -> Arc<Counter> {
        self.fetch_kind(name, tags, |_| Counter::new())
    }

    /// Gets or registers a [`Gauge`].
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn gauge(&self, name: &str, tags: &[&str]) -> Arc<Gauge> {
        self.fetch_kind(name, tags, |_| Gauge::new())
    }

    /// Gets or registers a [`Derive`], with a baseline of zero.
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn derive(&self, name: &str, tags: &[&str]) -> Arc<Derive> {
        self.fetch_kind(name, tags, |inner| Derive::with_clock(0.0, inner.clock.clone()))
    }

    /// Gets or registers a per-second [`Rate`].
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn rate(&self, name: &str, tags: &[&str]) -> Arc<Rate> {
        self.fetch_kind(name, tags, |inner| Rate::with_clock(inner.clock.clone()))
    }

    /// Gets or registers a [`Reservoir`] of the registry's configured capacity.
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn reservoir(&self, name: &str, tags: &[&str]) -> Arc<Reservoir> {
        self.fetch_kind(name, tags, |inner| {
            Reservoir::with_pool(inner.reservoir_size, inner.pools.samples().clone())
        })
    }

    /// Gets or registers a [`Timer`] of the registry's configured capacity.
    ///
    /// If another kind of instrument is registered under the same identity, it is replaced.
    pub fn timer(&self, name: &str, tags: &[&str]) -> Arc<Timer> {
        self.fetch_kind(name, tags, |inner| {
            Timer::from_parts(
                inner.reservoir_size,
                inner.pools.samples().clone(),
                inner.clock.clone(),
            )
        })
    }

    /// Removes the instrument registered under the given name and tags, if any.
    pub fn unregister(&self, name: &str, tags: &[&str]) {
        let id = self.inner.encode(name, tags);
        self.inner.state.write().instruments.shift_remove(&id);
    }

    /// Replaces the tags appended to every metric when flushing.
    pub fn set_tags(&self, tags: &[&str]) {
        let mut state = self.inner.state.write();
        state.tags.clear();
        state.tags.extend(tags.iter().map(|tag| (*tag).to_owned()));
    }

    /// Adds to the tags appended to every metric when flushing.
    pub fn add_tags(&self, tags: &[&str]) {
        self.inner.state.write().tags.extend(tags.iter().map(|tag| (*tag).to_owned()));
    }

    /// Gets the number of registered instruments.
    pub fn size(&self) -> usize {
        self.inner.state.read().instruments.len()
    }

    /// Flushes every registered instrument to every subscribed reporter.
    ///
    /// Flushes are serialized: calling this while another flush is in progress, including a
    /// scheduled one, waits for it to complete first.
    ///
    /// # Errors
    ///
    /// If any reporter fails, the first error of the cycle is returned.
    pub fn flush(&self) -> Result<(), FlushError> {
        self.inner.flush()
    }

    /// Gets the receiving side of the channel where errors from scheduled flushes are sent.
    ///
    /// The channel is bounded: errors are dropped while it is full. It disconnects once the
    /// registry is closed, and is always disconnected for an unstarted registry.
    pub fn errors(&self) -> Receiver<FlushError> {
        self.errors.clone()
    }

    /// Stops flushing in the background, after one final flush.
    ///
    /// Blocks until the final flush completes, including when another thread is already closing
    /// the registry. Does nothing if the registry was never started, or was already closed.
    ///
    /// # Errors
    ///
    /// If the final flush fails, its error is returned. Only the call that performed the final
    /// flush sees it.
    pub fn close(&self) -> Result<(), FlushError> {
        // Held until shutdown completes, so concurrent callers wait on the same final flush.
        let mut scheduler = self.scheduler.lock();
        match scheduler.take() {
            Some(scheduler) => scheduler.shutdown(),
            None => Ok(()),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.get_mut().take() {
            if let Err(e) = scheduler.shutdown() {
                error!(error = %e, "Final flush failed while dropping registry.");
            }
        }
    }
}
