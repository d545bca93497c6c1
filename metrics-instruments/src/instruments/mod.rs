//! Instrument types.
//!
//! Every instrument is independently synchronized: updates never touch the registry's lock, and
//! snapshots are safe to take concurrently with updates.
//!
//! The set of instrument kinds is closed. [`Instrument`] is the tagged union the registry stores,
//! and dispatching on it decides whether a flush delivers a single value ([`Discrete`]) or a
//! distribution ([`Sample`]).
use std::sync::Arc;

use crate::distribution::SampledDistribution;

mod counter;
pub use self::counter::Counter;

mod derive;
pub use self::derive::Derive;

mod gauge;
pub use self::gauge::Gauge;

mod rate;
pub use self::rate::Rate;

mod reservoir;
pub use self::reservoir::{Reservoir, DEFAULT_RESERVOIR_SIZE};

mod timer;
pub use self::timer::Timer;

/// An instrument that yields a single value per flush.
pub trait Discrete: Send + Sync {
    /// Records a new observation.
    fn update(&self, value: f64);

    /// Takes a snapshot of the current value.
    ///
    /// Depending on the instrument, taking a snapshot may reset its state for the next interval.
    fn snapshot(&self) -> f64;
}

/// An instrument that yields a distribution of observations per flush.
pub trait Sample: Send + Sync {
    /// Records a new observation.
    fn update(&self, value: f64);

    /// Takes a snapshot of the observations recorded since the previous snapshot, and resets the
    /// instrument for the next interval.
    ///
    /// The returned distribution holds a pooled buffer, which goes back to its pool once the
    /// distribution is released or dropped.
    fn snapshot(&self) -> SampledDistribution;
}

/// The result of snapshotting an [`Instrument`].
pub enum Snapshot {
    /// A single value.
    Discrete(f64),

    /// A distribution of values.
    Sample(SampledDistribution),
}

/// A registered instrument.
#[derive(Clone)]
pub enum Instrument {
    /// A [`Counter`].
    Counter(Arc<Counter>),

    /// A [`Gauge`].
    Gauge(Arc<Gauge>),

    /// A [`Derive`].
    Derive(Arc<Derive>),

    /// A [`Rate`].
    Rate(Arc<Rate>),

    /// A [`Reservoir`].
    Reservoir(Arc<Reservoir>),

    /// A [`Timer`].
    Timer(Arc<Timer>),
}

impl Instrument {
    /// Gets a short, human-readable name for the kind of this instrument.
    pub fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => Counter::KIND,
            Instrument::Gauge(_) => Gauge::KIND,
            Instrument::Derive(_) => Derive::KIND,
            Instrument::Rate(_) => Rate::KIND,
            Instrument::Reservoir(_) => Reservoir::KIND,
            Instrument::Timer(_) => Timer::KIND,
        }
    }

    /// Returns `true` if this instrument yields a single value per flush.
    pub fn is_discrete(&self) -> bool {
        self.as_discrete().is_some()
    }

    /// Returns `true` if this instrument yields a distribution per flush.
    pub fn is_sample(&self) -> bool {
        self.as_sample().is_some()
    }

    /// Gets this instrument as a [`Discrete`] instrument, if it is one.
    pub fn as_discrete(&self) -> Option<&dyn Discrete> {
        match self {
            Instrument::Counter(inner) => Some(inner.as_ref()),
            Instrument::Gauge(inner) => Some(inner.as_ref()),
            Instrument::Derive(inner) => Some(inner.as_ref()),
            Instrument::Rate(inner) => Some(inner.as_ref()),
            Instrument::Reservoir(_) | Instrument::Timer(_) => None,
        }
    }

    /// Gets this instrument as a [`Sample`] instrument, if it is one.
    pub fn as_sample(&self) -> Option<&dyn Sample> {
        match self {
            Instrument::Reservoir(inner) => Some(inner.as_ref()),
            Instrument::Timer(inner) => Some(inner.as_ref()),
            Instrument::Counter(_)
            | Instrument::Gauge(_)
            | Instrument::Derive(_)
            | Instrument::Rate(_) => None,
        }
    }

    /// Records a new observation.
    ///
    /// For timers, `value` is a duration in milliseconds.
    pub fn update(&self, value: f64) {
        match self {
            Instrument::Counter(inner) => Discrete::update(inner.as_ref(), value),
            Instrument::Gauge(inner) => Discrete::update(inner.as_ref(), value),
            Instrument::Derive(inner) => Discrete::update(inner.as_ref(), value),
            Instrument::Rate(inner) => Discrete::update(inner.as_ref(), value),
            Instrument::Reservoir(inner) => Sample::update(inner.as_ref(), value),
            Instrument::Timer(inner) => Sample::update(inner.as_ref(), value),
        }
    }

    /// Takes a snapshot of this instrument.
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Instrument::Counter(inner) => Snapshot::Discrete(Discrete::snapshot(inner.as_ref())),
            Instrument::Gauge(inner) => Snapshot::Discrete(Discrete::snapshot(inner.as_ref())),
            Instrument::Derive(inner) => Snapshot::Discrete(Discrete::snapshot(inner.as_ref())),
            Instrument::Rate(inner) => Snapshot::Discrete(Discrete::snapshot(inner.as_ref())),
            Instrument::Reservoir(inner) => Snapshot::Sample(Sample::snapshot(inner.as_ref())),
            Instrument::Timer(inner) => Snapshot::Sample(Sample::snapshot(inner.as_ref())),
        }
    }

    /// Returns `true` if both instruments point to the same underlying instrument.
    pub fn ptr_eq(&self, other: &Instrument) -> bool {
        match (self, other) {
            (Instrument::Counter(a), Instrument::Counter(b)) => Arc::ptr_eq(a, b),
            (Instrument::Gauge(a), Instrument::Gauge(b)) => Arc::ptr_eq(a, b),
            (Instrument::Derive(a), Instrument::Derive(b)) => Arc::ptr_eq(a, b),
            (Instrument::Rate(a), Instrument::Rate(b)) => Arc::ptr_eq(a, b),
            (Instrument::Reservoir(a), Instrument::Reservoir(b)) => Arc::ptr_eq(a, b),
            (Instrument::Timer(a), Instrument::Timer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A concrete instrument type that can be stored in, and recovered from, an [`Instrument`].
pub trait InstrumentKind: Sized + Send + Sync + 'static {
    /// Short, human-readable name of this kind.
    const KIND: &'static str;

    /// Wraps a shared instance of this kind.
    fn into_instrument(this: Arc<Self>) -> Instrument;

    /// Gets the shared instance behind `instrument`, if it is of this kind.
    fn from_instrument(instrument: &Instrument) -> Option<Arc<Self>>;
}

macro_rules! instrument_kind {
    ($ty:ident, $kind:literal) => {
        impl InstrumentKind for $ty {
            const KIND: &'static str = $kind;

            fn into_instrument(this: Arc<Self>) -> Instrument {
                Instrument::$ty(this)
            }

            fn from_instrument(instrument: &Instrument) -> Option<Arc<Self>> {
                match instrument {
                    Instrument::$ty(inner) => Some(Arc::clone(inner)),
                    _ => None,
                }
            }
        }

        impl From<Arc<$ty>> for Instrument {
            fn from(inner: Arc<$ty>) -> Self {
                Instrument::$ty(inner)
            }
        }

        impl From<$ty> for Instrument {
            fn from(inner: $ty) -> Self {
                Instrument::$ty(Arc::new(inner))
            }
        }
    };
}

instrument_kind!(Counter, "counter");
instrument_kind!(Gauge, "gauge");
instrument_kind!(Derive, "derive");
instrument_kind!(Rate, "rate");
instrument_kind!(Reservoir, "reservoir");
instrument_kind!(Timer, "timer");

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Counter, Gauge, Instrument, InstrumentKind, Reservoir, Snapshot, Timer};
    use crate::distribution::Distribution;

    #[test]
    fn capabilities() {
        let counter = Instrument::from(Counter::new());
        assert!(counter.is_discrete());
        assert!(!counter.is_sample());
        assert_eq!(counter.kind(), "counter");

        let timer = Instrument::from(Timer::new());
        assert!(timer.is_sample());
        assert!(!timer.is_discrete());
        assert_eq!(timer.kind(), "timer");
    }

    #[test]
    fn snapshot_dispatch() {
        let gauge = Instrument::from(Gauge::new());
        gauge.update(3.0);
        assert!(matches!(gauge.snapshot(), Snapshot::Discrete(v) if v == 3.0));

        let reservoir = Instrument::from(Reservoir::new());
        reservoir.update(3.0);
        reservoir.update(5.0);
        match reservoir.snapshot() {
            Snapshot::Sample(dist) => assert_eq!(dist.sample_len(), 2),
            Snapshot::Discrete(_) => panic!("reservoir should snapshot as a sample"),
        }
    }

    #[test]
    fn update_dispatch() {
        let counter = Instrument::from(Counter::new());
        counter.update(2.0);
        counter.update(2.0);
        assert!(matches!(counter.snapshot(), Snapshot::Discrete(v) if v == 4.0));

        let timer = Instrument::from(Timer::new());
        timer.update(-1.0);
        timer.update(2.5);
        match timer.snapshot() {
            Snapshot::Sample(dist) => {
                assert_eq!(dist.count(), 1);
                assert_eq!(dist.max(), 2.5);
            }
            Snapshot::Discrete(_) => panic!("timer should snapshot as a sample"),
        }
    }

    #[test]
    fn recover_kind() {
        let counter = Arc::new(Counter::new());
        let instrument = Counter::into_instrument(Arc::clone(&counter));

        let recovered = Counter::from_instrument(&instrument).expect("should be a counter");
        assert!(Arc::ptr_eq(&counter, &recovered));
        assert!(Gauge::from_instrument(&instrument).is_none());

        assert!(instrument.ptr_eq(&Instrument::from(counter)));
        assert!(!instrument.ptr_eq(&Instrument::from(Counter::new())));
    }
}
