//! In-process metric instruments, aggregated in a [`Registry`] and periodically flushed to
//! [`Reporter`]s.
//!
//! # Overview
//!
//! Application code updates lightweight instruments from any number of threads. Each instrument
//! has one of two capabilities:
//!
//! - [`Discrete`] instruments yield a single value per flush: [`Counter`], [`Gauge`], [`Derive`]
//!   and [`Rate`].
//! - [`Sample`] instruments yield a [`Distribution`] per flush: [`Reservoir`] and [`Timer`].
//!
//! Instruments are registered in a [`Registry`] under a canonical [`MetricId`] built from a name
//! and a set of tags. On every flush, the registry detaches its current set of instruments,
//! installs an empty one for the next interval, takes exactly one snapshot of every detached
//! instrument and hands it to each subscribed reporter.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use metrics_instruments::{DebuggingReporter, Registry};
//!
//! let registry = Registry::new(Duration::from_secs(10), "app.", &["env:prod"])
//!     .expect("failed to spawn flush thread");
//! registry.subscribe(DebuggingReporter::new());
//!
//! registry.counter("requests", &["path:/"]).update(1.0);
//! registry.timer("latency", &["path:/"]).update(Duration::from_millis(12));
//!
//! // Flushes everything that is still pending and stops the background thread.
//! registry.close().expect("final flush failed");
//! ```
//!
//! # Flushing
//!
//! A registry built with [`Registry::new`] (or [`RegistryBuilder::build`]) owns a background
//! thread that flushes on a fixed interval. Errors returned by reporters during those flushes are
//! pushed onto a bounded channel, available through [`Registry::errors`], and dropped when nobody
//! drains it. [`Registry::new_unstarted`] skips the thread entirely: callers drive
//! [`Registry::flush`] themselves and receive reporter errors directly.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod atomics;

mod builder;
pub use self::builder::{BuildError, RegistryBuilder};

mod debugging;
pub use self::debugging::{Call, DebuggingReporter, SampleSummary, Stage};

mod distribution;
pub use self::distribution::{Distribution, Normalized, SampledDistribution};

mod identity;
pub use self::identity::{split_metric_id, IdentityEncoder, MetricId};

pub mod instruments;
pub use self::instruments::{
    Counter, Derive, Discrete, Gauge, Instrument, InstrumentKind, Rate, Reservoir, Sample,
    Snapshot, Timer, DEFAULT_RESERVOIR_SIZE,
};

mod pool;
pub use self::pool::{Pools, SamplePool};

mod registry;
pub use self::registry::{FlushError, Registry};

mod reporter;
pub use self::reporter::{Reporter, ReporterError};
