//! In-memory reporter for tests and local debugging.
use std::mem;

use parking_lot::Mutex;

use crate::{
    distribution::Distribution,
    reporter::{Reporter, ReporterError},
};

/// A reporter stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// [`Reporter::prep`].
    Prep,

    /// [`Reporter::counting`], [`Reporter::discrete`] and [`Reporter::sample`].
    Deliver,

    /// [`Reporter::flush`].
    Flush,
}

/// Point-in-time summary of a delivered distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleSummary {
    /// Number of observations.
    pub count: u64,
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Sum of all observed values.
    pub sum: f64,
    /// Mean of all observed values.
    pub mean: f64,
    /// Sample variance.
    pub variance: f64,
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl SampleSummary {
    /// Summarizes the given distribution.
    pub fn from_distribution(dist: &dyn Distribution) -> Self {
        Self {
            count: dist.count(),
            min: dist.min(),
            max: dist.max(),
            sum: dist.sum(),
            mean: dist.mean(),
            variance: dist.variance(),
            p50: dist.quantile(0.5),
            p95: dist.quantile(0.95),
            p99: dist.quantile(0.99),
        }
    }
}

/// A call received by a [`DebuggingReporter`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    /// [`Reporter::prep`] was called.
    Prep,

    /// [`Reporter::counting`] was called.
    Counting {
        /// Metric name.
        name: String,
        /// Metric tags.
        tags: Vec<String>,
        /// Count.
        value: i64,
    },

    /// [`Reporter::discrete`] was called.
    Discrete {
        /// Metric name.
        name: String,
        /// Metric tags.
        tags: Vec<String>,
        /// Value.
        value: f64,
    },

    /// [`Reporter::sample`] was called.
    Sample {
        /// Metric name.
        name: String,
        /// Metric tags.
        tags: Vec<String>,
        /// Summary of the distribution.
        summary: SampleSummary,
    },

    /// [`Reporter::flush`] was called.
    Flush,
}

impl Call {
    fn is_metric(&self) -> bool {
        !matches!(self, Call::Prep | Call::Flush)
    }
}

/// A reporter that records every call it receives.
///
/// Calls are recorded in order, across flush cycles, until taken. A reporter created with
/// [`DebuggingReporter::failing`] still records every call, but fails each one belonging to the
/// given stage.
#[derive(Debug, Default)]
pub struct DebuggingReporter {
    calls: Mutex<Vec<Call>>,
    failing: Option<Stage>,
}

impl DebuggingReporter {
    /// Creates a new `DebuggingReporter`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `DebuggingReporter` that fails every call of the given stage.
    pub fn failing(stage: Stage) -> Self {
        Self { calls: Mutex::new(Vec::new()), failing: Some(stage) }
    }

    /// Gets a copy of every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Takes every call recorded so far, leaving none behind.
    pub fn take(&self) -> Vec<Call> {
        mem::take(&mut *self.calls.lock())
    }

    /// Gets a copy of the metric deliveries recorded so far, leaving out `prep` and `flush` calls.
    pub fn metrics(&self) -> Vec<Call> {
        self.calls.lock().iter().filter(|call| call.is_metric()).cloned().collect()
    }

    fn record(&self, stage: Stage, call: Call) -> Result<(), ReporterError> {
        self.calls.lock().push(call);
        if self.failing == Some(stage) {
            return Err(ReporterError::msg(format!("injected {stage:?} failure")));
        }
        Ok(())
    }
}

fn owned(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|tag| (*tag).to_owned()).collect()
}

impl Reporter for DebuggingReporter {
    fn prep(&self) -> Result<(), ReporterError> {
        self.record(Stage::Prep, Call::Prep)
    }

    fn counting(&self, name: &str, tags: &[&str], value: i64) -> Result<(), ReporterError> {
        let call = Call::Counting { name: name.to_owned(), tags: owned(tags), value };
        self.record(Stage::Deliver, call)
    }

    fn discrete(&self, name: &str, tags: &[&str], value: f64) -> Result<(), ReporterError> {
        let call = Call::Discrete { name: name.to_owned(), tags: owned(tags), value };
        self.record(Stage::Deliver, call)
    }

    fn sample(
        &self,
        name: &str,
        tags: &[&str],
        dist: &dyn Distribution,
    ) -> Result<(), ReporterError> {
        let summary = SampleSummary::from_distribution(dist);
        let call = Call::Sample { name: name.to_owned(), tags: owned(tags), summary };
        self.record(Stage::Deliver, call)
    }

    fn flush(&self) -> Result<(), ReporterError> {
        self.record(Stage::Flush, Call::Flush)
    }
}
