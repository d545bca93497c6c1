use std::{error::Error, sync::Arc};

use crate::distribution::Distribution;

/// An error reported by a [`Reporter`].
///
/// Reporters are free to fail for any reason; this wraps whatever they report.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReporterError(Box<dyn Error + Send + Sync + 'static>);

impl ReporterError {
    /// Wraps an arbitrary error.
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self(err.into())
    }

    /// Creates an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }
}

/// A sink for flushed metrics.
///
/// During a flush, the registry calls every subscribed reporter in three stages:
///
/// 1. [`prep`](Reporter::prep), once per reporter
/// 2. [`discrete`](Reporter::discrete) or [`sample`](Reporter::sample), once per reporter and
///    instrument
/// 3. [`flush`](Reporter::flush), once per reporter
///
/// Names handed to reporters already carry the registry's prefix, and tags are the instrument's
/// own sorted tags followed by the registry's tags. Distributions are normalized: they never
/// yield NaN or infinite values.
///
/// Reporters are called from whichever thread runs the flush, without any registry lock held.
/// They must not flush or close the registry that is driving them.
pub trait Reporter: Send + Sync {
    /// Prepares for a new flush cycle.
    ///
    /// An error skips delivery for the rest of the cycle. The flush stage still runs.
    fn prep(&self) -> Result<(), ReporterError> {
        Ok(())
    }

    /// Receives an integral count.
    ///
    /// Registries never call this themselves; it exists for callers that forward raw counts
    /// straight to a reporter. Defaults to [`discrete`](Reporter::discrete).
    fn counting(&self, name: &str, tags: &[&str], value: i64) -> Result<(), ReporterError> {
        self.discrete(name, tags, value as f64)
    }

    /// Receives the value of a discrete instrument.
    fn discrete(&self, name: &str, tags: &[&str], value: f64) -> Result<(), ReporterError>;

    /// Receives the distribution of a sampling instrument.
    fn sample(
        &self,
        name: &str,
        tags: &[&str],
        dist: &dyn Distribution,
    ) -> Result<(), ReporterError>;

    /// Completes a flush cycle.
    fn flush(&self) -> Result<(), ReporterError> {
        Ok(())
    }
}

impl<R> Reporter for Arc<R>
where
    R: Reporter + ?Sized,
{
    fn prep(&self) -> Result<(), ReporterError> {
        (**self).prep()
    }

    fn counting(&self, name: &str, tags: &[&str], value: i64) -> Result<(), ReporterError> {
        (**self).counting(name, tags, value)
    }

    fn discrete(&self, name: &str, tags: &[&str], value: f64) -> Result<(), ReporterError> {
        (**self).discrete(name, tags, value)
    }

    fn sample(
        &self,
        name: &str,
        tags: &[&str],
        dist: &dyn Distribution,
    ) -> Result<(), ReporterError> {
        (**self).sample(name, tags, dist)
    }

    fn flush(&self) -> Result<(), ReporterError> {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Reporter, ReporterError};
    use crate::{Call, DebuggingReporter};

    #[test]
    fn counting_defaults_to_discrete() {
        let reporter = Arc::new(DebuggingReporter::new());
        reporter.counting("hits", &["a:b"], 7).expect("debugging reporter never fails");

        let calls = reporter.calls();
        assert!(matches!(
            calls.as_slice(),
            [Call::Counting { name, value: 7, .. }] if name == "hits"
        ));
    }

    #[test]
    fn error_message() {
        let err = ReporterError::msg("connection refused");
        assert_eq!(err.to_string(), "connection refused");

        let err = ReporterError::new(std::io::Error::new(std::io::ErrorKind::Other, "broken pipe"));
        assert_eq!(err.to_string(), "broken pipe");
    }
}
