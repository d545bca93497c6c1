//! Reports metrics via the `log` crate.
//!
//! [`LogReporter`] buffers one line fragment per metric delivered during a flush cycle, and emits
//! all of them as a single, space-separated line when the cycle completes:
//!
//! - discrete values as `name|tag1,tag2:val=<value>`
//! - distributions as `name|tag1,tag2:p95=<value>`, one `label=<value>` pair per configured
//!   quantile, separated by commas
//!
//! The `|tags` part is left out for metrics without tags.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use log::Level;
//! use metrics_instruments::Registry;
//! use metrics_reporter_log::LogReporter;
//!
//! let registry = Registry::new(Duration::from_secs(60), "app.", &[]).expect("failed to build");
//! registry.subscribe(LogReporter::new().with_level(Level::Debug).with_quantiles(&[0.5, 0.99]));
//! ```
#![deny(missing_docs)]

use std::fmt::{self, Write as _};

use log::{log, Level};
use metrics_instruments::{Distribution, Reporter, ReporterError};
use parking_lot::Mutex;

type Sink = Box<dyn Fn(&str) + Send + Sync>;

/// Reports metrics by logging one line per flush cycle.
pub struct LogReporter {
    level: Level,
    quantiles: Vec<f64>,
    lines: Mutex<Vec<String>>,
    sink: Option<Sink>,
}

impl LogReporter {
    /// Creates a new [`LogReporter`] that logs at the info level, reporting the 95th percentile of
    /// distributions.
    pub fn new() -> Self {
        LogReporter {
            level: Level::Info,
            quantiles: vec![0.95],
            lines: Mutex::new(Vec::new()),
            sink: None,
        }
    }

    /// Sets the level to log at.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the quantiles reported for distributions.
    ///
    /// Quantiles outside of `[0.0, 1.0]` are ignored. When none remain, the 95th percentile is
    /// reported.
    #[must_use]
    pub fn with_quantiles(mut self, quantiles: &[f64]) -> Self {
        let quantiles =
            quantiles.iter().copied().filter(|q| (0.0..=1.0).contains(q)).collect::<Vec<_>>();
        self.quantiles = if quantiles.is_empty() { vec![0.95] } else { quantiles };
        self
    }

    /// Sends completed lines to `sink` instead of logging them.
    #[must_use]
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    fn push(&self, name: &str, tags: &[&str], values: fmt::Arguments<'_>) {
        let mut line = String::with_capacity(name.len() + 16);
        line.push_str(name);
        if !tags.is_empty() {
            line.push('|');
            line.push_str(&tags.join(","));
        }
        line.push(':');
        let _ = line.write_fmt(values);

        self.lines.lock().push(line);
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReporter")
            .field("level", &self.level)
            .field("quantiles", &self.quantiles)
            .finish_non_exhaustive()
    }
}

const LABEL_PRECISION: f64 = 1.0e6;

fn quantile_label(q: f64) -> String {
    if q == 0.0 {
        "min".to_owned()
    } else if q == 1.0 {
        "max".to_owned()
    } else {
        // Round away representation error, so 0.29 reads as p29 rather than p28999999999999996.
        let percent = (q * 100.0 * LABEL_PRECISION).round() / LABEL_PRECISION;
        format!("p{percent}").replace('.', "")
    }
}

impl Reporter for LogReporter {
    fn prep(&self) -> Result<(), ReporterError> {
        self.lines.lock().clear();
        Ok(())
    }

    fn counting(&self, name: &str, tags: &[&str], value: i64) -> Result<(), ReporterError> {
        self.push(name, tags, format_args!("val={value}"));
        Ok(())
    }

    fn discrete(&self, name: &str, tags: &[&str], value: f64) -> Result<(), ReporterError> {
        self.push(name, tags, format_args!("val={value}"));
        Ok(())
    }

    fn sample(
        &self,
        name: &str,
        tags: &[&str],
        dist: &dyn Distribution,
    ) -> Result<(), ReporterError> {
        let mut values = String::new();
        for (i, q) in self.quantiles.iter().enumerate() {
            if i > 0 {
                values.push(',');
            }
            let _ = write!(values, "{}={}", quantile_label(*q), dist.quantile(*q));
        }

        self.push(name, tags, format_args!("{values}"));
        Ok(())
    }

    fn flush(&self) -> Result<(), ReporterError> {
        let lines = std::mem::take(&mut *self.lines.lock());
        if lines.is_empty() {
            return Ok(());
        }

        let output = lines.join(" ");
        match &self.sink {
            Some(sink) => sink(&output),
            None => log!(self.level, "{}", output),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_instruments::{Registry, Reporter, SamplePool, SampledDistribution};
    use parking_lot::Mutex;

    use super::{quantile_label, LogReporter};

    fn capturing(reporter: LogReporter) -> (LogReporter, Arc<Mutex<Vec<String>>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&output);
        (reporter.with_sink(move |line| sink.lock().push(line.to_owned())), output)
    }

    #[test]
    fn labels() {
        assert_eq!(quantile_label(0.0), "min");
        assert_eq!(quantile_label(1.0), "max");
        assert_eq!(quantile_label(0.5), "p50");
        assert_eq!(quantile_label(0.95), "p95");
        assert_eq!(quantile_label(0.999), "p999");
        assert_eq!(quantile_label(0.29), "p29");
        assert_eq!(quantile_label(0.07), "p7");
        assert_eq!(quantile_label(0.575), "p575");
    }

    #[test]
    fn one_line_per_flush() {
        let (reporter, output) = capturing(LogReporter::new());
        let dist = SampledDistribution::from_values(&SamplePool::new(), [12.5]);

        reporter.prep().expect("prep never fails");
        reporter.counting("hits", &["a", "b"], 7).expect("counting never fails");
        reporter.discrete("load", &[], 1.5).expect("discrete never fails");
        reporter.sample("latency", &["path:/"], &dist).expect("sample never fails");
        reporter.flush().expect("flush never fails");

        assert_eq!(
            output.lock().as_slice(),
            ["hits|a,b:val=7 load:val=1.5 latency|path:/:p95=12.5"]
        );

        // Empty cycles log nothing.
        reporter.prep().expect("prep never fails");
        reporter.flush().expect("flush never fails");
        assert_eq!(output.lock().len(), 1);
    }

    #[test]
    fn multiple_quantiles() {
        let (reporter, output) =
            capturing(LogReporter::new().with_quantiles(&[0.0, 0.5, 1.0, 2.0]));
        let dist = SampledDistribution::from_values(&SamplePool::new(), [1.0, 2.0, 2.0, 3.0]);

        reporter.sample("size", &[], &dist).expect("sample never fails");
        reporter.flush().expect("flush never fails");

        let output = output.lock();
        let line = output.first().expect("one line");
        let values =
            line.strip_prefix("size:").expect("metric name").split(',').collect::<Vec<_>>();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], "min=1");
        let p50 = values[1].strip_prefix("p50=").expect("median label");
        assert!((p50.parse::<f64>().expect("numeric median") - 2.0).abs() < 0.01);
        assert_eq!(values[2], "max=3");
    }

    #[test]
    fn driven_by_registry() {
        let (reporter, output) = capturing(LogReporter::new());
        let registry = Registry::new_unstarted("app.", &["env:test"]);
        registry.subscribe(reporter);

        registry.counter("requests", &["path:/"]).update(3.0);
        registry.flush().expect("flush should succeed");

        assert_eq!(output.lock().as_slice(), ["app.requests|path:/,env:test:val=3"]);
    }
}
