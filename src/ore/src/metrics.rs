// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Metrics for hearth systems.
//!
//! The idea here is that each subsystem keeps its metrics in a scoped-to-it
//! struct, which gets registered (once) to the server's (or a test's)
//! prometheus registry.
//!
//! Instead of using prometheus's (very verbose) metrics definitions, we rely
//! on type inference to reduce the verbosity a little bit. A typical metric
//! definition looks like the following:
//!
//! ```rust
//! # use hearth_ore::metric;
//! # use hearth_ore::metrics::MetricsRegistry;
//! # use prometheus::IntCounterVec;
//! let registry = MetricsRegistry::new();
//! let counter: IntCounterVec = registry.register(metric!(
//!     name: "hearth_example_total",
//!     help: "an example counter",
//!     var_labels: ["result"],
//! ));
//! counter.with_label_values(&["success"]).inc();
//! ```

use prometheus::core::{Atomic, Collector, GenericCounter, GenericCounterVec, Opts};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};

pub use prometheus::Opts as PrometheusOpts;

/// Define a metric for use in hearth.
///
/// The `name` must be a valid prometheus metric name. `var_labels` name the
/// labels that are set when the metric is observed, and `buckets`, if given,
/// set the bucket boundaries of a histogram.
#[macro_export]
macro_rules! metric {
    (
        name: $name:expr,
        help: $help:expr
        $(, var_labels: [ $($vl_name:expr),* ])?
        $(, buckets: $buckets:expr)?
        $(,)?
    ) => {{
        let var_labels: ::std::vec::Vec<String> = vec![
            $(
                $($vl_name.into(),)*
            )?];
        #[allow(unused_mut)]
        let mut opts = $crate::metrics::MetricOpts {
            opts: $crate::metrics::PrometheusOpts::new($name, $help)
                .variable_labels(var_labels),
            buckets: None,
        };
        $(opts.buckets = Some($buckets);)?
        opts
    }};
}

/// The options of a metric defined with [`metric`].
#[derive(Debug, Clone)]
pub struct MetricOpts {
    pub opts: Opts,
    pub buckets: Option<Vec<f64>>,
}

/// The hearth metrics registry.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Registry,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry {
            inner: Registry::new(),
        }
    }

    /// Register a metric defined with the [`metric`] macro.
    ///
    /// Panics if a metric with the same name is already registered, which is
    /// a programming error.
    pub fn register<M>(&self, opts: MetricOpts) -> M
    where
        M: MakeCollector,
    {
        let collector = M::make_collector(opts);
        self.inner
            .register(Box::new(collector.clone()))
            .expect("registering metric");
        collector
    }

    /// Gather all the metrics from the metrics registry for reporting.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    /// Renders all metrics in the prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// A collector that can be created from [`MetricOpts`].
pub trait MakeCollector: Collector + Clone + 'static {
    /// Creates a new collector.
    fn make_collector(opts: MetricOpts) -> Self;
}

impl<T> MakeCollector for GenericCounter<T>
where
    T: Atomic + 'static,
{
    fn make_collector(opts: MetricOpts) -> Self {
        Self::with_opts(opts.opts).expect("defining a counter")
    }
}

impl<T> MakeCollector for GenericCounterVec<T>
where
    T: Atomic + 'static,
{
    fn make_collector(opts: MetricOpts) -> Self {
        let labels = opts.opts.variable_labels.clone();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        Self::new(opts.opts, &labels).expect("defining a counter vec")
    }
}

impl MakeCollector for HistogramVec {
    fn make_collector(opts: MetricOpts) -> Self {
        let labels = opts.opts.variable_labels.clone();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        let mut hopts = HistogramOpts::from(opts.opts);
        if let Some(buckets) = opts.buckets {
            hopts = hopts.buckets(buckets);
        }
        Self::new(hopts, &labels).expect("defining a histogram vec")
    }
}

/// Returns exponentially spaced histogram buckets from `from` to `to`
/// seconds, doubling at each step.
pub fn histogram_seconds_buckets(from: f64, to: f64) -> Vec<f64> {
    let mut buckets = vec![];
    let mut bucket = from;
    while bucket <= to {
        buckets.push(bucket);
        bucket *= 2.0;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use prometheus::{IntCounter, IntCounterVec};

    use super::*;
    use crate::metric;

    #[test]
    fn registers_and_encodes() {
        let registry = MetricsRegistry::new();
        let counter: IntCounterVec = registry.register(metric!(
            name: "hearth_test_total",
            help: "a test counter",
            var_labels: ["result"],
        ));
        let plain: IntCounter = registry.register(metric!(
            name: "hearth_plain_total",
            help: "a plain counter",
        ));
        counter.with_label_values(&["success"]).inc();
        plain.inc_by(2);

        let text = registry.encode_text().unwrap();
        assert!(text.contains(r#"hearth_test_total{result="success"} 1"#));
        assert!(text.contains("hearth_plain_total 2"));
    }

    #[test]
    fn histogram_uses_buckets() {
        let registry = MetricsRegistry::new();
        let histogram: HistogramVec = registry.register(metric!(
            name: "hearth_test_seconds",
            help: "a test histogram",
            var_labels: ["op"],
            buckets: vec![0.5, 1.0],
        ));
        histogram.with_label_values(&["x"]).observe(0.7);
        let text = registry.encode_text().unwrap();
        assert!(text.contains(r#"hearth_test_seconds_bucket{op="x",le="0.5"} 0"#));
        assert!(text.contains(r#"hearth_test_seconds_bucket{op="x",le="1"} 1"#));
    }

    #[test]
    fn seconds_buckets_double() {
        assert_eq!(histogram_seconds_buckets(0.25, 2.0), [0.25, 0.5, 1.0, 2.0]);
    }
}
