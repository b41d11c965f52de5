// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process metric accumulators and the registry that collects them.
//!
//! Metric vectors are owned by the pipeline that created them and handed to a
//! [`Registry`]. A scrape endpoint, or a test, calls [`Registry::gather`],
//! which is also the moment idle series are evicted. Encoding the families for
//! a wire protocol is left to whoever consumes them.
//!
//! # Components
//!
//! - **[`vec`]**: label-keyed vector with idle eviction
//! - **[`counter`]**, **[`gauge`]**, **[`histogram`]**: the accumulators and
//!   their user-facing configuration

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use derive_more::Display;

use crate::entry::LabelSet;
use crate::errors::ConfigError;

pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod vec;

use counter::{Counter, CounterVec};

/// Lines dropped by any stage, labeled by `reason`.
pub const DROPPED_LINES_TOTAL: &str = "loki_process_dropped_lines_total";
/// Lines dropped by a per-label rate limiter, labeled by `label_name` and `label_value`.
pub const DROPPED_LINES_BY_LABEL_TOTAL: &str = "loki_process_dropped_lines_by_label_total";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum MetricKind {
    #[display("counter")]
    Counter,
    #[display("gauge")]
    Gauge,
    #[display("histogram")]
    Histogram,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    Counter(f64),
    Gauge(f64),
    /// `buckets` holds `(upper_bound, cumulative_count)` pairs; the implicit
    /// `+Inf` bucket equals `count`.
    Histogram {
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: SampleValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    #[must_use]
    pub fn sample(&self, labels: &LabelSet) -> Option<&SampleValue> {
        self.samples
            .iter()
            .find(|s| &s.labels == labels)
            .map(|s| &s.value)
    }
}

/// Anything that can report one metric family.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self) -> MetricFamily;
}

/// A set of collectors owned by one or more pipelines.
#[derive(Default)]
pub struct Registry {
    collectors: Mutex<BTreeMap<String, Arc<dyn Collector>>>,
    dropped_lines: OnceLock<Arc<CounterVec>>,
    dropped_lines_by_label: OnceLock<Arc<CounterVec>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn Collector>>> {
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, collector: Arc<dyn Collector>) -> Result<(), ConfigError> {
        let mut collectors = self.lock();
        let name = collector.name().to_string();
        if collectors.contains_key(&name) {
            return Err(ConfigError::DuplicateMetric(name));
        }
        collectors.insert(name, collector);
        Ok(())
    }

    /// Collects every registered family, sorted by name. Families without any
    /// series are omitted.
    #[must_use]
    pub fn gather(&self) -> Vec<MetricFamily> {
        let collectors: Vec<Arc<dyn Collector>> = self.lock().values().cloned().collect();
        collectors
            .iter()
            .map(|c| c.collect())
            .filter(|family| !family.samples.is_empty())
            .collect()
    }

    /// Returns the shared drop counter, registering it on first use.
    pub fn dropped_lines(&self) -> Arc<CounterVec> {
        Arc::clone(self.dropped_lines.get_or_init(|| {
            self.shared_counter(
                DROPPED_LINES_TOTAL,
                "A count of all log lines dropped as a result of a pipeline stage",
            )
        }))
    }

    /// Returns the shared per-label drop counter, registering it on first use.
    pub fn dropped_lines_by_label(&self) -> Arc<CounterVec> {
        Arc::clone(self.dropped_lines_by_label.get_or_init(|| {
            self.shared_counter(
                DROPPED_LINES_BY_LABEL_TOTAL,
                "A count of all log lines dropped as a result of a pipeline stage, by label",
            )
        }))
    }

    fn shared_counter(&self, name: &str, help: &str) -> Arc<CounterVec> {
        let counter = Arc::new(CounterVec::new(name, help, Counter::default(), None));
        self.lock()
            .insert(name.to_string(), Arc::clone(&counter) as Arc<dyn Collector>);
        counter
    }
}
