// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label-keyed metric vectors with idle-based eviction.
//!
//! Every series remembers when it was last touched. Eviction only happens when
//! the vector is collected: series idle for at least `max_idle` are removed
//! before the remaining ones are reported. Touching a series always resets its
//! clock, so a label set that keeps receiving traffic is never evicted.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::entry::{fingerprint, Fingerprint, LabelSet};
use crate::metrics::{Collector, MetricFamily, MetricKind, Sample, SampleValue};

/// A single time series accumulator.
pub trait Accumulator: Clone + Send + Sync + 'static {
    const KIND: MetricKind;

    fn sample(&self) -> SampleValue;
}

struct Series<M> {
    labels: LabelSet,
    metric: M,
    last_touched: Instant,
}

pub struct MetricVec<M> {
    name: String,
    help: String,
    template: M,
    max_idle: Option<Duration>,
    series: Mutex<HashMap<Fingerprint, Series<M>>>,
}

impl<M: Accumulator> MetricVec<M> {
    /// Creates an empty vector. New series start as a clone of `template`.
    /// With `max_idle` set to `None` series are never evicted.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        template: M,
        max_idle: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            template,
            max_idle,
            series: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Series<M>>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the series for `labels`, creating it if needed, and
    /// marks it as touched.
    pub fn with<R>(&self, labels: &LabelSet, f: impl FnOnce(&mut M) -> R) -> R {
        let now = Instant::now();
        let mut series = self.lock();
        let entry = series
            .entry(fingerprint(labels))
            .or_insert_with(|| Series {
                labels: labels.clone(),
                metric: self.template.clone(),
                last_touched: now,
            });
        entry.last_touched = now;
        f(&mut entry.metric)
    }

    /// Returns the current sample for `labels` without touching it.
    #[must_use]
    pub fn get(&self, labels: &LabelSet) -> Option<SampleValue> {
        self.lock()
            .get(&fingerprint(labels))
            .map(|series| series.metric.sample())
    }

    /// Removes every series.
    pub fn reset(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Accumulator> Collector for MetricVec<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> MetricFamily {
        let mut series = self.lock();
        if let Some(max_idle) = self.max_idle {
            let now = Instant::now();
            series.retain(|_, s| now.duration_since(s.last_touched) < max_idle);
        }

        let mut samples: Vec<Sample> = series
            .values()
            .map(|s| Sample {
                labels: s.labels.clone(),
                value: s.metric.sample(),
            })
            .collect();
        samples.sort_by(|a, b| a.labels.cmp(&b.labels));

        MetricFamily {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: M::KIND,
            samples,
        }
    }
}
