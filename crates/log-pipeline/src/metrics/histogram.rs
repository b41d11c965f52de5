// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::metrics::vec::{Accumulator, MetricVec};
use crate::metrics::{MetricKind, SampleValue};
use crate::util::deserialize_optional_duration;

pub type HistogramVec = MetricVec<Histogram>;

/// Default bucket upper bounds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Bucketed observations. Bucket counts are stored per bucket and reported cumulatively.
#[derive(Clone, Debug)]
pub struct Histogram {
    upper_bounds: Arc<[f64]>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    #[must_use]
    pub fn new(upper_bounds: Arc<[f64]>) -> Self {
        let counts = vec![0; upper_bounds.len()];
        Self {
            upper_bounds,
            counts,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, v: f64) {
        if let Some(i) = self.upper_bounds.iter().position(|bound| v <= *bound) {
            self.counts[i] += 1;
        }
        self.sum += v;
        self.count += 1;
    }
}

impl Accumulator for Histogram {
    const KIND: MetricKind = MetricKind::Histogram;

    fn sample(&self) -> SampleValue {
        let mut cumulative = 0;
        let buckets = self
            .upper_bounds
            .iter()
            .zip(&self.counts)
            .map(|(bound, count)| {
                cumulative += count;
                (*bound, cumulative)
            })
            .collect();
        SampleValue::Histogram {
            buckets,
            sum: self.sum,
            count: self.count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub max_idle_duration: Option<Duration>,
}

impl HistogramConfig {
    /// Returns the configured buckets, or the defaults, after checking they
    /// are strictly increasing.
    pub fn upper_bounds(&self) -> Result<Arc<[f64]>, ConfigError> {
        let buckets = self
            .buckets
            .clone()
            .unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
        if buckets.is_empty() {
            return Err(ConfigError::metric(&self.name, "`buckets` cannot be empty"));
        }
        if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::metric(
                &self.name,
                "`buckets` must be in strictly increasing order",
            ));
        }
        Ok(buckets.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_reports_cumulative_buckets() {
        let mut histogram = Histogram::new(Arc::from(vec![10.0, 20.0]));
        histogram.observe(10.0);
        histogram.observe(20.0);
        histogram.observe(25.0);
        assert_eq!(
            histogram.sample(),
            SampleValue::Histogram {
                buckets: vec![(10.0, 1), (20.0, 2)],
                sum: 55.0,
                count: 3,
            }
        );
    }

    #[test]
    fn test_default_buckets() {
        let config: HistogramConfig =
            serde_json::from_value(serde_json::json!({"name": "h"})).expect("valid config");
        assert_eq!(config.upper_bounds().unwrap().len(), DEFAULT_BUCKETS.len());
    }

    #[test]
    fn test_unsorted_buckets_rejected() {
        let config: HistogramConfig =
            serde_json::from_value(serde_json::json!({"name": "h", "buckets": [20, 10]}))
                .expect("valid config");
        assert!(config.upper_bounds().is_err());
    }
}
