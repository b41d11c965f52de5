// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Updates user-defined metrics from extracted data.
//!
//! Each configured metric reads one `extracted` field (its `source`, by
//! default the metric name) and records it into a series labeled by the
//! entry's label set. Entries pass through unchanged.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::entry::{Entry, Value};
use crate::errors::ConfigError;
use crate::metrics::counter::{Counter, CounterAction, CounterConfig, CounterVec};
use crate::metrics::gauge::{Gauge, GaugeAction, GaugeConfig, GaugeVec};
use crate::metrics::histogram::{Histogram, HistogramConfig, HistogramVec};
use crate::metrics::{Collector, Registry};
use crate::stage::{Processor, ProcessorStage};

pub const DEFAULT_METRICS_PREFIX: &str = "loki_process_custom_";
const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);
const MIN_MAX_IDLE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricConfig {
    Counter(CounterConfig),
    Gauge(GaugeConfig),
    Histogram(HistogramConfig),
}

/// An ordered list of metric definitions.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MetricsConfig {
    pub metrics: Vec<MetricConfig>,
}

fn full_name(prefix: Option<&str>, name: &str) -> String {
    let prefix = prefix.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_METRICS_PREFIX);
    format!("{prefix}{name}")
}

fn max_idle(name: &str, configured: Option<Duration>) -> Result<Duration, ConfigError> {
    let max_idle = configured.unwrap_or(DEFAULT_MAX_IDLE);
    if max_idle < MIN_MAX_IDLE {
        return Err(ConfigError::metric(name, "max_idle_duration less than 1s not allowed"));
    }
    Ok(max_idle)
}

fn source_or_name(source: Option<&String>, name: &str) -> String {
    source.filter(|s| !s.is_empty()).map_or_else(|| name.to_string(), Clone::clone)
}

enum Recorder {
    Counter {
        config: CounterConfig,
        vec: Arc<CounterVec>,
    },
    Gauge {
        config: GaugeConfig,
        vec: Arc<GaugeVec>,
    },
    Histogram(Arc<HistogramVec>),
}

struct Metric {
    name: String,
    source: String,
    value: Option<String>,
    recorder: Recorder,
}

impl Metric {
    fn new(config: &MetricConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let (name, source, value, recorder, collector): (_, _, _, _, Arc<dyn Collector>) =
            match config {
                MetricConfig::Counter(c) => {
                    c.validate()?;
                    let vec = Arc::new(CounterVec::new(
                        full_name(c.prefix.as_deref(), &c.name),
                        c.description.clone(),
                        Counter::default(),
                        Some(max_idle(&c.name, c.max_idle_duration)?),
                    ));
                    let recorder = Recorder::Counter {
                        config: c.clone(),
                        vec: Arc::clone(&vec),
                    };
                    (&c.name, c.source.as_ref(), c.value.as_ref(), recorder, vec as Arc<dyn Collector>)
                }
                MetricConfig::Gauge(c) => {
                    let vec = Arc::new(GaugeVec::new(
                        full_name(c.prefix.as_deref(), &c.name),
                        c.description.clone(),
                        Gauge::default(),
                        Some(max_idle(&c.name, c.max_idle_duration)?),
                    ));
                    let recorder = Recorder::Gauge {
                        config: c.clone(),
                        vec: Arc::clone(&vec),
                    };
                    (&c.name, c.source.as_ref(), c.value.as_ref(), recorder, vec as Arc<dyn Collector>)
                }
                MetricConfig::Histogram(c) => {
                    let vec = Arc::new(HistogramVec::new(
                        full_name(c.prefix.as_deref(), &c.name),
                        c.description.clone(),
                        Histogram::new(c.upper_bounds()?),
                        Some(max_idle(&c.name, c.max_idle_duration)?),
                    ));
                    let recorder = Recorder::Histogram(Arc::clone(&vec));
                    (&c.name, c.source.as_ref(), c.value.as_ref(), recorder, vec as Arc<dyn Collector>)
                }
            };
        registry.register(collector)?;
        Ok(Self {
            name: name.clone(),
            source: source_or_name(source, name),
            value: value.filter(|v| !v.is_empty()).cloned(),
            recorder,
        })
    }

    fn process(&self, entry: &Entry) {
        if let Recorder::Counter { config, vec } = &self.recorder {
            if config.match_all {
                if config.count_entry_bytes {
                    #[allow(clippy::cast_precision_loss)]
                    let bytes = entry.line.len() as f64;
                    vec.with(&entry.labels, |c| c.add(bytes));
                } else {
                    vec.with(&entry.labels, Counter::inc);
                }
                return;
            }
        }

        let Some(value) = entry.extracted.get(&self.source) else {
            debug!(metric = %self.name, source = %self.source, "source does not exist");
            return;
        };
        if !self.value_matches(value) {
            return;
        }

        match &self.recorder {
            Recorder::Counter { config, vec } => match config.action {
                CounterAction::Inc => vec.with(&entry.labels, Counter::inc),
                CounterAction::Add => {
                    if let Some(v) = self.float(value) {
                        vec.with(&entry.labels, |c| c.add(v));
                    }
                }
            },
            Recorder::Gauge { config, vec } => {
                let action = config.action;
                let v = if action.needs_value() {
                    match self.float(value) {
                        Some(v) => v,
                        None => return,
                    }
                } else {
                    0.0
                };
                vec.with(&entry.labels, |g| match action {
                    GaugeAction::Set => g.set(v),
                    GaugeAction::Inc => g.inc(),
                    GaugeAction::Dec => g.dec(),
                    GaugeAction::Add => g.add(v),
                    GaugeAction::Sub => g.sub(v),
                });
            }
            Recorder::Histogram(vec) => {
                if let Some(v) = self.float(value) {
                    vec.with(&entry.labels, |h| h.observe(v));
                }
            }
        }
    }

    fn value_matches(&self, value: &Value) -> bool {
        let Some(expected) = &self.value else {
            return true;
        };
        match value.as_string() {
            Ok(actual) => &actual == expected,
            Err(error) => {
                debug!(metric = %self.name, %error, "can't perform value comparison");
                false
            }
        }
    }

    fn float(&self, value: &Value) -> Option<f64> {
        value
            .as_float()
            .map_err(|error| debug!(metric = %self.name, %error, "failed to convert extracted value to float"))
            .ok()
    }
}

pub struct Metrics {
    metrics: Vec<Metric>,
}

impl Metrics {
    pub fn new(config: &MetricsConfig, registry: &Registry) -> Result<Self, ConfigError> {
        if config.metrics.is_empty() {
            return Err(ConfigError::EmptyConfig("metrics"));
        }
        let metrics = config
            .metrics
            .iter()
            .map(|m| Metric::new(m, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { metrics })
    }

    pub fn stage(config: &MetricsConfig, registry: &Registry) -> Result<ProcessorStage<Self>, ConfigError> {
        Ok(ProcessorStage::new(Self::new(config, registry)?))
    }
}

impl Processor for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process(&self, entry: &mut Entry) {
        for metric in &self.metrics {
            metric.process(entry);
        }
    }
}
