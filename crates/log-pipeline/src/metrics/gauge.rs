// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use derive_more::Display;
use serde::Deserialize;

use crate::metrics::vec::{Accumulator, MetricVec};
use crate::metrics::{MetricKind, SampleValue};
use crate::util::deserialize_optional_duration;

pub type GaugeVec = MetricVec<Gauge>;

/// A value that can go up and down.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    value: f64,
}

impl Gauge {
    pub fn set(&mut self, v: f64) {
        self.value = v;
    }

    pub fn inc(&mut self) {
        self.value += 1.0;
    }

    pub fn dec(&mut self) {
        self.value -= 1.0;
    }

    pub fn add(&mut self, v: f64) {
        self.value += v;
    }

    pub fn sub(&mut self, v: f64) {
        self.value -= v;
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Accumulator for Gauge {
    const KIND: MetricKind = MetricKind::Gauge;

    fn sample(&self) -> SampleValue {
        SampleValue::Gauge(self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeAction {
    #[display("set")]
    Set,
    #[display("inc")]
    Inc,
    #[display("dec")]
    Dec,
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
}

impl GaugeAction {
    /// Whether the action needs a numeric value from the source field.
    #[must_use]
    pub fn needs_value(self) -> bool {
        matches!(self, GaugeAction::Set | GaugeAction::Add | GaugeAction::Sub)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaugeConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub action: GaugeAction,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub max_idle_duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_operations() {
        let mut gauge = Gauge::default();
        gauge.set(10.0);
        gauge.inc();
        gauge.dec();
        gauge.dec();
        gauge.add(0.5);
        gauge.sub(2.0);
        assert_eq!(gauge.value(), 7.5);
    }

    #[test]
    fn test_gauge_config_parses_actions() {
        for action in ["set", "inc", "dec", "add", "sub"] {
            let config: GaugeConfig = serde_json::from_value(serde_json::json!({
                "name": "g", "action": action
            }))
            .expect("valid gauge config");
            assert_eq!(config.action.to_string(), action);
        }
    }
}
