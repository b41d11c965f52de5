// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use derive_more::Display;
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::metrics::vec::{Accumulator, MetricVec};
use crate::metrics::{MetricKind, SampleValue};
use crate::util::deserialize_optional_duration;

pub type CounterVec = MetricVec<Counter>;

/// A monotonically increasing value.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: f64,
}

impl Counter {
    pub fn inc(&mut self) {
        self.value += 1.0;
    }

    /// Adds `v`. Negative values are ignored; counters never go down.
    pub fn add(&mut self, v: f64) {
        if v >= 0.0 {
            self.value += v;
        }
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Accumulator for Counter {
    const KIND: MetricKind = MetricKind::Counter;

    fn sample(&self) -> SampleValue {
        SampleValue::Counter(self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterAction {
    #[display("inc")]
    Inc,
    #[display("add")]
    Add,
}

/// A user-defined counter derived from extracted data.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub action: CounterAction,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub count_entry_bytes: bool,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub max_idle_duration: Option<Duration>,
}

impl CounterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_all && self.value.is_some() {
            return Err(ConfigError::metric(
                &self.name,
                "`match_all` cannot be combined with `value`",
            ));
        }
        if self.count_entry_bytes && !self.match_all {
            return Err(ConfigError::metric(
                &self.name,
                "`count_entry_bytes` requires `match_all`",
            ));
        }
        if self.count_entry_bytes && self.action != CounterAction::Add {
            return Err(ConfigError::metric(
                &self.name,
                "`count_entry_bytes` requires action `add`",
            ));
        }
        Ok(())
    }
}
