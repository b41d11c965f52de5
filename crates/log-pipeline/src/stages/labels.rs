// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::entry::{is_valid_label_name, Entry};
use crate::errors::ConfigError;
use crate::stage::Processor;

/// Promotes extracted values to labels. Keys are label names, values the
/// extracted field to read; an empty or missing value reads the field of the
/// same name.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelsConfig {
    pub values: BTreeMap<String, Option<String>>,
}

pub struct Labels {
    values: Vec<(String, String)>,
}

impl Labels {
    pub fn new(config: &LabelsConfig) -> Result<Self, ConfigError> {
        if config.values.is_empty() {
            return Err(ConfigError::EmptyConfig("labels"));
        }
        let values = config
            .values
            .iter()
            .filter(|(name, _)| {
                let valid = is_valid_label_name(name);
                if !valid {
                    debug!(label = %name, "skipping invalid label name");
                }
                valid
            })
            .map(|(name, source)| {
                let source = source
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(name.as_str());
                (name.clone(), source.to_string())
            })
            .collect();
        Ok(Self { values })
    }
}

impl Processor for Labels {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn process(&self, entry: &mut Entry) {
        for (name, source) in &self.values {
            let Some(value) = entry.extracted.get(source) else {
                continue;
            };
            match value.as_string() {
                Ok(value) if !value.is_empty() => {
                    entry.labels.insert(name.clone(), value);
                }
                Ok(_) => {}
                Err(error) => debug!(label = %name, %error, "failed to convert value to label"),
            }
        }
    }
}
