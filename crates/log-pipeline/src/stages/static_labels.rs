// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::entry::{is_valid_label_name, Entry};
use crate::errors::ConfigError;
use crate::stage::Processor;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticLabelsConfig {
    pub values: BTreeMap<String, String>,
}

/// Adds fixed labels to every entry.
pub struct StaticLabels {
    values: Vec<(String, String)>,
}

impl StaticLabels {
    pub fn new(config: &StaticLabelsConfig) -> Result<Self, ConfigError> {
        if config.values.is_empty() {
            return Err(ConfigError::EmptyConfig("static_labels"));
        }
        let mut values = Vec::with_capacity(config.values.len());
        for (name, value) in &config.values {
            if !is_valid_label_name(name) {
                debug!(label = %name, "skipping invalid label name");
                continue;
            }
            values.push((name.clone(), value.clone()));
        }
        Ok(Self { values })
    }
}

impl Processor for StaticLabels {
    fn name(&self) -> &'static str {
        "static_labels"
    }

    fn process(&self, entry: &mut Entry) {
        for (name, value) in &self.values {
            entry.labels.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::label_set;
    use std::time::SystemTime;

    #[test]
    fn test_adds_and_overwrites() {
        let stage = StaticLabels::new(&StaticLabelsConfig {
            values: BTreeMap::from([
                ("env".to_string(), "prod".to_string()),
                ("app".to_string(), "new".to_string()),
                ("0bad".to_string(), "x".to_string()),
            ]),
        })
        .unwrap();
        let mut entry = Entry::new(label_set([("app", "old")]), "", SystemTime::now());
        stage.process(&mut entry);
        assert_eq!(entry.labels, label_set([("app", "new"), ("env", "prod")]));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(StaticLabels::new(&StaticLabelsConfig {
            values: BTreeMap::new()
        })
        .is_err());
    }
}
