// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::entry::{Entry, Value};
use crate::errors::ConfigError;
use crate::stage::Processor;

/// Extracts fields from a JSON line.
///
/// `expressions` maps an extracted name to a dotted path into the document
/// (`"user.id"`). An empty path means the top-level key of the same name.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonConfig {
    pub expressions: BTreeMap<String, String>,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct JsonParser {
    paths: Vec<(String, Vec<String>)>,
    source: Option<String>,
}

impl JsonParser {
    pub fn new(config: &JsonConfig) -> Result<Self, ConfigError> {
        if config.expressions.is_empty() {
            return Err(ConfigError::EmptyConfig("json"));
        }
        let paths = config
            .expressions
            .iter()
            .map(|(name, path)| {
                let path = if path.is_empty() { name } else { path };
                (name.clone(), path.split('.').map(str::to_string).collect())
            })
            .collect();
        Ok(Self {
            paths,
            source: config.source.clone().filter(|s| !s.is_empty()),
        })
    }
}

impl Processor for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn process(&self, entry: &mut Entry) {
        let input = match &self.source {
            None => entry.line.clone(),
            Some(source) => match entry.extracted.get(source).map(Value::as_string) {
                Some(Ok(input)) => input,
                _ => {
                    debug!(source = %source, "json source missing or not a string");
                    return;
                }
            },
        };
        let document: serde_json::Value = match serde_json::from_str(&input) {
            Ok(document) => document,
            Err(error) => {
                debug!(%error, "failed to parse line as json");
                return;
            }
        };
        for (name, path) in &self.paths {
            let found = path
                .iter()
                .try_fold(&document, |node, key| node.get(key.as_str()));
            if let Some(value) = found {
                entry.extracted.insert(name.clone(), Value::from(value.clone()));
            }
        }
    }
}
