// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use tracing::debug;

use crate::entry::Entry;
use crate::errors::ConfigError;
use crate::stage::Processor;

/// Replaces the line with an extracted value.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub source: String,
}

pub struct Output {
    source: String,
}

impl Output {
    pub fn new(config: &OutputConfig) -> Result<Self, ConfigError> {
        if config.source.is_empty() {
            return Err(ConfigError::EmptyConfig("output"));
        }
        Ok(Self {
            source: config.source.clone(),
        })
    }
}

impl Processor for Output {
    fn name(&self) -> &'static str {
        "output"
    }

    fn process(&self, entry: &mut Entry) {
        let Some(value) = entry.extracted.get(&self.source) else {
            debug!(source = %self.source, "output source does not exist");
            return;
        };
        match value.as_string() {
            Ok(line) => entry.line = line,
            Err(error) => debug!(source = %self.source, %error, "failed to convert output source"),
        }
    }
}
