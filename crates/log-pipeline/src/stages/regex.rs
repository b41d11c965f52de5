// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use tracing::debug;

use crate::entry::{Entry, Value};
use crate::errors::ConfigError;
use crate::stage::Processor;

/// Extracts the named capture groups of `expression` into `extracted`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexConfig {
    pub expression: String,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct RegexParser {
    regex: regex::Regex,
    source: Option<String>,
}

impl RegexParser {
    pub fn new(config: &RegexConfig) -> Result<Self, ConfigError> {
        if config.expression.is_empty() {
            return Err(ConfigError::EmptyConfig("regex"));
        }
        let regex = regex::Regex::new(&config.expression)
            .map_err(|source| ConfigError::regex(&config.expression, source))?;
        Ok(Self {
            regex,
            source: config.source.clone().filter(|s| !s.is_empty()),
        })
    }
}

impl Processor for RegexParser {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn process(&self, entry: &mut Entry) {
        let input = match &self.source {
            None => entry.line.clone(),
            Some(source) => match entry.extracted.get(source).map(Value::as_string) {
                Some(Ok(input)) => input,
                Some(Err(error)) => {
                    debug!(source = %source, %error, "regex source is not a string");
                    return;
                }
                None => {
                    debug!(source = %source, "regex source does not exist");
                    return;
                }
            },
        };
        let Some(captures) = self.regex.captures(&input) else {
            debug!("regex did not match");
            return;
        };
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                entry
                    .extracted
                    .insert(name.to_string(), Value::from(m.as_str()));
            }
        }
    }
}
