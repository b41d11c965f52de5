// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conditional discard of entries.
//!
//! Every configured predicate must hold for an entry to be dropped. They are
//! checked cheapest first: line length, age, source values, then the regular
//! expression.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::entry::{label_set, Entry, LabelSet, Value};
use crate::errors::ConfigError;
use crate::metrics::counter::{Counter, CounterVec};
use crate::metrics::Registry;
use crate::stage::{run_with, EntryReceiver, Stage};
use crate::util::{deserialize_optional_byte_size, deserialize_optional_duration};

const DEFAULT_DROP_REASON: &str = "drop_stage";
const DEFAULT_SEPARATOR: &str = ";";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropConfig {
    /// One extracted field name, or several separated by commas. A source
    /// holding a null value counts as missing, so the entry is kept.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub older_than: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_byte_size")]
    pub longer_than: Option<u64>,
    #[serde(default = "default_drop_reason")]
    pub drop_counter_reason: String,
}

impl Default for DropConfig {
    fn default() -> Self {
        Self {
            source: None,
            separator: default_separator(),
            expression: None,
            value: None,
            older_than: None,
            longer_than: None,
            drop_counter_reason: default_drop_reason(),
        }
    }
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_drop_reason() -> String {
    DEFAULT_DROP_REASON.to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

struct Rules {
    sources: Vec<String>,
    separator: String,
    value: Option<String>,
    regex: Option<Regex>,
    older_than: Option<Duration>,
    longer_than: Option<u64>,
}

impl Rules {
    fn from_config(config: &DropConfig) -> Result<Self, ConfigError> {
        let source = non_empty(&config.source);
        let expression = non_empty(&config.expression);
        let value = non_empty(&config.value);
        let older_than = config.older_than.filter(|d| !d.is_zero());
        let longer_than = config.longer_than.filter(|n| *n > 0);

        if source.is_none() && expression.is_none() && older_than.is_none() && longer_than.is_none()
        {
            return Err(ConfigError::DropStageEmpty);
        }
        if value.is_some() && expression.is_some() {
            return Err(ConfigError::DropStageValueAndExpression);
        }
        if value.is_some() && source.is_none() {
            return Err(ConfigError::DropStageValueWithoutSource);
        }
        let regex = expression
            .map(|e| Regex::new(e).map_err(|source| ConfigError::regex(e, source)))
            .transpose()?;

        Ok(Self {
            sources: source
                .map(|s| s.split(',').map(|name| name.trim().to_string()).collect())
                .unwrap_or_default(),
            separator: config.separator.clone(),
            value: value.map(str::to_string),
            regex,
            older_than,
            longer_than,
        })
    }

    /// Joins the string form of every source, or `None` if any is missing or
    /// cannot be represented as a string.
    fn joined_sources(&self, entry: &Entry) -> Option<String> {
        let mut values = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let Some(value) = entry.extracted.get(source) else {
                debug!(source = %source, "drop stage source not found in extracted map");
                return None;
            };
            match value.as_string() {
                Ok(value) => values.push(value),
                Err(error) => {
                    debug!(source = %source, %error, "drop stage failed to convert source value");
                    return None;
                }
            }
        }
        Some(values.join(&self.separator))
    }

    fn should_drop(&self, entry: &Entry) -> bool {
        if let Some(limit) = self.longer_than {
            if entry.line.len() as u64 <= limit {
                return false;
            }
        }
        if let Some(age) = self.older_than {
            let cutoff = SystemTime::now().checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH);
            if entry.timestamp >= cutoff {
                return false;
            }
        }
        if !self.sources.is_empty() && self.regex.is_none() {
            match &self.value {
                None => {
                    let all_present = self.sources.iter().all(|source| {
                        entry
                            .extracted
                            .get(source)
                            .is_some_and(|v| !matches!(v, Value::Null))
                    });
                    if !all_present {
                        return false;
                    }
                }
                Some(expected) => match self.joined_sources(entry) {
                    Some(joined) if &joined == expected => {}
                    _ => return false,
                },
            }
        }
        if let Some(regex) = &self.regex {
            let matched = if self.sources.is_empty() {
                regex.is_match(&entry.line)
            } else {
                self.joined_sources(entry)
                    .is_some_and(|joined| regex.is_match(&joined))
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

pub struct DropStage {
    rules: Arc<Rules>,
    reason: LabelSet,
    dropped: Arc<CounterVec>,
}

impl DropStage {
    pub fn new(config: &DropConfig, registry: &Registry) -> Result<Self, ConfigError> {
        Ok(Self {
            rules: Arc::new(Rules::from_config(config)?),
            reason: label_set([("reason", config.drop_counter_reason.as_str())]),
            dropped: registry.dropped_lines(),
        })
    }
}

impl Stage for DropStage {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn run(&self, input: EntryReceiver) -> EntryReceiver {
        let rules = Arc::clone(&self.rules);
        let reason = self.reason.clone();
        let dropped = Arc::clone(&self.dropped);
        run_with(input, move |entry| {
            if rules.should_drop(&entry) {
                dropped.with(&reason, Counter::inc);
                None
            } else {
                Some(entry)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SampleValue, DROPPED_LINES_TOTAL};
    use crate::stage::test_utils::{new_entry, process_entries};

    fn rules(config: DropConfig) -> Rules {
        Rules::from_config(&config).expect("valid drop config")
    }

    fn entry(extracted: &[(&str, Value)], line: &str) -> Entry {
        new_entry(extracted, LabelSet::new(), line, SystemTime::now())
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Rules::from_config(&DropConfig::default()),
            Err(ConfigError::DropStageEmpty)
        ));
        assert!(matches!(
            Rules::from_config(&DropConfig {
                source: Some("key".into()),
                expression: Some(".*".into()),
                value: Some("v".into()),
                ..DropConfig::default()
            }),
            Err(ConfigError::DropStageValueAndExpression)
        ));
        assert!(matches!(
            Rules::from_config(&DropConfig {
                value: Some("v".into()),
                longer_than: Some(10),
                ..DropConfig::default()
            }),
            Err(ConfigError::DropStageValueWithoutSource)
        ));
        assert!(matches!(
            Rules::from_config(&DropConfig {
                expression: Some("(".into()),
                ..DropConfig::default()
            }),
            Err(ConfigError::Regex { .. })
        ));
    }

    #[test]
    fn test_longer_than() {
        let r = rules(DropConfig {
            longer_than: Some(10),
            ..DropConfig::default()
        });
        assert!(r.should_drop(&entry(&[], "12345678901")));
        assert!(!r.should_drop(&entry(&[], "1234567890")));
        assert!(!r.should_drop(&entry(&[], "123456789")));
    }

    #[test]
    fn test_older_than() {
        let r = rules(DropConfig {
            older_than: Some(Duration::from_secs(3600)),
            ..DropConfig::default()
        });
        let mut old = entry(&[], "");
        old.timestamp = SystemTime::now() - Duration::from_secs(7200);
        let mut recent = entry(&[], "");
        recent.timestamp = SystemTime::now() - Duration::from_secs(300);
        assert!(r.should_drop(&old));
        assert!(!r.should_drop(&recent));
    }

    #[test]
    fn test_source_presence() {
        let r = rules(DropConfig {
            source: Some("key".into()),
            ..DropConfig::default()
        });
        assert!(r.should_drop(&entry(&[("key", Value::from(""))], "")));
        assert!(!r.should_drop(&entry(&[("other", Value::from("val1"))], "")));
        assert!(!r.should_drop(&entry(&[("key", Value::Null)], "")));
    }

    #[test]
    fn test_source_and_value() {
        let r = rules(DropConfig {
            source: Some("level".into()),
            value: Some("50".into()),
            ..DropConfig::default()
        });
        assert!(r.should_drop(&entry(&[("level", Value::Int(50))], "")));
        assert!(r.should_drop(&entry(&[("level", Value::from("50"))], "")));
        assert!(!r.should_drop(&entry(&[("level", Value::Int(100))], "")));
        assert!(!r.should_drop(&entry(&[("level", Value::from("100"))], "")));
        assert!(!r.should_drop(&entry(&[("level", Value::Null)], "")));
    }

    #[test]
    fn test_multiple_sources_with_separator() {
        let r = rules(DropConfig {
            source: Some("key1,key2".into()),
            value: Some("val1;val200.*".into()),
            ..DropConfig::default()
        });
        let extracted = [("key1", Value::from("val1")), ("key2", Value::from("val200.*"))];
        assert!(r.should_drop(&entry(&extracted, "")));
        assert!(!r.should_drop(&entry(&extracted[..1], "")));

        let r = rules(DropConfig {
            source: Some("key1,key2".into()),
            separator: "|".into(),
            value: Some("val1|val200[a]".into()),
            ..DropConfig::default()
        });
        let extracted = [("key1", Value::from("val1")), ("key2", Value::from("val200[a]"))];
        assert!(r.should_drop(&entry(&extracted, "")));
    }

    #[test]
    fn test_expression_against_source_or_line() {
        let on_source = rules(DropConfig {
            source: Some("key".into()),
            expression: Some("50".into()),
            ..DropConfig::default()
        });
        assert!(on_source.should_drop(&entry(&[("key", Value::Int(50))], "")));
        assert!(!on_source.should_drop(&entry(&[("key", Value::Int(51))], "50")));
        assert!(!on_source.should_drop(&entry(&[], "50")));

        let on_line = rules(DropConfig {
            expression: Some(".*app1.*".into()),
            ..DropConfig::default()
        });
        assert!(on_line.should_drop(&entry(&[], "this is app1 log line")));
        assert!(!on_line.should_drop(&entry(&[], "this is app2 log line")));
    }

    #[test]
    fn test_every_predicate_must_hold() {
        let r = rules(DropConfig {
            source: Some("src".into()),
            expression: Some(".*test.*".into()),
            older_than: Some(Duration::from_secs(24 * 3600)),
            longer_than: Some(8 * 1024),
            ..DropConfig::default()
        });
        let long_line = "x".repeat(9000);
        let mut all = entry(&[("src", Value::from("this is a test"))], &long_line);
        all.timestamp = SystemTime::now() - Duration::from_secs(48 * 3600);
        assert!(r.should_drop(&all));

        let mut short = all.clone();
        short.line = "short".into();
        assert!(!r.should_drop(&short));

        let mut fresh = all.clone();
        fresh.timestamp = SystemTime::now();
        assert!(!r.should_drop(&fresh));

        let mut other_source = all.clone();
        other_source
            .extracted
            .insert("src".into(), Value::from("production"));
        assert!(!r.should_drop(&other_source));
    }

    #[tokio::test]
    async fn test_stage_counts_drops() {
        let registry = Registry::new();
        let config = DropConfig {
            longer_than: Some(3),
            drop_counter_reason: "too_long".into(),
            ..DropConfig::default()
        };
        let stage = DropStage::new(&config, &registry).unwrap();
        let out = process_entries(&stage, vec![entry(&[], "ok"), entry(&[], "way too long")]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "ok");

        let families = registry.gather();
        assert_eq!(families[0].name, DROPPED_LINES_TOTAL);
        assert_eq!(
            families[0].sample(&label_set([("reason", "too_long")])),
            Some(&SampleValue::Counter(1.0))
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: DropConfig = serde_json::from_value(serde_json::json!({
            "source": "src",
            "expression": ".*test.*",
            "older_than": "24h",
            "longer_than": "8KB"
        }))
        .unwrap();
        assert_eq!(config.older_than, Some(Duration::from_secs(86400)));
        assert_eq!(config.longer_than, Some(8192));
        assert_eq!(config.separator, ";");
        assert_eq!(config.drop_counter_reason, "drop_stage");
    }
}
