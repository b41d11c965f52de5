// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token-bucket rate limiting, for the whole stream or per value of one
//! extracted label.
//!
//! In drop mode entries over the limit are discarded and counted. Otherwise
//! the stage holds each entry until a token is free, which backpressures
//! every upstream stage.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::entry::{label_set, Entry, LabelSet};
use crate::errors::ConfigError;
use crate::gen_map::GenMap;
use crate::metrics::counter::{Counter, CounterVec};
use crate::metrics::Registry;
use crate::stage::{queue, run_with, EntryReceiver, Stage};
use crate::token_bucket::TokenBucket;

/// Lower bound for `max_distinct_labels`.
pub const MIN_DISTINCT_LABELS: usize = 10_000;

const RATE_LIMIT_DROP_REASON: &str = "ratelimit_drop_stage";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitConfig {
    pub rate: f64,
    pub burst: u32,
    #[serde(default)]
    pub drop: bool,
    #[serde(default)]
    pub by_label_name: Option<String>,
    #[serde(default)]
    pub max_distinct_labels: usize,
}

impl LimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate.is_finite() || self.rate <= 0.0 || self.burst == 0 {
            return Err(ConfigError::InvalidRateOrBurst {
                rate: self.rate,
                burst: self.burst,
            });
        }
        if self.by_label().is_some() && !self.drop {
            return Err(ConfigError::ByLabelMustDrop);
        }
        Ok(())
    }

    fn by_label(&self) -> Option<&str> {
        self.by_label_name.as_deref().filter(|name| !name.is_empty())
    }
}

struct ByLabel {
    name: String,
    buckets: GenMap<String, Arc<TokenBucket>>,
    dropped: Arc<CounterVec>,
}

impl ByLabel {
    fn allow(&self, entry: &Entry) -> bool {
        let Some(value) = entry.labels.get(&self.name) else {
            return true;
        };
        if self.buckets.get_or_create(value).allow() {
            return true;
        }
        let labels = label_set([("label_name", self.name.as_str()), ("label_value", value.as_str())]);
        self.dropped.with(&labels, Counter::inc);
        false
    }
}

enum Mode {
    Block(Arc<TokenBucket>),
    Drop {
        bucket: Arc<TokenBucket>,
        reason: LabelSet,
        dropped: Arc<CounterVec>,
    },
    ByLabel(Arc<ByLabel>),
}

pub struct LimitStage {
    mode: Mode,
}

impl LimitStage {
    pub fn new(config: &LimitConfig, registry: &Registry) -> Result<Self, ConfigError> {
        config.validate()?;
        let (rate, burst) = (config.rate, config.burst);

        let mode = match config.by_label() {
            Some(name) => {
                let mut max = config.max_distinct_labels;
                if max < MIN_DISTINCT_LABELS {
                    warn!(
                        configured = max,
                        minimum = MIN_DISTINCT_LABELS,
                        "max_distinct_labels too low, raising it to the minimum"
                    );
                    max = MIN_DISTINCT_LABELS;
                }
                let dropped = registry.dropped_lines_by_label();
                let gc_dropped = Arc::clone(&dropped);
                let buckets = GenMap::new(
                    max,
                    move || Arc::new(TokenBucket::new(rate, burst)),
                    Some(Box::new(move || gc_dropped.reset())),
                );
                Mode::ByLabel(Arc::new(ByLabel {
                    name: name.to_string(),
                    buckets,
                    dropped,
                }))
            }
            None if config.drop => Mode::Drop {
                bucket: Arc::new(TokenBucket::new(rate, burst)),
                reason: label_set([("reason", RATE_LIMIT_DROP_REASON)]),
                dropped: registry.dropped_lines(),
            },
            None => Mode::Block(Arc::new(TokenBucket::new(rate, burst))),
        };
        debug!(rate, burst, drop = config.drop, by_label_name = ?config.by_label(), "limit stage configured");
        Ok(Self { mode })
    }
}

impl Stage for LimitStage {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn run(&self, mut input: EntryReceiver) -> EntryReceiver {
        match &self.mode {
            Mode::ByLabel(by_label) => {
                let by_label = Arc::clone(by_label);
                run_with(input, move |entry| by_label.allow(&entry).then_some(entry))
            }
            Mode::Drop {
                bucket,
                reason,
                dropped,
            } => {
                let bucket = Arc::clone(bucket);
                let reason = reason.clone();
                let dropped = Arc::clone(dropped);
                run_with(input, move |entry| {
                    if bucket.allow() {
                        Some(entry)
                    } else {
                        dropped.with(&reason, Counter::inc);
                        None
                    }
                })
            }
            Mode::Block(bucket) => {
                let bucket = Arc::clone(bucket);
                let (tx, rx) = queue();
                tokio::spawn(async move {
                    while let Some(entry) = input.recv().await {
                        bucket.wait().await;
                        if tx.send(entry).await.is_err() {
                            debug!("downstream queue closed, stopping limit stage");
                            return;
                        }
                    }
                });
                rx
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SampleValue, DROPPED_LINES_BY_LABEL_TOTAL, DROPPED_LINES_TOTAL};
    use crate::stage::test_utils::{new_entry, process_entries};
    use std::time::{Duration, SystemTime};
    use tracing_test::traced_test;

    fn config(json: serde_json::Value) -> LimitConfig {
        serde_json::from_value(json).expect("valid limit config")
    }

    fn entries(labels: &[(&str, &str)], n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| new_entry(&[], label_set(labels.iter().copied()), &format!("line {i}"), SystemTime::now()))
            .collect()
    }

    #[test]
    fn test_validation() {
        let registry = Registry::new();
        for json in [
            serde_json::json!({"rate": 0, "burst": 1}),
            serde_json::json!({"rate": 1, "burst": 0}),
            serde_json::json!({"rate": -1, "burst": 1}),
        ] {
            assert!(matches!(
                LimitStage::new(&config(json), &registry),
                Err(ConfigError::InvalidRateOrBurst { .. })
            ));
        }
        assert!(matches!(
            LimitStage::new(
                &config(serde_json::json!({"rate": 1, "burst": 1, "by_label_name": "app"})),
                &registry
            ),
            Err(ConfigError::ByLabelMustDrop)
        ));
        for rate in [f64::INFINITY, f64::NAN] {
            let config = LimitConfig {
                rate,
                burst: 1,
                drop: false,
                by_label_name: None,
                max_distinct_labels: 0,
            };
            assert!(matches!(
                LimitStage::new(&config, &registry),
                Err(ConfigError::InvalidRateOrBurst { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_mode_with_tiny_rate_holds_entries() {
        let registry = Registry::new();
        let stage = LimitStage::new(&config(serde_json::json!({"rate": 1e-20, "burst": 1})), &registry)
            .unwrap();
        let (tx, rx) = queue();
        let mut out = stage.run(rx);
        for e in entries(&[], 2) {
            tx.send(e).await.unwrap();
        }
        assert_eq!(out.recv().await.unwrap().line, "line 0");
        let pending = tokio::time::timeout(Duration::from_secs(3600), out.recv()).await;
        assert!(pending.is_err(), "worker must keep waiting, not close its output");
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_drop_mode() {
        let registry = Registry::new();
        let stage = LimitStage::new(
            &config(serde_json::json!({"rate": 1, "burst": 3, "drop": true})),
            &registry,
        )
        .unwrap();
        let out = process_entries(&stage, entries(&[("app", "a")], 10)).await;
        assert_eq!(out.len(), 3);

        let families = registry.gather();
        assert_eq!(families[0].name, DROPPED_LINES_TOTAL);
        assert_eq!(
            families[0].sample(&label_set([("reason", "ratelimit_drop_stage")])),
            Some(&SampleValue::Counter(7.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_mode_delays_instead_of_dropping() {
        let registry = Registry::new();
        let stage = LimitStage::new(&config(serde_json::json!({"rate": 10, "burst": 1})), &registry).unwrap();
        let start = tokio::time::Instant::now();
        let out = process_entries(&stage, entries(&[], 5)).await;
        assert_eq!(out.len(), 5);
        assert!(start.elapsed() >= Duration::from_millis(399));
        assert!(registry.gather().is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_by_label_mode() {
        let registry = Registry::new();
        let stage = LimitStage::new(
            &config(serde_json::json!({
                "rate": 1, "burst": 2, "drop": true, "by_label_name": "app", "max_distinct_labels": 10
            })),
            &registry,
        )
        .unwrap();
        assert!(logs_contain("max_distinct_labels too low"));

        let mut input = entries(&[("app", "a")], 4);
        input.extend(entries(&[("app", "b")], 3));
        input.extend(entries(&[("other", "x")], 5));
        let out = process_entries(&stage, input).await;
        // two per label value, unlabeled entries are never limited
        assert_eq!(out.len(), 2 + 2 + 5);

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, DROPPED_LINES_BY_LABEL_TOTAL);
        assert_eq!(
            families[0].sample(&label_set([("label_name", "app"), ("label_value", "a")])),
            Some(&SampleValue::Counter(2.0))
        );
        assert_eq!(
            families[0].sample(&label_set([("label_name", "app"), ("label_value", "b")])),
            Some(&SampleValue::Counter(1.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_by_label_rotation_resets_drop_counter() {
        let registry = Registry::new();
        let stage = LimitStage::new(
            &config(serde_json::json!({"rate": 1, "burst": 1, "drop": true, "by_label_name": "app"})),
            &registry,
        )
        .unwrap();

        let mut input = entries(&[("app", "hot")], 2);
        for i in 0..MIN_DISTINCT_LABELS {
            input.push(new_entry(
                &[],
                label_set([("app", format!("v{i}").as_str())]),
                "",
                SystemTime::now(),
            ));
        }
        let out = process_entries(&stage, input).await;
        assert_eq!(out.len(), 1 + MIN_DISTINCT_LABELS);
        // the rotation triggered by the last distinct value cleared the counter
        assert!(registry.dropped_lines_by_label().is_empty());
    }
}
