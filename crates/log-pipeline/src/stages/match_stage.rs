// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Selector-based routing.
//!
//! With `action = "keep"` matching entries go through a nested pipeline and
//! everything else passes straight through untouched. With `action = "drop"`
//! matching entries are discarded and counted.

use std::sync::Arc;

use derive_more::Display;
use serde::Deserialize;
use tracing::debug;

use crate::config::StageConfig;
use crate::entry::label_set;
use crate::errors::ConfigError;
use crate::metrics::counter::{Counter, CounterVec};
use crate::metrics::Registry;
use crate::pipeline::Pipeline;
use crate::selector::Selector;
use crate::stage::{queue, run_with, EntryReceiver, Stage};

const DEFAULT_DROP_REASON: &str = "match_stage";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchAction {
    #[default]
    #[display("keep")]
    Keep,
    #[display("drop")]
    Drop,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub pipeline_name: Option<String>,
    #[serde(default)]
    pub action: MatchAction,
    #[serde(default = "default_drop_reason")]
    pub drop_counter_reason: String,
    #[serde(default, alias = "stage")]
    pub stages: Vec<StageConfig>,
}

fn default_drop_reason() -> String {
    DEFAULT_DROP_REASON.to_string()
}

impl MatchConfig {
    /// Checks the options and parses the selector.
    pub fn validate(&self) -> Result<Selector, ConfigError> {
        if self.selector.trim().is_empty() {
            return Err(ConfigError::SelectorRequired);
        }
        match self.action {
            MatchAction::Keep if self.stages.is_empty() => {
                return Err(ConfigError::MatchRequiresStages)
            }
            MatchAction::Drop if !self.stages.is_empty() => {
                return Err(ConfigError::StagesWithDropLine)
            }
            _ => {}
        }
        Selector::parse(&self.selector)
    }
}

enum Route {
    Keep(Pipeline),
    Drop {
        reason: String,
        dropped: Arc<CounterVec>,
    },
}

pub struct MatchStage {
    selector: Arc<Selector>,
    route: Route,
}

impl MatchStage {
    pub fn new(config: &MatchConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let selector = config.validate()?;
        let route = match config.action {
            MatchAction::Keep => {
                let mut pipeline = Pipeline::new(&config.stages, registry)?;
                if let Some(name) = &config.pipeline_name {
                    pipeline = pipeline.with_name(name.clone());
                }
                Route::Keep(pipeline)
            }
            MatchAction::Drop => Route::Drop {
                reason: config.drop_counter_reason.clone(),
                dropped: registry.dropped_lines(),
            },
        };
        debug!(%selector, action = %config.action, "match stage configured");
        Ok(Self {
            selector: Arc::new(selector),
            route,
        })
    }
}

impl Stage for MatchStage {
    fn name(&self) -> &'static str {
        "match"
    }

    fn run(&self, mut input: EntryReceiver) -> EntryReceiver {
        let selector = Arc::clone(&self.selector);
        match &self.route {
            Route::Drop { reason, dropped } => {
                let labels = label_set([("reason", reason.as_str())]);
                let dropped = Arc::clone(dropped);
                run_with(input, move |entry| {
                    if selector.matches(&entry.labels, &entry.line) {
                        dropped.with(&labels, Counter::inc);
                        None
                    } else {
                        Some(entry)
                    }
                })
            }
            Route::Keep(pipeline) => {
                let (out_tx, out_rx) = queue();
                let (nested_tx, nested_rx) = queue();
                let mut processed = pipeline.run(nested_rx);

                let forward_tx = out_tx.clone();
                tokio::spawn(async move {
                    while let Some(entry) = processed.recv().await {
                        if forward_tx.send(entry).await.is_err() {
                            debug!("downstream queue closed, stopping match forwarder");
                            return;
                        }
                    }
                });

                tokio::spawn(async move {
                    while let Some(entry) = input.recv().await {
                        let target = if selector.matches(&entry.labels, &entry.line) {
                            &nested_tx
                        } else {
                            &out_tx
                        };
                        if target.send(entry).await.is_err() {
                            debug!("downstream queue closed, stopping match stage");
                            return;
                        }
                    }
                });
                out_rx
            }
        }
    }
}
