// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Chains stages into an assembly line.
//!
//! ```text
//!   input ──> seed extracted ──> stage 0 ──> stage 1 ──> ... ──> output
//! ```
//!
//! Every arrow is a bounded queue and every box its own tokio task, so
//! entries are pipelined rather than processed one at a time end to end.

use tokio::sync::mpsc::Sender;
use tracing::{debug, debug_span, Instrument};

use crate::config::StageConfig;
use crate::entry::Entry;
use crate::errors::ConfigError;
use crate::handler::EntryHandler;
use crate::metrics::Registry;
use crate::stage::{queue, run_with, EntryReceiver, Stage};
use crate::stages::new_stage;

const ROOT_PIPELINE_NAME: &str = "root";

/// An ordered list of stages. A pipeline is itself a [`Stage`], which is how
/// match stages nest them.
pub struct Pipeline {
    name: Option<String>,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Builds every stage in order. The first failure is returned wrapped in
    /// [`ConfigError::Stage`] with the index of the offending config.
    pub fn new(configs: &[StageConfig], registry: &Registry) -> Result<Self, ConfigError> {
        let stages = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                new_stage(config, registry).map_err(|source| ConfigError::Stage {
                    index,
                    kind: config.kind(),
                    source: Box::new(source),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(stages = stages.len(), "built pipeline");
        Ok(Self { name: None, stages })
    }

    #[must_use]
    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(ROOT_PIPELINE_NAME)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Starts the pipeline and returns a handler feeding it. Every output
    /// entry is forwarded to `next`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wrap(&self, next: Sender<Entry>) -> EntryHandler {
        let (tx, rx) = queue();
        let mut out = self.run(rx);
        let span = debug_span!("pipeline", name = %self.display_name());
        let forwarder = tokio::spawn(
            async move {
                while let Some(entry) = out.recv().await {
                    if next.send(entry).await.is_err() {
                        debug!("next handler closed, stopping pipeline forwarder");
                        return;
                    }
                }
                debug!("pipeline drained");
            }
            .instrument(span),
        );
        EntryHandler::new(tx, forwarder)
    }
}

impl Stage for Pipeline {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn run(&self, input: EntryReceiver) -> EntryReceiver {
        debug!(
            pipeline = %self.display_name(),
            stages = self.stages.len(),
            "starting pipeline workers"
        );
        let seeded = run_with(input, |mut entry| {
            entry.seed_extracted();
            Some(entry)
        });
        self.stages
            .iter()
            .fold(seeded, |previous, stage| stage.run(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::entry::{label_set, Value};
    use crate::stage::test_utils::{new_entry, process_entries};
    use std::time::SystemTime;

    fn pipeline(json: &str) -> Result<Pipeline, ConfigError> {
        let configs = config::from_json(json).expect("valid json");
        Pipeline::new(&configs, &Registry::new())
    }

    #[tokio::test]
    async fn test_empty_pipeline_seeds_extracted_from_labels() {
        let pipeline = pipeline("[]").unwrap();
        assert!(pipeline.is_empty());
        let entry = new_entry(
            &[("app", Value::Int(1)), ("other", Value::Bool(true))],
            label_set([("app", "api")]),
            "line",
            SystemTime::now(),
        );
        let out = process_entries(&pipeline, vec![entry]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].extracted.get("app"), Some(&Value::from("api")));
        assert_eq!(out[0].extracted.get("other"), Some(&Value::Bool(true)));
        assert_eq!(out[0].line, "line");
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let pipeline = pipeline(
            r#"[
                {"regex": {"expression": "level=(?P<level>\\w+)"}},
                {"labels": {"values": {"level": null}}},
                {"static_labels": {"values": {"level": "overridden"}}}
            ]"#,
        )
        .unwrap();
        assert_eq!(pipeline.len(), 3);
        let out = process_entries(
            &pipeline,
            vec![new_entry(&[], label_set([]), "level=warn msg=x", SystemTime::now())],
        )
        .await;
        assert_eq!(out[0].labels, label_set([("level", "overridden")]));
        assert_eq!(out[0].extracted.get("level"), Some(&Value::from("warn")));
    }

    #[test]
    fn test_construction_error_reports_stage_index() {
        let Err(error) = pipeline(
            r#"[
                {"static_labels": {"values": {"a": "b"}}},
                {"limit": {"rate": 0, "burst": 1}}
            ]"#,
        ) else {
            panic!("zero rate must be rejected");
        };
        assert!(matches!(
            error,
            ConfigError::Stage {
                index: 1,
                kind: "limit",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_wrap_forwards_and_stop_drains() {
        let pipeline = pipeline(r#"[{"static_labels": {"values": {"env": "dev"}}}]"#)
            .unwrap()
            .with_name("ingest".into());
        assert_eq!(pipeline.display_name(), "ingest");

        let (next_tx, mut next_rx) = tokio::sync::mpsc::channel(8);
        let handler = pipeline.wrap(next_tx);
        handler
            .send(new_entry(&[], label_set([]), "a", SystemTime::now()))
            .await
            .unwrap();
        handler.stop().await;

        let entry = next_rx.recv().await.unwrap();
        assert_eq!(entry.labels, label_set([("env", "dev")]));
        assert!(next_rx.recv().await.is_none());
    }
}
