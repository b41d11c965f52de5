// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed stage descriptions.
//!
//! A pipeline is described by a list of [`StageConfig`]s. On the wire each
//! element is an object with exactly one key naming the stage kind:
//!
//! ```json
//! [
//!   {"cri": {}},
//!   {"match": {"selector": "{app=\"api\"}", "stages": [{"json": {"expressions": {"level": ""}}}]}},
//!   {"limit": {"rate": 100, "burst": 200, "drop": true}}
//! ]
//! ```
//!
//! Objects with no recognised key, or more than one, are rejected while
//! deserializing.

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::stages::cri::CriConfig;
use crate::stages::drop::DropConfig;
use crate::stages::json::JsonConfig;
use crate::stages::labels::LabelsConfig;
use crate::stages::limit::LimitConfig;
use crate::stages::match_stage::MatchConfig;
use crate::stages::metrics::MetricsConfig;
use crate::stages::multiline::MultilineConfig;
use crate::stages::output::OutputConfig;
use crate::stages::regex::RegexConfig;
use crate::stages::static_labels::StaticLabelsConfig;

/// One stage of a pipeline. Exactly one kind per instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawStageConfig")]
pub enum StageConfig {
    Match(MatchConfig),
    Drop(DropConfig),
    Limit(LimitConfig),
    Multiline(MultilineConfig),
    Cri(CriConfig),
    Metrics(MetricsConfig),
    Json(JsonConfig),
    Regex(RegexConfig),
    Labels(LabelsConfig),
    StaticLabels(StaticLabelsConfig),
    Output(OutputConfig),
}

impl StageConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StageConfig::Match(_) => "match",
            StageConfig::Drop(_) => "drop",
            StageConfig::Limit(_) => "limit",
            StageConfig::Multiline(_) => "multiline",
            StageConfig::Cri(_) => "cri",
            StageConfig::Metrics(_) => "metrics",
            StageConfig::Json(_) => "json",
            StageConfig::Regex(_) => "regex",
            StageConfig::Labels(_) => "labels",
            StageConfig::StaticLabels(_) => "static_labels",
            StageConfig::Output(_) => "output",
        }
    }
}

/// Wire form of [`StageConfig`]: one optional field per stage kind.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStageConfig {
    #[serde(rename = "match")]
    pub match_config: Option<MatchConfig>,
    pub drop: Option<DropConfig>,
    pub limit: Option<LimitConfig>,
    pub multiline: Option<MultilineConfig>,
    pub cri: Option<CriConfig>,
    pub metrics: Option<MetricsConfig>,
    pub json: Option<JsonConfig>,
    pub regex: Option<RegexConfig>,
    pub labels: Option<LabelsConfig>,
    pub static_labels: Option<StaticLabelsConfig>,
    pub output: Option<OutputConfig>,
}

impl TryFrom<RawStageConfig> for StageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStageConfig) -> Result<Self, Self::Error> {
        let mut arms: Vec<StageConfig> = Vec::with_capacity(1);
        arms.extend(raw.match_config.map(StageConfig::Match));
        arms.extend(raw.drop.map(StageConfig::Drop));
        arms.extend(raw.limit.map(StageConfig::Limit));
        arms.extend(raw.multiline.map(StageConfig::Multiline));
        arms.extend(raw.cri.map(StageConfig::Cri));
        arms.extend(raw.metrics.map(StageConfig::Metrics));
        arms.extend(raw.json.map(StageConfig::Json));
        arms.extend(raw.regex.map(StageConfig::Regex));
        arms.extend(raw.labels.map(StageConfig::Labels));
        arms.extend(raw.static_labels.map(StageConfig::StaticLabels));
        arms.extend(raw.output.map(StageConfig::Output));

        if arms.len() > 1 {
            let kinds: Vec<&str> = arms.iter().map(StageConfig::kind).collect();
            return Err(ConfigError::AmbiguousStage(kinds.join(", ")));
        }
        arms.pop().ok_or(ConfigError::EmptyStage)
    }
}

/// Parses a JSON array of stage descriptions.
pub fn from_json(input: &str) -> Result<Vec<StageConfig>, serde_json::Error> {
    serde_json::from_str(input)
}
