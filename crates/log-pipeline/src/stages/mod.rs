// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stage implementations and the factory turning a [`StageConfig`] into a
//! running [`Stage`].
//!
//! # Stages
//!
//! - **Routing**: [`match_stage`], [`drop`], [`limit`]
//! - **Reassembly**: [`multiline`], [`cri`]
//! - **Side effects**: [`metrics`]
//! - **Enrichment**: [`json`], [`regex`], [`labels`], [`static_labels`], [`output`]

use crate::config::StageConfig;
use crate::errors::ConfigError;
use crate::metrics::Registry;
use crate::stage::{ProcessorStage, Stage};

pub mod cri;
pub mod drop;
pub mod json;
pub mod labels;
pub mod limit;
pub mod match_stage;
pub mod metrics;
pub mod multiline;
pub mod output;
pub mod regex;
pub mod static_labels;

/// Builds one stage. Metric collectors created by the stage are registered
/// with `registry`.
pub fn new_stage(config: &StageConfig, registry: &Registry) -> Result<Box<dyn Stage>, ConfigError> {
    let stage: Box<dyn Stage> = match config {
        StageConfig::Match(c) => Box::new(match_stage::MatchStage::new(c, registry)?),
        StageConfig::Drop(c) => Box::new(self::drop::DropStage::new(c, registry)?),
        StageConfig::Limit(c) => Box::new(limit::LimitStage::new(c, registry)?),
        StageConfig::Multiline(c) => Box::new(multiline::MultilineStage::new(c)?),
        StageConfig::Cri(c) => Box::new(cri::CriStage::new(c)?),
        StageConfig::Metrics(c) => Box::new(self::metrics::Metrics::stage(c, registry)?),
        StageConfig::Json(c) => Box::new(ProcessorStage::new(json::JsonParser::new(c)?)),
        StageConfig::Regex(c) => Box::new(ProcessorStage::new(self::regex::RegexParser::new(c)?)),
        StageConfig::Labels(c) => Box::new(ProcessorStage::new(labels::Labels::new(c)?)),
        StageConfig::StaticLabels(c) => {
            Box::new(ProcessorStage::new(static_labels::StaticLabels::new(c)?))
        }
        StageConfig::Output(c) => Box::new(ProcessorStage::new(output::Output::new(c)?)),
    };
    Ok(stage)
}
