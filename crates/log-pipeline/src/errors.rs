// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for pipeline construction and value conversion.
//!
//! Construction errors are fatal: a pipeline that fails to build must not be
//! started. Runtime conditions never surface as errors; stages log them and
//! keep the entry moving.

/// Errors raised while turning stage descriptions into running stages.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("stage configuration has no stage kind set")]
    EmptyStage,

    #[error("stage configuration sets more than one stage kind: {0}")]
    AmbiguousStage(String),

    #[error("invalid stage config at index {index} ({kind}): {source}")]
    Stage {
        index: usize,
        kind: &'static str,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("selector statement required for match stage")]
    SelectorRequired,

    #[error("invalid selector syntax for match stage: {0}")]
    SelectorSyntax(String),

    #[error("match stage requires at least one additional stage to be defined")]
    MatchRequiresStages,

    #[error("match stage configured to drop entries cannot contain stages")]
    StagesWithDropLine,

    #[error("invalid regular expression '{expression}': {source}")]
    Regex {
        expression: String,
        #[source]
        source: regex::Error,
    },

    #[error("drop stage config must contain at least one of `source`, `expression`, `older_than` or `longer_than`")]
    DropStageEmpty,

    #[error("drop stage config cannot have both `value` and `expression` defined")]
    DropStageValueAndExpression,

    #[error("drop stage config requires `source` when `value` is set")]
    DropStageValueWithoutSource,

    #[error("limit stage requires rate > 0 and burst > 0 (got rate {rate}, burst {burst})")]
    InvalidRateOrBurst { rate: f64, burst: u32 },

    #[error("when rate limiting by label, drop must be true")]
    ByLabelMustDrop,

    #[error("multiline stage config must define `firstline` regular expression")]
    MultilineFirstLineRequired,

    #[error("multiline stage config must define `max_wait_time` greater than zero")]
    MultilineInvalidWaitTime,

    #[error("cri stage config `max_partial_lines` must be greater than zero")]
    CriInvalidMaxPartialLines,

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("invalid byte size '{0}'")]
    InvalidByteSize(String),

    #[error("invalid metric config '{name}': {reason}")]
    Metric { name: String, reason: String },

    #[error("metric '{0}' is already registered")]
    DuplicateMetric(String),

    #[error("{0} stage config cannot be empty")]
    EmptyConfig(&'static str),
}

impl ConfigError {
    pub(crate) fn regex(expression: &str, source: regex::Error) -> Self {
        Self::Regex {
            expression: expression.to_string(),
            source,
        }
    }

    pub(crate) fn metric(name: &str, reason: impl Into<String>) -> Self {
        Self::Metric {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Returned when an extracted value cannot be represented as the requested type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("can't convert {found} to {target}")]
pub struct ConversionError {
    pub found: String,
    pub target: &'static str,
}
