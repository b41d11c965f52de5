// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Pipeline
//!
//! A concurrent engine that routes log entries through chains of stateful
//! stages.
//!
//! ## Architecture
//!
//! - [`entry`]: the record flowing through the pipeline
//! - [`stage`] and [`pipeline`]: the stage contract and how stages chain
//! - [`selector`]: label and line predicates used by match stages
//! - [`token_bucket`] and [`gen_map`]: the limiter and its bounded per-label cache
//! - [`stages`]: match, drop, limit, multiline, cri, metrics and enrichment stages
//! - [`metrics`]: idle-evicting metric vectors and the registry collecting them
//! - [`config`]: the typed stage descriptions a pipeline is built from
//!
//! ## Shutdown
//!
//! Closing a pipeline's input is the only shutdown signal. Each stage drains
//! its queue, flushes what it buffers and closes its output.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![deny(clippy::all)]
#![deny(unused_extern_crates)]

pub mod config;
pub mod entry;
pub mod errors;
pub mod gen_map;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod selector;
pub mod stage;
pub mod stages;
pub mod token_bucket;
pub mod util;

pub use config::StageConfig;
pub use entry::{Entry, LabelSet, Value};
pub use errors::ConfigError;
pub use handler::EntryHandler;
pub use metrics::Registry;
pub use pipeline::Pipeline;
pub use stage::Stage;
