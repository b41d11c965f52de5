// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, fs, time::SystemTime};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_pipeline::{config, Entry, LabelSet, Pipeline, Registry};

const CONFIG_PATH_VAR: &str = "LOG_PIPELINE_CONFIG";
const LOG_LEVEL_VAR: &str = "LOG_PIPELINE_LOG_LEVEL";
const OUTPUT_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
pub async fn main() {
    let log_level = env::var(LOG_LEVEL_VAR)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let Ok(config_path) = env::var(CONFIG_PATH_VAR) else {
        error!("{CONFIG_PATH_VAR} is not set. Shutting down.");
        return;
    };
    let raw = match fs::read_to_string(&config_path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("Unable to read pipeline config {config_path}: {e}");
            return;
        }
    };
    let configs = match config::from_json(&raw) {
        Ok(configs) => configs,
        Err(e) => {
            error!("Unable to parse pipeline config {config_path}: {e}");
            return;
        }
    };

    let registry = Registry::new();
    let pipeline = match Pipeline::new(&configs, &registry) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Error building pipeline: {e}");
            return;
        }
    };
    info!("Pipeline started with {} stages", pipeline.len());

    let (out_tx, mut out_rx) = mpsc::channel::<Entry>(OUTPUT_QUEUE_CAPACITY);
    let handler = pipeline.wrap(out_tx);

    let writer = tokio::spawn(async move {
        let mut stdout = BufWriter::new(tokio::io::stdout());
        while let Some(entry) = out_rx.recv().await {
            let written = async {
                stdout.write_all(entry.line.as_bytes()).await?;
                stdout.write_all(b"\n").await
            };
            if let Err(e) = written.await {
                error!("Error writing to stdout: {e}");
                return;
            }
        }
        if let Err(e) = stdout.flush().await {
            error!("Error flushing stdout: {e}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let entry = Entry::new(LabelSet::new(), line, SystemTime::now());
                if handler.send(entry).await.is_err() {
                    error!("Pipeline input closed unexpectedly");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error reading stdin: {e}");
                break;
            }
        }
    }

    handler.stop().await;
    if let Err(e) = writer.await {
        error!("Output writer failed: {e}");
    }

    for family in registry.gather() {
        debug!("{} series in {}", family.samples.len(), family.name);
    }
    info!("Pipeline drained, shutting down");
}
